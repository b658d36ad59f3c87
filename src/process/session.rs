//! Live command process sessions
//!
//! A [`ProcessSession`] owns one spawned shell command. Reader tasks forward
//! every output chunk as a [`ProcessEvent`] on a bounded channel; a waiter
//! task reports the exit and drops the session from the [`SessionTable`].
//! Whoever currently drives the session (the initial execution or a
//! follow-up input round-trip) holds the event receiver. While nobody
//! listens, events queue up to [`EVENT_CAPACITY`] and further output is
//! discarded so the pipes never stall the process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, mpsc};

use super::engine::CommandError;
use super::wrapped_child::WrappedChild;

/// Read buffer size for output pipes
const READ_CHUNK_SIZE: usize = 8192;

/// Events buffered per session while nobody listens
pub const EVENT_CAPACITY: usize = 256;

/// How long the waiter tries to deliver the exit event to a full channel
const EXIT_NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the waiter lets readers drain after the process exits
///
/// A detached grandchild can keep a pipe open forever.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Observable state of a command process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProcessState {
    /// Process is being started
    Spawning,
    /// Process is running and nothing notable has been seen
    Running,
    /// Process printed a prompt and is blocked on stdin
    WaitingForInput {
        /// Prompt text as printed
        prompt: Option<String>,
    },
    /// Process announced a ready server or file watcher
    ServerReady,
    /// Process exited successfully
    Completed {
        /// Exit code (always 0)
        exit_code: i32,
    },
    /// Process failed: error output, non-zero exit or timeout
    Failed {
        /// Why the process is considered failed
        reason: String,
    },
    /// Process group was terminated on request
    Stopped,
}

impl ProcessState {
    /// Whether the state ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Stopped
        )
    }

    /// Get the status string for API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::WaitingForInput { .. } => "waitingForInput",
            Self::ServerReady => "serverReady",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Stopped => "stopped",
        }
    }
}

/// Something that happened to a live process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of standard output
    Stdout(String),
    /// A chunk of standard error
    Stderr(String),
    /// The process exited; `None` when killed by a signal
    Exited(Option<i32>),
}

/// Mutable bookkeeping of a session
#[derive(Debug)]
struct SessionStatus {
    state: ProcessState,
    has_error: bool,
    exit_code: Option<i32>,
    exited: bool,
}

/// One spawned shell command
#[derive(Debug)]
pub struct ProcessSession {
    pid: u32,
    command: String,
    started_at: DateTime<Local>,
    status: RwLock<SessionStatus>,
    stdin: Mutex<Option<ChildStdin>>,
    events: Mutex<mpsc::Receiver<ProcessEvent>>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    /// OS process id (and process group id)
    pub pid: u32,
    /// Command line as requested
    pub command: String,
    /// Spawn time
    pub started_at: DateTime<Local>,
    /// Current state
    pub state: ProcessState,
    /// Whether error output was seen
    pub has_error: bool,
    /// Exit code once known
    pub exit_code: Option<i32>,
}

impl ProcessSession {
    /// Spawn `<shell> -ic <command_line>` with `env` and register it in `table`
    ///
    /// The session is registered before any reader or waiter task starts,
    /// so the waiter's removal can never precede the insertion.
    pub fn spawn(
        shell: &str,
        command_line: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
        table: &Arc<SessionTable>,
    ) -> Result<Arc<Self>, CommandError> {
        let mut child = WrappedChild::spawn_shell(shell, command_line, cwd, env).map_err(|e| {
            CommandError::Spawn {
                command: command_line.to_string(),
                error: e.to_string(),
            }
        })?;
        let pid = child.id();
        let pipes = child.take_pipes();
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        let session = Arc::new(Self {
            pid,
            command: command_line.to_string(),
            started_at: Local::now(),
            status: RwLock::new(SessionStatus {
                state: ProcessState::Spawning,
                has_error: false,
                exit_code: None,
                exited: false,
            }),
            stdin: Mutex::new(pipes.stdin),
            events: Mutex::new(rx),
        });
        table.register(Arc::clone(&session));

        let mut readers = Vec::new();
        if let Some(stdout) = pipes.stdout {
            readers.push(tokio::spawn(pump_output(
                stdout,
                pid,
                tx.clone(),
                ProcessEvent::Stdout,
            )));
        }
        if let Some(stderr) = pipes.stderr {
            readers.push(tokio::spawn(pump_output(
                stderr,
                pid,
                tx.clone(),
                ProcessEvent::Stderr,
            )));
        }

        let waiter_session = Arc::clone(&session);
        let waiter_table = Arc::clone(table);
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(pid, error = %e, "Failed to wait for command process");
                    None
                }
            };

            if tokio::time::timeout(READER_DRAIN_TIMEOUT, futures::future::join_all(readers))
                .await
                .is_err()
            {
                tracing::debug!(pid, "Output pipes still open after exit");
            }

            waiter_session.mark_exited(exit_code).await;
            tracing::debug!(pid, ?exit_code, "Command process exited");
            // Nobody may be listening; the exit is already recorded in the status
            if tx
                .send_timeout(ProcessEvent::Exited(exit_code), EXIT_NOTIFY_TIMEOUT)
                .await
                .is_err()
            {
                tracing::debug!(pid, "Exit event not delivered");
            }
            waiter_table.remove(pid);
        });

        Ok(session)
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Command line as requested
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Event receiver; lock it to become the session's listener
    pub fn events(&self) -> &Mutex<mpsc::Receiver<ProcessEvent>> {
        &self.events
    }

    /// Whether the session can still accept input
    pub async fn is_running(&self) -> bool {
        let status = self.status.read().await;
        !status.exited && !status.state.is_terminal()
    }

    /// Whether the process has exited and its output pipes are drained
    pub async fn has_exited(&self) -> bool {
        self.status.read().await.exited
    }

    /// Move to a new state
    pub async fn set_state(&self, state: ProcessState) {
        let mut status = self.status.write().await;
        if matches!(state, ProcessState::Failed { .. }) {
            status.has_error = true;
        }
        status.state = state;
    }

    /// Record the process exit
    async fn mark_exited(&self, exit_code: Option<i32>) {
        let mut status = self.status.write().await;
        status.exited = true;
        status.exit_code = exit_code;
    }

    /// Write text to the process's standard input
    pub async fn write_stdin(&self, text: &str) -> Result<(), CommandError> {
        let mut stdin = self.stdin.lock().await;
        let Some(writer) = stdin.as_mut() else {
            return Err(CommandError::StdinClosed(self.pid));
        };

        let write = async {
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await
        };
        write.await.map_err(|e| CommandError::Write {
            pid: self.pid,
            error: e.to_string(),
        })
    }

    /// Snapshot for listings
    pub async fn info(&self) -> ProcessInfo {
        let status = self.status.read().await;
        ProcessInfo {
            pid: self.pid,
            command: self.command.clone(),
            started_at: self.started_at,
            state: status.state.clone(),
            has_error: status.has_error,
            exit_code: status.exit_code,
        }
    }
}

/// Forward one output pipe into the event channel
///
/// The pipe is always drained; chunks that do not fit in the channel are
/// dropped.
async fn pump_output<R>(
    mut reader: R,
    pid: u32,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut pending = Vec::new();
    let mut dropped = 0usize;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(pid, error = %e, "Output pipe read failed");
                break;
            }
        };
        pending.extend_from_slice(&buf[..n]);
        let chunk = take_utf8(&mut pending);
        if chunk.is_empty() {
            continue;
        }

        match tx.try_send(wrap(chunk)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(pid, "Event receiver dropped");
            }
        }
    }

    if !pending.is_empty() {
        let tail = String::from_utf8_lossy(&pending).into_owned();
        if tx.try_send(wrap(tail)).is_err() {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::debug!(pid, dropped, "Discarded output chunks nobody was listening for");
    }
}

/// Decode the valid UTF-8 prefix of `pending`, keeping an incomplete
/// trailing sequence for the next read
fn take_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let rest = pending.split_off(valid);
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

/// Table of live sessions keyed by pid
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<u32, Arc<ProcessSession>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session
    pub fn register(&self, session: Arc<ProcessSession>) {
        self.sessions.insert(session.pid(), session);
    }

    /// Look up a session by pid
    pub fn get(&self, pid: u32) -> Option<Arc<ProcessSession>> {
        self.sessions.get(&pid).map(|s| Arc::clone(s.value()))
    }

    /// Remove a session by pid
    pub fn remove(&self, pid: u32) -> Option<Arc<ProcessSession>> {
        self.sessions.remove(&pid).map(|(_, s)| s)
    }

    /// All tracked pids
    pub fn pids(&self) -> Vec<u32> {
        self.sessions.iter().map(|r| *r.key()).collect()
    }

    /// Snapshot every tracked session, ordered by pid
    pub async fn snapshot(&self) -> Vec<ProcessInfo> {
        let sessions: Vec<Arc<ProcessSession>> =
            self.sessions.iter().map(|r| Arc::clone(r.value())).collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by_key(|info| info.pid);
        infos
    }
}
