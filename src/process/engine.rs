//! Command execution engine
//!
//! Runs allow-listed shell commands, watches their output and reports the
//! first decisive observation: an error, an input prompt, a ready server or
//! the exit. Processes that keep running stay in the live table so the
//! caller can feed them input or stop them later.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

use super::classifier::{detect_error, detect_server_ready, detect_waiting_for_input};
use super::session::{ProcessEvent, ProcessInfo, ProcessSession, ProcessState, SessionTable};
use super::wrapped_child::{kill_group, terminate_group};
use crate::settings::is_command_allowed;
use crate::types::{CommandPatternConfig, ExecutionConfig};

/// How long a new command may run before something decisive is seen
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a follow-up input round-trip waits for a reaction
pub const SEND_INPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a stopped process group gets to exit before SIGKILL
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Output kept per stream during one watch round; older text is dropped
const TRANSCRIPT_LIMIT: usize = 1024 * 1024;

/// Errors from command execution
#[derive(Debug, Error)]
pub enum CommandError {
    /// Command line does not match any allow-list pattern
    #[error("Command not allowed: {0}")]
    NotAllowed(String),

    /// The shell could not be started
    #[error("Failed to spawn command '{command}': {error}")]
    Spawn { command: String, error: String },

    /// Error output was seen or the process exited unsuccessfully
    #[error("Command failed: {reason}{}", format_streams(.stdout, .stderr))]
    Failed {
        reason: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Nothing decisive happened before the deadline
    #[error("Command timed out{}", format_streams(.stdout, .stderr))]
    Timeout { stdout: String, stderr: String },

    /// No live process has this pid
    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    /// Process exists in the table but has already exited
    #[error("Process {0} is no longer running")]
    NotRunning(u32),

    /// Standard input of the process is gone
    #[error("Standard input of process {0} is closed")]
    StdinClosed(u32),

    /// Writing to standard input failed
    #[error("Failed to write to process {pid}: {error}")]
    Write { pid: u32, error: String },

    /// Signalling the process group failed
    #[error("Failed to stop process {pid}: {error}")]
    Signal { pid: u32, error: String },
}

fn format_streams(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    if !stdout.is_empty() {
        out.push_str("\n--- stdout ---\n");
        out.push_str(stdout);
    }
    if !stderr.is_empty() {
        out.push_str("\n--- stderr ---\n");
        out.push_str(stderr);
    }
    out
}

/// Outcome of an execution or input round-trip
///
/// `stdout` and `stderr` hold what was seen during this call only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Process id, usable for follow-up input or stop requests
    pub pid: u32,
    /// State the process was left in
    pub state: ProcessState,
    /// Standard output seen during the call
    pub stdout: String,
    /// Standard error seen during the call
    pub stderr: String,
    /// Exit code when the process has finished
    pub exit_code: Option<i32>,
    /// Whether the process is blocked on a prompt
    pub requires_input: bool,
    /// Last detected prompt
    pub prompt: Option<String>,
}

impl CommandOutput {
    /// Whether the process is still alive after this call
    pub fn is_running(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Deadlines applied by the engine
#[derive(Debug, Clone, Copy)]
struct Timeouts {
    execute: Duration,
    send_input: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            execute: EXECUTE_TIMEOUT,
            send_input: SEND_INPUT_TIMEOUT,
        }
    }
}

/// Which call is watching the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    Execute,
    SendInput,
}

/// Output seen during one watch round
#[derive(Debug, Default)]
struct Transcript {
    stdout: String,
    stderr: String,
}

impl Transcript {
    fn push_stdout(&mut self, chunk: &str) {
        append_bounded(&mut self.stdout, chunk);
    }

    fn push_stderr(&mut self, chunk: &str) {
        append_bounded(&mut self.stderr, chunk);
    }
}

/// Append `chunk`, keeping only the last [`TRANSCRIPT_LIMIT`] bytes
fn append_bounded(text: &mut String, chunk: &str) {
    text.push_str(chunk);
    if text.len() > TRANSCRIPT_LIMIT {
        let mut cut = text.len() - TRANSCRIPT_LIMIT;
        while !text.is_char_boundary(cut) {
            cut += 1;
        }
        text.drain(..cut);
    }
}

/// Allow-listed command runner with a table of live processes
#[derive(Debug)]
pub struct CommandExecutionEngine {
    config: ExecutionConfig,
    sessions: Arc<SessionTable>,
    timeouts: Timeouts,
    stop_grace: Duration,
}

impl CommandExecutionEngine {
    /// Create an engine
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(SessionTable::new()),
            timeouts: Timeouts::default(),
            stop_grace: STOP_GRACE,
        }
    }

    #[cfg(test)]
    fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    #[cfg(test)]
    fn with_timeouts(mut self, execute: Duration, send_input: Duration) -> Self {
        self.timeouts = Timeouts {
            execute,
            send_input,
        };
        self
    }

    /// The allow-list
    pub fn allowed_commands(&self) -> &[CommandPatternConfig] {
        &self.config.allowed_patterns
    }

    /// Snapshot of every live process, ordered by pid
    pub async fn running_processes(&self) -> Vec<ProcessInfo> {
        self.sessions.snapshot().await
    }

    /// Run `command_line` in `cwd` and wait for the first decisive observation
    pub async fn execute_command(
        &self,
        command_line: &str,
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        let config = &self.config;
        if !is_command_allowed(command_line, &config.allowed_patterns) {
            tracing::warn!(command = %command_line, "Command rejected by allow-list");
            return Err(CommandError::NotAllowed(command_line.to_string()));
        }

        let session = ProcessSession::spawn(
            &config.shell,
            command_line,
            cwd,
            &config.env,
            &self.sessions,
        )?;
        session.set_state(ProcessState::Running).await;
        tracing::info!(
            pid = session.pid(),
            command = %command_line,
            cwd = %cwd.display(),
            shell = %config.shell,
            "Spawned command"
        );

        let mut events = session.events().lock().await;
        self.watch(&session, &mut events, Round::Execute).await
    }

    /// Write `text` plus a newline to a live process and watch its reaction
    pub async fn send_input(&self, pid: u32, text: &str) -> Result<CommandOutput, CommandError> {
        let session = self
            .sessions
            .get(pid)
            .ok_or(CommandError::NoSuchProcess(pid))?;
        if !session.is_running().await {
            self.sessions.remove(pid);
            return Err(CommandError::NotRunning(pid));
        }

        let mut events = session.events().lock().await;
        // Output produced while nobody was listening is stale; only an
        // exit matters here.
        while let Ok(event) = events.try_recv() {
            if let ProcessEvent::Exited(_) = event {
                self.sessions.remove(pid);
                return Err(CommandError::NotRunning(pid));
            }
        }

        session.set_state(ProcessState::Running).await;
        session.write_stdin(&format!("{text}\n")).await?;
        tracing::debug!(pid, bytes = text.len() + 1, "Sent input to command");

        self.watch(&session, &mut events, Round::SendInput).await
    }

    /// Terminate the process group of a live process
    ///
    /// Sends SIGTERM, waits up to the stop grace period for the exit and
    /// escalates to SIGKILL when the group is still alive. The session is
    /// only forgotten once the exit is confirmed or the kill was sent.
    pub async fn stop_process(&self, pid: u32) -> Result<ProcessInfo, CommandError> {
        let session = self
            .sessions
            .get(pid)
            .ok_or(CommandError::NoSuchProcess(pid))?;

        if let Err(e) = terminate_group(pid) {
            tracing::error!(pid, error = %e, "Failed to terminate process group");
            if session.has_exited().await {
                self.sessions.remove(pid);
            }
            return Err(CommandError::Signal {
                pid,
                error: e.to_string(),
            });
        }

        if !wait_for_exit(&session, self.stop_grace).await {
            tracing::warn!(pid, "Process group ignored SIGTERM, sending SIGKILL");
            if let Err(e) = kill_group(pid) {
                tracing::debug!(pid, error = %e, "Process group exited before SIGKILL");
            }
            if !wait_for_exit(&session, self.stop_grace).await {
                tracing::warn!(pid, "No exit observed after SIGKILL");
            }
        }

        session.set_state(ProcessState::Stopped).await;
        self.sessions.remove(pid);
        tracing::info!(pid, command = %session.command(), "Stopped command");
        Ok(session.info().await)
    }

    /// Terminate every live process
    pub async fn shutdown(&self) {
        let pids = self.sessions.pids();
        if !pids.is_empty() {
            tracing::info!(count = pids.len(), "Stopping live commands");
        }
        for pid in pids {
            if let Err(e) = self.stop_process(pid).await {
                tracing::warn!(pid, error = %e, "Failed to stop command during shutdown");
                self.sessions.remove(pid);
            }
        }
    }

    /// Consume events until something decisive happens or the round times out
    async fn watch(
        &self,
        session: &ProcessSession,
        events: &mut mpsc::Receiver<ProcessEvent>,
        round: Round,
    ) -> Result<CommandOutput, CommandError> {
        let pid = session.pid();
        let deadline = Instant::now()
            + match round {
                Round::Execute => self.timeouts.execute,
                Round::SendInput => self.timeouts.send_input,
            };
        let mut seen = Transcript::default();

        loop {
            let event = match timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(self
                        .fail(session, "output channel closed", None, seen, false)
                        .await);
                }
                Err(_) => return self.on_timeout(session, round, seen).await,
            };

            match event {
                ProcessEvent::Stdout(chunk) => {
                    seen.push_stdout(&chunk);
                    if detect_error(&seen.stdout, &seen.stderr) {
                        return Err(self
                            .fail(session, "error detected in output", None, seen, true)
                            .await);
                    }

                    let waiting = detect_waiting_for_input(&seen.stdout);
                    if waiting.is_waiting {
                        let state = ProcessState::WaitingForInput {
                            prompt: waiting.prompt.clone(),
                        };
                        session.set_state(state.clone()).await;
                        tracing::debug!(pid, prompt = ?waiting.prompt, "Command waiting for input");
                        return Ok(CommandOutput {
                            pid,
                            state,
                            stdout: seen.stdout,
                            stderr: seen.stderr,
                            exit_code: None,
                            requires_input: true,
                            prompt: waiting.prompt,
                        });
                    }

                    if detect_server_ready(&seen.stdout) {
                        return Ok(self.server_ready(session, seen).await);
                    }
                }
                ProcessEvent::Stderr(chunk) => {
                    seen.push_stderr(&chunk);
                    if detect_error(&seen.stdout, &seen.stderr) {
                        return Err(self
                            .fail(session, "error detected in output", None, seen, true)
                            .await);
                    }
                }
                ProcessEvent::Exited(Some(0)) => {
                    let state = ProcessState::Completed { exit_code: 0 };
                    session.set_state(state.clone()).await;
                    self.sessions.remove(pid);
                    tracing::info!(pid, "Command completed");

                    // A trailing prompt is reported but the process is gone
                    let prompt = detect_waiting_for_input(&seen.stdout).prompt;
                    return Ok(CommandOutput {
                        pid,
                        state,
                        stdout: seen.stdout,
                        stderr: seen.stderr,
                        exit_code: Some(0),
                        requires_input: false,
                        prompt,
                    });
                }
                ProcessEvent::Exited(code) => {
                    let reason = match code {
                        Some(code) => format!("exited with code {code}"),
                        None => "terminated by signal".to_string(),
                    };
                    return Err(self.fail(session, &reason, code, seen, false).await);
                }
            }
        }
    }

    async fn server_ready(&self, session: &ProcessSession, seen: Transcript) -> CommandOutput {
        session.set_state(ProcessState::ServerReady).await;
        tracing::info!(pid = session.pid(), "Command reports ready");
        CommandOutput {
            pid: session.pid(),
            state: ProcessState::ServerReady,
            stdout: seen.stdout,
            stderr: seen.stderr,
            exit_code: None,
            requires_input: false,
            prompt: None,
        }
    }

    async fn on_timeout(
        &self,
        session: &ProcessSession,
        round: Round,
        seen: Transcript,
    ) -> Result<CommandOutput, CommandError> {
        let pid = session.pid();
        match round {
            Round::SendInput => {
                // The process keeps running; report what it said so far
                tracing::debug!(pid, "No reaction to input before deadline");
                Ok(CommandOutput {
                    pid,
                    state: ProcessState::Running,
                    stdout: seen.stdout,
                    stderr: seen.stderr,
                    exit_code: None,
                    requires_input: false,
                    prompt: None,
                })
            }
            Round::Execute => {
                let combined = format!("{}{}", seen.stdout, seen.stderr);
                if detect_server_ready(&combined) {
                    return Ok(self.server_ready(session, seen).await);
                }

                tracing::warn!(pid, command = %session.command(), "Command timed out");
                session
                    .set_state(ProcessState::Failed {
                        reason: "timed out".to_string(),
                    })
                    .await;
                self.terminate_and_purge(pid);
                Err(CommandError::Timeout {
                    stdout: seen.stdout,
                    stderr: seen.stderr,
                })
            }
        }
    }

    /// Mark a session failed and drop it from the live table
    async fn fail(
        &self,
        session: &ProcessSession,
        reason: &str,
        exit_code: Option<i32>,
        seen: Transcript,
        terminate: bool,
    ) -> CommandError {
        let pid = session.pid();
        tracing::warn!(pid, command = %session.command(), reason, ?exit_code, "Command failed");
        session
            .set_state(ProcessState::Failed {
                reason: reason.to_string(),
            })
            .await;

        if terminate {
            self.terminate_and_purge(pid);
        } else {
            self.sessions.remove(pid);
        }

        CommandError::Failed {
            reason: reason.to_string(),
            exit_code,
            stdout: seen.stdout,
            stderr: seen.stderr,
        }
    }

    fn terminate_and_purge(&self, pid: u32) {
        if let Err(e) = terminate_group(pid) {
            tracing::debug!(pid, error = %e, "Process group already gone");
        }
        self.sessions.remove(pid);
    }
}

/// Poll until the session's process has exited or `grace` runs out
async fn wait_for_exit(session: &ProcessSession, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if session.has_exited().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
