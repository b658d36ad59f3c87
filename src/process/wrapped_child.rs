//! Wrapped child process with process group support
//!
//! Provides a small interface over process-wrap's ChildWrapper. Commands are
//! spawned as session leaders (and therefore process-group leaders) so the
//! whole group can be signalled, and so an interactive shell never competes
//! for a controlling terminal.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

#[cfg(unix)]
use process_wrap::tokio::ProcessSession;
use process_wrap::tokio::{ChildWrapper, CommandWrap};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};

/// Flag passed to the shell: interactive, run the next argument
pub const SHELL_FLAGS: &str = "-ic";

/// Piped standard streams taken from a freshly spawned child
#[derive(Debug)]
pub struct ChildPipes {
    /// Writer for the child's stdin
    pub stdin: Option<ChildStdin>,
    /// Reader for the child's stdout
    pub stdout: Option<ChildStdout>,
    /// Reader for the child's stderr
    pub stderr: Option<ChildStderr>,
}

/// Wrapper around Box<dyn ChildWrapper>
#[derive(Debug)]
pub struct WrappedChild {
    inner: Box<dyn ChildWrapper>,
}

impl WrappedChild {
    /// Spawn `<shell> -ic <command_line>` in its own session and process group
    ///
    /// All three standard streams are piped; `env` is added to the
    /// inherited environment.
    pub fn spawn_shell(
        shell: &str,
        command_line: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let mut command = CommandWrap::with_new(shell, |cmd| {
            cmd.arg(SHELL_FLAGS)
                .arg(command_line)
                .current_dir(cwd)
                .envs(env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        });
        #[cfg(unix)]
        command.wrap(ProcessSession);

        command.spawn().map(|inner| Self { inner })
    }

    /// Take the piped standard streams
    ///
    /// Each stream can only be taken once.
    pub fn take_pipes(&mut self) -> ChildPipes {
        ChildPipes {
            stdin: self.inner.stdin().take(),
            stdout: self.inner.stdout().take(),
            stderr: self.inner.stderr().take(),
        }
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        Pin::from(self.inner.wait()).await
    }

    /// Get the process ID (also the process group ID on Unix)
    pub fn id(&self) -> u32 {
        self.inner.id().unwrap_or(0)
    }
}

/// Send SIGTERM to a whole process group
///
/// `pgid` is the pid of the group leader; this is `kill(-pgid, SIGTERM)`.
#[cfg(unix)]
pub fn terminate_group(pgid: u32) -> io::Result<()> {
    signal_group(pgid, nix::sys::signal::Signal::SIGTERM)
}

/// Send SIGKILL to a whole process group
#[cfg(unix)]
pub fn kill_group(pgid: u32) -> io::Result<()> {
    signal_group(pgid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let raw = i32::try_from(pgid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    killpg(Pid::from_raw(raw), signal).map_err(io::Error::from)
}

/// Process groups are a Unix concept
#[cfg(not(unix))]
pub fn terminate_group(_pgid: u32) -> io::Result<()> {
    Err(unsupported())
}

#[cfg(not(unix))]
pub fn kill_group(_pgid: u32) -> io::Result<()> {
    Err(unsupported())
}

#[cfg(not(unix))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signalling is only supported on Unix",
    )
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_spawn_shell_pipes_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut child = WrappedChild::spawn_shell("/bin/sh", "echo wrapped", dir.path(), &HashMap::new())
                .unwrap();
        assert!(child.id() > 0);

        let mut pipes = child.take_pipes();
        assert!(pipes.stdin.is_some());
        let mut out = String::new();
        pipes
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out.trim(), "wrapped");

        let status = child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_terminate_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut child = WrappedChild::spawn_shell("/bin/sh", "sleep 30", dir.path(), &HashMap::new()).unwrap();

        // An interactive shell ignores SIGTERM until it has started the command
        let mut status = None;
        for _ in 0..40 {
            terminate_group(child.id()).ok();
            if let Ok(exit) =
                tokio::time::timeout(std::time::Duration::from_millis(250), child.wait()).await
            {
                status = Some(exit.unwrap());
                break;
            }
        }
        assert!(!status.expect("process group survived SIGTERM").success());
    }

    #[tokio::test]
    async fn test_kill_group_and_dead_group() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut child =
            WrappedChild::spawn_shell("/bin/sh", "trap '' TERM; sleep 30", dir.path(), &HashMap::new())
                .unwrap();
        let pgid = child.id();

        kill_group(pgid).unwrap();
        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("SIGKILL did not end the group")
            .unwrap();
        assert!(!status.success());

        // Once orphaned members are reaped there is nothing left to signal
        let mut gone = false;
        for _ in 0..100 {
            if terminate_group(pgid).is_err() {
                gone = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(gone);
    }
}
