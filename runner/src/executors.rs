mod local;
mod ssh;

use crate::{
    config::{RunnerConfig, TransportKind},
    job::{Termination, ABNORMAL_EXIT_STATUS},
};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to spawn [{command}] for host {host}: {source}")]
    Spawn {
        command: String,
        host: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum HostCommandError {
    #[error("Failed to spawn host command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Failed to wait for host command: {0}")]
    Wait(#[source] std::io::Error),
    #[error("Host command did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Host command exited with status {}", .0.exit_status())]
    Failed(Termination),
}

/// Starts a job's command for a host as a child process that runs concurrently with the caller.
///
/// The child is never waited on here: its exit is only observed through the reaper, so the
/// returned pid is the only handle to it.
pub trait Launcher {
    fn launch(&mut self, command: &str, host: &str) -> Result<Pid, LaunchError>;

    /// ask a launched process to end, used when the run is cancelled
    ///
    /// A stopped process only acts on SIGTERM once continued, so SIGCONT follows it.
    fn terminate(&mut self, pid: Pid) -> nix::Result<()> {
        kill(pid, Signal::SIGTERM)?;
        kill(pid, Signal::SIGCONT)
    }
}

/// All transports a job can be sent through
/// (kept as an enum to match the closed set of `TransportKind`)
#[derive(Clone, Debug)]
pub enum Executors {
    Ssh(SshExecutor),
    Local(LocalExecutor),
}

impl Executors {
    pub fn load(config: &RunnerConfig) -> Self {
        match config.transport {
            TransportKind::Ssh => Self::Ssh(SshExecutor::load(&config.ssh)),
            TransportKind::Local => Self::Local(LocalExecutor),
        }
    }

    fn command(&self, command: &str, host: &str) -> Command {
        match self {
            Self::Ssh(executor) => executor.command(command, host),
            Self::Local(executor) => executor.command(command, host),
        }
    }

    /// run a command on a host and block until it ends, used for setup and cleanup
    pub fn run_blocking(
        &self,
        command: &str,
        host: &str,
        timeout: Duration,
    ) -> Result<(), HostCommandError> {
        let mut child = self
            .command(command, host)
            .stdin(Stdio::null())
            .spawn()
            .map_err(HostCommandError::Spawn)?;

        debug!(host = host, pid = child.id(), "Waiting on host command [{command}]");

        match child.wait_timeout(timeout).map_err(HostCommandError::Wait)? {
            Some(status) => {
                let termination = termination_from_status(status);

                if termination.success() {
                    Ok(())
                } else {
                    Err(HostCommandError::Failed(termination))
                }
            }
            None => {
                // child hasn't exited yet
                if let Err(error) = child.kill() {
                    warn!(host = host, error = ?error, "Failed to kill timed out host command");
                }
                if let Err(error) = child.wait() {
                    warn!(host = host, error = ?error, "Failed to reap killed host command");
                }

                Err(HostCommandError::Timeout(timeout))
            }
        }
    }
}

impl Launcher for Executors {
    fn launch(&mut self, command: &str, host: &str) -> Result<Pid, LaunchError> {
        let child = self
            .command(command, host)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                command: command.to_owned(),
                host: host.to_owned(),
                source,
            })?;

        // dropping the handle neither kills nor reaps the child
        Ok(Pid::from_raw(child.id() as i32))
    }
}

pub fn termination_from_status(status: ExitStatus) -> Termination {
    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(signal)) => match Signal::try_from(signal) {
            Ok(signal) => Termination::Signaled(signal),
            Err(_) => Termination::Exited(ABNORMAL_EXIT_STATUS),
        },
        (None, None) => Termination::Exited(ABNORMAL_EXIT_STATUS),
    }
}
