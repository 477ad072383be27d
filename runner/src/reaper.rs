use crate::{job::Termination, shutdown::ShutdownSignal};
use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::Pid,
};
use std::{thread, time::Duration};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum ReapError {
    #[error("No child processes left to wait for")]
    NoChildren,
    #[error("Failed to wait for child processes: {0}")]
    Wait(#[from] Errno),
}

/// A state change of some child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapEvent {
    /// the process is gone, either through exit or a signal
    Terminated(Pid, Termination),
    /// the process was stopped and is still alive
    Stopped(Pid, Signal),
    Continued(Pid),
    /// the wait was cut short by a signal or a shutdown request
    Interrupted,
    /// any other wait status (ptrace events), carries nothing for the run loop
    Ignored,
}

/// Blocks until any outstanding child process changes state
pub trait Reaper {
    fn reap(&mut self) -> Result<ReapEvent, ReapError>;
}

/// interval between two non-blocking wait attempts
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Reaper over `waitpid(-1, ...)`, it observes every child of the current process.
///
/// The wait is polled with `WNOHANG` so a shutdown request raised at any point, including
/// right before the wait starts, is seen within one `POLL_INTERVAL`.
#[derive(Debug)]
pub struct WaitReaper {
    shutdown: ShutdownSignal,
    interval: Duration,
    shutdown_reported: bool,
}

impl WaitReaper {
    pub fn new(shutdown: ShutdownSignal) -> Self {
        Self {
            shutdown,
            interval: POLL_INTERVAL,
            shutdown_reported: false,
        }
    }
}

impl Reaper for WaitReaper {
    fn reap(&mut self) -> Result<ReapEvent, ReapError> {
        let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED | WaitPidFlag::WNOHANG;

        loop {
            // pid -1 waits for any child
            let status = match waitpid(Pid::from_raw(-1), Some(flags)) {
                Ok(WaitStatus::StillAlive) => {
                    // report a shutdown request once, afterwards keep waiting for the children
                    if !self.shutdown_reported && self.shutdown.is_requested() {
                        self.shutdown_reported = true;

                        return Ok(ReapEvent::Interrupted);
                    }

                    thread::sleep(self.interval);
                    continue;
                }
                Ok(status) => status,
                Err(Errno::EINTR) => return Ok(ReapEvent::Interrupted),
                Err(Errno::ECHILD) => return Err(ReapError::NoChildren),
                Err(errno) => return Err(ReapError::Wait(errno)),
            };

            trace!(status = ?status, "Wait returned");

            return Ok(match status {
                WaitStatus::Exited(pid, code) => {
                    ReapEvent::Terminated(pid, Termination::Exited(code))
                }
                WaitStatus::Signaled(pid, signal, _core_dumped) => {
                    ReapEvent::Terminated(pid, Termination::Signaled(signal))
                }
                WaitStatus::Stopped(pid, signal) => ReapEvent::Stopped(pid, signal),
                WaitStatus::Continued(pid) => ReapEvent::Continued(pid),
                _ => ReapEvent::Ignored,
            });
        }
    }
}
