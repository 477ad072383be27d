use nix::{sys::signal::Signal, unistd::Pid};
use std::fmt;

/// exit status recorded for jobs that did not terminate through a normal exit
pub const ABNORMAL_EXIT_STATUS: i32 = -1;

/// index of a job in the dispatcher's job table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub usize);

/// index of a host in the dispatcher's host table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0 + 1)
    }
}

/// How a reaped process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(Signal),
}

impl Termination {
    /// numeric status shown in the report, the sentinel for anything but a normal exit
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(_) => ABNORMAL_EXIT_STATUS,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub command: String,
    pub process_id: Option<Pid>,
    pub assigned_host: Option<HostId>,
    pub termination: Option<Termination>,
}

impl Job {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            process_id: None,
            assigned_host: None,
            termination: None,
        }
    }

    /// not started yet
    pub fn is_pending(&self) -> bool {
        self.process_id.is_none()
    }

    /// started and not reaped yet
    pub fn is_outstanding(&self) -> bool {
        self.process_id.is_some() && self.termination.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.termination.is_some()
    }

    /// only meaningful once the job is finished
    pub fn exit_status(&self) -> Option<i32> {
        self.termination.as_ref().map(Termination::exit_status)
    }
}

#[derive(Debug, Clone)]
pub struct Host {
    pub address: String,
    pub current_job: Option<JobId>,
    pub jobs_run: usize,
}

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            current_job: None,
            jobs_run: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.current_job.is_none()
    }
}
