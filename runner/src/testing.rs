//! Simulated processes for exercising the dispatcher and the run loop without forking.
//!
//! Commands are read as `;` separated directives: `sleep N` sets the simulated runtime,
//! `exit N` the exit code, `kill` ends the process with SIGKILL and `stop` reports one
//! stop event before the process terminates.

use crate::{
    executors::{LaunchError, Launcher},
    job::Termination,
    reaper::{ReapError, ReapEvent, Reaper},
};
use nix::{sys::signal::Signal, unistd::Pid};
use std::{cell::RefCell, collections::HashMap, collections::VecDeque, io, rc::Rc};

#[derive(Debug)]
struct Process {
    pid: Pid,
    command: String,
    finish_at: u64,
    stop_pending: bool,
    signal: Option<Signal>,
}

#[derive(Debug)]
pub struct Cluster {
    now: u64,
    next_pid: i32,
    launched: Vec<(String, String, Pid)>,
    running: Vec<Process>,
    failures: HashMap<String, usize>,
    terminated: Vec<Pid>,
    injected: VecDeque<ReapEvent>,
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            now: 0,
            next_pid: 1000,
            launched: Vec::new(),
            running: Vec::new(),
            failures: HashMap::new(),
            terminated: Vec::new(),
            injected: VecDeque::new(),
        }
    }
}

fn directive(command: &str, name: &str) -> Option<String> {
    command
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(name))
        .map(|rest| rest.trim().to_owned())
}

fn duration(command: &str) -> u64 {
    directive(command, "sleep")
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

fn termination(command: &str) -> Termination {
    if directive(command, "kill").is_some() {
        Termination::Signaled(Signal::SIGKILL)
    } else {
        Termination::Exited(
            directive(command, "exit")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
        )
    }
}

/// creates a launcher and a reaper sharing one simulated cluster
pub fn cluster() -> (FakeLauncher, FakeReaper) {
    let state = Rc::new(RefCell::new(Cluster::default()));

    (
        FakeLauncher {
            state: state.clone(),
        },
        FakeReaper { state },
    )
}

#[derive(Debug, Clone)]
pub struct FakeLauncher {
    state: Rc<RefCell<Cluster>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        cluster().0
    }
}

impl FakeLauncher {
    /// make the next `times` launches of `command` fail
    pub fn fail_times(&mut self, command: &str, times: usize) {
        self.state
            .borrow_mut()
            .failures
            .insert(command.to_owned(), times);
    }

    /// (command, host, pid) in launch order
    pub fn launched(&self) -> Vec<(String, String, Pid)> {
        self.state.borrow().launched.clone()
    }

    pub fn terminated(&self) -> Vec<Pid> {
        self.state.borrow().terminated.clone()
    }

    /// queue an event the reaper returns before any simulated process event
    pub fn inject(&self, event: ReapEvent) {
        self.state.borrow_mut().injected.push_back(event);
    }
}

impl Launcher for FakeLauncher {
    fn launch(&mut self, command: &str, host: &str) -> Result<Pid, LaunchError> {
        let mut state = self.state.borrow_mut();

        if let Some(remaining) = state.failures.get_mut(command) {
            if *remaining > 0 {
                *remaining -= 1;

                return Err(LaunchError::Spawn {
                    command: command.to_owned(),
                    host: host.to_owned(),
                    source: io::Error::new(io::ErrorKind::Other, "simulated fork failure"),
                });
            }
        }

        let pid = Pid::from_raw(state.next_pid);
        state.next_pid += 1;

        let finish_at = state.now + duration(command);
        state.running.push(Process {
            pid,
            command: command.to_owned(),
            finish_at,
            stop_pending: directive(command, "stop").is_some(),
            signal: None,
        });
        state
            .launched
            .push((command.to_owned(), host.to_owned(), pid));

        Ok(pid)
    }

    fn terminate(&mut self, pid: Pid) -> nix::Result<()> {
        let mut state = self.state.borrow_mut();
        let now = state.now;

        state.terminated.push(pid);
        match state.running.iter_mut().find(|process| process.pid == pid) {
            Some(process) => {
                process.finish_at = now;
                process.stop_pending = false;
                process.signal = Some(Signal::SIGTERM);

                Ok(())
            }
            None => Err(nix::errno::Errno::ESRCH),
        }
    }
}

#[derive(Debug)]
pub struct FakeReaper {
    state: Rc<RefCell<Cluster>>,
}

impl Reaper for FakeReaper {
    fn reap(&mut self) -> Result<ReapEvent, ReapError> {
        let mut state = self.state.borrow_mut();

        if let Some(event) = state.injected.pop_front() {
            return Ok(event);
        }

        let index = state
            .running
            .iter()
            .enumerate()
            .min_by_key(|(_, process)| (process.finish_at, process.pid.as_raw()))
            .map(|(index, _)| index)
            .ok_or(ReapError::NoChildren)?;

        if state.running[index].stop_pending {
            state.running[index].stop_pending = false;

            return Ok(ReapEvent::Stopped(state.running[index].pid, Signal::SIGTSTP));
        }

        let process = state.running.remove(index);
        state.now = state.now.max(process.finish_at);

        let termination = match process.signal {
            Some(signal) => Termination::Signaled(signal),
            None => termination(&process.command),
        };

        Ok(ReapEvent::Terminated(process.pid, termination))
    }
}
