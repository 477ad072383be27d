use crate::{
    config::{LaunchFailurePolicy, RunnerConfig},
    dispatcher::{DispatchError, Dispatcher},
    executors::{Executors, HostCommandError, Launcher},
    job::{HostId, Termination},
    reaper::{ReapError, ReapEvent, Reaper, WaitReaper},
    report::Report,
    shutdown::ShutdownSignal,
    source::{read_lines, SourceError},
};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to load job or host list: {0}")]
    SourceLoadFailure(#[from] SourceError),
    #[error("Setup command failed on host {host}: {source}")]
    HostSetupFailure {
        host: String,
        #[source]
        source: HostCommandError,
    },
}

/// Counters collected while the run loop is going
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub launch_failures: usize,
    pub failed_jobs: usize,
    pub spurious_reaps: usize,
    /// jobs left unstarted because no outstanding process remained to trigger another assignment
    pub stalled: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// processes are outstanding, the next step blocks on the reaper
    Running,
    /// nothing is outstanding any more, the report can be built
    Drained,
}

/// Runs the assign-wait-reconcile-refill cycle over a dispatcher
#[derive(Debug)]
pub struct Driver<L, R> {
    dispatcher: Dispatcher<L>,
    reaper: R,
    shutdown: ShutdownSignal,
    summary: RunSummary,
}

impl<L: Launcher, R: Reaper> Driver<L, R> {
    pub fn new(dispatcher: Dispatcher<L>, reaper: R, shutdown: ShutdownSignal) -> Self {
        Self {
            dispatcher,
            reaper,
            shutdown,
            summary: RunSummary::default(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<L> {
        &self.dispatcher
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Offer one job to each host in pool order, at most `min(hosts, jobs)` attempts.
    ///
    /// Returns the number of failed attempts, which are logged but never abort the run.
    pub fn initial_fill(&mut self) -> usize {
        self.observe_shutdown();
        if self.summary.cancelled {
            info!("Shutdown requested before the first assignment, no job is started");

            return 0;
        }

        let attempts = self.dispatcher.hosts().len().min(self.dispatcher.jobs().len());
        let mut failures = 0;

        for index in 0..attempts {
            if !self.assign(HostId(index)) {
                failures += 1;
            }
        }

        if failures > 0 {
            error!("Unable to assign {failures} of {attempts} initial jobs");
        }

        failures
    }

    pub fn state(&self) -> RunState {
        if self.dispatcher.outstanding() > 0 {
            RunState::Running
        } else {
            RunState::Drained
        }
    }

    /// Wait for one process event and handle it completely before returning.
    pub fn step(&mut self) -> RunState {
        if self.state() == RunState::Drained {
            return RunState::Drained;
        }

        self.observe_shutdown();

        match self.reaper.reap() {
            Ok(ReapEvent::Terminated(pid, termination)) => self.on_terminated(pid, termination),
            Ok(ReapEvent::Stopped(pid, signal)) => {
                info!(
                    pid = %pid,
                    signal = ?signal,
                    "Job process stopped, still waiting for it to terminate"
                );
            }
            Ok(ReapEvent::Continued(pid)) => {
                debug!(pid = %pid, "Job process continued");
            }
            Ok(ReapEvent::Interrupted) => {
                trace!("Wait interrupted by a signal");
            }
            Ok(ReapEvent::Ignored) => {
                debug!("Ignoring unrelated wait status");
            }
            Err(ReapError::NoChildren) => {
                error!(
                    outstanding = self.dispatcher.outstanding(),
                    "No child processes left although jobs are outstanding, giving up on them"
                );

                return RunState::Drained;
            }
            Err(error) => {
                error!(error = ?error, "Waiting for jobs failed: {error}");

                return RunState::Drained;
            }
        }

        self.state()
    }

    /// initial fill, then step until drained
    #[instrument(skip(self), level = "info")]
    pub fn run(mut self) -> Report {
        info!(
            jobs = self.dispatcher.jobs().len(),
            hosts = self.dispatcher.hosts().len(),
            policy = ?self.dispatcher.policy(),
            "Starting run"
        );

        self.initial_fill();

        while self.step() == RunState::Running {}

        self.finish()
    }

    /// build the report, flagging jobs that can no longer be started
    pub fn finish(mut self) -> Report {
        let unstarted = self
            .dispatcher
            .jobs()
            .iter()
            .filter(|job| job.is_pending())
            .count();

        if unstarted > 0 {
            if self.summary.cancelled {
                info!("Run cancelled with {unstarted} jobs never started");
            } else {
                self.summary.stalled = true;
                warn!(
                    "No process is left to trigger another assignment, \
                     {unstarted} jobs were never started"
                );
            }
        }

        info!(summary = ?self.summary, "Run drained");

        let (jobs, hosts) = self.dispatcher.into_parts();

        Report::new(&jobs, &hosts, self.summary)
    }

    fn on_terminated(&mut self, pid: Pid, termination: Termination) {
        let job_id = match self.dispatcher.reconcile(pid, termination) {
            Ok(job_id) => job_id,
            Err(error) => {
                warn!(pid = %pid, "Ignoring reaped process: {error}");
                self.summary.spurious_reaps += 1;

                return;
            }
        };

        let job = self.dispatcher.job(job_id);
        let Some(host_id) = job.assigned_host else {
            error!(pid = %pid, job = %job_id, "Reconciled job has no host, not refilling");

            return;
        };
        let host = &self.dispatcher.host(host_id).address;

        match termination {
            Termination::Exited(0) => {
                info!(
                    pid = %pid,
                    job = %job_id,
                    host = %host,
                    "Job [{}] finished",
                    job.command
                );
            }
            Termination::Exited(code) => {
                warn!(
                    pid = %pid,
                    job = %job_id,
                    host = %host,
                    "Job [{}] failed with exit status {code}",
                    job.command
                );
                self.summary.failed_jobs += 1;
            }
            Termination::Signaled(signal) => {
                warn!(
                    pid = %pid,
                    job = %job_id,
                    host = %host,
                    signal = ?signal,
                    "Job [{}] was terminated by a signal",
                    job.command
                );
                self.summary.failed_jobs += 1;
            }
        }

        self.observe_shutdown();

        if !self.summary.cancelled {
            self.refill(host_id);
        }
    }

    /// hand the next job to a host that just freed up
    fn refill(&mut self, host_id: HostId) {
        if !self.assign(host_id) {
            return;
        }

        // hosts left idle by earlier launch failures get another chance
        if self.dispatcher.policy() == LaunchFailurePolicy::Retry {
            for idle in self.dispatcher.free_hosts() {
                if !self.dispatcher.has_pending() || !self.assign(idle) {
                    break;
                }
            }
        }
    }

    /// returns true if a job was started on the host
    ///
    /// Under `LaunchFailurePolicy::Skip` the host keeps getting the following jobs until one
    /// launches or the queue runs dry, so only the failed jobs stay unstarted.
    fn assign(&mut self, host_id: HostId) -> bool {
        loop {
            match self.try_assign(host_id) {
                Some(started) => return started,
                None if self.dispatcher.has_pending() => continue,
                None => return false,
            }
        }
    }

    /// `None` for a launch failure that should be followed by another attempt on the same host
    fn try_assign(&mut self, host_id: HostId) -> Option<bool> {
        let started = match self.dispatcher.assign_next(host_id) {
            Ok((job_id, pid)) => {
                info!(
                    pid = %pid,
                    job = %job_id,
                    host = %self.dispatcher.host(host_id).address,
                    "Started job [{}]",
                    self.dispatcher.job(job_id).command
                );

                true
            }
            Err(DispatchError::NoPendingJobs) => {
                debug!(
                    host = %self.dispatcher.host(host_id).address,
                    "No pending jobs left for host"
                );

                false
            }
            Err(error @ DispatchError::LaunchFailure(_)) => {
                error!(host = %self.dispatcher.host(host_id).address, "{error}");
                self.summary.launch_failures += 1;

                if self.dispatcher.policy() == LaunchFailurePolicy::Skip {
                    return None;
                }

                false
            }
            Err(error) => {
                error!(
                    host = %self.dispatcher.host(host_id).address,
                    "Skipping assignment: {error}"
                );

                false
            }
        };

        Some(started)
    }

    /// on the first observed shutdown request, stop assigning and terminate outstanding jobs
    fn observe_shutdown(&mut self) {
        if self.summary.cancelled || !self.shutdown.is_requested() {
            return;
        }

        self.summary.cancelled = true;
        let outstanding = self.dispatcher.outstanding_pids();
        warn!(
            outstanding = outstanding.len(),
            "Shutdown requested, terminating outstanding jobs and waiting for them"
        );

        for pid in outstanding {
            if let Err(errno) = self.dispatcher.launcher_mut().terminate(pid) {
                warn!(pid = %pid, errno = ?errno, "Failed to terminate job process");
            }
        }
    }
}

/// Load the sources, prepare every host, run all jobs through `executors` and clean up.
pub fn execute(config: &RunnerConfig, shutdown: ShutdownSignal) -> Result<Report, DriverError> {
    let commands = read_lines(&config.jobs)?;
    let addresses = read_lines(&config.hosts)?;
    let executors = Executors::load(config);

    if addresses.is_empty() && !commands.is_empty() {
        warn!("Host list is empty, none of the {} jobs can run", commands.len());
    }

    // hosts that went through setup, cleanup only runs on these
    let mut prepared = addresses.len();

    if let Some(setup) = &config.setup {
        for (index, host) in addresses.iter().enumerate() {
            if shutdown.is_requested() {
                warn!(host = %host, "Shutdown requested, skipping setup of the remaining hosts");
                prepared = index;

                break;
            }

            info!(host = %host, "Running setup");
            executors
                .run_blocking(setup, host, config.host_command_timeout())
                .map_err(|source| DriverError::HostSetupFailure {
                    host: host.clone(),
                    source,
                })?;
        }
    }

    let dispatcher = Dispatcher::new(
        commands,
        addresses.iter().cloned(),
        executors.clone(),
        config.on_launch_failure,
    );
    let report = Driver::new(dispatcher, WaitReaper::new(shutdown.clone()), shutdown).run();

    if let Some(cleanup) = &config.cleanup {
        for host in addresses.iter().take(prepared) {
            info!(host = %host, "Running cleanup");
            if let Err(error) =
                executors.run_blocking(cleanup, host, config.host_command_timeout())
            {
                error!(host = %host, "Cleanup failed: {error}");
            }
        }
    }

    Ok(report)
}
