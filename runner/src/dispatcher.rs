use crate::{
    config::LaunchFailurePolicy,
    executors::{LaunchError, Launcher},
    job::{Host, HostId, Job, JobId, Termination},
};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Host {0} already runs a job")]
    HostBusy(String),
    #[error("Job {0} was already started")]
    AlreadyStarted(JobId),
    #[error("Failed to launch job: {0}")]
    LaunchFailure(#[from] LaunchError),
    #[error("No pending jobs left to assign")]
    NoPendingJobs,
    #[error("No running job belongs to process {0}")]
    NotFound(Pid),
}

/// Owns the job queue and the host pool and pairs them up greedily.
///
/// Jobs are handed out strictly in input order through a cursor that only moves forward,
/// hosts are filled in pool order at start-up and afterwards whichever host frees up first
/// receives the next job. Cross references between jobs and hosts are table indices.
#[derive(Debug)]
pub struct Dispatcher<L> {
    jobs: Vec<Job>,
    hosts: Vec<Host>,
    cursor: usize,
    launcher: L,
    policy: LaunchFailurePolicy,
}

impl<L: Launcher> Dispatcher<L> {
    pub fn new<J, H>(commands: J, addresses: H, launcher: L, policy: LaunchFailurePolicy) -> Self
    where
        J: IntoIterator,
        J::Item: Into<String>,
        H: IntoIterator,
        H::Item: Into<String>,
    {
        Self {
            jobs: commands.into_iter().map(Job::new).collect(),
            hosts: addresses.into_iter().map(Host::new).collect(),
            cursor: 0,
            launcher,
            policy,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id.0]
    }

    pub fn host(&self, id: HostId) -> &Host {
        &self.hosts[id.0]
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.launcher
    }

    pub fn policy(&self) -> LaunchFailurePolicy {
        self.policy
    }

    /// true while the cursor has not run past the end of the queue
    pub fn has_pending(&self) -> bool {
        self.cursor < self.jobs.len()
    }

    /// number of started jobs that were not reaped yet
    pub fn outstanding(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_outstanding()).count()
    }

    pub fn outstanding_pids(&self) -> Vec<Pid> {
        self.jobs
            .iter()
            .filter(|job| job.is_outstanding())
            .filter_map(|job| job.process_id)
            .collect()
    }

    /// hosts without a job, in pool order
    pub fn free_hosts(&self) -> Vec<HostId> {
        self.hosts
            .iter()
            .enumerate()
            .filter(|(_, host)| host.is_free())
            .map(|(index, _)| HostId(index))
            .collect()
    }

    pub fn into_parts(self) -> (Vec<Job>, Vec<Host>) {
        (self.jobs, self.hosts)
    }

    /// start `job` on `host`, the host must be free and the job must never have been started
    pub fn assign_to_host(&mut self, job_id: JobId, host_id: HostId) -> Result<Pid, DispatchError> {
        let host = &self.hosts[host_id.0];
        if !host.is_free() {
            return Err(DispatchError::HostBusy(host.address.clone()));
        }

        let job = &self.jobs[job_id.0];
        if !job.is_pending() {
            return Err(DispatchError::AlreadyStarted(job_id));
        }

        debug!(job = %job_id, host = %host.address, "Giving job [{}] to host", job.command);

        let pid = self.launcher.launch(&job.command, &host.address)?;

        let job = &mut self.jobs[job_id.0];
        job.process_id = Some(pid);
        job.assigned_host = Some(host_id);

        let host = &mut self.hosts[host_id.0];
        host.current_job = Some(job_id);
        host.jobs_run += 1;

        Ok(pid)
    }

    /// start the job under the cursor on `host`
    ///
    /// A launch failure moves the cursor on only under `LaunchFailurePolicy::Skip`, with
    /// `Retry` the same job is offered again by the next call.
    pub fn assign_next(&mut self, host_id: HostId) -> Result<(JobId, Pid), DispatchError> {
        if !self.has_pending() {
            return Err(DispatchError::NoPendingJobs);
        }

        let job_id = JobId(self.cursor);

        match self.assign_to_host(job_id, host_id) {
            Ok(pid) => {
                self.cursor += 1;

                Ok((job_id, pid))
            }
            Err(error @ DispatchError::LaunchFailure(_)) => {
                if self.policy == LaunchFailurePolicy::Skip {
                    self.cursor += 1;
                }

                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// record the termination of `pid` and free the host it ran on
    ///
    /// Unknown pids and pids that were already reconciled yield `NotFound` and change nothing.
    pub fn reconcile(&mut self, pid: Pid, termination: Termination) -> Result<JobId, DispatchError> {
        let (host_id, job_id) = self
            .hosts
            .iter()
            .enumerate()
            .find_map(|(index, host)| {
                host.current_job
                    .filter(|job| self.jobs[job.0].process_id == Some(pid))
                    .map(|job| (HostId(index), job))
            })
            .ok_or(DispatchError::NotFound(pid))?;

        self.jobs[job_id.0].termination = Some(termination);
        self.hosts[host_id.0].current_job = None;

        Ok(job_id)
    }

    /// busy hosts and outstanding jobs pair up one to one
    pub fn check_invariants(&self) -> bool {
        let busy = self.hosts.iter().filter(|host| !host.is_free()).count();

        let paired = self.hosts.iter().enumerate().all(|(index, host)| match host.current_job {
            Some(job) => {
                let job = &self.jobs[job.0];
                job.is_outstanding() && job.assigned_host == Some(HostId(index))
            }
            None => true,
        });

        let finished_consistent = self
            .jobs
            .iter()
            .filter(|job| job.is_finished())
            .all(|job| job.process_id.is_some() && job.assigned_host.is_some());

        busy == self.outstanding() && paired && finished_consistent
    }
}
