use crate::{
    driver::RunSummary,
    job::{Host, Job},
};
use itertools::Itertools;
use std::fmt;

/// Outcome of a single job, in the shape printed at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub command: String,
    pub host: Option<String>,
    pub exit_status: Option<i32>,
}

impl fmt::Display for ReportLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host, self.exit_status) {
            (Some(host), Some(status)) => write!(
                f,
                "job [{}] ran on {host}, exited with status {status}",
                self.command
            ),
            (Some(host), None) => write!(
                f,
                "job [{}] was started on {host} but never reaped",
                self.command
            ),
            (None, _) => write!(f, "job [{}] was never started", self.command),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSummary {
    pub address: String,
    pub jobs_run: usize,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub lines: Vec<ReportLine>,
    pub hosts: Vec<HostSummary>,
    pub summary: RunSummary,
}

impl Report {
    pub fn new(jobs: &[Job], hosts: &[Host], summary: RunSummary) -> Self {
        let lines = jobs
            .iter()
            .map(|job| ReportLine {
                command: job.command.clone(),
                host: job
                    .assigned_host
                    .map(|host| hosts[host.0].address.clone()),
                exit_status: job.exit_status(),
            })
            .collect();

        let hosts = hosts
            .iter()
            .map(|host| HostSummary {
                address: host.address.clone(),
                jobs_run: host.jobs_run,
            })
            .collect();

        Self {
            lines,
            hosts,
            summary,
        }
    }

    pub fn total_jobs_run(&self) -> usize {
        self.hosts.iter().map(|host| host.jobs_run).sum()
    }

    /// 130 for a cancelled run, 0 otherwise; failed jobs do not change the exit code
    pub fn exit_code(&self) -> u8 {
        if self.summary.cancelled {
            130
        } else {
            0
        }
    }

    /// the per-job lines followed, unless `quiet`, by the per-host summary
    pub fn render(&self, quiet: bool) -> String {
        let mut output = self.lines.iter().map(|line| format!("{line}\n")).join("");

        if !quiet && !self.hosts.is_empty() {
            for host in self.hosts.iter() {
                output.push_str(&format!("{} ran {} jobs\n", host.address, host.jobs_run));
            }
            output.push_str(&format!("total jobs run: {}\n", self.total_jobs_run()));
        }

        output
    }
}
