use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::{fs, io::Error, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {}: {}", .0.display(), .1)]
    FileNotReadable(PathBuf, #[source] Error),
    #[error("Config file is not valid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),
    #[error("Config failed preflight checks")]
    PreflightFailed,
}

/// How jobs reach their host
#[derive(Deserialize, Serialize, ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// run every job through ssh on the named host
    #[default]
    Ssh,
    /// run every job with `sh -c` on this machine, host names are slot labels only
    Local,
}

/// What happens to a job whose process could not be spawned
#[derive(Deserialize, Serialize, ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LaunchFailurePolicy {
    /// keep the job at the head of the queue and offer it again on the next free host
    #[default]
    Retry,
    /// move past the job, it stays unstarted and shows up as such in the report
    Skip,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default = "default_ssh_program")]
    pub program: String,
    // extra arguments placed before the host, e.g. ["-o", "BatchMode=yes"]
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            options: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    #[serde(default = "default_jobs_path")]
    pub jobs: PathBuf,
    #[serde(default = "default_hosts_path")]
    pub hosts: PathBuf,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub on_launch_failure: LaunchFailurePolicy,
    // commands run once per host before the first job and after the last one
    pub setup: Option<String>,
    pub cleanup: Option<String>,
    /// seconds a setup/cleanup command may take before it is killed
    #[serde(default = "default_host_command_timeout")]
    pub host_command_timeout: u64,
    #[serde(default)]
    pub quiet: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs_path(),
            hosts: default_hosts_path(),
            transport: TransportKind::default(),
            ssh: SshConfig::default(),
            on_launch_failure: LaunchFailurePolicy::default(),
            setup: None,
            cleanup: None,
            host_command_timeout: default_host_command_timeout(),
            quiet: false,
        }
    }
}

/// Run a queue of shell jobs across a fixed pool of hosts, one job per host at a time
#[derive(Parser, Debug, Default)]
#[command(name = "netjobs", author, version, about)]
pub struct CliArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// file with one shell command per line
    #[arg(short, long)]
    pub jobs: Option<PathBuf>,
    /// file with one host address per line
    #[arg(long)]
    pub hosts: Option<PathBuf>,
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportKind>,
    #[arg(long, value_enum)]
    pub on_launch_failure: Option<LaunchFailurePolicy>,
    /// only print the per-job report lines
    #[arg(short, long)]
    pub quiet: bool,
}

impl RunnerConfig {
    pub fn from_yaml(input: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn load(path: &PathBuf) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path)
            .map_err(|error| ConfigErrors::FileNotReadable(path.clone(), error))?;

        Self::from_yaml(&content)
    }

    /// build the effective config: defaults, then the config file, then command line flags
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigErrors> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(jobs) = &args.jobs {
            config.jobs = jobs.clone();
        }
        if let Some(hosts) = &args.hosts {
            config.hosts = hosts.clone();
        }
        if let Some(transport) = args.transport {
            config.transport = transport;
        }
        if let Some(policy) = args.on_launch_failure {
            config.on_launch_failure = policy;
        }
        config.quiet |= args.quiet;

        Ok(config)
    }

    pub fn host_command_timeout(&self) -> Duration {
        Duration::from_secs(self.host_command_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigErrors> {
        if self.preflight_checks() {
            Err(ConfigErrors::PreflightFailed)
        } else {
            Ok(())
        }
    }

    /// returns true if any check failed, every problem is logged before returning
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.transport == TransportKind::Ssh && self.ssh.program.trim().is_empty() {
            error!("ssh.program must name the remote shell executable");
            contains_error = true;
        }

        if self.transport == TransportKind::Local && !self.ssh.options.is_empty() {
            warn!("ssh.options are ignored by the local transport");
        }

        for (name, command) in [("setup", &self.setup), ("cleanup", &self.cleanup)] {
            if let Some(command) = command {
                if command.trim().is_empty() {
                    error!("{name} is set but empty, remove it or give it a command");
                    contains_error = true;
                }
            }
        }

        if (self.setup.is_some() || self.cleanup.is_some()) && self.host_command_timeout == 0 {
            error!("host_command_timeout cannot be 0 while setup or cleanup commands are defined");
            contains_error = true;
        }

        contains_error
    }
}

fn default_ssh_program() -> String {
    String::from("ssh")
}

fn default_jobs_path() -> PathBuf {
    PathBuf::from("jobs.txt")
}

fn default_hosts_path() -> PathBuf {
    PathBuf::from("hosts.txt")
}

fn default_host_command_timeout() -> u64 {
    60
}
