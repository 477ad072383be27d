use std::process::Command;

/// name of the environment variable carrying the slot's host address
pub const HOST_ENV: &str = "NETJOBS_HOST";

/// Executor that runs every job on this machine, the host only labels the slot
#[derive(Clone, Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn command(&self, command: &str, host: &str) -> Command {
        let mut process = Command::new("sh");
        process.arg("-c").arg(command).env(HOST_ENV, host);

        process
    }
}
