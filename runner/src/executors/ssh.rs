use crate::config::SshConfig;
use std::process::Command;

/// Executor that hands every job to a remote shell on the target host
#[derive(Clone, Debug)]
pub struct SshExecutor {
    program: String,
    options: Vec<String>,
}

impl SshExecutor {
    pub fn load(config: &SshConfig) -> Self {
        Self {
            program: config.program.clone(),
            options: config.options.clone(),
        }
    }

    /// `<program> [options...] <host> <command>`, the command is passed as a single argument
    pub fn command(&self, command: &str, host: &str) -> Command {
        let mut process = Command::new(&self.program);
        process.args(&self.options).arg(host).arg(command);

        process
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_remote_invocation() {
        let executor = SshExecutor::load(&SshConfig {
            program: String::from("ssh"),
            options: vec![String::from("-o"), String::from("BatchMode=yes")],
        });
        let command = executor.command("echo 'a b'", "node01");

        assert_eq!(command.get_program(), "ssh");
        assert_eq!(
            command.get_args().collect::<Vec<_>>(),
            vec!["-o", "BatchMode=yes", "node01", "echo 'a b'"]
        );
    }
}
