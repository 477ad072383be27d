use clap::Parser;
use netjobs_runner::{
    config::{CliArgs, RunnerConfig},
    driver,
    shutdown::ShutdownSignal,
};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let config = match RunnerConfig::from_args(&args) {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load configuration: {error}");

            return ExitCode::from(1);
        }
    };

    if let Err(error) = config.validate() {
        error!("{error}, aborting before any job is started");

        return ExitCode::from(1);
    }

    let shutdown = match ShutdownSignal::install() {
        Ok(shutdown) => shutdown,
        Err(errno) => {
            error!(errno = ?errno, "Failed to install shutdown handlers");

            return ExitCode::from(1);
        }
    };

    match driver::execute(&config, shutdown) {
        Ok(report) => {
            print!("{}", report.render(config.quiet));

            ExitCode::from(report.exit_code())
        }
        Err(error) => {
            error!("{error}");

            ExitCode::from(1)
        }
    }
}
