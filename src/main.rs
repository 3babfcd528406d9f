//! golook - look up golinks and SSH public keys
//!
//! Query mode prints a JSON result list built from the local cache and starts a
//! background refresh when the cache is missing or stale. `--download` runs the
//! refresh itself.

use std::io;
use std::process::ExitCode;

use clap::Parser;

use golook::app::{self, Outcome};
use golook::cli::Cli;
use golook::config::{Config, LoggingConfig};
use golook::context::Context;
use golook::feedback::Feedback;

/// Logs go to stderr; stdout carries the result document
fn init_logging(logging: &LoggingConfig) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_max_level(logging.level())
        .with_ansi(false)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let ctx = Context::from_config(config, cli.config.as_deref())?;

    match app::run(&ctx, &cli.command).await? {
        Outcome::Feedback(feedback) => feedback.write_to(io::stdout().lock())?,
        Outcome::Refreshed => {}
    }

    Ok(())
}

fn fail(err: anyhow::Error) -> ExitCode {
    tracing::error!("{err:#}");
    let _ = Feedback::error(format!("{err:#}")).write_to(io::stdout().lock());
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            init_logging(&LoggingConfig::default());
            return fail(err.into());
        }
    };
    init_logging(&config.logging);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(err),
    }
}
