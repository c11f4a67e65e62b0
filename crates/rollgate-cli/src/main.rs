//! rollgate: rolling updates with health gates.
//!
//! # Usage
//!
//! ```text
//! rollgate --config fleet.toml                 # full check (default)
//! rollgate backend --retry-delay 2s            # roll backends only
//! rollgate frontend --report run.json          # update the front door
//! rollgate api --format json                   # cross-fleet check only
//! ```
//!
//! Exit status is 0 when the run succeeded, 1 when it did not (including a
//! successful rollback), and 2 when the fleet file or plan is invalid.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::warn;

use rollgate_core::{ConfigError, RunOptions, parse_duration};
use rollgate_rollout::Scope;

mod commands;
mod transport;

#[derive(Parser)]
#[command(
    name = "rollgate",
    about = "Rollgate: sequenced rolling updates with health gates and recovery",
    version,
    propagate_version = true
)]
struct Cli {
    /// Fleet file describing targets, options and transport commands.
    #[arg(short, long, global = true, default_value = "rollgate.toml")]
    config: PathBuf,

    /// Run summary format on stdout.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Write the run summary as JSON to this file.
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Append run events as JSON lines to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,

    /// Health gate attempts per updated target.
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Delay between probe attempts (e.g. 500ms, 10s).
    #[arg(long, global = true, value_parser = duration_arg)]
    retry_delay: Option<Duration>,

    /// Timeout for a single probe attempt.
    #[arg(long, global = true, value_parser = duration_arg)]
    timeout: Option<Duration>,

    /// Ceiling for the whole run.
    #[arg(long, global = true, value_parser = duration_arg)]
    run_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Pre-validate, roll backends, update the front door, post-validate (default).
    Check,
    /// Roll backends one at a time.
    Backend,
    /// Update the front door once every backend is healthy.
    Frontend,
    /// Only check routing through the front door.
    Api,
}

impl Commands {
    fn scope(self) -> Scope {
        match self {
            Commands::Check => Scope::Full,
            Commands::Backend => Scope::Backends,
            Commands::Frontend => Scope::FrontDoor,
            Commands::Api => Scope::PostValidateOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,rollgate=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.log_format);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next phase boundary");
            cancel_tx.send_replace(true);
        }
    });

    let scope = cli.command.unwrap_or(Commands::Check).scope();
    let args = commands::run::RunArgs {
        config: cli.config,
        format: cli.format,
        report: cli.report,
        events: cli.events,
        overrides: RunOptions {
            max_attempts: cli.max_attempts,
            retry_delay: cli.retry_delay,
            per_attempt_timeout: cli.timeout,
            run_timeout: cli.run_timeout,
            ..RunOptions::default()
        },
    };

    match commands::run::run(scope, args, cancel_rx).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            if e.downcast_ref::<ConfigError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
