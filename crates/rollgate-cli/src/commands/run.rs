use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use rollgate_core::{FleetFile, RunOptions, TargetRegistry};
use rollgate_rollout::{RolloutEngine, RunReporter, Scope};

use crate::OutputFormat;
use crate::transport::{CommandExecutor, FleetProber};

pub struct RunArgs {
    pub config: PathBuf,
    pub format: OutputFormat,
    pub report: Option<PathBuf>,
    pub events: Option<PathBuf>,
    /// Command-line options; set fields win over `[options]`.
    pub overrides: RunOptions,
}

/// Load the fleet file, run `scope` and emit the summary. Returns the exit code.
pub async fn run(scope: Scope, args: RunArgs, cancel: watch::Receiver<bool>) -> anyhow::Result<u8> {
    let fleet = FleetFile::from_file(&args.config)?;
    let registry = TargetRegistry::load(&fleet)?;
    let config = fleet.options.clone().merged_with(args.overrides).resolve()?;
    info!(
        config = %args.config.display(),
        targets = registry.len(),
        %scope,
        "fleet loaded"
    );

    let executor = Arc::new(CommandExecutor::new(fleet.commands.clone()));
    let prober = Arc::new(FleetProber::new(
        executor.clone(),
        config.update_policy.per_attempt_timeout(),
    ));
    let engine = RolloutEngine::new(registry, config, executor, prober);

    let mut reporter = RunReporter::new();
    if let Some(path) = &args.events {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        reporter = reporter.with_sink(Box::new(file));
    }

    let report = engine.run_with(scope, cancel, reporter).await?;

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report.summary)?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write report {}", path.display()))?;
        info!(path = %path.display(), "run report written");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary)?),
        OutputFormat::Text => print!("{}", report.summary),
    }

    Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}
