pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging::{LoggingError, setup_logging};
pub use shutdown::spawn_signal_listener;

use crate::annotator::{AnnotatorFactory, HttpAnnotatorFactory};
use crate::dispatcher::Dispatcher;
use crate::domain::RecordId;
use crate::orchestrator::{Orchestrator, PipelineReport, PipelineStatus};
use crate::source::load_records;
use crate::store::ResultStore;
use anyhow::Context;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Missing ids printed in the final summary before it is truncated.
const SUMMARY_ID_LIMIT: usize = 20;

/// Result of one invocation: the pipeline report plus where results went.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: PipelineReport,
    pub run_id: String,
    pub exported: Option<usize>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.report.status {
            PipelineStatus::Cancelled => 130,
            _ if self.report.is_complete() => 0,
            _ => 2,
        }
    }
}

pub struct App {
    config: Config,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::from_config(Config::from_args(args)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run against the configured HTTP annotator.
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<RunOutcome> {
        let annotator = self
            .config
            .annotator_config()
            .context("Failed to configure the annotator")?;
        self.run_with(HttpAnnotatorFactory::new(annotator), cancel)
            .await
    }

    /// Run the whole pipeline with any annotator backend.
    pub async fn run_with<F>(
        &self,
        factory: F,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RunOutcome>
    where
        F: AnnotatorFactory + 'static,
    {
        let config = &self.config;
        let input = config.input_path()?;
        let loaded = load_records(input, &config.source_fields())
            .await
            .with_context(|| format!("Failed to load records from {}", input.display()))?;
        let order: Vec<RecordId> = loaded.records.iter().map(|r| r.id.clone()).collect();

        let store = ResultStore::open(&config.results_dir)
            .await
            .context("Failed to open the results directory")?;
        info!(
            "Run {} writing partitions to {}",
            store.run_id(),
            store.dir().display()
        );

        let policy = &config.retry_policy;
        info!(
            "Up to {} attempts per record per round, at most {:?} per record before pacing",
            policy.max_attempts,
            policy.worst_case()
        );

        let dispatcher = Dispatcher::new(
            Arc::new(factory),
            store.clone(),
            config.dispatch_settings(),
        );
        let orchestrator =
            Orchestrator::new(dispatcher, config.round_limit()).with_resume(config.resume);
        let report = orchestrator.run(loaded.records, cancel).await?;

        let exported = match &config.output {
            Some(output) => {
                let written = store
                    .export_consolidated(&order, output)
                    .await
                    .with_context(|| format!("Failed to export results to {}", output.display()))?;
                info!("Exported {} results to {}", written, output.display());
                Some(written)
            }
            None => None,
        };

        Ok(RunOutcome {
            report,
            run_id: store.run_id().to_string(),
            exported,
        })
    }
}

fn print_summary(outcome: &RunOutcome) {
    let report = &outcome.report;
    println!(
        "Run {}: {:?} after {} round(s), {}/{} records annotated",
        outcome.run_id,
        report.status,
        report.rounds.len(),
        report.succeeded,
        report.total
    );
    for round in &report.rounds {
        println!(
            "  round {}: {} dispatched, {} succeeded, {} failed, {} missing after",
            round.round, round.dispatched, round.succeeded, round.failed, round.missing_after
        );
    }

    let missing = report.missing();
    if !missing.is_empty() {
        let shown: Vec<&str> = missing
            .iter()
            .take(SUMMARY_ID_LIMIT)
            .map(RecordId::as_str)
            .collect();
        let more = missing.len().saturating_sub(SUMMARY_ID_LIMIT);
        println!(
            "Missing ({} permanently rejected): {}{}",
            report.permanently_failed.len(),
            shown.join(", "),
            if more > 0 {
                format!(" and {more} more")
            } else {
                String::new()
            }
        );
    }
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args_os())?;
    setup_logging(config.log_level, config.log_format)?;
    info!("Starting bulk-annotator v{}", crate::VERSION);

    let app = App::from_config(config);
    let cancel = CancellationToken::new();
    let signals = spawn_signal_listener(cancel.clone());

    let outcome = app.run(&cancel).await;
    signals.abort();
    let outcome = outcome?;

    print_summary(&outcome);
    let code = outcome.exit_code();
    if code != 0 {
        process::exit(code);
    }
    Ok(())
}
