//! Sample operator - main entry point.
//!
//! Seeds an in-memory store from a manifest and runs the reconciliation
//! controller against it until interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sample_operator::controller::{Controller, TracingRecorder};
use sample_operator::manifest::ManifestResources;
use sample_operator::resource::State;
use sample_operator::store::InMemoryStore;
use sample_operator::types::{FieldManager, FinalizerReleasePolicy, StateOwnership};
use sample_operator::Config;

const MANIFEST_FIELD_MANAGER: &str = "sample-operator/manifest";

fn parse_duration(s: &str) -> Result<Duration, humantime_serde::re::humantime::DurationError> {
    humantime_serde::re::humantime::parse_duration(s)
}

#[derive(Debug, Parser)]
#[command(name = "sample-operator", version, about)]
struct Cli {
    /// YAML configuration file; flags override its values.
    #[arg(long, env = "SAMPLE_OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Multi-document YAML whose `Sample` objects seed the store.
    #[arg(long, env = "SAMPLE_OPERATOR_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Token bucket capacity.
    #[arg(long)]
    rate_limiter_burst: Option<u32>,

    /// Token bucket refill rate per second.
    #[arg(long)]
    rate_limiter_frequency: Option<u32>,

    /// First per-key failure delay (e.g. `1s`, `250ms`).
    #[arg(long, value_parser = parse_duration)]
    failure_base_delay: Option<Duration>,

    /// Cap on the per-key failure delay.
    #[arg(long, value_parser = parse_duration)]
    failure_max_delay: Option<Duration>,

    /// Requeue interval for steady states.
    #[arg(long, value_parser = parse_duration)]
    requeue_interval: Option<Duration>,

    /// State the lifecycle writer settles on.
    #[arg(long)]
    final_state: Option<State>,

    /// State written once deletion is observed.
    #[arg(long)]
    final_deletion_state: Option<State>,

    #[arg(long, value_enum)]
    state_ownership: Option<StateOwnership>,

    #[arg(long, value_enum)]
    finalizer_release: Option<FinalizerReleasePolicy>,

    /// Concurrent reconcile workers.
    #[arg(long, env = "SAMPLE_OPERATOR_WORKERS")]
    workers: Option<usize>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn overlay(&self, config: &mut Config) {
        let rl = &mut config.rate_limiter;
        if let Some(burst) = self.rate_limiter_burst {
            rl.burst = burst;
        }
        if let Some(frequency) = self.rate_limiter_frequency {
            rl.frequency = frequency;
        }
        if let Some(delay) = self.failure_base_delay {
            rl.base_delay = delay;
        }
        if let Some(delay) = self.failure_max_delay {
            rl.failure_max_delay = delay;
        }

        let rc = &mut config.reconciler;
        if let Some(interval) = self.requeue_interval {
            rc.requeue_interval = interval;
        }
        if let Some(state) = self.final_state {
            rc.final_state = state;
        }
        if let Some(state) = self.final_deletion_state {
            rc.final_deletion_state = state;
        }
        if let Some(ownership) = self.state_ownership {
            rc.state_ownership = ownership;
        }
        if let Some(policy) = self.finalizer_release {
            rc.finalizer_release = policy;
        }

        if let Some(workers) = self.workers {
            config.controller.workers = workers;
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cli.overlay(&mut config);
    config.validate()?;

    // Initialize observability
    sample_operator::observability::init_tracing(&config.observability);

    let store = Arc::new(InMemoryStore::new());
    if let Some(path) = &cli.manifest {
        let resources = ManifestResources::from_file(path)?;
        if !resources.blobs.is_empty() {
            tracing::warn!(
                count = resources.blobs.len(),
                "manifest contains documents that are not objects; ignoring them"
            );
        }
        let manager = FieldManager::from_string(MANIFEST_FIELD_MANAGER)?;
        for sample in resources.samples()? {
            let created = store.create(sample, &manager).await?;
            tracing::info!(key = %created.key(), "seeded Sample");
        }
    }

    let controller = Controller::new(store, &config, Arc::new(TracingRecorder))?;

    let cancel = controller.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                cancel.cancel();
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for interrupt"),
        }
    });

    tracing::info!(
        workers = config.controller.workers,
        final_state = %config.reconciler.final_state,
        final_deletion_state = %config.reconciler.final_deletion_state,
        "sample operator starting"
    );
    controller.run().await?;
    Ok(())
}
