//! Quill Reclaimer Service
//!
//! Periodically removes soft-deleted and expired entities together with
//! their files and certificates, auditing document collections on the way.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::{CONFIG, Configuration};
use common::queue::{InMemoryQueue, NatsQueue, Queue};
use common::storage::create_object_store_from_dsn;
use reclaimer::artifacts::ObjectStoreArtifacts;
use reclaimer::audit::{QueueNotifier, audit_sink_from_config};
use reclaimer::certificates::ObjectStoreCertificates;
use reclaimer::store::connectors_from_dsn;
use reclaimer::{Collaborators, Connectors, ReclaimMetrics, ReclamationPipeline};

#[derive(Parser)]
#[command(name = "quill-reclaimer")]
#[command(about = "Quill reclaimer - cascading removal of deleted and expired signing data")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<ReclaimerCommands>,
}

#[derive(Subcommand)]
enum ReclaimerCommands {
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for ReclaimerCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn connect_queue<Q: Queue + Default>(config: &Configuration) -> Result<Arc<Q>> {
    let mut queue = Q::default();
    queue
        .connect(&config.queue)
        .await
        .with_context(|| format!("Failed to connect to {} queue", config.queue.queue_type))?;
    Ok(Arc::new(queue))
}

fn build_pipeline<Q: Queue>(
    config: &Configuration,
    connectors: Connectors,
    queue: Arc<Q>,
    metrics: ReclaimMetrics,
) -> Result<ReclamationPipeline> {
    let files = create_object_store_from_dsn(&config.storage.dsn)
        .context("Failed to open artifact storage")?;
    let certificates = create_object_store_from_dsn(&config.certificates.dsn)
        .context("Failed to open certificate storage")?;
    let audit = audit_sink_from_config(&config.reclaimer.audit, queue.clone())
        .context("Failed to configure audit channel")?;

    let collaborators = Collaborators {
        artifacts: Arc::new(ObjectStoreArtifacts::new(files)),
        certificates: Arc::new(ObjectStoreCertificates::new(certificates)),
        audit,
        notifier: Arc::new(QueueNotifier::new(queue)),
    };

    ReclamationPipeline::new(&config.reclaimer, connectors, collaborators, metrics)
}

async fn run<Q: Queue + Default>(
    config: &Configuration,
    connectors: Connectors,
    once: bool,
) -> Result<()> {
    let queue = connect_queue::<Q>(config).await?;
    let metrics = ReclaimMetrics::new();
    let pipeline = Arc::new(build_pipeline(config, connectors, queue, metrics.clone())?);

    if once {
        let report = pipeline.run_once().await;
        metrics.summary().log();
        if !report.errors.is_empty() {
            anyhow::bail!(
                "{} reclaimer(s) failed during run {}",
                report.errors.len(),
                report.run_id
            );
        }
        return Ok(());
    }

    let tick_interval = config.reclaimer.tick_interval;
    log::info!("Reclamation loop starting with tick interval: {tick_interval:?}");

    let reclaim_task = {
        let pipeline = pipeline.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                log::debug!("Running reclamation cycle");

                let report = pipeline.run_once().await;
                for error in &report.errors {
                    log::error!("Reclaimer {} failed: {}", error.kind, error.error);
                }
                metrics.summary().log();
            }
        })
    };

    log::info!("Reclaimer service running, waiting for shutdown signal");
    wait_for_shutdown_signal().await?;

    log::info!("Received shutdown signal, stopping reclaimer service");
    reclaim_task.abort();

    log::info!("Reclaimer service stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    // Handle commands that don't require starting the service
    let command = cli.command.unwrap_or_default();
    let ReclaimerCommands::Common(ref common_cmd) = command;
    if utils::handle_common_command(common_cmd, &config)? {
        return Ok(());
    }

    utils::validate_config(&config)?;
    CONFIG
        .set(config.clone())
        .map_err(|_| anyhow::anyhow!("Configuration already initialized"))?;

    let once = matches!(common_cmd, CommonCommands::Once);
    if !config.reclaimer.enabled && !once {
        log::info!("Reclaimer is disabled in configuration (reclaimer.enabled = false)");
        log::info!("Set QUILL__RECLAIMER__ENABLED=true or enable in config file to run it");
        return Ok(());
    }

    log::info!("Loaded configuration:");
    log::info!("  Database DSN: {}", config.database.dsn);
    log::info!("  Storage DSN: {}", config.storage.dsn);
    log::info!("  Queue: {} ({})", config.queue.queue_type, config.queue.url);

    let connectors = connectors_from_dsn(&config.database.dsn)
        .await
        .context("Failed to open reclaimer database")?;

    match config.queue.queue_type.as_str() {
        "memory" => run::<InMemoryQueue>(&config, connectors, once).await,
        "nats" => run::<NatsQueue>(&config, connectors, once).await,
        other => anyhow::bail!("Unsupported queue type: {other}. Supported: memory, nats"),
    }
}
