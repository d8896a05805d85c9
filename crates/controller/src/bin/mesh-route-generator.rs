//! mesh-route-generator: maintain the aggregate mesh routing VirtualService.
//!
//! Startup: load config, connect to the cluster, open the watch, build or
//! adopt the aggregate. Then three tasks run until SIGINT/SIGTERM:
//! - reconciler: applies VirtualService watch events to the rule set
//! - flush: writes the rule set back every `flush.interval_secs`
//! - metrics: serves `GET /metrics`
//!
//! A final flush runs on shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use meshroute_controller::{
    ensure_aggregate, flush_and_record, spawn_flush_task, spawn_metrics_server, FlushStats,
    MetricsState, Reconciler,
};
use meshroute_core::config::{load_dotenv, Config};
use meshroute_core::ResourceStore;
use meshroute_kube::KubeStore;

// ── CLI ─────────────────────────────────────────────────────────────

/// Aggregate labelled VirtualService routes into one mesh routing resource.
#[derive(Parser, Debug)]
#[command(name = "mesh-route-generator", version, about)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, env = "MESHROUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between flushes (overrides config).
    #[arg(long)]
    flush_interval: Option<u64>,

    /// Metrics HTTP port (overrides config).
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Do not serve metrics.
    #[arg(long)]
    no_metrics: bool,
}

impl Cli {
    /// File (or defaults), then env, then flags; validated once at the end.
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::parse_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => Config::default(),
        };
        config.apply_env_overrides();

        if let Some(secs) = self.flush_interval {
            config.flush.interval_secs = secs;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
        if self.no_metrics {
            config.metrics.enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;
    config.log_summary();

    let store: Arc<dyn ResourceStore> = Arc::new(
        KubeStore::connect()
            .await
            .context("failed to connect to kubernetes")?,
    );

    // Opened before bootstrap so a source deleted after the scan is still
    // reported as deleted.
    let events = store
        .watch_virtual_services()
        .await
        .context("failed to watch virtual services")?;

    let (aggregate, outcome) = ensure_aggregate(store.as_ref(), &config)
        .await
        .context("failed to initialize mesh routing aggregate")?;
    let aggregate = Arc::new(aggregate);
    info!(
        resource = %aggregate.key(),
        ?outcome,
        rules = aggregate.rules().len(),
        "mesh routing aggregate ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Reconciler::new(Arc::clone(&aggregate), config.source.label.clone());
    let flush_stats = Arc::new(FlushStats::default());

    let metrics = config.metrics.listen_port().map(|port| {
        let state = MetricsState::new(
            Arc::clone(&aggregate),
            reconciler.counters(),
            Arc::clone(&flush_stats),
        );
        spawn_metrics_server(port, state, shutdown_rx.clone())
    });

    let flush = spawn_flush_task(
        Arc::clone(&store),
        Arc::clone(&aggregate),
        config.flush.interval(),
        Arc::clone(&flush_stats),
        shutdown_rx.clone(),
    );

    let mut reconcile = tokio::spawn(async move { reconciler.run(events, shutdown_rx).await });

    let reconciler_stopped = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            false
        }
        result = &mut reconcile => {
            if let Err(e) = result {
                error!(error = %e, "reconciler task failed");
            }
            warn!("reconciler stopped, shutting down");
            true
        }
    };

    let _ = shutdown_tx.send(true);
    if !reconciler_stopped {
        join("reconciler", reconcile).await;
    }
    join("flush", flush).await;
    if let Some(metrics) = metrics {
        join("metrics", metrics).await;
    }

    if flush_and_record(store.as_ref(), &aggregate, &flush_stats).await {
        info!(rules = aggregate.rules().len(), "final flush complete");
    }
    info!(stats = ?aggregate.rules().stats(), "mesh-route-generator stopped");
    Ok(())
}

async fn join(name: &str, task: tokio::task::JoinHandle<()>) {
    if let Err(e) = task.await {
        warn!(task = name, error = %e, "task ended abnormally");
    }
}

/// Resolve on SIGINT or SIGTERM (ctrl-c elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to register signal handlers, falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
