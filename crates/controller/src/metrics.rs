//! Mutation counters exposed over HTTP via `GET /metrics`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use meshroute_rules::MutationStats;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::aggregate::AggregateHandle;
use crate::flush::{FlushReport, FlushStats};
use crate::reconciler::{EventCounters, EventStats};

// ── State ────────────────────────────────────────────────────────────

/// Everything the metrics handler reads from.
#[derive(Clone)]
pub struct MetricsState {
    aggregate: Arc<AggregateHandle>,
    events: Arc<EventCounters>,
    flush: Arc<FlushStats>,
    start: Instant,
}

impl MetricsState {
    pub fn new(
        aggregate: Arc<AggregateHandle>,
        events: Arc<EventCounters>,
        flush: Arc<FlushStats>,
    ) -> Self {
        Self {
            aggregate,
            events,
            flush,
            start: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsResponse {
        let rules = self.aggregate.rules();
        MetricsResponse {
            routes: rules.stats(),
            rule_count: rules.len(),
            events: self.events.snapshot(),
            flush: self.flush.report(),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}

/// Complete JSON response from `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    /// Cumulative `routes_added` / `routes_updated` / `routes_deleted`.
    pub routes: MutationStats,
    pub rule_count: usize,
    pub events: EventStats,
    pub flush: FlushReport,
    pub uptime_secs: f64,
}

// ── HTTP server ──────────────────────────────────────────────────────

pub fn router(state: MetricsState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Spawn the metrics HTTP server on the given port.
///
/// A bind failure is logged and ends the task; the controller keeps running
/// without metrics.
pub fn spawn_metrics_server(
    port: u16,
    state: MetricsState,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(port, error = %e, "failed to bind metrics HTTP server");
                return;
            }
        };

        tracing::info!(port, "metrics HTTP server listening");

        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        tracing::info!("metrics HTTP server stopped");
    })
}

async fn metrics_handler(State(state): State<MetricsState>) -> Json<MetricsResponse> {
    Json(state.snapshot())
}

// ── Tests ────────────────────────────────────────────────────────────
