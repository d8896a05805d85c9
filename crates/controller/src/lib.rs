//! Mesh route generator controller.
//!
//! Keeps one aggregate VirtualService holding the union of the HTTP routing
//! rules of every source VirtualService carrying the marker label, plus a
//! fallback rule. Bootstrap seeds it from a full scan, the reconciler keeps
//! it current from watch events, and the flush task writes it back on a
//! fixed interval.

pub mod aggregate;
pub mod aggregator;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod reconciler;

pub use aggregate::AggregateHandle;
pub use aggregator::{bootstrap, build_initial_aggregate, ensure_aggregate, BootstrapOutcome};
pub use error::{ControllerError, Result};
pub use flush::{flush_and_record, flush_once, spawn_flush_task, FlushReport, FlushStats};
pub use metrics::{spawn_metrics_server, MetricsResponse, MetricsState};
pub use reconciler::{Applied, EventCounters, EventStats, Reconciler};
