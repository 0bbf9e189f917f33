//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks project and scene outcomes, retries, provider calls and render
//! permit usage.
//!
//! # Example
//!
//! ```ignore
//! use scene_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_scene("ready", 1);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    PROJECTS_TOTAL, PROVIDER_LATENCY, PROVIDER_REQUESTS_TOTAL, REGISTRY, RENDER_PERMITS_IN_USE,
    SCENES_TOTAL, SCENE_ATTEMPTS, SCENE_RETRIES_TOTAL,
};
