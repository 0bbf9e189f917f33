//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op for the Prometheus side when `init_metrics()` has
//! not been called, so library code can record unconditionally.

use super::prometheus::{
    PROJECTS_TOTAL, PROVIDER_LATENCY, PROVIDER_REQUESTS_TOTAL, RENDER_PERMITS_IN_USE,
    SCENES_TOTAL, SCENE_ATTEMPTS, SCENE_RETRIES_TOTAL,
};

/// Category label used for retries that matched no feedback rule.
pub const UNCLASSIFIED: &str = "unclassified";

/// Metrics collector for recording scene-forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use scene_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_provider_call("render", true, 42.0);
/// collector.record_scene("ready", 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished project.
    pub fn record_project(&self, status: &str) {
        if let Some(projects) = PROJECTS_TOTAL.get() {
            projects.with_label_values(&[status]).inc();
        }

        tracing::trace!(status = status, "Recorded project metric");
    }

    /// Record a scene reaching a terminal state after `attempts` attempts.
    pub fn record_scene(&self, status: &str, attempts: u32) {
        if let Some(scenes) = SCENES_TOTAL.get() {
            scenes.with_label_values(&[status]).inc();
        }

        if let Some(histogram) = SCENE_ATTEMPTS.get() {
            histogram.observe(f64::from(attempts));
        }

        tracing::trace!(status = status, attempts = attempts, "Recorded scene metric");
    }

    /// Record a scheduled retry. `category` is the matched feedback rule.
    pub fn record_retry(&self, category: Option<&str>) {
        let category = category.unwrap_or(UNCLASSIFIED);
        if let Some(retries) = SCENE_RETRIES_TOTAL.get() {
            retries.with_label_values(&[category]).inc();
        }

        tracing::trace!(category = category, "Recorded retry metric");
    }

    /// Record one generation provider call.
    ///
    /// # Arguments
    ///
    /// * `operation` - "plan", "asset", "content" or "render"
    /// * `success` - Whether the call succeeded
    /// * `latency_secs` - Call latency in seconds
    pub fn record_provider_call(&self, operation: &str, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = PROVIDER_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[operation, status]).inc();
        }

        if let Some(latency) = PROVIDER_LATENCY.get() {
            latency.with_label_values(&[operation]).observe(latency_secs);
        }

        tracing::trace!(
            operation = operation,
            status = status,
            latency_secs = latency_secs,
            "Recorded provider call metric"
        );
    }

    /// Set the number of render permits currently held.
    pub fn set_render_permits_in_use(&self, count: usize) {
        if let Some(gauge) = RENDER_PERMITS_IN_USE.get() {
            gauge.set(count as f64);
        }
    }
}
