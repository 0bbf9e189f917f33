//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by scene-forge and provides
//! functions for initializing and exporting them.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all scene-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished projects, labeled by final status.
pub static PROJECTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Finished scenes, labeled by final status.
pub static SCENES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Attempts a scene needed before reaching a terminal state.
pub static SCENE_ATTEMPTS: OnceLock<Histogram> = OnceLock::new();

/// Scene retries, labeled by the matched feedback category.
pub static SCENE_RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider calls, labeled by operation and status.
pub static PROVIDER_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Provider call latency in seconds, labeled by operation.
pub static PROVIDER_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Render permits currently held.
pub static RENDER_PERMITS_IN_USE: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are harmless: the first registry wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric definition is invalid.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let projects_total = CounterVec::new(
        Opts::new("scene_forge_projects_total", "Total number of finished projects"),
        &["status"],
    )?;

    let scenes_total = CounterVec::new(
        Opts::new("scene_forge_scenes_total", "Total number of finished scenes"),
        &["status"],
    )?;

    let scene_attempts = Histogram::with_opts(
        HistogramOpts::new(
            "scene_forge_scene_attempts",
            "Attempts per scene before a terminal state",
        )
        .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0]),
    )?;

    let scene_retries_total = CounterVec::new(
        Opts::new("scene_forge_scene_retries_total", "Total scene retries"),
        &["category"],
    )?;

    let provider_requests_total = CounterVec::new(
        Opts::new(
            "scene_forge_provider_requests_total",
            "Total generation provider calls",
        ),
        &["operation", "status"],
    )?;

    let provider_latency = HistogramVec::new(
        HistogramOpts::new(
            "scene_forge_provider_latency_seconds",
            "Generation provider call latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["operation"],
    )?;

    let render_permits_in_use = Gauge::new(
        "scene_forge_render_permits_in_use",
        "Render permits currently held",
    )?;

    registry.register(Box::new(projects_total.clone()))?;
    registry.register(Box::new(scenes_total.clone()))?;
    registry.register(Box::new(scene_attempts.clone()))?;
    registry.register(Box::new(scene_retries_total.clone()))?;
    registry.register(Box::new(provider_requests_total.clone()))?;
    registry.register(Box::new(provider_latency.clone()))?;
    registry.register(Box::new(render_permits_in_use.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = PROJECTS_TOTAL.set(projects_total);
    let _ = SCENES_TOTAL.set(scenes_total);
    let _ = SCENE_ATTEMPTS.set(scene_attempts);
    let _ = SCENE_RETRIES_TOTAL.set(scene_retries_total);
    let _ = PROVIDER_REQUESTS_TOTAL.set(provider_requests_total);
    let _ = PROVIDER_LATENCY.set(provider_latency);
    let _ = RENDER_PERMITS_IN_USE.set(render_permits_in_use);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(projects) = PROJECTS_TOTAL.get() {
            projects.with_label_values(&["ready"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("scene_forge_projects_total"));
    }
}
