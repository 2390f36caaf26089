//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection for realm lifecycle orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render the registry in the Prometheus text exposition format.
///
/// Serving the payload is left to whichever HTTP layer embeds the orchestrator.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

/// Status labels exported on the one-hot `realm_status` gauge.
pub const STATUS_LABELS: [&str; 7] = [
    "pending", "starting", "healthy", "degraded", "failed", "stopping", "stopped",
];

/// Metrics recorded by the lifecycle orchestrator.
#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    registry: SharedRegistry,
    realm_status: IntGaugeVec,
    start_seconds: HistogramVec,
    transitions: IntCounterVec,
    probe_failures: IntCounterVec,
    waves: IntGauge,
}

impl LifecycleMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let realm_status = IntGaugeVec::new(
            Opts::new(
                "realm_status",
                "One-hot indicator of the current lifecycle status per realm",
            ),
            &["realm", "status"],
        )?;
        registry.register(Box::new(realm_status.clone()))?;

        let buckets = prometheus::exponential_buckets(0.005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let start_seconds = HistogramVec::new(
            HistogramOpts::new(
                "realm_start_seconds",
                "Time from start dispatch until the realm reported healthy",
            )
            .buckets(buckets),
            &["realm"],
        )?;
        registry.register(Box::new(start_seconds.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "realm_transitions_total",
                "Count of realm status transitions by target status",
            ),
            &["realm", "to"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let probe_failures = IntCounterVec::new(
            Opts::new(
                "realm_probe_failures_total",
                "Health probes that errored or timed out, per realm",
            ),
            &["realm"],
        )?;
        registry.register(Box::new(probe_failures.clone()))?;

        let waves = IntGauge::with_opts(Opts::new(
            "platform_waves",
            "Number of start waves computed for the current topology",
        ))?;
        registry.register(Box::new(waves.clone()))?;

        Ok(Self {
            registry,
            realm_status,
            start_seconds,
            transitions,
            probe_failures,
            waves,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Flip the one-hot status gauge without counting a transition.
    pub fn set_status(&self, realm: &str, status: &str) {
        for label in STATUS_LABELS {
            let value = i64::from(label == status);
            self.realm_status.with_label_values(&[realm, label]).set(value);
        }
    }

    pub fn record_transition(&self, realm: &str, status: &str) {
        self.set_status(realm, status);
        self.transitions.with_label_values(&[realm, status]).inc();
    }

    /// Time from dispatch until the realm reported healthy.
    pub fn observe_start(&self, realm: &str, seconds: f64) {
        self.start_seconds.with_label_values(&[realm]).observe(seconds);
    }

    pub fn record_probe_failure(&self, realm: &str) {
        self.probe_failures.with_label_values(&[realm]).inc();
    }

    pub fn set_wave_count(&self, count: usize) {
        self.waves.set(count as i64);
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_sets_one_hot_status() {
        let metrics = LifecycleMetrics::new(new_registry()).expect("metrics register");
        metrics.record_transition("city_manager", "starting");
        metrics.record_transition("city_manager", "healthy");

        let healthy = metrics
            .realm_status
            .with_label_values(&["city_manager", "healthy"])
            .get();
        let starting = metrics
            .realm_status
            .with_label_values(&["city_manager", "starting"])
            .get();
        assert_eq!(healthy, 1);
        assert_eq!(starting, 0);
        assert_eq!(
            metrics
                .transitions
                .with_label_values(&["city_manager", "healthy"])
                .get(),
            1
        );
    }

    #[test]
    fn initial_status_is_not_a_transition() {
        let metrics = LifecycleMetrics::new(new_registry()).expect("metrics register");
        metrics.set_status("nurse", "pending");
        assert_eq!(
            metrics
                .realm_status
                .with_label_values(&["nurse", "pending"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .transitions
                .with_label_values(&["nurse", "pending"])
                .get(),
            0
        );
    }

    #[test]
    fn render_contains_registered_families() {
        let metrics = LifecycleMetrics::new(new_registry()).expect("metrics register");
        metrics.set_wave_count(3);
        metrics.record_probe_failure("content");
        metrics.observe_start("content", 0.25);
        let body = render(&metrics.registry()).expect("encode");
        assert!(body.contains("platform_waves 3"));
        assert!(body.contains("realm_probe_failures_total"));
        assert!(body.contains("realm_start_seconds_bucket"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        LifecycleMetrics::new(registry.clone()).expect("first registration");
        assert!(LifecycleMetrics::new(registry).is_err());
    }
}
