//! Prometheus metrics for the director daemon.
//!
//! The registry is injected into the engine at construction; there is no
//! process-wide registry. Exporters consume [`MetricsRegistry::registry`].

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for VIP ownership metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VipLabels {
    pub node: String,
    pub vip: String,
}

/// Labels for VIP transition counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VipTransitionLabels {
    pub node: String,
    pub vip: String,
    /// "acquire" or "release"
    pub direction: String,
}

/// Labels for reconcile run counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub node: String,
    /// "success" or "failure"
    pub result: String,
}

/// Labels for node-scoped gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct NodeLabels {
    pub node: String,
}

/// Labels for per-backend health metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub node: String,
    pub service: String,
    pub backend: String,
}

/// Metrics registry carrying every director metric.
pub struct MetricsRegistry {
    /// Prometheus registry, exposed for exporters.
    pub registry: Registry,

    vip_is_owner: Family<VipLabels, Gauge>,
    vip_transitions_total: Family<VipTransitionLabels, Counter>,
    reconcile_runs_total: Family<ReconcileLabels, Counter>,
    reconcile_duration_ms: Family<NodeLabels, Gauge>,
    health_backend_healthy: Family<BackendLabels, Gauge>,
    health_backend_weight: Family<BackendLabels, Gauge>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let vip_is_owner = Family::<VipLabels, Gauge>::default();
        registry.register(
            "director_vip_is_owner",
            "1 if this node owns the VIP",
            vip_is_owner.clone(),
        );

        let vip_transitions_total = Family::<VipTransitionLabels, Counter>::default();
        registry.register(
            "director_vip_transitions_total",
            "VIP ownership transitions",
            vip_transitions_total.clone(),
        );

        let reconcile_runs_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "director_reconcile_runs_total",
            "Reconcile attempts by result",
            reconcile_runs_total.clone(),
        );

        let reconcile_duration_ms = Family::<NodeLabels, Gauge>::default();
        registry.register(
            "director_reconcile_duration_ms",
            "Last reconcile duration in milliseconds",
            reconcile_duration_ms.clone(),
        );

        let health_backend_healthy = Family::<BackendLabels, Gauge>::default();
        registry.register(
            "director_health_backend_healthy",
            "1 if the backend is healthy",
            health_backend_healthy.clone(),
        );

        let health_backend_weight = Family::<BackendLabels, Gauge>::default();
        registry.register(
            "director_health_backend_weight",
            "Effective backend weight",
            health_backend_weight.clone(),
        );

        Self {
            registry,
            vip_is_owner,
            vip_transitions_total,
            reconcile_runs_total,
            reconcile_duration_ms,
            health_backend_healthy,
            health_backend_weight,
        }
    }

    /// Set the VIP ownership gauge.
    pub fn set_vip_owner(&self, node: &str, vip: &str, owner: bool) {
        self.vip_is_owner
            .get_or_create(&VipLabels {
                node: node.to_string(),
                vip: vip.to_string(),
            })
            .set(i64::from(owner));
    }

    /// Count one VIP ownership transition.
    pub fn inc_vip_transition(&self, node: &str, vip: &str, direction: &str) {
        self.vip_transitions_total
            .get_or_create(&VipTransitionLabels {
                node: node.to_string(),
                vip: vip.to_string(),
                direction: direction.to_string(),
            })
            .inc();
    }

    /// Count one reconcile run.
    pub fn inc_reconcile_run(&self, node: &str, result: &str) {
        self.reconcile_runs_total
            .get_or_create(&ReconcileLabels {
                node: node.to_string(),
                result: result.to_string(),
            })
            .inc();
    }

    /// Record the duration of the last reconcile pass.
    pub fn set_reconcile_duration_ms(&self, node: &str, millis: i64) {
        self.reconcile_duration_ms
            .get_or_create(&NodeLabels {
                node: node.to_string(),
            })
            .set(millis);
    }

    /// Set the per-backend health gauge.
    pub fn set_backend_healthy(&self, node: &str, service: &str, backend: &str, healthy: bool) {
        self.health_backend_healthy
            .get_or_create(&BackendLabels {
                node: node.to_string(),
                service: service.to_string(),
                backend: backend.to_string(),
            })
            .set(i64::from(healthy));
    }

    /// Set the per-backend effective weight gauge.
    pub fn set_backend_weight(&self, node: &str, service: &str, backend: &str, weight: i64) {
        self.health_backend_weight
            .get_or_create(&BackendLabels {
                node: node.to_string(),
                service: service.to_string(),
                backend: backend.to_string(),
            })
            .set(weight);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_accepts_the_full_metric_surface() {
        let metrics = MetricsRegistry::new();
        metrics.set_vip_owner("node-a", "192.0.2.10", true);
        metrics.inc_vip_transition("node-a", "192.0.2.10", "acquire");
        metrics.inc_reconcile_run("node-a", "success");
        metrics.inc_reconcile_run("node-a", "failure");
        metrics.set_reconcile_duration_ms("node-a", 12);
        metrics.set_backend_healthy("node-a", "web", "10.0.0.1", false);
        metrics.set_backend_weight("node-a", "web", "10.0.0.1", 0);
    }
}
