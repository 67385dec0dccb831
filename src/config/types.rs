use serde::{Deserialize, Serialize};

/// Operator-level configuration (distinct from the per-intent `ProfilingConfig`
/// custom resource). Covers only ambient daemon concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address for the health surface (`/healthz`, `/readyz`).
    pub health_addr: String,
    /// Bind address for the Prometheus `/metrics` endpoint.
    pub metrics_addr: String,
    /// Interval between periodic reconciles of an unchanged intent.
    pub reconcile_requeue_secs: u64,
    /// Namespace used for any namespace-scoped bookkeeping (reserved for
    /// future leader-election use; the controller otherwise watches all
    /// namespaces).
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            health_addr: "0.0.0.0:8080".to_string(),
            metrics_addr: "0.0.0.0:9090".to_string(),
            reconcile_requeue_secs: 30,
            namespace: "default".to_string(),
        }
    }
}
