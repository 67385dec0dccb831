//! Prometheus metrics exposed on the ambient metrics surface.
//!
//! Grounded on the `LazyLock<Registry>` + per-metric `LazyLock` statics
//! pattern used by this tree's other Kubernetes controllers.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "profiling_operator_reconcile_total",
        "Total ProfilingConfig reconciliation cycles",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "profiling_operator_reconcile_errors_total",
        "Total ProfilingConfig reconciliation errors",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new(
        "profiling_operator_reconcile_duration_seconds",
        "Duration of each reconciliation cycle in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static ACTIVE_INSTANCES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        Opts::new(
            "profiling_operator_active_instances",
            "Instances currently tracked per intent",
        ),
        &["namespace", "intent"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static CAPTURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "profiling_operator_captures_total",
            "Successful profile captures per intent and reason",
        ),
        &["namespace", "intent", "reason"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static UPLOADS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "profiling_operator_uploads_total",
            "Successful object-store uploads per intent",
        ),
        &["namespace", "intent"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/// Force-initialize every metric so it appears on `/metrics` even before
/// its first observation.
pub fn init() {
    LazyLock::force(&RECONCILE_TOTAL);
    LazyLock::force(&RECONCILE_ERRORS);
    LazyLock::force(&RECONCILE_DURATION);
    LazyLock::force(&ACTIVE_INSTANCES);
    LazyLock::force(&CAPTURES_TOTAL);
    LazyLock::force(&UPLOADS_TOTAL);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_panicking() {
        init();
        let families = REGISTRY.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"profiling_operator_reconcile_total"));
        assert!(names.contains(&"profiling_operator_active_instances"));
        assert!(names.contains(&"profiling_operator_captures_total"));
    }
}
