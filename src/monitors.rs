//! Per-intent monitors: the threshold-driven and
//! on-demand-driven schedulers that run as two independent tasks per
//! live intent.

use crate::acquirer;
use crate::crd::{ProfileKind, ProfilingConfigSpec};
use crate::instance::InstanceKey;
use crate::publisher::{Publisher, Reason};
use crate::registry::Registry;
use crate::sampler;
use kube::Client;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Instances with a capture currently in flight, shared between an
/// intent's threshold and on-demand monitors so at most one acquisition
/// runs per (instance, intent) at a time (spec.md §4.3/§5).
type InFlight = Arc<SyncMutex<HashSet<InstanceKey>>>;

/// A single captured profile batch's outcome, reported back to the
/// reconciler so it can update intent counters.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub intent_key: String,
    pub instance_key: InstanceKey,
    pub reason: Reason,
    /// Number of profiles successfully published in this batch.
    pub uploaded: usize,
}

/// Cancellation handles for one intent's two monitor tasks.
pub struct MonitorHandles {
    pub token: CancellationToken,
}

impl MonitorHandles {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Spawn the threshold monitor and, if enabled, the on-demand monitor for
/// one intent. Returns a handle whose cancellation tears both down.
pub fn spawn(
    intent_key: String,
    spec: ProfilingConfigSpec,
    client: Client,
    registry: Arc<Registry>,
    outcomes: mpsc::UnboundedSender<CaptureOutcome>,
) -> MonitorHandles {
    let token = CancellationToken::new();
    let in_flight: InFlight = Arc::new(SyncMutex::new(HashSet::new()));

    tokio::spawn(threshold_monitor(
        intent_key.clone(),
        spec.clone(),
        client.clone(),
        registry.clone(),
        outcomes.clone(),
        in_flight.clone(),
        token.clone(),
    ));

    if let Some(on_demand) = spec.on_demand.clone().filter(|od| od.enabled) {
        tokio::spawn(on_demand_monitor(
            intent_key,
            spec,
            on_demand,
            client,
            registry,
            outcomes,
            in_flight,
            token.clone(),
        ));
    }

    MonitorHandles { token }
}

/// Claim `key` for a capture if no other monitor currently holds it.
/// Returns `true` (and records the claim) iff the key was not already
/// in flight.
fn try_begin_capture(in_flight: &InFlight, key: &InstanceKey) -> bool {
    in_flight.lock().insert(key.clone())
}

/// Release a capture claim taken by `try_begin_capture`.
fn end_capture(in_flight: &InFlight, key: &InstanceKey) {
    in_flight.lock().remove(key);
}

/// Every `sampling_period`, snapshot tracked instances, skip those within
/// cooldown, sample utilization, and capture-and-publish on threshold
/// exceed.
async fn threshold_monitor(
    intent_key: String,
    spec: ProfilingConfigSpec,
    client: Client,
    registry: Arc<Registry>,
    outcomes: mpsc::UnboundedSender<CaptureOutcome>,
    in_flight: InFlight,
    token: CancellationToken,
) {
    let period = Duration::from_secs(spec.threshold.sampling_period_secs as u64);
    let cooldown = Duration::from_secs(spec.threshold.cooldown_secs as u64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(intent = %intent_key, "threshold_monitor_stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let tracked = registry.tracked_for_intent(&intent_key);
        for entry in tracked {
            if token.is_cancelled() {
                return;
            }
            if !registry.can_profile(&entry.instance.key, cooldown) {
                continue;
            }

            let utilization = match sampler::sample(&client, &entry.instance).await {
                Ok(u) => u,
                Err(e) => {
                    warn!(intent = %intent_key, instance = %entry.instance.key, error = %e, "utilization_sample_failed");
                    continue;
                }
            };

            if !utilization.exceeds(spec.threshold.cpu_percent, spec.threshold.memory_percent) {
                continue;
            }

            info!(
                intent = %intent_key,
                instance = %entry.instance.key,
                reason = utilization.exceed_reason(spec.threshold.cpu_percent, spec.threshold.memory_percent),
                "threshold_exceeded"
            );

            if !try_begin_capture(&in_flight, &entry.instance.key) {
                continue;
            }
            let result = capture_and_publish(
                &intent_key,
                &spec,
                &client,
                &entry.instance,
                Reason::ThresholdExceeded,
                &token,
            )
            .await;
            end_capture(&in_flight, &entry.instance.key);

            if let Some(uploaded) = result {
                registry.mark_profiled(&entry.instance.key);
                let _ = outcomes.send(CaptureOutcome {
                    intent_key: intent_key.clone(),
                    instance_key: entry.instance.key.clone(),
                    reason: Reason::ThresholdExceeded,
                    uploaded,
                });
            }
        }
    }
}

/// Every `interval`, unconditionally capture-and-publish for all tracked
/// instances, ignoring cooldown entirely.
async fn on_demand_monitor(
    intent_key: String,
    spec: ProfilingConfigSpec,
    on_demand: crate::crd::OnDemandPolicy,
    client: Client,
    registry: Arc<Registry>,
    outcomes: mpsc::UnboundedSender<CaptureOutcome>,
    in_flight: InFlight,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(on_demand.interval_secs as u64));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(intent = %intent_key, "on_demand_monitor_stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let tracked = registry.tracked_for_intent(&intent_key);
        for entry in tracked {
            if token.is_cancelled() {
                return;
            }

            if !try_begin_capture(&in_flight, &entry.instance.key) {
                continue;
            }
            let result = capture_and_publish(
                &intent_key,
                &spec,
                &client,
                &entry.instance,
                Reason::OnDemand,
                &token,
            )
            .await;
            end_capture(&in_flight, &entry.instance.key);

            if let Some(uploaded) = result {
                let _ = outcomes.send(CaptureOutcome {
                    intent_key: intent_key.clone(),
                    instance_key: entry.instance.key.clone(),
                    reason: Reason::OnDemand,
                    uploaded,
                });
            }
        }
    }
}

/// The shared capture-and-publish sequence. Returns the number of
/// profiles published on full success; any failure is logged and the
/// cooldown/counters are left untouched.
async fn capture_and_publish(
    intent_key: &str,
    spec: &ProfilingConfigSpec,
    client: &Client,
    instance: &crate::instance::Instance,
    reason: Reason,
    token: &CancellationToken,
) -> Option<usize> {
    let kinds: Vec<ProfileKind> = spec.effective_kinds();

    let profiles = tokio::select! {
        _ = token.cancelled() => return None,
        result = acquirer::capture(client, instance, &kinds) => match result {
            Ok(p) => p,
            Err(e) => {
                warn!(intent = %intent_key, instance = %instance.key, error = %e, "capture_failed");
                return None;
            }
        },
    };

    let publisher = match Publisher::new(&spec.destination).await {
        Ok(p) => p,
        Err(e) => {
            warn!(intent = %intent_key, error = %e, "publisher_construction_failed");
            return None;
        }
    };

    for profile in &profiles {
        if token.is_cancelled() {
            return None;
        }
        if let Err(e) = publisher.put(instance, profile, reason).await {
            warn!(intent = %intent_key, instance = %instance.key, error = %e, "publish_failed");
            return None;
        }
    }

    Some(profiles.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> InstanceKey {
        InstanceKey {
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn second_claim_for_same_instance_is_rejected_until_released() {
        let in_flight: InFlight = Arc::new(SyncMutex::new(HashSet::new()));
        let k = key("a");

        assert!(try_begin_capture(&in_flight, &k));
        assert!(!try_begin_capture(&in_flight, &k));

        end_capture(&in_flight, &k);
        assert!(try_begin_capture(&in_flight, &k));
    }

    #[test]
    fn distinct_instances_can_be_claimed_concurrently() {
        let in_flight: InFlight = Arc::new(SyncMutex::new(HashSet::new()));
        assert!(try_begin_capture(&in_flight, &key("a")));
        assert!(try_begin_capture(&in_flight, &key("b")));
    }
}
