//! The Instance Registry: a process-local concurrent map tracking
//! which instances are currently being profiled on whose behalf.

use crate::crd::InstanceSelector;
use crate::error::Result;
use crate::instance::{self, Instance, InstanceKey};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A Registry entry: an instance, its owning intent, and the last time it
/// was profiled.
#[derive(Debug, Clone)]
pub struct TrackedInstance {
    pub instance: Instance,
    pub intent_key: String,
    pub last_profiled: Option<SystemTime>,
}

/// The Instance Registry. A single exclusive lock guards a plain map; all
/// operations are short and I/O-free.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<InstanceKey, TrackedInstance>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// List instances matching `selector`: apply the label-selector filter
    /// at the cluster query against `selector`'s target namespace (or
    /// `default_namespace` when unset), then filter to profileable
    /// instances. Order of results is not guaranteed.
    pub async fn list_matching(
        client: &Client,
        selector: &InstanceSelector,
        default_namespace: &str,
    ) -> Result<Vec<Instance>> {
        let namespace = selector
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string());
        let label_selector = instance::label_selector(&selector.match_labels);

        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(&label_selector);
        }

        let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        let pod_list = pods.list(&params).await?;

        Ok(pod_list
            .items
            .iter()
            .filter_map(Instance::from_pod)
            .filter(|i| i.profileable())
            .collect())
    }

    /// Record tracking for `instance` under `intent_key`. Idempotent:
    /// replaces any prior tracking for the same instance key, preserving
    /// its `last_profiled` time if the entry belonged to the same intent.
    pub fn track(&self, instance: Instance, intent_key: &str) {
        let mut map = self.inner.lock();
        let last_profiled = map
            .get(&instance.key)
            .filter(|existing| existing.intent_key == intent_key)
            .and_then(|existing| existing.last_profiled);
        map.insert(
            instance.key.clone(),
            TrackedInstance {
                instance,
                intent_key: intent_key.to_string(),
                last_profiled,
            },
        );
    }

    /// Remove tracking for `key`. No-op if absent.
    pub fn untrack(&self, key: &InstanceKey) {
        self.inner.lock().remove(key);
    }

    /// Remove tracking for every instance owned by `intent_key`.
    pub fn untrack_intent(&self, intent_key: &str) {
        self.inner.lock().retain(|_, v| v.intent_key != intent_key);
    }

    /// Snapshot view: a clone of all currently tracked entries.
    pub fn tracked(&self) -> Vec<TrackedInstance> {
        self.inner.lock().values().cloned().collect()
    }

    /// Snapshot view restricted to one intent's tracked instances.
    pub fn tracked_for_intent(&self, intent_key: &str) -> Vec<TrackedInstance> {
        self.inner
            .lock()
            .values()
            .filter(|v| v.intent_key == intent_key)
            .cloned()
            .collect()
    }

    /// True iff no prior profile time is recorded, or the cooldown has
    /// elapsed since the last one.
    pub fn can_profile(&self, key: &InstanceKey, cooldown: Duration) -> bool {
        match self.inner.lock().get(key).and_then(|t| t.last_profiled) {
            None => true,
            Some(last) => SystemTime::now()
                .duration_since(last)
                .map(|elapsed| elapsed > cooldown)
                .unwrap_or(false),
        }
    }

    /// Mark `key` as profiled at the current wall time. No-op if absent.
    pub fn mark_profiled(&self, key: &InstanceKey) {
        if let Some(entry) = self.inner.lock().get_mut(key) {
            entry.last_profiled = Some(SystemTime::now());
        }
    }

    /// Current tracking cardinality.
    pub fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Current tracking cardinality restricted to one intent.
    pub fn count_for_intent(&self, intent_key: &str) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|v| v.intent_key == intent_key)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn instance(name: &str) -> Instance {
        Instance {
            key: InstanceKey {
                namespace: "default".to_string(),
                name: name.to_string(),
            },
            labels: BTreeMap::new(),
            owner_references: vec![],
            phase: Some("Running".to_string()),
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn track_then_count() {
        let reg = Registry::new();
        reg.track(instance("a"), "ns/intent");
        reg.track(instance("b"), "ns/intent");
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn untrack_absent_key_is_noop() {
        let reg = Registry::new();
        reg.untrack(&InstanceKey {
            namespace: "default".to_string(),
            name: "nope".to_string(),
        });
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn track_overwrites_same_key() {
        let reg = Registry::new();
        reg.track(instance("a"), "ns/intent-1");
        reg.track(instance("a"), "ns/intent-2");
        assert_eq!(reg.count(), 1);
        let tracked = reg.tracked();
        assert_eq!(tracked[0].intent_key, "ns/intent-2");
    }

    #[test]
    fn retracking_same_intent_preserves_last_profiled() {
        let reg = Registry::new();
        let key = instance("a").key.clone();
        reg.track(instance("a"), "ns/intent");
        reg.mark_profiled(&key);
        assert!(!reg.can_profile(&key, Duration::from_secs(3600)));

        reg.track(instance("a"), "ns/intent");
        assert!(!reg.can_profile(&key, Duration::from_secs(3600)));
    }

    #[test]
    fn retracking_different_intent_resets_cooldown() {
        let reg = Registry::new();
        let key = instance("a").key.clone();
        reg.track(instance("a"), "ns/intent-1");
        reg.mark_profiled(&key);
        assert!(!reg.can_profile(&key, Duration::from_secs(3600)));

        reg.track(instance("a"), "ns/intent-2");
        assert!(reg.can_profile(&key, Duration::from_secs(3600)));
    }

    #[test]
    fn can_profile_true_when_never_profiled() {
        let reg = Registry::new();
        let key = instance("a").key.clone();
        reg.track(instance("a"), "ns/intent");
        assert!(reg.can_profile(&key, Duration::from_secs(60)));
    }

    #[test]
    fn can_profile_false_within_cooldown() {
        let reg = Registry::new();
        let key = instance("a").key.clone();
        reg.track(instance("a"), "ns/intent");
        reg.mark_profiled(&key);
        assert!(!reg.can_profile(&key, Duration::from_secs(3600)));
    }

    #[test]
    fn untrack_intent_removes_only_its_entries() {
        let reg = Registry::new();
        reg.track(instance("a"), "ns/intent-1");
        reg.track(instance("b"), "ns/intent-2");
        reg.untrack_intent("ns/intent-1");
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.tracked()[0].instance.key.name, "b");
    }

    #[test]
    fn concurrent_track_untrack_never_loses_or_retains_incorrectly() {
        use std::sync::Arc;
        use std::thread;

        let reg = Arc::new(Registry::new());
        let mut handles = vec![];

        for i in 0..8 {
            let reg = reg.clone();
            handles.push(thread::spawn(move || {
                let name = format!("pod-{i}");
                for _ in 0..50 {
                    reg.track(instance(&name), "ns/intent");
                    reg.tracked();
                    reg.untrack(&InstanceKey {
                        namespace: "default".to_string(),
                        name: name.clone(),
                    });
                }
                reg.track(instance(&name), "ns/intent");
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reg.count(), 8);
    }
}
