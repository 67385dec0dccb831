//! Instance identity, opt-in filtering, and service-name derivation.

use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;

/// Annotation a pod carries to opt in to profiling.
pub const OPT_IN_ANNOTATION: &str = "profiling.k8s.dev/enabled";
/// Annotation overriding the default pprof port.
pub const PORT_ANNOTATION: &str = "profiling.k8s.dev/port";
/// Default pprof port when no annotation overrides it.
pub const DEFAULT_PORT: u16 = 6060;

const REPLICA_SET_KIND: &str = "ReplicaSet";

/// Stable identity for an instance: namespace/name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single owner reference, trimmed to what service-name derivation needs.
#[derive(Debug, Clone)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// An addressable workload replica.
#[derive(Debug, Clone)]
pub struct Instance {
    pub key: InstanceKey,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerRef>,
    pub phase: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

impl Instance {
    /// Build an `Instance` view from a raw `Pod`.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();

        let labels = pod
            .metadata
            .labels
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let annotations = pod
            .metadata
            .annotations
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect();

        let owner_references = pod
            .metadata
            .owner_references
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|o| OwnerRef {
                kind: o.kind,
                name: o.name,
            })
            .collect();

        let phase = pod.status.as_ref().and_then(|s| s.phase.clone());

        Some(Self {
            key: InstanceKey { namespace, name },
            labels,
            owner_references,
            phase,
            annotations,
        })
    }

    /// An instance is profileable iff it is Running and opted in.
    pub fn profileable(&self) -> bool {
        self.phase.as_deref() == Some("Running")
            && self.annotations.get(OPT_IN_ANNOTATION).map(String::as_str) == Some("true")
    }

    /// Resolve the pprof port: the annotation if it parses to a valid port,
    /// otherwise the default.
    pub fn profile_port(&self) -> u16 {
        self.annotations
            .get(PORT_ANNOTATION)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|p| *p > 0 && *p <= 65535)
            .map(|p| p as u16)
            .unwrap_or(DEFAULT_PORT)
    }

    /// Derive the service name from the label/owner priority chain.
    pub fn service_name(&self) -> String {
        if let Some(v) = self.labels.get("app.kubernetes.io/name") {
            if !v.is_empty() {
                return v.clone();
            }
        }
        if let Some(v) = self.labels.get("app") {
            if !v.is_empty() {
                return v.clone();
            }
        }
        if let Some(v) = self.labels.get("k8s-app") {
            if !v.is_empty() {
                return v.clone();
            }
        }
        if let Some(owner) = self.owner_references.first() {
            if owner.kind == REPLICA_SET_KIND {
                return strip_hash_suffix(&owner.name);
            }
            return owner.name.clone();
        }
        strip_dash_segments(&self.key.name, 2)
    }
}

/// Strip a single trailing hash segment from a ReplicaSet-owned name
/// (e.g. `web-app-7d8f9c5b6d` -> `web-app`).
fn strip_hash_suffix(name: &str) -> String {
    strip_dash_segments(name, 1)
}

/// Strip the last `n` dash-separated segments from `name`.
fn strip_dash_segments(name: &str, n: usize) -> String {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() <= n {
        return name.to_string();
    }
    parts[..parts.len() - n].join("-")
}

/// Build a Kubernetes label-selector query string (`k=v,k2=v2`) from a set
/// of match-label requirements, for use in a cluster-side list query. An
/// empty map yields an empty selector string, meaning "match all".
pub fn label_selector(match_labels: &BTreeMap<String, String>) -> String {
    match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(
        labels: &[(&str, &str)],
        owner: Option<(&str, &str)>,
        name: &str,
    ) -> Instance {
        Instance {
            key: InstanceKey {
                namespace: "default".to_string(),
                name: name.to_string(),
            },
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            owner_references: owner
                .into_iter()
                .map(|(kind, name)| OwnerRef {
                    kind: kind.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            phase: Some("Running".to_string()),
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn service_name_prefers_kubernetes_io_name_label() {
        let i = instance_with(
            &[
                ("app.kubernetes.io/name", "my-service"),
                ("app", "other"),
            ],
            Some(("ReplicaSet", "web-app-7d8f9c5b6d")),
            "web-app-7d8f9c5b6d-xyz456",
        );
        assert_eq!(i.service_name(), "my-service");
    }

    #[test]
    fn service_name_falls_back_to_app_label() {
        let i = instance_with(
            &[("app", "other")],
            Some(("ReplicaSet", "web-app-7d8f9c5b6d")),
            "web-app-7d8f9c5b6d-xyz456",
        );
        assert_eq!(i.service_name(), "other");
    }

    #[test]
    fn service_name_falls_back_to_owner_reference() {
        let i = instance_with(
            &[],
            Some(("ReplicaSet", "web-app-7d8f9c5b6d")),
            "web-app-7d8f9c5b6d-xyz456",
        );
        assert_eq!(i.service_name(), "web-app");
    }

    #[test]
    fn service_name_falls_back_to_pod_name_when_no_owner() {
        let i = instance_with(&[], None, "web-app-7d8f9c5b6d-xyz456");
        assert_eq!(i.service_name(), "web-app");
    }

    #[test]
    fn profileable_requires_running_and_opt_in() {
        let mut i = instance_with(&[], None, "p");
        assert!(!i.profileable());
        i.annotations
            .insert(OPT_IN_ANNOTATION.to_string(), "true".to_string());
        assert!(i.profileable());
        i.phase = Some("Pending".to_string());
        assert!(!i.profileable());
    }

    #[test]
    fn label_selector_is_empty_for_empty_map() {
        assert_eq!(label_selector(&BTreeMap::new()), "");
    }

    #[test]
    fn label_selector_joins_sorted_pairs() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "svc".to_string());
        labels.insert("tier".to_string(), "web".to_string());
        assert_eq!(label_selector(&labels), "app=svc,tier=web");
    }

    #[test]
    fn profile_port_defaults_when_absent_or_invalid() {
        let mut i = instance_with(&[], None, "p");
        assert_eq!(i.profile_port(), DEFAULT_PORT);
        i.annotations
            .insert(PORT_ANNOTATION.to_string(), "0".to_string());
        assert_eq!(i.profile_port(), DEFAULT_PORT);
        i.annotations
            .insert(PORT_ANNOTATION.to_string(), "70000".to_string());
        assert_eq!(i.profile_port(), DEFAULT_PORT);
        i.annotations
            .insert(PORT_ANNOTATION.to_string(), "9000".to_string());
        assert_eq!(i.profile_port(), 9000);
    }
}
