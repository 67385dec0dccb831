//! The `ProfilingConfig` custom resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A profile kind the acquirer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKind {
    Heap,
    Cpu,
    Goroutine,
    Mutex,
    Block,
    ThreadCreate,
}

impl ProfileKind {
    /// The default kind list used when an intent specifies none.
    pub fn defaults() -> Vec<ProfileKind> {
        vec![
            ProfileKind::Heap,
            ProfileKind::Cpu,
            ProfileKind::Goroutine,
            ProfileKind::Mutex,
        ]
    }

    /// The pprof HTTP path for this kind.
    pub fn path(&self) -> String {
        match self {
            ProfileKind::Heap => "/debug/pprof/heap".to_string(),
            ProfileKind::Cpu => "/debug/pprof/profile?seconds=30".to_string(),
            ProfileKind::Goroutine => "/debug/pprof/goroutine".to_string(),
            ProfileKind::Mutex => "/debug/pprof/mutex".to_string(),
            ProfileKind::Block => "/debug/pprof/block".to_string(),
            ProfileKind::ThreadCreate => "/debug/pprof/threadcreate".to_string(),
        }
    }

    /// The metadata `profile-type` / object-key suffix for this kind.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileKind::Heap => "heap",
            ProfileKind::Cpu => "cpu",
            ProfileKind::Goroutine => "goroutine",
            ProfileKind::Mutex => "mutex",
            ProfileKind::Block => "block",
            ProfileKind::ThreadCreate => "thread-create",
        }
    }
}

/// CPU/memory percent-of-request thresholds that drive the threshold
/// monitor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdPolicy {
    /// CPU percent-of-request that, if exceeded, triggers a capture.
    pub cpu_percent: u32,
    /// Memory percent-of-request that, if exceeded, triggers a capture.
    pub memory_percent: u32,
    /// How often to sample utilization, in seconds. Must be >= 10.
    pub sampling_period_secs: u32,
    /// Minimum interval between threshold-driven captures for the same
    /// instance, in seconds. Must be >= 60.
    pub cooldown_secs: u32,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            cpu_percent: 80,
            memory_percent: 80,
            sampling_period_secs: 30,
            cooldown_secs: 300,
        }
    }
}

/// Unconditional periodic capture, orthogonal to threshold/cooldown.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OnDemandPolicy {
    pub enabled: bool,
    /// Capture interval in seconds. Must be in [30, 60].
    pub interval_secs: u32,
}

impl Default for OnDemandPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 45,
        }
    }
}

/// The object-store write target for a single intent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// An optional label-based selector, restricted to a target namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct InstanceSelector {
    /// Defaults to the intent's own namespace when absent.
    pub namespace: Option<String>,
    /// All key/value pairs must match; an empty map matches all instances.
    #[serde(default)]
    pub match_labels: std::collections::BTreeMap<String, String>,
}

/// Declarative profiling intent.
#[derive(Debug, Clone, CustomResource, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "profiling.k8s.dev",
    version = "v1alpha1",
    kind = "ProfilingConfig",
    namespaced,
    shortname = "pc",
    status = "ProfilingConfigStatus",
    printcolumn = r#"{"name":"Active Instances","type":"integer","jsonPath":".status.activeInstances"}"#,
    printcolumn = r#"{"name":"Captures","type":"integer","jsonPath":".status.captureCount"}"#,
    printcolumn = r#"{"name":"Uploads","type":"integer","jsonPath":".status.uploadCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProfilingConfigSpec {
    #[serde(default)]
    pub selector: InstanceSelector,
    #[serde(default)]
    pub threshold: ThresholdPolicy,
    #[serde(default)]
    pub on_demand: Option<OnDemandPolicy>,
    pub destination: Destination,
    /// Empty list means the default {heap, cpu, goroutine, mutex}.
    #[serde(default)]
    pub profile_kinds: Vec<ProfileKind>,
}

impl ProfilingConfigSpec {
    /// The effective kind list: the declared list, or the
    /// default set when empty.
    pub fn effective_kinds(&self) -> Vec<ProfileKind> {
        if self.profile_kinds.is_empty() {
            ProfileKind::defaults()
        } else {
            self.profile_kinds.clone()
        }
    }

    /// Validate the declared policy. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.destination.bucket.is_empty() {
            return Err("s3 bucket is required".to_string());
        }
        if self.destination.region.is_empty() {
            return Err("s3 region is required".to_string());
        }
        if self.threshold.cpu_percent > 100 || self.threshold.memory_percent > 100 {
            return Err("threshold percentages must be in [0, 100]".to_string());
        }
        if self.threshold.sampling_period_secs < 10 {
            return Err("sampling period must be >= 10s".to_string());
        }
        if self.threshold.cooldown_secs < 60 {
            return Err("cooldown must be >= 60s".to_string());
        }
        if let Some(od) = &self.on_demand {
            if od.enabled && !(30..=60).contains(&od.interval_secs) {
                return Err("on-demand interval must be in [30, 60]s".to_string());
            }
        }
        Ok(())
    }
}

/// Observed state, written back to the status sub-resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfilingConfigStatus {
    pub observed_generation: Option<i64>,
    pub active_instances: Option<u32>,
    pub last_capture: Option<String>,
    pub capture_count: Option<u64>,
    pub upload_count: Option<u64>,
    pub message: Option<String>,
}
