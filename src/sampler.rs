//! The Utilization Sampler: queries live per-container CPU/memory
//! usage and aggregates it against declared requests.
//!
//! Grounded on the same raw-request pattern the cluster's metrics-server
//! integration elsewhere in this tree uses against `metrics.k8s.io`.

use crate::error::{Error, Result};
use crate::instance::Instance;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use serde::Deserialize;

/// Sampled CPU/memory utilization, expressed as percent of declared
/// request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utilization {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl Utilization {
    /// True iff either resource exceeds its threshold. Equality does not
    /// count as exceeding.
    pub fn exceeds(&self, cpu_threshold: u32, memory_threshold: u32) -> bool {
        self.cpu_percent > cpu_threshold as f64 || self.memory_percent > memory_threshold as f64
    }

    /// The reason string to report when thresholds are exceeded. When both
    /// exceed, CPU is cited.
    pub fn exceed_reason(&self, cpu_threshold: u32, memory_threshold: u32) -> &'static str {
        if self.cpu_percent > cpu_threshold as f64 {
            "cpu"
        } else if self.memory_percent > memory_threshold as f64 {
            "memory"
        } else {
            "none"
        }
    }
}

/// Fetch aggregated usage and requests for `instance` and compute
/// percent-of-request for both CPU and memory.
pub async fn sample(client: &Client, instance: &Instance) -> Result<Utilization> {
    let usage = fetch_usage(client, &instance.key.namespace, &instance.key.name).await?;
    let requests = fetch_requests(client, &instance.key.namespace, &instance.key.name).await?;

    let cpu_percent = percent(usage.cpu_millicores, requests.cpu_millicores);
    let memory_percent = percent(usage.memory_bytes, requests.memory_bytes);

    Ok(Utilization {
        cpu_percent,
        memory_percent,
    })
}

/// `1000 * usage / request` normalized to a 0-100+ percent scale. Zero
/// request maps to zero percent, never infinity or an error.
fn percent(usage: u64, request: u64) -> f64 {
    if request == 0 {
        return 0.0;
    }
    (usage as f64 / request as f64) * 100.0
}

struct Usage {
    cpu_millicores: u64,
    memory_bytes: u64,
}

async fn fetch_usage(client: &Client, namespace: &str, name: &str) -> Result<Usage> {
    let path = format!("/apis/metrics.k8s.io/v1beta1/namespaces/{namespace}/pods/{name}");

    let request = http::Request::builder()
        .method("GET")
        .uri(&path)
        .body(Vec::new())
        .map_err(|e| Error::Metrics(format!("failed to build request: {e}")))?;

    let response = client
        .request::<PodMetrics>(request)
        .await
        .map_err(|e| Error::Metrics(format!("metrics API error: {e}")))?;

    let mut cpu_millicores = 0u64;
    let mut memory_bytes = 0u64;
    for container in &response.containers {
        cpu_millicores += parse_cpu_quantity(&container.usage.cpu);
        memory_bytes += parse_memory_quantity(&container.usage.memory);
    }

    Ok(Usage {
        cpu_millicores,
        memory_bytes,
    })
}

async fn fetch_requests(client: &Client, namespace: &str, name: &str) -> Result<Usage> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = pods
        .get(name)
        .await
        .map_err(|e| Error::Metrics(format!("failed to fetch pod spec: {e}")))?;

    let mut cpu_millicores = 0u64;
    let mut memory_bytes = 0u64;

    if let Some(spec) = pod.spec {
        for container in spec.containers {
            if let Some(resources) = container.resources {
                if let Some(requests) = resources.requests {
                    if let Some(cpu) = requests.get("cpu") {
                        cpu_millicores += parse_cpu_quantity(&cpu.0);
                    }
                    if let Some(memory) = requests.get("memory") {
                        memory_bytes += parse_memory_quantity(&memory.0);
                    }
                }
            }
        }
    }

    Ok(Usage {
        cpu_millicores,
        memory_bytes,
    })
}

#[derive(Debug, Deserialize)]
struct PodMetrics {
    containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetrics {
    usage: ResourceUsage,
}

#[derive(Debug, Deserialize)]
struct ResourceUsage {
    cpu: String,
    memory: String,
}

/// Parse a CPU quantity string (e.g. "100m", "1", "500000000n") to
/// millicores.
fn parse_cpu_quantity(quantity: &str) -> u64 {
    let quantity = quantity.trim();

    if let Some(val) = quantity.strip_suffix('n') {
        val.parse::<u64>().map(|n| n / 1_000_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('u') {
        val.parse::<u64>().map(|u| u / 1_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('m') {
        val.parse::<u64>().unwrap_or(0)
    } else {
        quantity
            .parse::<f64>()
            .map(|c| (c * 1000.0) as u64)
            .unwrap_or(0)
    }
}

/// Parse a memory quantity string (e.g. "128Mi", "1Gi", "256000Ki") to
/// bytes.
fn parse_memory_quantity(quantity: &str) -> u64 {
    let quantity = quantity.trim();

    if let Some(val) = quantity.strip_suffix("Ki") {
        val.parse::<u64>().map(|k| k * 1024).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Mi") {
        val.parse::<u64>().map(|m| m * 1024 * 1024).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Gi") {
        val.parse::<u64>()
            .map(|g| g * 1024 * 1024 * 1024)
            .unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Ti") {
        val.parse::<u64>()
            .map(|t| t * 1024 * 1024 * 1024 * 1024)
            .unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('K').or_else(|| quantity.strip_suffix('k')) {
        val.parse::<u64>().map(|k| k * 1000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('M') {
        val.parse::<u64>().map(|m| m * 1_000_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('G') {
        val.parse::<u64>().map(|g| g * 1_000_000_000).unwrap_or(0)
    } else {
        quantity.parse::<u64>().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_quantity_units() {
        assert_eq!(parse_cpu_quantity("100m"), 100);
        assert_eq!(parse_cpu_quantity("1"), 1000);
        assert_eq!(parse_cpu_quantity("0.5"), 500);
        assert_eq!(parse_cpu_quantity("500000000n"), 500);
        assert_eq!(parse_cpu_quantity("500000u"), 500);
    }

    #[test]
    fn parse_memory_quantity_units() {
        assert_eq!(parse_memory_quantity("128Mi"), 128 * 1024 * 1024);
        assert_eq!(parse_memory_quantity("1Gi"), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_quantity("256Ki"), 256 * 1024);
        assert_eq!(parse_memory_quantity("500M"), 500_000_000);
        assert_eq!(parse_memory_quantity("1000000"), 1_000_000);
    }

    #[test]
    fn zero_request_yields_zero_percent() {
        assert_eq!(percent(500, 0), 0.0);
    }

    #[test]
    fn percent_is_usage_over_request_times_100() {
        assert_eq!(percent(850, 1000), 85.0);
    }

    #[test]
    fn exceeds_is_strict_inequality() {
        let u = Utilization {
            cpu_percent: 30.0,
            memory_percent: 30.0,
        };
        assert!(!u.exceeds(30, 30));
        assert!(u.exceeds(29, 30));
    }

    #[test]
    fn exceed_reason_cites_cpu_when_both_exceed() {
        let u = Utilization {
            cpu_percent: 85.0,
            memory_percent: 90.0,
        };
        assert_eq!(u.exceed_reason(30, 30), "cpu");
    }

    #[test]
    fn exceed_reason_cites_memory_when_only_memory_exceeds() {
        let u = Utilization {
            cpu_percent: 10.0,
            memory_percent: 90.0,
        };
        assert_eq!(u.exceed_reason(30, 30), "memory");
    }
}
