//! The Object-Store Publisher: composes object keys, attaches
//! metadata, and writes profile bytes to S3-compatible storage.
//!
//! Grounded on an S3-compatible client constructed from explicit
//! credentials/region/endpoint, adapted from GET to PUT.

use crate::acquirer::Profile;
use crate::crd::Destination;
use crate::error::{Error, Result};
use crate::instance::Instance;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::{Client as S3Client, Config};
use chrono::{DateTime, Utc};

/// Why a profile was captured; attached as object metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    ThresholdExceeded,
    OnDemand,
}

impl Reason {
    fn as_str(&self) -> &'static str {
        match self {
            Reason::ThresholdExceeded => "threshold-exceeded",
            Reason::OnDemand => "on-demand",
        }
    }
}

/// An authenticated client bound to a single intent's destination.
pub struct Publisher {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl Publisher {
    /// Construct a publisher for `destination`. Credentials are discovered
    /// from the ambient environment; a static fallback is accepted when no
    /// workload-identity chain is configured.
    pub async fn new(destination: &Destination) -> Result<Self> {
        let region = Region::new(destination.region.clone());

        let mut config_builder = Config::builder().region(region.clone());

        if let Some(endpoint) = &destination.endpoint {
            config_builder = config_builder.endpoint_url(endpoint.clone());
        }

        if let (Ok(access_key), Ok(secret_key)) = (
            std::env::var("PROFILING_OPERATOR_AWS_ACCESS_KEY_ID"),
            std::env::var("PROFILING_OPERATOR_AWS_SECRET_ACCESS_KEY"),
        ) {
            let creds = Credentials::new(access_key, secret_key, None, None, "profiling-operator");
            config_builder = config_builder.credentials_provider(creds);
        } else {
            let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            if let Some(provider) = shared.credentials_provider() {
                config_builder = config_builder.credentials_provider(provider);
            }
        }

        let client = S3Client::from_conf(config_builder.build());

        Ok(Self {
            client,
            bucket: destination.bucket.clone(),
            prefix: destination.prefix.clone(),
        })
    }

    /// Compose the object key, attach metadata, and write the profile
    /// bytes. Returns the key written.
    pub async fn put(&self, instance: &Instance, profile: &Profile, reason: Reason) -> Result<String> {
        let key = object_key(&self.prefix, instance, profile);

        let captured_at: DateTime<Utc> = profile.captured_at.into();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(profile.bytes.clone().into())
            .content_type("application/octet-stream")
            .metadata("pod-name", &instance.key.name)
            .metadata("pod-namespace", &instance.key.namespace)
            .metadata("profile-type", profile.kind.label())
            .metadata("reason", reason.as_str())
            .metadata("timestamp", captured_at.to_rfc3339());

        for (k, v) in &instance.labels {
            request = request.metadata(format!("pod-label-{k}"), v);
        }

        request
            .send()
            .await
            .map_err(|e| Error::ObjectStore(e.to_string()))?;

        Ok(key)
    }
}

/// Compose the deterministic object key for a profile:
/// `<prefix>/<YYYY-MM-DD>/<service-name>/<YYYYMMDD-HHMMSS>-<kind>.pprof`.
/// Empty segments (e.g. no prefix) collapse rather than leaving a double
/// slash. Public so it can be checked for purity/collision-freedom from
/// outside the crate without standing up an S3 client.
pub fn object_key(prefix: &str, instance: &Instance, profile: &Profile) -> String {
    let captured_at: DateTime<Utc> = profile.captured_at.into();
    let date = captured_at.format("%Y-%m-%d").to_string();
    let timestamp = captured_at.format("%Y%m%d-%H%M%S").to_string();
    let service_name = instance.service_name();

    let segments = [
        prefix,
        &date,
        &service_name,
        &format!("{timestamp}-{}.pprof", profile.kind.label()),
    ];

    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ProfileKind;
    use crate::instance::InstanceKey;
    use std::collections::BTreeMap;
    use std::time::{Duration, UNIX_EPOCH};

    fn instance() -> Instance {
        Instance {
            key: InstanceKey {
                namespace: "default".to_string(),
                name: "web-app-7d8f9c5b6d-xyz456".to_string(),
            },
            labels: BTreeMap::from([("app".to_string(), "my-service".to_string())]),
            owner_references: vec![],
            phase: Some("Running".to_string()),
            annotations: BTreeMap::new(),
        }
    }

    fn profile_at(kind: ProfileKind, unix_secs: u64) -> Profile {
        Profile {
            kind,
            bytes: vec![1, 2, 3],
            captured_at: UNIX_EPOCH + Duration::from_secs(unix_secs),
        }
    }

    #[test]
    fn key_has_no_prefix_when_prefix_is_empty() {
        let key = object_key("", &instance(), &profile_at(ProfileKind::Heap, 1_700_000_000));
        assert!(!key.starts_with('/'));
        assert_eq!(key.matches("//").count(), 0);
    }

    #[test]
    fn key_includes_prefix_date_service_and_kind() {
        let key = object_key("profiles", &instance(), &profile_at(ProfileKind::Cpu, 1_700_000_000));
        assert!(key.starts_with("profiles/"));
        assert!(key.contains("/my-service/"));
        assert!(key.ends_with("-cpu.pprof"));
    }

    #[test]
    fn distinct_timestamps_never_collide() {
        let a = object_key("p", &instance(), &profile_at(ProfileKind::Heap, 1_700_000_000));
        let b = object_key("p", &instance(), &profile_at(ProfileKind::Heap, 1_700_000_001));
        assert_ne!(a, b);
    }

    #[test]
    fn key_is_pure_function_of_inputs() {
        let a = object_key("p", &instance(), &profile_at(ProfileKind::Heap, 42));
        let b = object_key("p", &instance(), &profile_at(ProfileKind::Heap, 42));
        assert_eq!(a, b);
    }

    #[test]
    fn reason_labels_match_spec_strings() {
        assert_eq!(Reason::ThresholdExceeded.as_str(), "threshold-exceeded");
        assert_eq!(Reason::OnDemand.as_str(), "on-demand");
    }
}
