//! Crate-wide error type.
//!
//! Structured per external collaborator so callers (notably `error_policy`)
//! can match on what failed rather than string-matching messages.

use thiserror::Error;

/// Errors that can occur anywhere in the profiling control loop.
#[derive(Debug, Error)]
pub enum Error {
    /// A Kubernetes API call failed.
    #[error("kubernetes API error: {0}")]
    Kubernetes(#[from] kube::Error),

    /// The metrics API (metrics.k8s.io) could not be reached or parsed.
    #[error("metrics API error: {0}")]
    Metrics(String),

    /// Establishing or using a port-forward tunnel failed.
    #[error("port-forward error: {0}")]
    PortForward(String),

    /// A pprof HTTP request failed or returned a non-success status.
    #[error("pprof request failed: {0}")]
    ProfileHttp(String),

    /// An object-store operation failed.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An intent failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error from the local filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    /// Does this error represent a transient-external failure?
    ///
    /// Transient failures are logged and skipped by monitors; they never
    /// advance cooldown or counters.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Metrics(_) | Error::PortForward(_) | Error::ProfileHttp(_) | Error::ObjectStore(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_external_errors_are_marked_transient() {
        assert!(Error::Metrics("unreachable".into()).is_transient());
        assert!(Error::PortForward("timed out".into()).is_transient());
        assert!(Error::ProfileHttp("status 500".into()).is_transient());
        assert!(Error::ObjectStore("upload failed".into()).is_transient());
    }

    #[test]
    fn configuration_errors_are_not_transient() {
        assert!(!Error::Config("bad toml".into()).is_transient());
        assert!(!Error::Validation("s3 bucket is required".into()).is_transient());
    }
}
