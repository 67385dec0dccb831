//! A Kubernetes control plane that watches `ProfilingConfig` intents,
//! samples workload utilization, captures pprof profiles from opted-in
//! instances, and publishes them to S3-compatible object storage.

pub mod acquirer;
pub mod cli;
pub mod config;
pub mod crd;
pub mod error;
pub mod instance;
pub mod metrics;
pub mod monitors;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod sampler;
pub mod server;

pub use error::{Error, Result};

/// The current version of the operator binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use cli::Commands;
use kube::CustomResourceExt;

/// Dispatch a parsed CLI command.
pub async fn run_command(command: Commands, config: config::types::Config) -> Result<()> {
    match command {
        Commands::Run => reconciler::run(config).await,
        Commands::Crdgen => {
            let crd = crd::ProfilingConfig::crd();
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| Error::Config(format!("failed to render CRD manifest: {e}")))?;
            println!("{yaml}");
            Ok(())
        }
    }
}
