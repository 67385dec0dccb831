use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "profiling-operator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Captures pprof profiles from Kubernetes workloads and publishes them to object storage")]
#[command(long_about = "A cluster-resident control plane that reconciles ProfilingConfig custom resources into live per-instance profile-capture monitors, and publishes the resulting profiles to S3-compatible object storage.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to an operator config file (overrides the local/global search)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the reconciler and run until terminated
    Run,

    /// Print the ProfilingConfig CustomResourceDefinition manifest as YAML
    Crdgen,
}

impl Cli {
    /// Initialize the tracing subscriber based on verbosity flags.
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
