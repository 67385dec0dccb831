use clap::Parser;
use profiling_operator::cli::Cli;
use profiling_operator::config;
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> profiling_operator::Result<()> {
    // kube's rustls backend leaves crypto-provider selection to the binary;
    // install it once before any TLS-backed client is constructed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    cli.init_logging();

    let config = config::load_config(cli.config.as_deref())?;

    profiling_operator::run_command(cli.command, config).await
}
