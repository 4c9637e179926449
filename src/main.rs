use clap::Parser;
use launchkit::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr; stdout carries process output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("launchkit=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    Cli::parse().execute().await?;
    Ok(())
}
