use anyhow::Result;
use clap::Parser;
use flowdock::{config::AppConfig, pipeline};
use tracing::info;

/// flowdock — NetFlow v5 / sFlow v5 UDP telemetry ingest pipeline.
#[derive(Parser, Debug)]
#[command(name = "flowdock", version, about)]
struct Cli {
    /// Path to a TOML configuration file (optional; defaults are used if omitted).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowdock=info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!(version = env!("CARGO_PKG_VERSION"), "starting flowdock");

    let app_config = if let Some(ref path) = cli.config {
        AppConfig::from_file(path)?
    } else {
        AppConfig::default()
    };

    pipeline::run(app_config).await
}
