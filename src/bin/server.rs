//! placescout HTTP server.
//!
//! Tracing output goes to stderr. Set `RUST_LOG` to override the default
//! filter, e.g. `RUST_LOG=placescout_discovery=debug`.

use std::path::PathBuf;

use clap::Parser;
use placescout::AppConfig;
use placescout_discovery::Discovery;
use tracing_subscriber::EnvFilter;

/// placescout: multi-source point-of-interest discovery service.
#[derive(Parser)]
#[command(name = "placescout-server", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "PLACESCOUT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("placescout=info,placescout_discovery=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    tracing::info!(
        config = ?cli.config,
        bind = %config.server.bind_addr(),
        "placescout starting"
    );

    let discovery = Discovery::new(config.discovery)
        .map_err(|e| anyhow::anyhow!("failed to start discovery engine: {e}"))?;

    placescout::server::run(&config.server, discovery)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "placescout exited with error");
            e
        })?;

    tracing::info!("placescout shut down cleanly");
    Ok(())
}
