//! Wallet ledger server binary

use anyhow::Context;
use prometheus::Encoder;
use wallet_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wallet ledger server");

    // Load configuration: explicit path, then WALLET_LEDGER_CONFIG, then environment
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WALLET_LEDGER_CONFIG").ok());
    let config = match config_path {
        Some(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("failed to load config from {}", path))?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "Configuration loaded"
    );

    let ledger = Ledger::open(&config).context("failed to open ledger")?;
    tracing::info!("Ledger opened successfully");

    // Startup audit over whatever the backend already holds
    match ledger.verify_conservation().await {
        Ok(report) => {
            tracing::info!(report = %serde_json::to_string(&report)?, "Conservation check");
            if !report.is_consistent() {
                tracing::error!("Ledger failed its conservation check at startup");
            }
        }
        Err(e) => tracing::error!(error = %e, "Conservation check could not run"),
    }

    // The transport layer is mounted by the embedding service
    tokio::signal::ctrl_c().await?;

    if let Some(metrics) = ledger.metrics() {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new().encode(&metrics.registry().gather(), &mut buffer)?;
        tracing::debug!(metrics = %String::from_utf8_lossy(&buffer), "Final metrics");
    }

    tracing::info!("Shutting down wallet ledger server");
    Ok(())
}
