//! Escrow ledger server binary

use escrow_core::{Config, EscrowLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("starting escrow ledger server");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    tracing::debug!(config = %serde_json::to_string(&config)?, "effective configuration");

    // Open ledger
    let ledger = EscrowLedger::open(config).await?;
    let stats = ledger.stats()?;
    tracing::info!(
        wallets = stats.total_wallets,
        payments = stats.total_payments,
        jobs = stats.total_jobs,
        escrows = stats.total_escrows,
        "ledger opened"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down escrow ledger server");
    ledger.shutdown().await?;
    Ok(())
}
