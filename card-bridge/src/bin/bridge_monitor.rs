use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use card_bridge::config::BridgeConfig;
use card_bridge::errors::BridgeError;
use card_bridge::ledger::RpcLedgerClient;
use card_bridge::monitor::ReconciliationMonitor;
use card_bridge::notify::WebhookNotifier;

/// Standalone reconciliation monitor. Subscribes to the program's log and
/// account-change streams and runs until interrupted.
#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BridgeConfig::from_env()?;
    tracing::info!(
        program_id = %config.program_id,
        rpc_url = %config.rpc_url,
        "starting bridge monitor"
    );

    let ledger = Arc::new(RpcLedgerClient::new(&config));
    let notifier =
        Arc::new(WebhookNotifier::new().map_err(|e| BridgeError::Config(e.to_string()))?);
    let monitor = ReconciliationMonitor::new(config, ledger, notifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await;
    let stats = monitor.stats().await;
    tracing::info!(?stats, "monitor stopped");
    Ok(())
}
