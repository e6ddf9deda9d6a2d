use sync_client::{ClientConfig, ConnectionState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let record = std::env::args().skip(1).any(|arg| arg == "record");
    let config = ClientConfig::from_env();
    tracing::info!(server = %config.server_url, "starting sync client");

    let client = sync_client::spawn(config);

    if record {
        let mut state = client.watch_state();
        if state.wait_for(|s| *s == ConnectionState::Connected).await.is_ok() {
            match client.record_launch().await {
                Ok(receipt) => tracing::info!(delivered = receipt.delivered, "launch recorded"),
                Err(e) => tracing::error!(error = %e, "failed to record launch"),
            }
        }
    }

    let mut snapshots = client.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let agg = snapshots.borrow_and_update().clone();
                tracing::info!(
                    total = agg.total,
                    last_launch = ?agg.last_launch,
                    "local aggregate updated"
                );
            }
        }
    }

    tracing::info!("shutting down");
    client.shutdown().await;
}
