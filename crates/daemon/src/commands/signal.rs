//! Signal command - runs the TCP signaling relay.

use anyhow::Result;
use pairchat_core::SignalingServer;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn execute(bind: &str) -> Result<()> {
    info!("PairChat relay v{}", env!("CARGO_PKG_VERSION"));

    let server = SignalingServer::bind(bind).await?;
    println!("Signaling relay listening on {}", server.local_addr()?);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down..."),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        on_signal.cancel();
    });

    server.run_until(shutdown).await?;
    Ok(())
}
