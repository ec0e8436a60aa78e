use anyhow::Result;
use tracing::info;

use tsukino_relay::telemetry::init_tracing;
use tsukino_relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = RelayConfig::from_env()?;
    info!(
        "starting relay bind={} path={} default_referer={} spoof_client_ip={} upstream_timeout_secs={} allowed_hosts={:?}",
        config.listen_addr,
        config.relay_path,
        config.default_referer,
        config.spoof_client_ip,
        config.upstream_timeout_secs,
        config.allowed_hosts
    );

    let server = RelayServer::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, port={}", server.port());
    server.shutdown();
    Ok(())
}
