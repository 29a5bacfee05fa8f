use std::sync::Arc;

use anyhow::Context;
use taskman_relay::{
    app::{build_router, connect_store, serve},
    config::{LogFormat, RelayConfig},
    metrics::{set_global_metrics, RelayMetrics},
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("TASKMAN_RELAY_JWT_SECRET is not set, using the development secret");
    }

    let metrics = Arc::new(RelayMetrics::default());
    set_global_metrics(Arc::clone(&metrics));

    let store = connect_store(&config).await?;
    let app = build_router(&config, store, metrics)?;

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        verify_client_echoes = config.verify_client_echoes,
        "starting relay server"
    );

    serve(listener, app, shutdown_signal()).await
}

fn init_tracing(config: &RelayConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(?error, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
