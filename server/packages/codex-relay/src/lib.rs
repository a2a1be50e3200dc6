use std::sync::Arc;

use app::build_router;
use config::{ConfigError, RelayConfig};
use thiserror::Error;

pub mod app;
pub mod config;
pub mod context;
pub mod launch;
pub mod messages;
pub mod process;
pub mod session;
pub mod sse;
pub mod translate;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub relay: RelayConfig,
}

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let app = build_router(Arc::new(config.relay));
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source,
        })?;
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "codex-relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
