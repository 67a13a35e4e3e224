use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use parley_server::app::{build_router, build_state};
use parley_server::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // No store, no server: refuse to accept connections without it
    let db = parley_db::Database::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;

    let state = build_state(Arc::new(db), &config);
    let app = build_router(state, config.allowed_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
