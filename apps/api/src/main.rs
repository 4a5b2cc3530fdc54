mod box_client;
mod config;
mod conversion;
mod diagnostics;
mod errors;
mod query;
mod routes;
mod schema;
mod state;
mod template;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::box_client::BoxClient;
use crate::config::Config;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conga Doc Gen API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Box client
    let box_client = BoxClient::new(config.box_settings.clone())
        .context("Failed to initialize Box client")?;
    if box_client.validate_token().await {
        info!("Box developer token is valid (model: {})", config.box_settings.ai_model);
    } else {
        warn!("Box developer token could not be validated; conversions will fail until it is replaced");
    }

    let state = AppState {
        ai: Arc::new(box_client),
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict allowed origins once the upload UI has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
