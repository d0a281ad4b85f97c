//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tessera_core::Config;

use crate::state::AppState;

pub use services::Background;

/// Everything `main` needs to serve requests and shut down cleanly.
pub struct App {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub background: Background,
}

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<App> {
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry(config.log_format(), config.environment())?;
    tracing::info!("Configuration loaded and validated successfully");

    let pool = database::setup_database(&config).await?;

    let (blobs, archive) = storage::setup_storage(&config).await?;

    let (state, background) = services::initialize_services(&config, pool, blobs, archive)?;

    let router = routes::setup_routes(&config, state.clone());

    Ok(App {
        state,
        router,
        background,
    })
}
