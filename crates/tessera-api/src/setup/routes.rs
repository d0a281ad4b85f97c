//! Route configuration and setup

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use tessera_core::Config;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api_doc::ApiDoc;
use crate::handlers;
use crate::state::AppState;

pub const API_PREFIX: &str = "/api/v1";

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;
/// In-flight requests before new ones wait.
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;

/// Router for a running server.
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(config.max_file_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    tracing::info!(body_limit, "Request body limit configured");
    build_router(state, body_limit)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/uploads", post(handlers::uploads::upload_single))
        .route("/uploads/chunk", post(handlers::uploads::upload_chunk))
        .route("/imports", get(handlers::imports::list_imports))
        .route("/imports/upload", post(handlers::imports::create_upload_import))
        .route("/imports/server", post(handlers::imports::create_server_import))
        .route("/imports/web", post(handlers::imports::create_web_import))
        .route("/imports/{id}", get(handlers::imports::get_import))
        .route("/imports/{id}/cancel", post(handlers::imports::cancel_import))
        .route("/media/{stored_name}", get(handlers::media::serve_media))
}

/// All routes and middleware. `body_limit` bounds every request body.
pub fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .nest(API_PREFIX, api_routes())
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(ConcurrencyLimitLayer::new(HTTP_CONCURRENCY_LIMIT))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
