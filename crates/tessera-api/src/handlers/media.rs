use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use tessera_core::AppError;
use tessera_storage::ServeTarget;
use tokio_util::io::ReaderStream;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Serve a stored object
///
/// Local objects are streamed; remote ones redirect to a presigned URL.
/// Objects without a media record are refused once older than the grace window.
#[utoipa::path(
    get,
    path = "/api/v1/media/{stored_name}",
    tag = "media",
    params(("stored_name" = String, Path, description = "Stored object name")),
    responses(
        (status = 200, description = "Object bytes"),
        (status = 302, description = "Redirect to a presigned URL"),
        (status = 400, description = "Unsafe object name", body = ErrorResponse),
        (status = 403, description = "Orphan object past the grace window", body = ErrorResponse),
        (status = 404, description = "Object not found", body = ErrorResponse)
    )
)]
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path(stored_name): Path<String>,
) -> Result<Response, HttpAppError> {
    let resolved = state.serve.resolve(&stored_name, Utc::now()).await?;

    match resolved.target {
        ServeTarget::Presigned { url, .. } => {
            Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
        }
        ServeTarget::LocalPath(path) => {
            let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AppError::NotFound(format!("object {}", stored_name)),
                _ => AppError::StorageRead(e.to_string()),
            })?;
            let length = file.metadata().await?.len();
            let content_type = resolved
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_LENGTH, length.to_string()),
                ],
                Body::from_stream(ReaderStream::new(file)),
            )
                .into_response())
        }
    }
}
