//! Import triggers and journal queries.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tessera_core::models::{ImportJournal, ImportOptions, ImportStatus, WebDescriptor};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::principal::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadImportRequest {
    pub batch_id: String,
    /// Stored name returned by the upload endpoints
    pub filename: String,
    /// Hash returned by the upload endpoints; re-verified before ingest
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServerImportRequest {
    pub batch_id: String,
    /// Absolute path on the ingest host
    pub path: String,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebImportRequest {
    pub batch_id: String,
    pub descriptor: WebDescriptor,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportCreatedResponse {
    pub id: Uuid,
    pub status: ImportStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelResponse {
    pub id: Uuid,
    /// `false` when the import had already finished
    pub cancel_requested: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct BatchQuery {
    pub batch_id: String,
}

fn created(state: &AppState, journal: ImportJournal) -> (StatusCode, Json<ImportCreatedResponse>) {
    state.notify_queue(journal.id);
    (
        StatusCode::CREATED,
        Json(ImportCreatedResponse {
            id: journal.id,
            status: journal.status,
        }),
    )
}

/// Import a file assembled by the upload endpoints
#[utoipa::path(
    post,
    path = "/api/v1/imports/upload",
    tag = "imports",
    request_body = UploadImportRequest,
    responses(
        (status = 201, description = "Import created", body = ImportCreatedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Uploaded file not found", body = ErrorResponse),
        (status = 415, description = "Extension not allowed", body = ErrorResponse)
    )
)]
pub async fn create_upload_import(
    Caller(principal): Caller,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<UploadImportRequest>,
) -> Result<(StatusCode, Json<ImportCreatedResponse>), HttpAppError> {
    let journal = state
        .imports
        .create_upload_import(
            &principal,
            &request.batch_id,
            &request.filename,
            request.hash.as_deref(),
            request.original_filename.as_deref(),
            request.options,
        )
        .await?;
    Ok(created(&state, journal))
}

/// Import a file already present on the ingest host
#[utoipa::path(
    post,
    path = "/api/v1/imports/server",
    tag = "imports",
    request_body = ServerImportRequest,
    responses(
        (status = 201, description = "Import created", body = ImportCreatedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 415, description = "Extension not allowed", body = ErrorResponse)
    )
)]
pub async fn create_server_import(
    Caller(principal): Caller,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<ServerImportRequest>,
) -> Result<(StatusCode, Json<ImportCreatedResponse>), HttpAppError> {
    let journal = state
        .imports
        .create_server_import(&principal, &request.batch_id, &request.path, request.options)
        .await?;
    Ok(created(&state, journal))
}

/// Import a capture from a web archive bucket
#[utoipa::path(
    post,
    path = "/api/v1/imports/web",
    tag = "imports",
    request_body = WebImportRequest,
    responses(
        (status = 201, description = "Import created", body = ImportCreatedResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_web_import(
    Caller(principal): Caller,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<WebImportRequest>,
) -> Result<(StatusCode, Json<ImportCreatedResponse>), HttpAppError> {
    let journal = state
        .imports
        .create_web_import(&principal, &request.batch_id, request.descriptor, request.options)
        .await?;
    Ok(created(&state, journal))
}

/// Fetch one import journal
#[utoipa::path(
    get,
    path = "/api/v1/imports/{id}",
    tag = "imports",
    params(("id" = Uuid, Path, description = "Import id")),
    responses(
        (status = 200, description = "Import journal", body = ImportJournal),
        (status = 404, description = "Import not found", body = ErrorResponse)
    )
)]
pub async fn get_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportJournal>, HttpAppError> {
    Ok(Json(state.imports.get(id).await?))
}

/// List the imports of one batch
#[utoipa::path(
    get,
    path = "/api/v1/imports",
    tag = "imports",
    params(BatchQuery),
    responses(
        (status = 200, description = "Import journals in creation order", body = Vec<ImportJournal>),
        (status = 400, description = "Missing batch id", body = ErrorResponse)
    )
)]
pub async fn list_imports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
) -> Result<Json<Vec<ImportJournal>>, HttpAppError> {
    Ok(Json(state.imports.list_batch(&query.batch_id).await?))
}

/// Request cooperative cancellation of an import
#[utoipa::path(
    post,
    path = "/api/v1/imports/{id}/cancel",
    tag = "imports",
    params(("id" = Uuid, Path, description = "Import id")),
    responses(
        (status = 200, description = "Cancel flag state", body = CancelResponse),
        (status = 404, description = "Import not found", body = ErrorResponse)
    )
)]
pub async fn cancel_import(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, HttpAppError> {
    let cancel_requested = state.imports.cancel(id).await?;
    Ok(Json(CancelResponse {
        id,
        cancel_requested,
    }))
}
