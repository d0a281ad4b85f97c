//! Chunked and single-shot upload handlers.
//!
//! Both take `multipart/form-data`. Chunk metadata travels as text fields next
//! to a `file` part holding the raw bytes.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tessera_core::AppError;
use tessera_services::{ChunkOutcome, ChunkUpload, StoredUpload};
use utoipa::ToSchema;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

/// Returned once the final chunk (or a single-shot upload) is stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    /// Lowercase hex SHA-256 of the assembled file
    pub hash: String,
    /// Stored name to pass to the upload import trigger
    pub filename: String,
}

impl From<StoredUpload> for UploadResponse {
    fn from(stored: StoredUpload) -> Self {
        Self {
            hash: stored.hash,
            filename: stored.filename,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChunkAcceptedResponse {
    pub status: String,
}

/// Multipart layout of one chunk.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ChunkUploadForm {
    pub upload_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub total_size: u64,
    pub filename: String,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

/// Multipart layout of a single-shot upload.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct SingleUploadForm {
    /// Defaults to the file part's own filename
    pub filename: Option<String>,
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    file: Option<FilePart>,
}

struct FilePart {
    file_name: Option<String>,
    data: Bytes,
}

fn multipart_error(e: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(format!("invalid multipart body: {}", e))
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().map(String::from);
                let data = field.bytes().await.map_err(multipart_error)?;
                form.file = Some(FilePart { file_name, data });
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&str, AppError> {
        self.text(name)
            .ok_or_else(|| AppError::BadRequest(format!("missing field '{}'", name)))
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<T, AppError> {
        let raw = self.required(name)?;
        raw.parse().map_err(|_| {
            AppError::BadRequest(format!("field '{}' is not a valid number: {}", name, raw))
        })
    }

    /// Explicit `filename` field first, then the file part's own name.
    fn filename(&self) -> Result<String, AppError> {
        self.text("filename")
            .map(String::from)
            .or_else(|| self.file.as_ref().and_then(|f| f.file_name.clone()))
            .ok_or_else(|| AppError::BadRequest("missing field 'filename'".into()))
    }

    fn take_file(&mut self) -> Result<Bytes, AppError> {
        self.file
            .take()
            .map(|f| f.data)
            .ok_or_else(|| AppError::BadRequest("missing field 'file'".into()))
    }
}

/// Accept one chunk of a resumable upload
#[utoipa::path(
    post,
    path = "/api/v1/uploads/chunk",
    tag = "uploads",
    request_body(content = ChunkUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Final chunk: file stored", body = UploadResponse),
        (status = 202, description = "Chunk accepted", body = ChunkAcceptedResponse),
        (status = 400, description = "Missing or malformed field", body = ErrorResponse),
        (status = 409, description = "Duplicate content", body = ErrorResponse),
        (status = 415, description = "Extension not allowed", body = ErrorResponse)
    )
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, HttpAppError> {
    let mut form = UploadForm::read(multipart).await?;
    let chunk = ChunkUpload {
        upload_id: form.required("upload_id")?.to_string(),
        index: form.number("index")?,
        total_chunks: form.number("total_chunks")?,
        total_size: form.number("total_size")?,
        filename: form.filename()?,
        data: form.take_file()?,
    };

    match state.assembler.accept_chunk(chunk).await? {
        ChunkOutcome::Accepted => Ok((
            axum::http::StatusCode::ACCEPTED,
            Json(ChunkAcceptedResponse {
                status: "chunk-accepted".into(),
            }),
        )
            .into_response()),
        ChunkOutcome::Finalized(stored) => {
            tracing::info!(stored_name = %stored.filename, size = stored.size, "Upload finalized");
            Ok(Json(UploadResponse::from(stored)).into_response())
        }
    }
}

/// Upload a whole file in one request
#[utoipa::path(
    post,
    path = "/api/v1/uploads",
    tag = "uploads",
    request_body(content = SingleUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "Missing or malformed field", body = ErrorResponse),
        (status = 409, description = "Duplicate content", body = ErrorResponse),
        (status = 415, description = "Extension not allowed", body = ErrorResponse)
    )
)]
pub async fn upload_single(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, HttpAppError> {
    let mut form = UploadForm::read(multipart).await?;
    let filename = form.filename()?;
    let data = form.take_file()?;

    let stored = state.assembler.store_whole(&filename, data).await?;
    tracing::info!(stored_name = %stored.filename, size = stored.size, "Upload stored");
    Ok(Json(stored.into()))
}
