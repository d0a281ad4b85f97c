//! OpenAPI documentation for the public endpoints.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use tessera_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tessera Ingest API",
        version = "0.1.0",
        description = "Chunked uploads, import triggers, journal queries and media serving"
    ),
    paths(
        handlers::uploads::upload_chunk,
        handlers::uploads::upload_single,
        handlers::imports::create_upload_import,
        handlers::imports::create_server_import,
        handlers::imports::create_web_import,
        handlers::imports::get_import,
        handlers::imports::list_imports,
        handlers::imports::cancel_import,
        handlers::media::serve_media,
        handlers::health::health_check,
    ),
    components(schemas(
        error::ErrorResponse,
        handlers::uploads::UploadResponse,
        handlers::uploads::ChunkAcceptedResponse,
        handlers::uploads::ChunkUploadForm,
        handlers::uploads::SingleUploadForm,
        handlers::imports::UploadImportRequest,
        handlers::imports::ServerImportRequest,
        handlers::imports::WebImportRequest,
        handlers::imports::ImportCreatedResponse,
        handlers::imports::CancelResponse,
        handlers::health::HealthResponse,
        models::ImportJournal,
        models::ImportOptions,
        models::ImportMode,
        models::ImportStatus,
        models::WebDescriptor,
    )),
    tags(
        (name = "uploads", description = "Chunked and single-shot uploads"),
        (name = "imports", description = "Import triggers and journals"),
        (name = "media", description = "Stored object serving"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let spec = ApiDoc::openapi();
        for path in [
            "/api/v1/uploads/chunk",
            "/api/v1/uploads",
            "/api/v1/imports/upload",
            "/api/v1/imports/server",
            "/api/v1/imports/web",
            "/api/v1/imports/{id}",
            "/api/v1/imports/{id}/cancel",
            "/api/v1/media/{stored_name}",
            "/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
