//! HTTP API tests against in-memory repositories and local storage.
//!
//! Run with: `cargo test -p tessera-api --test http_api`

use std::sync::Arc;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use serde_json::{json, Value};
use tempfile::TempDir;
use tessera_api::setup::routes::build_router;
use tessera_api::AppState;
use tessera_db::{MemoryDatabase, Repositories};
use tessera_processing::hash_bytes;
use tessera_services::{
    CancelRegistry, ChunkAssembler, ChunkAssemblerConfig, DedupIndex, ImportService, ServeConfig,
    ServeResolver,
};
use tessera_storage::LocalStorage;

const BODY_LIMIT: usize = 16 * 1024 * 1024;

struct TestApp {
    server: TestServer,
    _dir: TempDir,
}

async fn setup_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(MemoryDatabase::new());
    let blobs = Arc::new(
        LocalStorage::new(dir.path().join("media"), dir.path().join("inline"))
            .await
            .unwrap(),
    );
    let repos = Repositories::memory(db);
    let dedup = DedupIndex::new(repos.media.clone(), repos.imports.clone());
    let allowed: Vec<String> = ["jpg", "png", "mp4", "pdf"].iter().map(|s| s.to_string()).collect();

    let assembler = Arc::new(ChunkAssembler::new(
        ChunkAssemblerConfig {
            staging_dir: dir.path().join("staging"),
            max_file_size: 8 * 1024 * 1024,
            allowed_extensions: allowed.clone(),
            session_ttl: Duration::from_secs(24 * 3600),
        },
        blobs.clone(),
        dedup,
    ));
    let state = Arc::new(AppState {
        pool: None,
        assembler,
        imports: ImportService::new(
            repos.imports.clone(),
            blobs.clone(),
            CancelRegistry::new(),
            allowed,
        ),
        serve: ServeResolver::new(repos.media.clone(), blobs, ServeConfig::default()),
        queue: None,
    });

    TestApp {
        server: TestServer::new(build_router(state, BODY_LIMIT)).unwrap(),
        _dir: dir,
    }
}

fn chunk_form(upload_id: &str, index: u32, total: u32, total_size: usize, data: &[u8]) -> MultipartForm {
    MultipartForm::new()
        .add_text("upload_id", upload_id)
        .add_text("index", index.to_string())
        .add_text("total_chunks", total.to_string())
        .add_text("total_size", total_size.to_string())
        .add_text("filename", "checkpoint.jpg")
        .add_part("file", Part::bytes(data.to_vec()).file_name("blob"))
}

async fn upload_single(app: &TestApp, filename: &str, data: &[u8]) -> axum_test::TestResponse {
    app.server
        .post("/api/v1/uploads")
        .multipart(
            MultipartForm::new().add_part("file", Part::bytes(data.to_vec()).file_name(filename)),
        )
        .await
}

#[tokio::test]
async fn test_chunked_upload_then_serve() {
    let app = setup_test_app().await;
    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    let first = app
        .server
        .post("/api/v1/uploads/chunk")
        .multipart(chunk_form("u-100", 0, 2, data.len(), &data[..1024]))
        .await;
    assert_eq!(first.status_code(), 202);
    assert_eq!(first.json::<Value>()["status"], "chunk-accepted");

    let last = app
        .server
        .post("/api/v1/uploads/chunk")
        .multipart(chunk_form("u-100", 1, 2, data.len(), &data[1024..]))
        .await;
    assert_eq!(last.status_code(), 200);
    let body = last.json::<Value>();
    assert_eq!(body["hash"], hash_bytes(&data));
    let stored = body["filename"].as_str().unwrap().to_string();
    assert!(stored.ends_with("checkpoint.jpg"));

    // Not owned by a media row yet, but inside the grace window.
    let served = app.server.get(&format!("/api/v1/media/{}", stored)).await;
    assert_eq!(served.status_code(), 200);
    assert_eq!(served.as_bytes().as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_chunk_missing_field_is_bad_request() {
    let app = setup_test_app().await;
    let form = MultipartForm::new()
        .add_text("upload_id", "u-200")
        .add_text("total_chunks", "1")
        .add_text("total_size", "4")
        .add_part("file", Part::bytes(b"abcd".to_vec()).file_name("a.jpg"));

    let response = app.server.post("/api/v1/uploads/chunk").multipart(form).await;
    assert_eq!(response.status_code(), 400);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "bad-request");
    assert!(body["error"].as_str().unwrap().contains("index"));
}

#[tokio::test]
async fn test_disallowed_extension_is_unsupported_type() {
    let app = setup_test_app().await;
    let response = upload_single(&app, "payload.exe", b"MZ").await;
    assert_eq!(response.status_code(), 415);
    assert_eq!(response.json::<Value>()["code"], "unsupported-type");
}

#[tokio::test]
async fn test_upload_import_lifecycle() {
    let app = setup_test_app().await;
    let data = b"jpeg bytes for the upload import".to_vec();

    let uploaded = upload_single(&app, "gate.jpg", &data).await.json::<Value>();
    let created = app
        .server
        .post("/api/v1/imports/upload")
        .add_header("X-Principal-Id", "analyst-7")
        .json(&json!({
            "batch_id": "batch-1",
            "filename": uploaded["filename"],
            "hash": uploaded["hash"],
            "options": { "ocr": true, "tags": ["checkpoint"] }
        }))
        .await;
    assert_eq!(created.status_code(), 201);
    let created = created.json::<Value>();
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().unwrap().to_string();

    let journal = app.server.get(&format!("/api/v1/imports/{}", id)).await.json::<Value>();
    assert_eq!(journal["user_id"], "analyst-7");
    assert_eq!(journal["mode"], "upload");
    assert_eq!(journal["file_hash"], uploaded["hash"]);

    // The pending journal claims the hash.
    let again = upload_single(&app, "copy.jpg", &data).await;
    assert_eq!(again.status_code(), 409);
    assert_eq!(again.json::<Value>()["code"], "conflict");

    let listed = app
        .server
        .get("/api/v1/imports")
        .add_query_param("batch_id", "batch-1")
        .await
        .json::<Value>();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let cancelled = app
        .server
        .post(&format!("/api/v1/imports/{}/cancel", id))
        .await
        .json::<Value>();
    assert_eq!(cancelled["cancel_requested"], true);
}

#[tokio::test]
async fn test_import_trigger_validation() {
    let app = setup_test_app().await;

    let relative = app
        .server
        .post("/api/v1/imports/server")
        .json(&json!({ "batch_id": "b", "path": "incoming/clip.mp4" }))
        .await;
    assert_eq!(relative.status_code(), 400);
    assert_eq!(relative.json::<Value>()["code"], "invalid-request");

    let missing_upload = app
        .server
        .post("/api/v1/imports/upload")
        .json(&json!({ "batch_id": "b", "filename": "a1b2_nothing.jpg" }))
        .await;
    assert_eq!(missing_upload.status_code(), 404);

    let malformed = app
        .server
        .post("/api/v1/imports/web")
        .json(&json!({ "batch_id": "b" }))
        .await;
    assert_eq!(malformed.status_code(), 400);
    assert_eq!(malformed.json::<Value>()["code"], "invalid-request");

    let server = app
        .server
        .post("/api/v1/imports/server")
        .json(&json!({ "batch_id": "b", "path": "/srv/incoming/clip.mp4", "options": { "optimize": true } }))
        .await;
    assert_eq!(server.status_code(), 201);
}

#[tokio::test]
async fn test_unknown_import_and_media() {
    let app = setup_test_app().await;

    let import = app
        .server
        .get("/api/v1/imports/00000000-0000-4000-8000-000000000000")
        .await;
    assert_eq!(import.status_code(), 404);
    assert_eq!(import.json::<Value>()["code"], "not-found");

    let media = app.server.get("/api/v1/media/ff00_missing.jpg").await;
    assert_eq!(media.status_code(), 404);
}

#[tokio::test]
async fn test_health_and_openapi() {
    let app = setup_test_app().await;

    let health = app.server.get("/health").await;
    assert_eq!(health.status_code(), 200);
    assert_eq!(health.json::<Value>()["database"], "not-configured");

    let doc = app.server.get("/api-docs/openapi.json").await.json::<Value>();
    assert!(doc["paths"]["/api/v1/uploads/chunk"].is_object());
}
