use async_trait::async_trait;
use tessera_core::models::ImportMode;
use tessera_core::AppError;

use super::context::IngestContext;
use super::server::ServerStrategy;
use super::upload::UploadStrategy;
use super::web::WebStrategy;
use super::IngestDeps;

/// What differs between import modes. Everything else is shared.
#[async_trait]
pub trait ImportStrategy: Send + Sync {
    fn mode(&self) -> ImportMode;

    /// Make the file readable at `ctx.local_path` and record its hash.
    async fn fetch(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError>;

    /// Put the bytes in the blob store and set `ctx.stored_name`.
    async fn store(&self, deps: &IngestDeps, ctx: &mut IngestContext) -> Result<(), AppError>;

    /// Fill the mode-specific fields of `ctx.draft`.
    async fn finalize_meta(&self, deps: &IngestDeps, ctx: &mut IngestContext)
        -> Result<(), AppError>;
}

pub fn strategy_for(mode: ImportMode) -> Box<dyn ImportStrategy> {
    match mode {
        ImportMode::Upload => Box::new(UploadStrategy),
        ImportMode::Server => Box::new(ServerStrategy),
        ImportMode::Web => Box::new(WebStrategy),
    }
}

/// Title and origin shared by the file based modes.
pub(super) fn file_draft(ctx: &mut IngestContext, origin: String) {
    let stem = tessera_core::validation::file_stem(&ctx.original_filename);
    ctx.draft.title = if stem.is_empty() {
        ctx.original_filename.clone()
    } else {
        stem
    };
    ctx.draft.source_link = Some(origin.clone());
    ctx.draft.origin_id = Some(origin);
}
