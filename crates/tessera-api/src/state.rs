use std::sync::Arc;

use sqlx::PgPool;
use tessera_services::{ChunkAssembler, ImportService, ServeResolver};
use tessera_worker::ImportQueue;

/// Shared handler state.
pub struct AppState {
    /// `None` when running against in-memory repositories
    pub pool: Option<PgPool>,
    pub assembler: Arc<ChunkAssembler>,
    pub imports: ImportService,
    pub serve: ServeResolver,
    /// `None` when imports are driven by something other than the worker pool
    pub queue: Option<ImportQueue>,
}

impl AppState {
    /// Wake the worker pool for a freshly created journal.
    pub fn notify_queue(&self, import_id: uuid::Uuid) {
        if let Some(queue) = &self.queue {
            queue.enqueue(import_id);
        }
    }
}
