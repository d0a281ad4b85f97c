//! Import handler trait
//!
//! The services layer implements this for its ingest orchestrator. The queue
//! owns retry policy; the handler owns everything that touches a journal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::TaskError;
use uuid::Uuid;

#[async_trait]
pub trait ImportHandler: Send + Sync {
    /// Run one attempt of an import whose journal is already `Processing`.
    ///
    /// `Ok` means the journal reached a terminal state. A recoverable error
    /// is retried by the queue; anything else ends in [`Self::give_up`].
    async fn run(self: Arc<Self>, import_id: Uuid, attempt: u32) -> Result<(), TaskError>;

    /// Announce that attempt `attempt` failed and another follows after `backoff`.
    async fn retrying(&self, import_id: Uuid, attempt: u32, backoff: Duration, error: &TaskError);

    /// Terminate the journal as `Failed` after a terminal error, exhausted
    /// retries or a timeout.
    async fn give_up(&self, import_id: Uuid, error: &TaskError);
}
