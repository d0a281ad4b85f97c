//! Tessera Services Layer
//!
//! The ingest core proper: chunked upload assembly, the import journal
//! handle, deduplication, the per-mode ingest orchestrator and resolution of
//! stored objects for serving. The API crate depends on this facade and keeps
//! only HTTP handling.

pub mod assembler;
pub mod cancel;
pub mod dedup;
pub mod error;
pub mod imports;
pub mod journal;
pub mod pipeline;
pub mod serve;

pub use assembler::{ChunkAssembler, ChunkAssemblerConfig, ChunkOutcome, ChunkUpload, StoredUpload};
pub use cancel::CancelRegistry;
pub use dedup::DedupIndex;
pub use error::IngestError;
pub use imports::{ImportService, Principal};
pub use journal::JournalHandle;
pub use pipeline::{IngestDeps, IngestOrchestrator, PipelineConfig, Stage};
pub use serve::{ResolvedObject, ServeConfig, ServeResolver};
