//! Tessera media processing
//!
//! Content hashing, external tool execution and the metadata extraction,
//! OCR, document text, transcription and transcoding steps of an ingest.

pub mod error;
pub mod hash;
pub mod lazy;
pub mod ocr;
pub mod subprocess;
pub mod tags;
pub mod toolchain;
pub mod transcribe;
pub mod video;

#[cfg(feature = "document")]
pub mod document;

#[cfg(feature = "image")]
pub mod native;

pub use error::{ToolError, ToolResult};
pub use hash::{hash_bytes, hash_file, ContentHasher};
pub use lazy::LazyService;
pub use ocr::{OcrEngine, TesseractEngine};
pub use subprocess::{ToolCommand, ToolOutput};
pub use toolchain::{MetadataExtractor, Toolchain, ToolchainConfig};
pub use transcribe::{Segment, SpeechTranscriber, WhisperTranscriber};
pub use video::{needs_transcode, FfmpegTranscoder, Transcoder, VideoProbe};
