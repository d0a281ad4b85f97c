//! Tessera Storage Library
//!
//! The [`BlobStore`] trait and its two backends: a local directory with atomic
//! rename, and an S3-compatible bucket. The crate also provides read access
//! to remote web archive buckets through [`ArchiveSource`].
//!
//! # Object names
//!
//! Ingested files are stored under `<random>_<sanitized base>.<ext>`, see
//! [`keys::generate_stored_name`]. Names starting with `inline/` address the
//! inline attachment area. Names must not contain `..`, backslashes or a
//! leading `/`.

pub mod archive;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use archive::ArchiveSource;
#[cfg(feature = "storage-local")]
pub use archive::LocalArchive;
#[cfg(feature = "storage-s3")]
pub use archive::S3Archive;
pub use factory::{create_archive_source, create_blob_store};
pub use keys::{generate_stored_name, validate_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use tessera_core::StorageBackend;
pub use traits::{BlobStore, ObjectInfo, ServeTarget, StorageError, StorageResult};
