//! Content hashing.
//!
//! The hex SHA-256 of a file is the deduplication key stored in
//! `media.etag` and `data_import.file_hash`, and the value compared against
//! web archive checksum manifests.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental hasher for streams that arrive in pieces.
#[derive(Default, Clone)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Hash any reader to completion using a fixed buffer.
pub fn hash_reader<R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// Hash a file on the blocking pool.
#[tracing::instrument]
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let path: PathBuf = path.to_path_buf();
    let start = std::time::Instant::now();
    let digest = tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        hash_reader(file)
    })
    .await
    .map_err(std::io::Error::other)??;

    tracing::debug!(
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "File hashed"
    );
    Ok(digest)
}
