//! Remote file store
//!
//! Images and podcast audio live in a WebDAV share. The proxy and upload
//! handlers talk to it through [`StorageBackend`]; the in-memory backend
//! serves development setups and tests.
//!
//! Paths are relative to the configured root and normalised before use.

pub mod memory;
pub mod webdav;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{StorageConfig, StorageDriver};

pub use memory::MemoryStorage;
pub use webdav::WebDavStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Range not satisfiable for {path}")]
    RangeNotSatisfiable { path: String },

    #[error("Remote store answered {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Remote store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote store error: {0}")]
    Other(String),
}

/// Metadata returned by `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn stat(&self, path: &str) -> Result<FileStat, StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Read the inclusive byte range `start..=end`
    async fn read_range(&self, path: &str, start: u64, end: u64)
        -> Result<Vec<u8>, StorageError>;

    /// Write a file, creating missing parent collections
    async fn write(&self, path: &str, data: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

pub type SharedStorage = Arc<dyn StorageBackend>;

/// Create the storage backend selected by configuration
pub fn create_storage(config: &StorageConfig) -> anyhow::Result<SharedStorage> {
    match config.driver {
        StorageDriver::Webdav => {
            let storage = WebDavStorage::new(config)?;
            tracing::info!(base_url = %config.base_url, root = %config.root, "Using WebDAV storage");
            Ok(Arc::new(storage))
        }
        StorageDriver::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

/// Normalise a relative path or fail with `InvalidPath`
pub(crate) fn clean_path(path: &str) -> Result<String, StorageError> {
    crate::media::normalize_path(path).ok_or_else(|| StorageError::InvalidPath(path.to_string()))
}

/// Slice `start..=end` out of a whole file
pub(crate) fn slice_range(
    data: &[u8],
    path: &str,
    start: u64,
    end: u64,
) -> Result<Vec<u8>, StorageError> {
    let len = data.len() as u64;
    if start >= len || end < start {
        return Err(StorageError::RangeNotSatisfiable {
            path: path.to_string(),
        });
    }
    let end = end.min(len - 1);
    Ok(data[start as usize..=end as usize].to_vec())
}
