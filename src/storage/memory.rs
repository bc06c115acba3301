//! In-process file store

use super::{clean_path, slice_range, FileStat, StorageBackend, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, StoredFile>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded at write time
    pub async fn content_type(&self, path: &str) -> Option<String> {
        let path = clean_path(path).ok()?;
        self.files
            .read()
            .await
            .get(&path)
            .map(|f| f.content_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let path = clean_path(path)?;
        self.files
            .read()
            .await
            .get(&path)
            .map(|f| f.data.clone())
            .ok_or(StorageError::NotFound(path))
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn stat(&self, path: &str) -> Result<FileStat, StorageError> {
        let path = clean_path(path)?;
        self.files
            .read()
            .await
            .get(&path)
            .map(|f| FileStat {
                size: f.data.len() as u64,
            })
            .ok_or(StorageError::NotFound(path))
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.get(path).await
    }

    async fn read_range(
        &self,
        path: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let data = self.get(path).await?;
        slice_range(&data, path, start, end)
    }

    async fn write(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let path = clean_path(path)?;
        self.files.write().await.insert(
            path,
            StoredFile {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let path = clean_path(path)?;
        match self.files.write().await.remove(&path) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(path)),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
