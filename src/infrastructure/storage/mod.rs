//! Durable object storage consumed by the worker.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod s3;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// Keyed binary storage with a content type and user metadata per object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the object's content to `dest`, replacing any existing file.
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()>;

    /// Create or overwrite `key` with the content of `src`.
    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn get_metadata(&self, key: &str) -> StorageResult<HashMap<String, String>>;

    /// Replace the object's user metadata. Content and content type are kept.
    async fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StorageResult<()>;
}
