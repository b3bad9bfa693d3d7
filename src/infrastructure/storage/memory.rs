use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{ObjectStore, StorageError, StorageResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BlobObject {
    pub content: Bytes,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// Object store held in memory, with switchable transport failures.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, BlobObject>>,
    fail_transport: AtomicBool,
    fail_uploads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, content: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            BlobObject {
                content: content.into(),
                content_type: "application/octet-stream".to_string(),
                metadata: HashMap::new(),
            },
        );
    }

    pub fn object(&self, key: &str) -> Option<BlobObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Fails uploads only, leaving reads and deletes working.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    fn check_transport(&self) -> StorageResult<()> {
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(StorageError::transport("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()> {
        self.check_transport()?;
        let content = self
            .object(key)
            .map(|o| o.content)
            .ok_or_else(|| StorageError::not_found(key))?;
        tokio::fs::write(dest, &content).await?;
        Ok(())
    }

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> StorageResult<()> {
        self.check_transport()?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::transport("upload rejected"));
        }
        let content = tokio::fs::read(src).await?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            BlobObject {
                content: Bytes::from(content),
                content_type: content_type.to_string(),
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_transport()?;
        self.objects
            .lock()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        self.check_transport()?;
        self.object(key)
            .map(|o| o.metadata)
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StorageResult<()> {
        self.check_transport()?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects.get_mut(key).ok_or_else(|| StorageError::not_found(key))?;
        object.metadata = metadata;
        Ok(())
    }
}
