use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::MetadataDirective;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{ObjectStore, StorageError, StorageResult};

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
}

impl StorageService {
    pub fn new(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ S3 client ready for bucket '{}' at {}", bucket, endpoint);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    async fn content_type_of(&self, key: &str) -> StorageResult<Option<String>> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_not_found() => StorageError::not_found(key),
                _ => StorageError::transport(format!("Failed to head {}: {}", key, e)),
            })?;

        Ok(head.content_type().map(str::to_string))
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn download(&self, key: &str, dest: &Path) -> StorageResult<()> {
        debug!("Downloading {} to {}", key, dest.display());

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => StorageError::not_found(key),
                _ => StorageError::transport(format!("Failed to download {}: {}", key, e)),
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0usize;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::transport(format!("Download of {} interrupted: {}", key, e)))?
        {
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!("⬇️ Downloaded {} bytes from {}", written, key);
        Ok(())
    }

    async fn upload(&self, key: &str, src: &Path, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} to {}", src.display(), key);

        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::transport(format!("Failed to upload {}: {}", key, e)))?;

        info!("⬆️ Uploaded {} to {}", src.display(), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::transport(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_not_found() => StorageError::not_found(key),
                _ => StorageError::transport(format!("Failed to fetch metadata of {}: {}", key, e)),
            })?;

        Ok(head.metadata().cloned().unwrap_or_default())
    }

    async fn set_metadata(&self, key: &str, metadata: HashMap<String, String>) -> StorageResult<()> {
        // A self-copy with REPLACE drops the content type unless it is sent again.
        let content_type = self.content_type_of(key).await?;

        let mut request = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(copy_source(&self.bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .set_metadata(Some(metadata));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }

        request
            .send()
            .await
            .map_err(|e| StorageError::transport(format!("Failed to set metadata on {}: {}", key, e)))?;

        Ok(())
    }
}

/// `x-amz-copy-source` value for `key`. The header must be URL-encoded;
/// each path segment is encoded and the separators kept.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<_> = key.split('/').map(urlencoding::encode).collect();
    format!("{}/{}", bucket, encoded.join("/"))
}
