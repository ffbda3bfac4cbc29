//! Storage layer for user files
//!
//! Provides the [`ObjectStore`] seam and its Wasabi (S3-compatible)
//! implementation built on `aws-sdk-s3`.

use crate::config::{
    Settings, MULTIPART_CONCURRENCY, MULTIPART_MAX_PARTS, MULTIPART_PART_SIZE, MULTIPART_THRESHOLD,
};
use crate::relay::TransferProgress;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// The key does not exist in the bucket
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Credentials were rejected or the bucket policy denies the call
    #[error("Access denied: {0}")]
    AccessDenied(String),
    /// Any other failed S3 request (network, throttling, server errors)
    #[error("S3 request failed: {0}")]
    Request(String),
    /// Local file I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Pre-signed URL generation failed
    #[error("Presigning error: {0}")]
    Presign(String),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Metadata of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key, including the user prefix
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the store reports it
    pub last_modified: Option<DateTime<Utc>>,
}

/// One part of a multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based S3 part number
    pub number: i32,
    /// Offset of the first byte in the source file
    pub offset: u64,
    /// Number of bytes in the part
    pub length: u64,
}

/// Whether a file of `size` bytes goes through a multipart upload
#[must_use]
pub const fn uses_multipart(size: u64) -> bool {
    size >= MULTIPART_THRESHOLD
}

/// Splits `size` bytes into consecutive parts of `part_size` bytes; only the
/// last part may be shorter.
///
/// # Errors
///
/// Returns `StorageError::Config` for a zero part size and
/// `StorageError::Request` when more than 10 000 parts would be needed.
pub fn part_ranges(size: u64, part_size: u64) -> Result<Vec<PartRange>, StorageError> {
    if part_size == 0 {
        return Err(StorageError::Config("multipart part size is 0".into()));
    }
    let count = size.div_ceil(part_size);
    if count > MULTIPART_MAX_PARTS {
        return Err(StorageError::Request(format!(
            "{size} bytes need {count} parts, more than {MULTIPART_MAX_PARTS}"
        )));
    }

    (1..=count)
        .map(|n| {
            let offset = (n - 1) * part_size;
            let number = i32::try_from(n)
                .map_err(|_| StorageError::Request(format!("part number {n} out of range")))?;
            Ok(PartRange {
                number,
                offset,
                length: part_size.min(size - offset),
            })
        })
        .collect()
}

/// Interface for object storage providers
///
/// Transfers report moved bytes into the given [`TransferProgress`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`, overwriting any existing object
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<(), StorageError>;
    /// Stream the object at `key` into a local file, returning the byte count
    async fn get_to_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<u64, StorageError>;
    /// List all objects whose key starts with `prefix`, in store order
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;
    /// Fetch object metadata
    async fn head(&self, key: &str) -> Result<ObjectInfo, StorageError>;
    /// Delete an object
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Generate a pre-signed GET URL for `key`
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError>;
    /// Check that the bucket is reachable with the configured credentials
    async fn check_connection(&self) -> Result<(), StorageError>;
}

/// Wasabi-backed storage implementation
pub struct WasabiStorage {
    client: Client,
    bucket: String,
}

impl WasabiStorage {
    /// Create a new Wasabi storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if Wasabi configuration is missing.
    pub async fn new(settings: &Settings) -> Result<Self, StorageError> {
        let access_key = settings
            .wasabi_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("WASABI_ACCESS_KEY is missing".into()))?;
        let secret_key = settings
            .wasabi_secret_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("WASABI_SECRET_KEY is missing".into()))?;
        let bucket = settings
            .wasabi_bucket
            .as_ref()
            .ok_or_else(|| StorageError::Config("WASABI_BUCKET is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "wasabi-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(settings.wasabi_region.clone()))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(settings.endpoint_url())
            .force_path_style(true)
            .build();

        Ok(Self::from_conf(s3_config, bucket.clone()))
    }

    /// Wrap an already built S3 client configuration
    #[must_use]
    pub fn from_conf(s3_config: aws_sdk_s3::Config, bucket: String) -> Self {
        Self {
            client: Client::from_conf(s3_config),
            bucket,
        }
    }

    /// Name of the bucket this store writes to
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_single(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        progress: &TransferProgress,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        progress.advance(size);
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        path: &Path,
        size: u64,
        progress: &TransferProgress,
    ) -> Result<(), StorageError> {
        let parts = part_ranges(size, MULTIPART_PART_SIZE)?;
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Request(format!("no upload id returned for {key}")))?
            .to_string();

        info!("Multipart upload of {key}: {size} bytes in {} parts", parts.len());

        let uploaded = stream::iter(parts)
            .map(|part| self.upload_part(key, path, &upload_id, part, progress))
            .buffered(MULTIPART_CONCURRENCY)
            .try_collect::<Vec<CompletedPart>>()
            .await;

        let parts = match uploaded {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(key, &upload_id).await;
                return Err(e);
            }
        };

        let completion = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;

        if let Err(e) = completion {
            self.abort_multipart(key, &upload_id).await;
            return Err(classify(key, e));
        }
        Ok(())
    }

    async fn upload_part(
        &self,
        key: &str,
        path: &Path,
        upload_id: &str,
        part: PartRange,
        progress: &TransferProgress,
    ) -> Result<CompletedPart, StorageError> {
        let body = ByteStream::read_from()
            .path(path)
            .offset(part.offset)
            .length(Length::Exact(part.length))
            .build()
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;

        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part.number)
            .body(body)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        progress.advance(part.length);
        debug!("Uploaded part {} of {key}", part.number);
        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part.number)
            .build())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(
                "Failed to abort multipart upload {upload_id} for {key}: {}",
                DisplayErrorContext(&e)
            );
        }
    }
}

#[async_trait]
impl ObjectStore for WasabiStorage {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<(), StorageError> {
        let size = tokio::fs::metadata(path).await?.len();
        if uses_multipart(size) {
            self.put_multipart(key, path, size, progress).await
        } else {
            self.put_single(key, path, size, progress).await
        }
    }

    async fn get_to_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<u64, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        if let Some(length) = output.content_length().and_then(|l| u64::try_from(l).ok()) {
            progress.set_total(length);
        }
        let mut body = output.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0_u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.advance(chunk.len() as u64);
        }
        file.flush().await?;
        Ok(written)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| classify(prefix, e))?;

            objects.extend(page.contents().iter().filter_map(|object| {
                object.key().map(|key| ObjectInfo {
                    key: key.to_string(),
                    size: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    last_modified: object.last_modified().and_then(to_chrono),
                })
            }));

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;

        Ok(ObjectInfo {
            key: key.to_string(),
            size: output
                .content_length()
                .and_then(|s| u64::try_from(s).ok())
                .unwrap_or(0),
            last_modified: output.last_modified().and_then(to_chrono),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(key, e))?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| StorageError::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(&e).to_string()))?;

        Ok(request.uri().to_string())
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Successfully connected to Wasabi bucket '{}'.", self.bucket);
                Ok(())
            }
            Err(e) => {
                let err = classify(&self.bucket, e);
                error!("Wasabi connectivity test failed: {err}");
                Err(err)
            }
        }
    }
}

/// Maps an SDK failure onto the storage error taxonomy using the HTTP
/// status and the S3 error code.
fn classify<E>(key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.code().map(str::to_string);
    let detail = DisplayErrorContext(&err).to_string();

    match (status, code.as_deref()) {
        (Some(404), _) | (_, Some("NoSuchKey" | "NotFound" | "NoSuchBucket")) => {
            StorageError::NotFound(key.to_string())
        }
        (Some(403), _)
        | (_, Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch")) => {
            StorageError::AccessDenied(detail)
        }
        _ => StorageError::Request(detail),
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::BehaviorVersion;

    fn offline_store() -> WasabiStorage {
        let credentials = Credentials::new("AKIDEXAMPLE", "secret", None, None, "test");
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("us-east-1"))
            .endpoint_url("https://s3.us-east-1.wasabisys.com")
            .force_path_style(true)
            .build();
        WasabiStorage::from_conf(conf, "relay-bucket".to_string())
    }

    #[tokio::test]
    async fn test_presigned_url_targets_namespaced_key() -> Result<(), StorageError> {
        let store = offline_store();
        let url = store
            .presign_get("user_42/report.pdf", Duration::from_secs(86_400))
            .await?;

        assert!(url.starts_with("https://s3.us-east-1.wasabisys.com/relay-bucket/user_42/report.pdf?"));
        assert!(url.contains("X-Amz-Expires=86400"));
        assert!(url.contains("X-Amz-Signature="));
        Ok(())
    }

    #[tokio::test]
    async fn test_presign_rejects_lifetime_over_a_week() {
        let store = offline_store();
        let result = store
            .presign_get("user_1/a.txt", Duration::from_secs(8 * 24 * 3600))
            .await;
        assert!(matches!(result, Err(StorageError::Presign(_))));
    }

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_exact_multiple_splits_into_full_parts() -> Result<(), StorageError> {
        let parts = part_ranges(64 * MIB, MULTIPART_PART_SIZE)?;

        assert_eq!(parts.len(), 4);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.number, i32::try_from(i + 1).unwrap_or(0));
            assert_eq!(part.offset, i as u64 * 16 * MIB);
            assert_eq!(part.length, 16 * MIB);
        }
        Ok(())
    }

    #[test]
    fn test_remainder_goes_into_a_short_last_part() -> Result<(), StorageError> {
        let size = 64 * MIB + 1;
        let parts = part_ranges(size, MULTIPART_PART_SIZE)?;

        assert_eq!(parts.len(), 5);
        assert_eq!(
            parts[4],
            PartRange {
                number: 5,
                offset: 64 * MIB,
                length: 1,
            }
        );
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), size);
        Ok(())
    }

    #[test]
    fn test_parts_are_contiguous() -> Result<(), StorageError> {
        let size = 100 * MIB + 12_345;
        let parts = part_ranges(size, MULTIPART_PART_SIZE)?;

        let mut next = 0;
        for part in &parts {
            assert_eq!(part.offset, next);
            assert!(part.length > 0 && part.length <= MULTIPART_PART_SIZE);
            next += part.length;
        }
        assert_eq!(next, size);
        Ok(())
    }

    #[test]
    fn test_threshold_selects_multipart() -> Result<(), StorageError> {
        assert!(!uses_multipart(MULTIPART_THRESHOLD - 1));
        assert!(uses_multipart(MULTIPART_THRESHOLD));

        let at_threshold = part_ranges(MULTIPART_THRESHOLD, MULTIPART_PART_SIZE)?;
        assert_eq!(at_threshold.len(), 4);
        assert_eq!(at_threshold[3].offset + at_threshold[3].length, MULTIPART_THRESHOLD);
        Ok(())
    }

    #[test]
    fn test_part_limits_are_enforced() {
        assert!(matches!(part_ranges(10, 0), Err(StorageError::Config(_))));
        assert!(matches!(
            part_ranges(MULTIPART_MAX_PARTS + 1, 1),
            Err(StorageError::Request(_))
        ));
        assert!(matches!(part_ranges(MULTIPART_MAX_PARTS, 1), Ok(p) if p.len() == 10_000));
    }

    #[test]
    fn test_to_chrono_keeps_seconds() {
        let dt = aws_sdk_s3::primitives::DateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&dt).map(|d| d.timestamp()), Some(1_700_000_000));
    }
}
