//! File relay between the chat and the object store.
//!
//! [`RelayService`] owns the per-user request lifecycle: validate the name,
//! stage bytes locally, move them to or from the store, and describe the
//! result. Each call is one linear request; nothing is shared between calls
//! except the injected store handle.

/// Typed relay failures
pub mod error;
/// User namespaces and file names
pub mod namespace;
/// Byte counters for running transfers
pub mod progress;
/// Transient local files
pub mod staging;
/// Chat-side seam
pub mod transport;

pub use error::{ErrorKind, RelayError};
pub use namespace::{FileName, UserNamespace};
pub use progress::{ProgressSnapshot, TransferPhase, TransferProgress};
pub use staging::{StagingArea, StagingFile};
pub use transport::{IncomingMedia, MediaKind, RelayTransport};

use crate::config::Settings;
use crate::storage::ObjectStore;
use crate::utils::human_bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Name the file was stored under
    pub file_name: FileName,
    /// Full object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Pre-signed download URL
    pub url: String,
    /// Lifetime of `url`
    pub expires_in: Duration,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadReceipt {
    /// Name of the delivered file
    pub file_name: FileName,
    /// Bytes delivered
    pub size: u64,
}

/// A fresh link to an existing file
#[derive(Debug, Clone)]
pub struct ShareLink {
    /// Name of the linked file
    pub file_name: FileName,
    /// Size in bytes
    pub size: u64,
    /// Pre-signed download URL
    pub url: String,
    /// Lifetime of `url`
    pub expires_in: Duration,
}

/// One entry of a user's file listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Name relative to the user's namespace
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, if reported
    pub last_modified: Option<DateTime<Utc>>,
}

/// Relays files between chat users and the object store
pub struct RelayService {
    store: Arc<dyn ObjectStore>,
    staging: StagingArea,
    link_ttl: Duration,
    max_file_size: u64,
}

impl RelayService {
    /// Create a relay over an explicitly constructed store handle
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        staging: StagingArea,
        link_ttl: Duration,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            staging,
            link_ttl,
            max_file_size,
        }
    }

    /// Create a relay using the limits and download directory from settings
    #[must_use]
    pub fn from_settings(store: Arc<dyn ObjectStore>, settings: &Settings) -> Self {
        Self::new(
            store,
            StagingArea::new(settings.download_dir.clone()),
            settings.link_ttl(),
            settings.max_file_size,
        )
    }

    /// Lifetime of generated links
    #[must_use]
    pub const fn link_ttl(&self) -> Duration {
        self.link_ttl
    }

    /// Largest accepted upload
    #[must_use]
    pub const fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Staging area used for transfers
    #[must_use]
    pub const fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Store an incoming attachment in the sender's namespace and return a
    /// pre-signed link to it.
    ///
    /// `progress` follows the fetch from the chat, then the store upload.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the attachment is over the size cap, otherwise the
    /// classified transport or store failure.
    pub async fn upload(
        &self,
        user_id: i64,
        media: &IncomingMedia,
        transport: &dyn RelayTransport,
        progress: &TransferProgress,
    ) -> Result<UploadReceipt, RelayError> {
        if media.declared_size > self.max_file_size {
            return Err(RelayError::InvalidInput(format!(
                "File too large. Maximum size is {}.",
                human_bytes(self.max_file_size)
            )));
        }

        let namespace = UserNamespace::new(user_id);
        let file_name = media.storage_name();
        let key = namespace.key_for(&file_name);

        let staged = self.staging.acquire(&file_name).await?;
        progress.start(TransferPhase::Receiving, media.declared_size);
        transport.fetch_media(media, staged.path(), progress).await?;

        let size = match media.declared_size {
            0 => staged.byte_len().await?,
            declared => declared,
        };

        info!("User {user_id}: uploading {} ({size} bytes) to {key}", media.kind);
        progress.start(TransferPhase::Uploading, size);
        self.store.put_file(&key, staged.path(), progress).await?;
        drop(staged);

        let url = self.store.presign_get(&key, self.link_ttl).await?;
        info!("User {user_id}: stored {key}");

        Ok(UploadReceipt {
            file_name,
            key,
            size,
            url,
            expires_in: self.link_ttl,
        })
    }

    /// Fetch a file from the sender's namespace and deliver it as a document.
    ///
    /// `progress` follows the fetch from the store.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a missing or unsafe name (no store call is made),
    /// `NotFound` when the file does not exist, otherwise the classified
    /// transport or store failure.
    pub async fn download(
        &self,
        user_id: i64,
        raw_name: &str,
        transport: &dyn RelayTransport,
        progress: &TransferProgress,
    ) -> Result<DownloadReceipt, RelayError> {
        let file_name = FileName::parse(raw_name)?;
        let key = UserNamespace::new(user_id).key_for(&file_name);

        let staged = self.staging.acquire(&file_name).await?;
        progress.start(TransferPhase::Fetching, 0);
        let size = self.store.get_to_file(&key, staged.path(), progress).await?;
        info!("User {user_id}: fetched {key} ({size} bytes)");

        transport.deliver_file(staged.path(), &file_name).await?;

        Ok(DownloadReceipt { file_name, size })
    }

    /// List the files in the sender's namespace, in store order.
    ///
    /// # Errors
    ///
    /// Returns the classified store failure.
    pub async fn list(&self, user_id: i64) -> Result<Vec<StoredFile>, RelayError> {
        let namespace = UserNamespace::new(user_id);
        let objects = self.store.list_prefix(&namespace.prefix()).await?;

        Ok(objects
            .into_iter()
            .filter_map(|object| {
                namespace.strip(&object.key).map(|name| StoredFile {
                    name: name.to_string(),
                    size: object.size,
                    last_modified: object.last_modified,
                })
            })
            .collect())
    }

    /// Generate a fresh pre-signed link to an existing file.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad name, `NotFound` when the file is missing.
    pub async fn share_link(&self, user_id: i64, raw_name: &str) -> Result<ShareLink, RelayError> {
        let file_name = FileName::parse(raw_name)?;
        let key = UserNamespace::new(user_id).key_for(&file_name);

        let info = self.store.head(&key).await?;
        let url = self.store.presign_get(&key, self.link_ttl).await?;

        Ok(ShareLink {
            file_name,
            size: info.size,
            url,
            expires_in: self.link_ttl,
        })
    }

    /// Delete a file from the sender's namespace.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad name, `NotFound` when the file is missing.
    pub async fn delete(&self, user_id: i64, raw_name: &str) -> Result<FileName, RelayError> {
        let file_name = FileName::parse(raw_name)?;
        let key = UserNamespace::new(user_id).key_for(&file_name);

        self.store.head(&key).await?;
        self.store.delete(&key).await?;
        warn!("User {user_id}: deleted {key}");
        Ok(file_name)
    }

    /// Verify that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns the classified store failure.
    pub async fn check_store(&self) -> Result<(), RelayError> {
        self.store.check_connection().await.map_err(RelayError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockObjectStore, ObjectInfo, StorageError};
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use std::path::Path;

    /// Writes fixed bytes on fetch, discards deliveries
    struct FixedBytes(&'static [u8]);

    #[async_trait]
    impl RelayTransport for FixedBytes {
        async fn fetch_media(
            &self,
            _media: &IncomingMedia,
            dest: &Path,
            progress: &TransferProgress,
        ) -> Result<(), RelayError> {
            tokio::fs::write(dest, self.0).await?;
            progress.advance(self.0.len() as u64);
            Ok(())
        }

        async fn deliver_file(&self, _source: &Path, _name: &FileName) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn relay(store: MockObjectStore, staging: &Path) -> RelayService {
        RelayService::new(
            Arc::new(store),
            StagingArea::new(staging),
            Duration::from_secs(86_400),
            1024,
        )
    }

    fn document(name: &str, size: u64) -> IncomingMedia {
        IncomingMedia {
            kind: MediaKind::Document,
            file_id: "file-id".to_string(),
            file_unique_id: "unique".to_string(),
            file_name: Some(name.to_string()),
            mime_type: None,
            declared_size: size,
        }
    }

    #[tokio::test]
    async fn test_download_without_name_makes_no_store_call() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        // No expectations: any store call would panic
        let relay = relay(MockObjectStore::new(), dir.path());

        let err = relay
            .download(7, "   ", &FixedBytes(b""), &TransferProgress::new())
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidInput));
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_before_fetch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let relay = relay(MockObjectStore::new(), dir.path());

        let err = relay
            .upload(1, &document("big.iso", 4096), &FixedBytes(b""), &TransferProgress::new())
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidInput));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_uses_namespaced_key_and_ttl() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_put_file()
            .withf(|key, path, _| key == "user_42/report.pdf" && path.exists())
            .times(1)
            .returning(|_, _, progress| {
                progress.advance(8);
                Ok(())
            });
        store
            .expect_presign_get()
            .with(eq("user_42/report.pdf"), eq(Duration::from_secs(86_400)))
            .times(1)
            .returning(|key, _| Ok(format!("https://example.test/{key}?X-Amz-Expires=86400")));

        let relay = relay(store, dir.path());
        let progress = TransferProgress::new();
        let receipt = relay
            .upload(42, &document("report.pdf", 0), &FixedBytes(b"%PDF-1.7"), &progress)
            .await?;

        assert_eq!(receipt.key, "user_42/report.pdf");
        assert_eq!(receipt.size, 8);
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                phase: TransferPhase::Uploading,
                done: 8,
                total: 8,
            }
        );
        assert!(receipt.url.contains("user_42/report.pdf"));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_put_still_releases_staging() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_put_file()
            .returning(|_, _, _| Err(StorageError::Request("connection reset".into())));

        let relay = relay(store, dir.path());
        let err = relay
            .upload(3, &document("a.txt", 3), &FixedBytes(b"abc"), &TransferProgress::new())
            .await
            .err();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::TransientIo));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_get_to_file()
            .returning(|key, _, _| Err(StorageError::NotFound(key.to_string())));

        let relay = relay(store, dir.path());
        let err = relay
            .download(9, "nope.txt", &FixedBytes(b""), &TransferProgress::new())
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_download_reports_fetch_progress() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_get_to_file()
            .withf(|key, _, _| key == "user_9/clip.mp4")
            .returning(|_, path, progress| {
                std::fs::write(path, b"0123456789")?;
                progress.set_total(10);
                progress.advance(10);
                Ok(10)
            });

        let relay = relay(store, dir.path());
        let progress = TransferProgress::new();
        let receipt = relay
            .download(9, "clip.mp4", &FixedBytes(b""), &progress)
            .await?;

        assert_eq!(receipt.size, 10);
        let snap = progress.snapshot();
        assert_eq!(snap.phase, TransferPhase::Fetching);
        assert_eq!(snap.percent(), Some(100.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_strips_prefix_and_marker() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_list_prefix()
            .with(eq("user_5/"))
            .returning(|_| {
                Ok(vec![
                    ObjectInfo {
                        key: "user_5/".to_string(),
                        size: 0,
                        last_modified: None,
                    },
                    ObjectInfo {
                        key: "user_5/b.txt".to_string(),
                        size: 2,
                        last_modified: None,
                    },
                    ObjectInfo {
                        key: "user_5/a.txt".to_string(),
                        size: 1,
                        last_modified: None,
                    },
                ])
            });

        let relay = relay(store, dir.path());
        let names: Vec<String> = relay.list(5).await?.into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_checks_existence_first() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = MockObjectStore::new();
        store
            .expect_head()
            .returning(|key| Err(StorageError::NotFound(key.to_string())));
        store.expect_delete().never();

        let relay = relay(store, dir.path());
        let err = relay.delete(2, "gone.txt").await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }
}
