//! In-memory stand-ins for the object store and the chat transport, used by
//! integration tests and local experiments.

use crate::relay::{FileName, IncomingMedia, RelayError, RelayTransport, TransferProgress};
use crate::storage::{ObjectInfo, ObjectStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Object store kept in a sorted map
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with a request error, or heals it
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert an object directly
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.lock().await.insert(key.into(), data.into());
    }

    /// Contents of `key`, if present
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().await.get(key).cloned()
    }

    /// All stored keys in order
    pub async fn keys(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Request("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<(), StorageError> {
        self.check()?;
        let data = tokio::fs::read(path).await?;
        progress.advance(data.len() as u64);
        self.insert(key, data).await;
        Ok(())
    }

    async fn get_to_file(
        &self,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> Result<u64, StorageError> {
        self.check()?;
        let data = self
            .get(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        progress.set_total(data.len() as u64);
        tokio::fs::write(path, &data).await?;
        progress.advance(data.len() as u64);
        Ok(data.len() as u64)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        self.check()?;
        let now = Utc::now();
        Ok(self
            .objects
            .lock()
            .await
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
                last_modified: Some(now),
            })
            .collect())
    }

    async fn head(&self, key: &str) -> Result<ObjectInfo, StorageError> {
        self.check()?;
        let data = self
            .get(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: data.len() as u64,
            last_modified: None,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        self.check()?;
        Ok(format!(
            "memory://relay/{key}?expires={}",
            expires_in.as_secs()
        ))
    }

    async fn check_connection(&self) -> Result<(), StorageError> {
        self.check()
    }
}

/// Chat transport that serves attachments from memory and records deliveries
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    sources: Mutex<HashMap<String, Bytes>>,
    delivered: Mutex<Vec<(String, Bytes)>>,
    fail_fetch: AtomicBool,
}

impl LoopbackTransport {
    /// Transport with no attachments
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the bytes behind an attachment id
    pub async fn add_source(&self, file_id: impl Into<String>, data: impl Into<Bytes>) {
        self.sources.lock().await.insert(file_id.into(), data.into());
    }

    /// Makes fetches fail after writing a partial file
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    /// Files delivered so far, as `(name, bytes)`
    pub async fn delivered(&self) -> Vec<(String, Bytes)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl RelayTransport for LoopbackTransport {
    async fn fetch_media(
        &self,
        media: &IncomingMedia,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<(), RelayError> {
        let data = self
            .sources
            .lock()
            .await
            .get(&media.file_id)
            .cloned()
            .ok_or_else(|| RelayError::TransientIo(format!("unknown file id {}", media.file_id)))?;

        if self.fail_fetch.load(Ordering::SeqCst) {
            let half = data.len() / 2;
            tokio::fs::write(dest, &data[..half]).await?;
            progress.advance(half as u64);
            return Err(RelayError::TransientIo("connection reset during download".into()));
        }

        tokio::fs::write(dest, &data).await?;
        progress.advance(data.len() as u64);
        Ok(())
    }

    async fn deliver_file(&self, source: &Path, name: &FileName) -> Result<(), RelayError> {
        let data = tokio::fs::read(source).await?;
        self.delivered
            .lock()
            .await
            .push((name.as_str().to_string(), Bytes::from(data)));
        Ok(())
    }
}
