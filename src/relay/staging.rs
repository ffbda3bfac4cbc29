//! Local staging files.
//!
//! A [`StagingFile`] is a guard over one transient file in the download
//! directory. The file is removed when the guard is dropped, whichever way
//! the request ends.

use super::error::RelayError;
use super::namespace::FileName;
use super::progress::TransferProgress;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest extension carried over to a staging file name
const MAX_STAGING_EXT_LEN: usize = 16;

/// Directory that hands out staging files
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Staging area rooted at `root`; the directory is created on first use
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the staging area
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserves a unique staging path for `name`.
    ///
    /// The path is `<root>/<uuid>` plus the extension of `name` when it is
    /// short and alphanumeric, so its length never depends on the user's
    /// file name. Nothing is written yet; the caller fills the file through
    /// [`StagingFile::path`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::TransientIo`] if the directory cannot be created.
    pub async fn acquire(&self, name: &FileName) -> Result<StagingFile, RelayError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let id = Uuid::new_v4().as_simple().to_string();
        let file_name = match staging_extension(name) {
            Some(ext) => format!("{id}.{ext}"),
            None => id,
        };
        let path = self.root.join(file_name);
        debug!("Staging file for '{}' reserved at {}", name, path.display());
        Ok(StagingFile { path })
    }
}

fn staging_extension(name: &FileName) -> Option<&str> {
    name.as_str()
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_STAGING_EXT_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
}

/// Writes a chunk stream into a new file at `dest`, counting bytes into
/// `progress`. The file is flushed before returning.
///
/// # Errors
///
/// Returns [`RelayError::TransientIo`] if the stream fails or the file
/// cannot be written.
pub async fn write_stream<S, E>(
    dest: &Path,
    stream: S,
    progress: &TransferProgress,
) -> Result<u64, RelayError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0_u64;

    while let Some(chunk) = stream
        .try_next()
        .await
        .map_err(|e| RelayError::TransientIo(format!("download interrupted: {e}")))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        progress.advance(chunk.len() as u64);
    }
    file.flush().await?;
    Ok(written)
}

/// A transient local file, deleted on drop
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    /// Location of the file on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the staged file
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be inspected.
    pub async fn byte_len(&self) -> Result<u64, RelayError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        // Drop cannot await; a blocking unlink is short enough here
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staging file {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::progress::TransferPhase;
    use futures_util::stream;

    fn staged_name(staged: &StagingFile) -> String {
        staged
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_acquire_creates_directory_on_demand() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let area = StagingArea::new(dir.path().join("downloads"));

        let staged = area.acquire(&FileName::sanitize("a.txt")).await?;
        assert!(area.root().is_dir());
        assert!(staged.path().starts_with(area.root()));
        assert!(staged_name(&staged).ends_with(".txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_long_unicode_name_gets_short_staging_path(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let area = StagingArea::new(dir.path());
        let name = FileName::parse(&"文".repeat(150))?;
        assert!(name.as_str().len() > 255);

        let staged = area.acquire(&name).await?;
        assert_eq!(staged_name(&staged).len(), 32);

        tokio::fs::write(staged.path(), b"payload").await?;
        assert_eq!(staged.byte_len().await?, 7);
        Ok(())
    }

    #[test]
    fn test_only_short_ascii_extensions_are_kept() -> Result<(), RelayError> {
        assert_eq!(staging_extension(&FileName::parse("clip.mp4")?), Some("mp4"));
        assert_eq!(staging_extension(&FileName::parse("archive.tar.gz")?), Some("gz"));
        assert_eq!(staging_extension(&FileName::parse("README")?), None);
        assert_eq!(staging_extension(&FileName::parse("trailing.")?), None);
        assert_eq!(staging_extension(&FileName::parse("notes.文本")?), None);
        assert_eq!(
            staging_extension(&FileName::parse("x.abcdefghijklmnopq")?),
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_write_stream_flushes_and_counts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("out.bin");
        let progress = TransferProgress::new();
        progress.start(TransferPhase::Receiving, 6);

        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ]);
        let written = write_stream(&dest, chunks, &progress).await?;

        assert_eq!(written, 6);
        assert_eq!(tokio::fs::read(&dest).await?, b"abcdef");
        assert_eq!(progress.snapshot().done, 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_write_stream_failure_is_transient() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = write_stream(&dir.path().join("out.bin"), chunks, &TransferProgress::new())
            .await
            .err();
        assert!(err.is_some_and(|e| e.is_retryable()));
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_written_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let area = StagingArea::new(dir.path());

        let staged = area.acquire(&FileName::sanitize("a.txt")).await?;
        tokio::fs::write(staged.path(), b"payload").await?;
        assert_eq!(staged.byte_len().await?, 7);

        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_without_file_is_quiet() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let area = StagingArea::new(dir.path());
        let staged = area.acquire(&FileName::sanitize("never-written.bin")).await?;
        assert!(staged.byte_len().await.is_err());
        drop(staged);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_name_gets_distinct_paths() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let area = StagingArea::new(dir.path());
        let name = FileName::sanitize("clip.mp4");

        let first = area.acquire(&name).await?;
        let second = area.acquire(&name).await?;
        assert_ne!(first.path(), second.path());
        Ok(())
    }
}
