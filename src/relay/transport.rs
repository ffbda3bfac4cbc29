//! The chat side of a relay: incoming attachments and file delivery.

use super::error::RelayError;
use super::namespace::FileName;
use super::progress::TransferProgress;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Kind of attachment that triggered an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Generic document
    Document,
    /// Video file
    Video,
    /// Audio file
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
        })
    }
}

/// An attachment received from the chat, not yet downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMedia {
    /// Attachment kind
    pub kind: MediaKind,
    /// Transport file id used to fetch the bytes
    pub file_id: String,
    /// Stable unique id of the file
    pub file_unique_id: String,
    /// Original file name, if the sender's client provided one
    pub file_name: Option<String>,
    /// MIME type, if known
    pub mime_type: Option<String>,
    /// Size declared by the chat platform, 0 when unknown
    pub declared_size: u64,
}

impl IncomingMedia {
    /// Name the attachment is stored under.
    ///
    /// Uses the sanitized original name, or `<kind>_<unique id>.<ext>` with the
    /// extension taken from the MIME subtype.
    #[must_use]
    pub fn storage_name(&self) -> FileName {
        match self.file_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => FileName::sanitize(name),
            None => {
                let ext = self
                    .mime_type
                    .as_deref()
                    .and_then(|m| m.split('/').nth(1))
                    .map(|sub| sub.split(['+', ';']).next().unwrap_or(sub))
                    .filter(|sub| !sub.is_empty())
                    .unwrap_or("bin");
                FileName::sanitize(&format!("{}_{}.{ext}", self.kind, self.file_unique_id))
            }
        }
    }
}

/// Chat-side operations a relay needs
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Write the bytes of `media` into the file at `dest`, counting them
    /// into `progress`
    async fn fetch_media(
        &self,
        media: &IncomingMedia,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<(), RelayError>;

    /// Send the local file at `source` back to the requester as a document
    async fn deliver_file(&self, source: &Path, name: &FileName) -> Result<(), RelayError>;
}
