//! Telegram implementation of the relay transport.

use super::views::download_caption;
use crate::relay::staging::write_stream;
use crate::relay::{
    FileName, IncomingMedia, MediaKind, RelayError, RelayTransport, TransferProgress,
};
use async_trait::async_trait;
use std::path::Path;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, FileMeta, InputFile};
use teloxide::RequestError;
use tracing::debug;

/// Fetches attachments from and delivers documents to one chat
pub struct TelegramRelayTransport {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramRelayTransport {
    /// Transport bound to the chat a request came from
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl RelayTransport for TelegramRelayTransport {
    async fn fetch_media(
        &self,
        media: &IncomingMedia,
        dest: &Path,
        progress: &TransferProgress,
    ) -> Result<(), RelayError> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .map_err(map_request_error)?;
        if media.declared_size == 0 {
            progress.set_total(u64::from(file.meta.size));
        }

        let chunks = self.bot.download_file_stream(&file.path);
        let written = write_stream(dest, chunks, progress).await?;

        debug!(
            "Fetched {} {} ({written} bytes) into {}",
            media.kind,
            media.file_id,
            dest.display()
        );
        Ok(())
    }

    async fn deliver_file(&self, source: &Path, name: &FileName) -> Result<(), RelayError> {
        self.bot
            .send_document(
                self.chat_id,
                InputFile::file(source.to_path_buf()).file_name(name.as_str().to_string()),
            )
            .caption(download_caption(name.as_str()))
            .await
            .map_err(map_request_error)?;
        Ok(())
    }
}

/// Builds the relay view of a document, video or audio message
#[must_use]
pub fn incoming_media(msg: &Message) -> Option<IncomingMedia> {
    let (kind, file, file_name, mime_type) = if let Some(doc) = msg.document() {
        (MediaKind::Document, &doc.file, &doc.file_name, doc.mime_type.as_ref())
    } else if let Some(video) = msg.video() {
        (MediaKind::Video, &video.file, &video.file_name, video.mime_type.as_ref())
    } else if let Some(audio) = msg.audio() {
        (MediaKind::Audio, &audio.file, &audio.file_name, audio.mime_type.as_ref())
    } else {
        return None;
    };

    Some(media_from_parts(
        kind,
        file,
        file_name.clone(),
        mime_type.map(ToString::to_string),
    ))
}

fn media_from_parts(
    kind: MediaKind,
    file: &FileMeta,
    file_name: Option<String>,
    mime_type: Option<String>,
) -> IncomingMedia {
    IncomingMedia {
        kind,
        file_id: file.id.0.clone(),
        file_unique_id: file.unique_id.0.clone(),
        file_name,
        mime_type,
        declared_size: u64::from(file.size),
    }
}

fn map_request_error(err: RequestError) -> RelayError {
    let text = err.to_string();
    if text.to_lowercase().contains("file is too big") {
        RelayError::InvalidInput(
            "File is too big for the Telegram Bot API. A local Bot API server is needed for files over 20 MB."
                .to_string(),
        )
    } else {
        RelayError::TransientIo(format!("Telegram request failed: {text}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ErrorKind;
    use teloxide::types::FileUniqueId;

    #[test]
    fn test_media_from_parts_copies_ids_and_size() {
        let file = FileMeta {
            id: FileId("BQACAgIAAxkBAAI".to_string()),
            unique_id: FileUniqueId("AgADyy".to_string()),
            size: 2_097_152,
        };
        let media = media_from_parts(
            MediaKind::Document,
            &file,
            Some("report.pdf".to_string()),
            Some("application/pdf".to_string()),
        );

        assert_eq!(media.file_id, "BQACAgIAAxkBAAI");
        assert_eq!(media.file_unique_id, "AgADyy");
        assert_eq!(media.declared_size, 2_097_152);
        assert_eq!(media.storage_name().as_str(), "report.pdf");
    }

    #[test]
    fn test_network_errors_are_transient() {
        let err = map_request_error(RequestError::Io(std::io::Error::other("reset").into()));
        assert_eq!(err.kind(), ErrorKind::TransientIo);
    }
}
