//! Reply texts and keyboards.
//!
//! Everything here is HTML for `ParseMode::Html` unless noted; user supplied
//! names are escaped.

use crate::config::LIST_PREVIEW_LIMIT;
use crate::relay::{
    ProgressSnapshot, RelayError, ShareLink, StoredFile, TransferPhase, UploadReceipt,
};
use crate::utils::{human_bytes, human_duration, truncate_str};
use html_escape::encode_text;
use std::fmt::Write;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Exact reply for an empty namespace (plain text)
pub const NO_FILES: &str = "No files found";
/// Reply to messages that are neither commands nor files (plain text)
pub const UNSUPPORTED_MESSAGE: &str =
    "Unsupported message. Send a file to upload or use /help for commands.";
/// Reply when a user exceeds the request rate (plain text)
pub const RATE_LIMITED: &str = "⏳ Rate limit exceeded. Please try again in a minute.";
/// Reply to users outside the allow-list (plain text)
pub const ACCESS_DENIED: &str = "⛔️ Access denied";

/// Status shown while a file is fetched from Telegram
pub const STATUS_RECEIVING: &str = "⬇️ Downloading file...";
/// Status shown while a file is fetched from the store
pub const STATUS_FETCHING: &str = "⬇️ Fetching file from storage...";
/// Status shown while a link is generated
pub const STATUS_LINKING: &str = "🔗 Generating link...";

const PROGRESS_BAR_LEN: u64 = 12;
const PROGRESS_NAME_CHARS: usize = 35;

/// Welcome and command overview
#[must_use]
pub fn help_text(link_ttl: std::time::Duration) -> String {
    format!(
        "👋 <b>Wasabi file relay</b>\n\n\
         Send me a document, video or audio file and I will store it and reply with a \
         download link valid for {}.\n\n\
         <b>Commands:</b>\n\
         /download &lt;filename&gt; - get a stored file back\n\
         /list - show your files\n\
         /link &lt;filename&gt; - new download link for a file\n\
         /delete &lt;filename&gt; - remove a file\n\
         /status - storage status\n\
         /help - this message",
        human_duration(link_ttl)
    )
}

/// Usage hint for a command that needs a file name (plain text)
#[must_use]
pub fn usage(command: &str) -> String {
    format!("Usage: /{command} <filename>")
}

/// Live status of a running transfer
///
/// Shows a bar with the percentage when the total is known, otherwise just
/// the bytes moved so far. Speed and ETA are derived from `elapsed`, the
/// time spent in the current phase.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
pub fn transfer_progress(
    file_name: &str,
    p: &ProgressSnapshot,
    elapsed: std::time::Duration,
) -> String {
    let title = match p.phase {
        TransferPhase::Idle => "⏳ Preparing",
        TransferPhase::Receiving => "⬇️ Receiving file",
        TransferPhase::Uploading => "⬆️ Uploading to storage",
        TransferPhase::Fetching => "⬇️ Fetching from storage",
    };
    let name = if file_name.chars().count() > PROGRESS_NAME_CHARS {
        format!("{}...", truncate_str(file_name, PROGRESS_NAME_CHARS - 3))
    } else {
        file_name.to_string()
    };

    let mut text = format!("<b>{title}</b>\n📄 <code>{}</code>\n\n", encode_text(&name));

    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { p.done as f64 / secs } else { 0.0 };

    match p.percent() {
        Some(percent) => {
            let filled = p.done.min(p.total) * PROGRESS_BAR_LEN / p.total;
            let _ = writeln!(
                text,
                "{}{} <b>{percent:.1}%</b>",
                "█".repeat(filled as usize),
                "░".repeat((PROGRESS_BAR_LEN - filled) as usize)
            );
            let _ = writeln!(
                text,
                "{} / {}",
                human_bytes(p.done),
                human_bytes(p.total)
            );
        }
        None => {
            let _ = writeln!(text, "{} so far", human_bytes(p.done));
        }
    }

    let _ = write!(text, "\n🚀 Speed: {}/s", human_bytes(speed as u64));
    if p.total > 0 {
        let eta = if speed > 0.0 {
            human_eta((p.total.saturating_sub(p.done) as f64 / speed) as u64)
        } else {
            "calculating...".to_string()
        };
        let _ = write!(text, "\n⏱ ETA: {eta}");
    }
    text
}

fn human_eta(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

/// Result of a successful upload
#[must_use]
pub fn upload_complete(receipt: &UploadReceipt) -> String {
    format!(
        "✅ <b>Upload complete</b>\n\n\
         📄 File: <code>{}</code>\n\
         📦 Size: {}\n\
         🗂 Stored as: <code>{}</code>\n\
         ⏳ Link expires in: {}",
        encode_text(receipt.file_name.as_str()),
        human_bytes(receipt.size),
        encode_text(&receipt.key),
        human_duration(receipt.expires_in)
    )
}

/// Result of `/link`
#[must_use]
pub fn share_link(link: &ShareLink) -> String {
    format!(
        "🔗 <b>Download link</b>\n\n\
         📄 File: <code>{}</code>\n\
         📦 Size: {}\n\
         ⏳ Link expires in: {}",
        encode_text(link.file_name.as_str()),
        human_bytes(link.size),
        human_duration(link.expires_in)
    )
}

/// Inline keyboard with a single "Direct Download" URL button
///
/// Returns `None` if the URL cannot be parsed.
#[must_use]
pub fn download_keyboard(url: &str) -> Option<InlineKeyboardMarkup> {
    let url = reqwest::Url::parse(url).ok()?;
    Some(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url("⬇️ Direct Download", url),
    ]]))
}

/// Caption of a delivered document
#[must_use]
pub fn download_caption(file_name: &str) -> String {
    format!("Downloaded: {file_name}")
}

/// Status after a stored file was delivered
#[must_use]
pub fn download_complete(file_name: &str, size: u64) -> String {
    format!(
        "✅ Sent <code>{}</code> ({})",
        encode_text(file_name),
        human_bytes(size)
    )
}

/// Listing of a user's files; [`NO_FILES`] when there are none
#[must_use]
pub fn listing(files: &[StoredFile]) -> String {
    if files.is_empty() {
        return NO_FILES.to_string();
    }

    let mut text = String::from("📁 <b>Your files:</b>\n\n");
    for file in files.iter().take(LIST_PREVIEW_LIMIT) {
        let _ = writeln!(
            text,
            "• <code>{}</code> ({})",
            encode_text(&file.name),
            human_bytes(file.size)
        );
    }
    if files.len() > LIST_PREVIEW_LIMIT {
        let _ = writeln!(text, "\n...and {} more files", files.len() - LIST_PREVIEW_LIMIT);
    }

    let total: u64 = files.iter().map(|f| f.size).sum();
    let noun = if files.len() == 1 { "file" } else { "files" };
    let _ = write!(
        text,
        "\nTotal: {} {noun}, {}",
        files.len(),
        human_bytes(total)
    );
    text
}

/// Confirmation of `/delete`
#[must_use]
pub fn deleted(file_name: &str) -> String {
    format!("🗑 Deleted <code>{}</code>", encode_text(file_name))
}

/// Failure of a relay operation
#[must_use]
pub fn error(err: &RelayError) -> String {
    format!("❌ {}", encode_text(&err.user_message()))
}

/// Values shown by `/status`
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Whether the bucket answered
    pub store_ok: bool,
    /// Bucket name
    pub bucket: String,
    /// Store endpoint
    pub endpoint: String,
    /// Requests per user per minute, 0 for unlimited
    pub rate_limit: u32,
    /// Link lifetime
    pub link_ttl: std::time::Duration,
    /// Whether the allow-list is empty
    pub open_access: bool,
    /// Cooldown between denial replies, in minutes
    pub cooldown_mins: u64,
    /// Users in the denial cache
    pub denied_entries: u64,
    /// Silenced denial replies
    pub silenced: u64,
}

/// Result of `/status`
#[must_use]
pub fn status_report(s: &StatusSnapshot) -> String {
    let store = if s.store_ok {
        "✅ reachable"
    } else {
        "❌ unavailable"
    };
    let rate = if s.rate_limit == 0 {
        "unlimited".to_string()
    } else {
        format!("{} requests/min", s.rate_limit)
    };
    let access = if s.open_access { "open" } else { "allow-list" };

    format!(
        "<b>📊 Relay status</b>\n\n\
         <b>Storage:</b> {store}\n\
         • Bucket: <code>{}</code>\n\
         • Endpoint: <code>{}</code>\n\
         • Link lifetime: {}\n\n\
         <b>Limits:</b>\n\
         • Rate limit: {rate}\n\
         • Access: {access}\n\
         • Denial cooldown: {} min.\n\
         • Denial cache entries: {}\n\
         • Silenced denials: {}",
        encode_text(&s.bucket),
        encode_text(&s.endpoint),
        human_duration(s.link_ttl),
        s.cooldown_mins,
        s.denied_entries,
        s.silenced
    )
}
