use crate::bot::access::AccessGuard;
use crate::bot::progress::ProgressReporter;
use crate::bot::rate_limit::RateLimiter;
use crate::bot::resilient::{edit_message_safe_resilient, send_message_resilient};
use crate::bot::transport::{incoming_media, TelegramRelayTransport};
use crate::bot::views;
use crate::config::Settings;
use crate::relay::{RelayService, TransferProgress};
use anyhow::Result;
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::ParseMode,
    utils::command::{BotCommands, ParseError},
};
use tracing::{error, info, warn};

/// Display name of the sender, for logs
#[must_use]
pub fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Telegram ID of the sender; `None` for messages without a user, such as
/// channel posts
#[must_use]
pub fn sender_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|u| u.id.0.cast_signed())
}

/// Sender ID for messages that passed the sender filter in the runner.
/// Returns 0 if the user information is missing.
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    sender_id(msg).unwrap_or(0)
}

/// Takes everything after the command as one file name, possibly empty
///
/// # Errors
///
/// Never fails; the signature is the one `BotCommands` expects.
pub fn file_name_arg(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show the command overview
    #[command(description = "Show help.")]
    Help,
    /// Send a stored file back as a document
    #[command(description = "Get a stored file.", parse_with = file_name_arg)]
    Download(String),
    /// List stored files
    #[command(description = "List your files.")]
    List,
    /// Generate a new download link
    #[command(description = "New download link for a file.", parse_with = file_name_arg)]
    Link(String),
    /// Delete a stored file
    #[command(description = "Delete a file.", parse_with = file_name_arg)]
    Delete(String),
    /// Show storage status
    #[command(description = "Show storage status.")]
    Status,
}

impl Command {
    /// Whether the command does relay work and counts against the rate limit
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        !matches!(self, Self::Start | Self::Help)
    }
}

/// `/start` and `/help`
///
/// # Errors
///
/// Returns an error if the help message cannot be sent.
pub async fn help(bot: Bot, msg: Message, relay: Arc<RelayService>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} ({}) requested help.", get_user_name(&msg));

    send_message_resilient(
        &bot,
        msg.chat.id,
        views::help_text(relay.link_ttl()),
        Some(ParseMode::Html),
    )
    .await?;
    Ok(())
}

/// Upload of a document, video or audio message
///
/// # Errors
///
/// Returns an error if the status message cannot be sent.
pub async fn upload(bot: Bot, msg: Message, relay: Arc<RelayService>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let Some(media) = incoming_media(&msg) else {
        return unsupported(bot, msg).await;
    };

    info!(
        "User {user_id} ({}) sent a {} ({} bytes).",
        get_user_name(&msg),
        media.kind,
        media.declared_size
    );

    let status = send_message_resilient(&bot, msg.chat.id, views::STATUS_RECEIVING, None).await?;
    let transport = TelegramRelayTransport::new(bot.clone(), msg.chat.id);
    let progress = TransferProgress::new();
    let reporter = ProgressReporter::spawn(
        bot.clone(),
        msg.chat.id,
        status.id,
        media.storage_name().to_string(),
        progress.clone(),
    );

    let result = relay.upload(user_id, &media, &transport, &progress).await;
    reporter.finish().await;

    match result {
        Ok(receipt) => {
            let keyboard = views::download_keyboard(&receipt.url);
            edit_message_safe_resilient(
                &bot,
                msg.chat.id,
                status.id,
                &views::upload_complete(&receipt),
                keyboard,
            )
            .await;
        }
        Err(e) => {
            error!("Upload failed for user {user_id}: {e}");
            edit_message_safe_resilient(&bot, msg.chat.id, status.id, &views::error(&e), None)
                .await;
        }
    }
    Ok(())
}

/// `/download <filename>`
///
/// # Errors
///
/// Returns an error if the status message cannot be sent.
pub async fn download(
    bot: Bot,
    msg: Message,
    relay: Arc<RelayService>,
    file_name: String,
) -> Result<()> {
    if file_name.is_empty() {
        send_message_resilient(&bot, msg.chat.id, views::usage("download"), None).await?;
        return Ok(());
    }

    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} requested download of '{file_name}'.");

    let status = send_message_resilient(&bot, msg.chat.id, views::STATUS_FETCHING, None).await?;
    let transport = TelegramRelayTransport::new(bot.clone(), msg.chat.id);
    let progress = TransferProgress::new();
    let reporter = ProgressReporter::spawn(
        bot.clone(),
        msg.chat.id,
        status.id,
        file_name.clone(),
        progress.clone(),
    );

    let result = relay
        .download(user_id, &file_name, &transport, &progress)
        .await;
    reporter.finish().await;

    let text = match result {
        Ok(receipt) => views::download_complete(receipt.file_name.as_str(), receipt.size),
        Err(e) => {
            error!("Download of '{file_name}' failed for user {user_id}: {e}");
            views::error(&e)
        }
    };
    edit_message_safe_resilient(&bot, msg.chat.id, status.id, &text, None).await;
    Ok(())
}

/// `/list`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn list(bot: Bot, msg: Message, relay: Arc<RelayService>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} requested file list.");

    match relay.list(user_id).await {
        Ok(files) if files.is_empty() => {
            send_message_resilient(&bot, msg.chat.id, views::NO_FILES, None).await?;
        }
        Ok(files) => {
            send_message_resilient(
                &bot,
                msg.chat.id,
                views::listing(&files),
                Some(ParseMode::Html),
            )
            .await?;
        }
        Err(e) => {
            error!("Listing failed for user {user_id}: {e}");
            send_message_resilient(&bot, msg.chat.id, views::error(&e), Some(ParseMode::Html))
                .await?;
        }
    }
    Ok(())
}

/// `/link <filename>`
///
/// # Errors
///
/// Returns an error if the status message cannot be sent.
pub async fn link(
    bot: Bot,
    msg: Message,
    relay: Arc<RelayService>,
    file_name: String,
) -> Result<()> {
    if file_name.is_empty() {
        send_message_resilient(&bot, msg.chat.id, views::usage("link"), None).await?;
        return Ok(());
    }

    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} requested a link for '{file_name}'.");

    let status = send_message_resilient(&bot, msg.chat.id, views::STATUS_LINKING, None).await?;
    match relay.share_link(user_id, &file_name).await {
        Ok(link) => {
            let keyboard = views::download_keyboard(&link.url);
            edit_message_safe_resilient(
                &bot,
                msg.chat.id,
                status.id,
                &views::share_link(&link),
                keyboard,
            )
            .await;
        }
        Err(e) => {
            error!("Link for '{file_name}' failed for user {user_id}: {e}");
            edit_message_safe_resilient(&bot, msg.chat.id, status.id, &views::error(&e), None)
                .await;
        }
    }
    Ok(())
}

/// `/delete <filename>`
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn delete(
    bot: Bot,
    msg: Message,
    relay: Arc<RelayService>,
    file_name: String,
) -> Result<()> {
    if file_name.is_empty() {
        send_message_resilient(&bot, msg.chat.id, views::usage("delete"), None).await?;
        return Ok(());
    }

    let user_id = get_user_id_safe(&msg);
    info!("User {user_id} requested deletion of '{file_name}'.");

    let text = match relay.delete(user_id, &file_name).await {
        Ok(name) => views::deleted(name.as_str()),
        Err(e) => {
            error!("Deletion of '{file_name}' failed for user {user_id}: {e}");
            views::error(&e)
        }
    };
    send_message_resilient(&bot, msg.chat.id, text, Some(ParseMode::Html)).await?;
    Ok(())
}

/// `/status`
///
/// # Errors
///
/// Returns an error if the report cannot be sent.
pub async fn status(
    bot: Bot,
    msg: Message,
    relay: Arc<RelayService>,
    settings: Arc<Settings>,
    guard: Arc<AccessGuard>,
    limiter: Arc<RateLimiter>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("Status command received from user {user_id}.");

    let store_ok = match relay.check_store().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Store check from /status failed: {e}");
            false
        }
    };

    let snapshot = views::StatusSnapshot {
        store_ok,
        bucket: settings.wasabi_bucket.clone().unwrap_or_default(),
        endpoint: settings.endpoint_url(),
        rate_limit: limiter.limit(),
        link_ttl: relay.link_ttl(),
        open_access: guard.is_open(),
        cooldown_mins: guard.cooldown().as_secs() / 60,
        denied_entries: guard.entry_count(),
        silenced: guard.silenced_count(),
    };

    send_message_resilient(
        &bot,
        msg.chat.id,
        views::status_report(&snapshot),
        Some(ParseMode::Html),
    )
    .await?;
    Ok(())
}

/// Reply to anything that is neither a command nor a file
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn unsupported(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, views::UNSUPPORTED_MESSAGE, None).await?;
    Ok(())
}

/// Reply to a rate-limited request
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn rate_limited(bot: Bot, msg: Message) -> Result<()> {
    warn!("User {} hit the rate limit.", get_user_id_safe(&msg));
    send_message_resilient(&bot, msg.chat.id, views::RATE_LIMITED, None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Command> {
        Command::parse(text, "wasabi_relay_bot").ok()
    }

    #[test]
    fn test_file_name_commands_take_the_whole_rest() {
        assert_eq!(
            parse("/download my report.pdf"),
            Some(Command::Download("my report.pdf".to_string()))
        );
        assert_eq!(
            parse("/link   notes.txt  "),
            Some(Command::Link("notes.txt".to_string()))
        );
    }

    #[test]
    fn test_missing_argument_parses_as_empty() {
        assert_eq!(parse("/download"), Some(Command::Download(String::new())));
        assert_eq!(parse("/delete"), Some(Command::Delete(String::new())));
    }

    #[test]
    fn test_plain_commands() {
        assert_eq!(parse("/list"), Some(Command::List));
        assert_eq!(parse("/status"), Some(Command::Status));
        assert_eq!(parse("/start"), Some(Command::Start));
        assert_eq!(parse("hello"), None);
    }

    fn message(json: &str) -> Result<Message, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn test_sender_id_from_private_message() -> Result<(), serde_json::Error> {
        let msg = message(
            r#"{"message_id":1,"date":1700000000,
                "chat":{"id":42,"type":"private","first_name":"Ann"},
                "from":{"id":42,"is_bot":false,"first_name":"Ann"},
                "text":"/list"}"#,
        )?;
        assert_eq!(sender_id(&msg), Some(42));
        assert_eq!(get_user_id_safe(&msg), 42);
        Ok(())
    }

    #[test]
    fn test_channel_post_has_no_sender() -> Result<(), serde_json::Error> {
        let msg = message(
            r#"{"message_id":7,"date":1700000000,
                "chat":{"id":-1001234567890,"type":"channel","title":"drops"},
                "sender_chat":{"id":-1001234567890,"type":"channel","title":"drops"},
                "text":"/list"}"#,
        )?;
        assert_eq!(sender_id(&msg), None);
        Ok(())
    }

    #[test]
    fn test_only_relay_commands_are_rate_limited() {
        assert!(!Command::Start.is_rate_limited());
        assert!(!Command::Help.is_rate_limited());
        assert!(Command::List.is_rate_limited());
        assert!(Command::Download("a".into()).is_rate_limited());
    }
}
