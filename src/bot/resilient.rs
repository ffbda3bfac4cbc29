//! Telegram sends and edits with automatic retry on transient failures.
//!
//! Status messages are edited in place as a relay request progresses. An
//! edit that fails for good is reported and never aborts the request.

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardMarkup, Message, MessageId, ParseMode};
use tracing::{debug, warn};

const MAX_MESSAGE_CHARS: usize = 4000;

/// Send a message, retrying with exponential backoff.
///
/// # Errors
///
/// Returns the last error once all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message, retrying with exponential backoff.
///
/// # Errors
///
/// Returns the last error once all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
    keyboard: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        if let Some(kb) = keyboard.clone() {
            req = req.reply_markup(kb);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit an HTML status message, swallowing expected failures.
///
/// Long text is truncated. "Message is not modified" and "message to edit
/// not found" are logged at debug level.
///
/// Returns `true` if the message was edited.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
    keyboard: Option<InlineKeyboardMarkup>,
) -> bool {
    const ERROR_NOT_MODIFIED: &str = "message is not modified";
    const ERROR_NOT_FOUND: &str = "message to edit not found";

    let text = fit_message(text);

    match edit_message_resilient(bot, chat_id, msg_id, text, Some(ParseMode::Html), keyboard).await
    {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_MODIFIED) || err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Message update skipped: {err_msg}");
            } else {
                warn!("Failed to edit message after retries: {e}");
            }
            false
        }
    }
}

/// Truncates text that would exceed Telegram's message limit
fn fit_message(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated = crate::utils::truncate_str(text, MAX_MESSAGE_CHARS);
        format!("{truncated}...\n\n<i>(message truncated)</i>")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(fit_message("✅ done"), "✅ done");
    }

    #[test]
    fn test_long_text_is_truncated() {
        let text = "ж".repeat(MAX_MESSAGE_CHARS + 50);
        let fitted = fit_message(&text);
        assert!(fitted.ends_with("<i>(message truncated)</i>"));
        assert!(fitted.starts_with(&"ж".repeat(MAX_MESSAGE_CHARS)));
        assert!(!fitted.starts_with(&"ж".repeat(MAX_MESSAGE_CHARS + 1)));
    }
}
