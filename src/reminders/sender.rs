//! Outbound delivery of reminder messages.

use std::future::Future;

use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, warn};

use super::types::DeliveryTarget;

/// Delivers a rendered reminder to a chat.
///
/// Any `Err` counts as a transient failure and the reminder is retried.
pub trait Sender: Send + Sync {
    /// Render a "mention this user" annotation for the outbound text.
    fn format_mention(&self, mention_id: &str) -> String;

    /// Make user text safe for the gateway's message format.
    fn escape_text(&self, text: &str) -> String {
        text.to_string()
    }

    fn send(&self, target: &DeliveryTarget, text: &str) -> impl Future<Output = Result<(), String>> + Send;
}

/// Outbound text: optional mention, then the reminder body.
pub fn render_reminder<S: Sender>(sender: &S, mention_id: Option<&str>, text: &str) -> String {
    let body = format!("提醒：{}", sender.escape_text(text.trim()));
    match mention_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => format!("{} {}", sender.format_mention(id), body),
        None => body,
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// Resolve a delivery target to a Telegram chat id.
pub fn target_chat_id(target: &DeliveryTarget) -> Result<ChatId, String> {
    let raw = match target {
        DeliveryTarget::Private { user_id } => user_id,
        DeliveryTarget::Group { group_id } => group_id,
    };
    raw.trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| format!("Invalid chat id '{}'", raw))
}

/// Sends reminders through the Telegram Bot API.
pub struct TelegramSender {
    bot: Bot,
    dry_run: bool,
}

impl TelegramSender {
    pub fn new(bot: Bot, dry_run: bool) -> Self {
        Self { bot, dry_run }
    }
}

impl Sender for TelegramSender {
    fn format_mention(&self, mention_id: &str) -> String {
        format!("<a href=\"tg://user?id={}\">@{}</a>", html_escape(mention_id), html_escape(mention_id))
    }

    fn escape_text(&self, text: &str) -> String {
        html_escape(text)
    }

    async fn send(&self, target: &DeliveryTarget, text: &str) -> Result<(), String> {
        let chat_id = target_chat_id(target)?;

        if self.dry_run {
            info!("[DRY RUN] Would send to {}: {}", chat_id, text);
            return Ok(());
        }

        self.bot
            .send_message(chat_id, text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }
}
