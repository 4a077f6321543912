//! Forwards WARN/ERROR log events to a Telegram chat.

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const MAX_LOG_CHARS: usize = 4000;

pub struct LogForwardLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl LogForwardLayer {
    /// Spawns the forwarding task; must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                send_log(&bot, chat_id, &text).await;
            }
        });

        Self { tx }
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = truncate(text);
    if let Err(e) = bot.send_message(chat_id, &text).await {
        // Not through tracing: a failing send would feed itself.
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

/// Format a log event for the chat, or `None` if it is below WARN.
fn format_event(level: Level, message: &str) -> Option<String> {
    match level {
        Level::ERROR => Some(format!("❌ {}", message)),
        Level::WARN => Some(format!("⚠️ {}", message)),
        _ => None,
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for LogForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(text) = format_event(level, &visitor.message)
            && self.tx.send(text).is_err()
        {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
