//! Reminder core - durable store, delivery lock and the scheduler that
//! drives them, plus the chat-facing parser, tools and commands.

pub mod commands;
pub mod lock;
pub mod parser;
pub mod scheduler;
pub mod sender;
pub mod store;
pub mod tools;
pub mod types;

#[cfg(test)]
mod tests;

pub use commands::{ChatEvent, handle_command};
pub use lock::{ClaimLock, LockGuard};
pub use parser::{ChineseParser, ParsedReminder, RequestParser};
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use sender::{Sender, TelegramSender};
pub use store::{ReminderStore, StoreError, now_ms};
pub use tools::{ChatType, ReminderTools, ToolCall, get_tool_definitions};
pub use types::{CancelOutcome, CreatorScope, DeliveryTarget, NewReminder, ReminderRecord, ReminderStatus};
