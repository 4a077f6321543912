pub mod config;
pub mod reminders;
pub mod telegram_log;
