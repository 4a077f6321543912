use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Unknown IANA timezone name.
    InvalidTimezone(String),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidTimezone(name) => write!(f, "unknown timezone '{}'", name),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidTimezone(_) | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Directory for the reminder table, lock files and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// IANA zone used to read times like "明天9点".
    timezone: Option<String>,
    /// Groups the bot answers in. Empty means every group.
    #[serde(default)]
    allowed_groups: Vec<i64>,
    #[serde(default)]
    owner_ids: Vec<u64>,
    log_chat_id: Option<i64>,
    #[serde(default)]
    dry_run: bool,
}

pub struct Config {
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub data_dir: PathBuf,
    pub timezone: Tz,
    pub allowed_groups: HashSet<ChatId>,
    pub owner_ids: Vec<UserId>,
    pub log_chat_id: Option<ChatId>,
    /// Log deliveries instead of sending them.
    pub dry_run: bool,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let tz_name = file.timezone.as_deref().map(str::trim).unwrap_or(DEFAULT_TIMEZONE);
        let timezone = tz_name
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(tz_name.to_string()))?;

        let data_dir = file
            .data_dir
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            telegram_bot_token: file.telegram_bot_token,
            data_dir,
            timezone,
            allowed_groups: file.allowed_groups.into_iter().map(ChatId).collect(),
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            log_chat_id: file.log_chat_id.map(ChatId),
            dry_run: file.dry_run,
        })
    }

    /// Whether the bot should answer in this group.
    pub fn is_allowed_group(&self, chat_id: ChatId) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.contains(&chat_id)
    }
}
