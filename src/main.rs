use std::process::ExitCode;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatId, ChatKind, ReplyParameters};
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use remindbot::config::Config;
use remindbot::reminders::{
    ChatEvent, ChatType, ChineseParser, ReminderStore, ReminderTools, Scheduler, TelegramSender, handle_command, now_ms,
};
use remindbot::telegram_log::LogForwardLayer;

struct BotState {
    config: Config,
    store: Arc<ReminderStore>,
    parser: ChineseParser,
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "remindbot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {}: {e}", log_dir.display());
        return ExitCode::FAILURE;
    }
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("remindbot.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        registry.with(LogForwardLayer::new(bot.clone(), log_chat_id)).init();
    } else {
        registry.init();
    }

    info!("Starting remindbot...");
    info!("Loaded config from {}", config.config_path.display());
    info!("Data dir: {}, timezone: {}", config.data_dir.display(), config.timezone);
    if config.dry_run {
        info!("DRY RUN mode enabled");
    }

    let store = match ReminderStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open reminder store: {e}");
            return ExitCode::FAILURE;
        }
    };

    let sender = Arc::new(TelegramSender::new(bot.clone(), config.dry_run));
    let scheduler = Arc::new(Scheduler::new(store.clone(), sender));
    let mut scheduler_handle = scheduler.start();

    if !config.dry_run {
        notify_owners(&bot, &config, "提醒服务已重启").await;
    }

    let parser = ChineseParser::new(config.timezone);
    let state = Arc::new(BotState { config, store, parser });

    let handler = Update::filter_message().endpoint(handle_message);
    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    let halted = tokio::select! {
        _ = dispatcher.dispatch() => None,
        result = scheduler_handle.join() => Some(result),
    };

    let result = match halted {
        Some(result) => result,
        None => {
            info!("Dispatcher stopped, stopping scheduler");
            scheduler_handle.stop();
            scheduler_handle.join().await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Reminder scheduler failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };

    let (chat_type, group_id) = match msg.chat.kind {
        ChatKind::Private(_) => (ChatType::Private, None),
        ChatKind::Public(_) => {
            if !state.config.is_allowed_group(msg.chat.id) {
                debug!("Ignoring message from non-allowed group {}", msg.chat.id);
                return Ok(());
            }
            (ChatType::Group, Some(msg.chat.id.0.to_string()))
        }
    };

    let event = ChatEvent {
        // Message ids are only unique per chat.
        message_id: Some(format!("{}:{}", msg.chat.id.0, msg.id.0)),
        chat_type,
        user_id: user.id.0.to_string(),
        group_id,
        text: text.to_string(),
        timestamp_ms: now_ms(),
    };

    let tools = ReminderTools::new(&state.store, state.parser);
    let Some(reply) = handle_command(&tools, &event) else {
        return Ok(());
    };

    if let Err(e) = bot
        .send_message(msg.chat.id, reply)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await
    {
        warn!("Failed to reply in {}: {}", msg.chat.id, e);
    }
    Ok(())
}

async fn notify_owners(bot: &Bot, config: &Config, text: &str) {
    for owner in &config.owner_ids {
        if let Err(e) = bot.send_message(ChatId(owner.0 as i64), text).await {
            warn!("Failed to notify owner {}: {}", owner, e);
        }
    }
}
