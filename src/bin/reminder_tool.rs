//! Run one reminder tool call against the bot's data directory.
//!
//! Usage: cargo run --bin reminder_tool <remindbot.json> '<tool call json>'
//!        cargo run --bin reminder_tool <remindbot.json> --list-all
//!
//! Shares the reminder table and lock directory with a running bot, so it
//! can be used from scripts or another process while the bot delivers.
//!
//! Example:
//!   reminder_tool remindbot.json '{"tool":"reminder_list","chat_type":"private","user_id":"42"}'

use std::process::ExitCode;

use remindbot::config::Config;
use remindbot::reminders::{ChineseParser, ReminderStore, ReminderTools, ToolCall, get_tool_definitions};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <config.json> '<tool call json>'", args[0]);
        eprintln!("       {} <config.json> --list-tools", args[0]);
        eprintln!("       {} <config.json> --list-all", args[0]);
        return ExitCode::FAILURE;
    }

    let config = match Config::load(&args[1]) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args[2] == "--list-tools" {
        return match serde_json::to_string_pretty(&get_tool_definitions()) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to encode tool definitions: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let store = match ReminderStore::open(&config.data_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open reminder store: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args[2] == "--list-all" {
        return dump_table(&store);
    }

    let call: ToolCall = match serde_json::from_str(&args[2]) {
        Ok(call) => call,
        Err(e) => {
            eprintln!("Invalid tool call: {e}");
            return ExitCode::FAILURE;
        }
    };

    let tools = ReminderTools::new(&store, ChineseParser::new(config.timezone));
    match tools.execute(call) {
        Ok(reply) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Tool call failed: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print every record, terminal ones included, as JSON.
fn dump_table(store: &ReminderStore) -> ExitCode {
    let records = match store.list_all() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Failed to read reminder table: {e}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&records) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to encode reminder table: {e}");
            ExitCode::FAILURE
        }
    }
}
