//! Chat commands: help, list, cancel and natural-language create.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info};

use super::parser::looks_like_create_request;
use super::tools::{ChatType, DEFAULT_LIST_LIMIT, EMPTY_LIST_REPLY, MAX_LIST_LIMIT, ReminderTools, ToolCall};

static CANCEL_WITH_ARG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:取消|删除)提醒\s+(.+)$").unwrap());

const HELP_TEXT: &str = "提醒示例：\n\
1) 5分钟后提醒我 喝水\n\
2) 2小时后提醒我 休息一下\n\
3) 2天后提醒我 交房租\n\
4) @123456 1分钟后提醒@123456 开会\n\
5) 在 20:30 提醒我 下楼拿快递\n\
6) 明天9点半，10点半提醒我 喝水\n\
7) 2026-01-23 09:00 提醒我 交水电费\n\
8) 查看提醒 / 取消提醒 <序号或提醒ID>";

/// An incoming chat message, reduced to what the commands need.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub message_id: Option<String>,
    pub chat_type: ChatType,
    pub user_id: String,
    pub group_id: Option<String>,
    pub text: String,
    pub timestamp_ms: i64,
}

impl ChatEvent {
    fn list_call(&self, limit: usize) -> ToolCall {
        ToolCall::ReminderList {
            chat_type: self.chat_type,
            user_id: self.user_id.clone(),
            group_id: self.group_id.clone(),
            limit: Some(limit),
        }
    }

    fn cancel_call(&self, reminder_id: impl Into<String>) -> ToolCall {
        ToolCall::ReminderCancel { user_id: self.user_id.clone(), reminder_id: reminder_id.into() }
    }
}

/// Handle a reminder command. `None` means the text is not one.
pub fn handle_command(tools: &ReminderTools<'_>, event: &ChatEvent) -> Option<String> {
    let text = event.text.trim();
    if text.is_empty() {
        return None;
    }

    if matches!(text, "提醒帮助" | "定时帮助" | "定时提醒帮助") {
        return Some(HELP_TEXT.to_string());
    }

    if matches!(text, "查看提醒" | "我的提醒" | "提醒列表" | "列出提醒") {
        return Some(report("查看提醒", tools.execute(event.list_call(DEFAULT_LIST_LIMIT))));
    }

    if matches!(text, "取消提醒" | "删除提醒") {
        return Some(report("取消提醒", cancel_only_pending(tools, event)));
    }

    if let Some(caps) = CANCEL_WITH_ARG.captures(text) {
        let arg = caps[1].trim().to_string();
        return Some(report("取消提醒", cancel_by_arg(tools, event, &arg)));
    }

    if looks_like_create_request(text) {
        info!("Reminder request from {}: {}", event.user_id, text);
        let call = ToolCall::ReminderCreate {
            chat_type: event.chat_type,
            user_id: event.user_id.clone(),
            group_id: event.group_id.clone(),
            message_id: event.message_id.clone(),
            request: text.to_string(),
            mention_user_id: None,
            now_ms: Some(event.timestamp_ms),
        };
        return Some(report("设置提醒", tools.execute(call)));
    }

    None
}

fn report(action: &str, result: Result<String, String>) -> String {
    match result {
        Ok(reply) => reply,
        Err(e) => {
            error!("{} failed: {}", action, e);
            format!("{action}失败：{e}")
        }
    }
}

/// Bare "取消提醒": cancel the only open reminder, or ask which one.
fn cancel_only_pending(tools: &ReminderTools<'_>, event: &ChatEvent) -> Result<String, String> {
    let pending = tools.pending(event.chat_type, &event.user_id, event.group_id.as_deref())?;
    match pending.as_slice() {
        [] => Ok(EMPTY_LIST_REPLY.to_string()),
        [only] => tools.execute(event.cancel_call(only.id.as_str())),
        _ => Ok(format!(
            "你有多个待提醒事项。\n{}\n\n请发送：取消提醒 1（或 取消提醒 <提醒ID>）",
            tools.render_list(&pending, MAX_LIST_LIMIT)
        )),
    }
}

/// A small number picks from the listing; anything else is an id or prefix.
fn cancel_by_arg(tools: &ReminderTools<'_>, event: &ChatEvent, arg: &str) -> Result<String, String> {
    let index = arg.parse::<usize>().ok().filter(|n| (1..=MAX_LIST_LIMIT).contains(n));
    let Some(index) = index else {
        return tools.execute(event.cancel_call(arg));
    };

    let pending = tools.pending(event.chat_type, &event.user_id, event.group_id.as_deref())?;
    match pending.get(index - 1) {
        Some(rec) => tools.execute(event.cancel_call(rec.id.as_str())),
        // Not a listed position; maybe an id that happens to be numeric.
        None => tools.execute(event.cancel_call(arg)),
    }
}
