//! Reminder tools callable by the chat layer or a sibling process.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::parser::{ChineseParser, RequestParser, is_self_reminder_request, pick_mention_for_request};
use super::store::{ReminderStore, now_ms};
use super::types::{CancelOutcome, CreatorScope, DeliveryTarget, NewReminder, ReminderRecord};

pub const DEFAULT_LIST_LIMIT: usize = 10;
pub const MAX_LIST_LIMIT: usize = 20;

pub const EMPTY_LIST_REPLY: &str = "暂无待提醒事项";
const UNPARSED_REPLY: &str = "我没看懂提醒时间。你可以这样说：1分钟后提醒我 喝水 / 在20:30提醒我 下楼拿快递";

/// Tool definition, as advertised to callers.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
}

/// Tool calls against the reminder store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    /// Parse a natural-language request and schedule its reminders.
    ReminderCreate {
        chat_type: ChatType,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        /// Dedup key: the same message never schedules twice.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        request: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mention_user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        now_ms: Option<i64>,
    },

    /// List the caller's open reminders in this chat.
    ReminderList {
        chat_type: ChatType,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },

    /// Cancel one of the caller's reminders by id or id prefix.
    ReminderCancel { user_id: String, reminder_id: String },
}

pub fn get_tool_definitions() -> Vec<Tool> {
    vec![
        Tool {
            name: "reminder_create".to_string(),
            description: "创建一个定时提醒（支持“1分钟后提醒我/在20:30提醒我/2026-01-23 09:00提醒我”等）".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "chat_type": { "type": "string", "enum": ["private", "group"] },
                    "user_id": { "type": "string", "description": "Requesting user" },
                    "group_id": { "type": "string", "description": "Group chat id (group chats only)" },
                    "message_id": { "type": "string", "description": "Source message id, used to drop duplicate requests" },
                    "request": { "type": "string", "description": "The reminder request text" },
                    "mention_user_id": { "type": "string", "description": "User to mention when the reminder fires" },
                    "now_ms": { "type": "integer", "description": "Reference time in epoch milliseconds" }
                },
                "required": ["chat_type", "user_id", "request"]
            }),
        },
        Tool {
            name: "reminder_list".to_string(),
            description: "列出我创建的待执行提醒".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "chat_type": { "type": "string", "enum": ["private", "group"] },
                    "user_id": { "type": "string" },
                    "group_id": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "maximum": MAX_LIST_LIMIT, "default": DEFAULT_LIST_LIMIT }
                },
                "required": ["chat_type", "user_id"]
            }),
        },
        Tool {
            name: "reminder_cancel".to_string(),
            description: "取消我创建的提醒（通过提醒ID前缀）".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "reminder_id": { "type": "string", "description": "Full reminder id or its prefix" }
                },
                "required": ["user_id", "reminder_id"]
            }),
        },
    ]
}

/// Creator scope of a chat, as stored on records.
pub fn scope_for(chat_type: ChatType, group_id: Option<&str>) -> CreatorScope {
    match chat_type {
        ChatType::Private => CreatorScope::Private,
        ChatType::Group => CreatorScope::Group { group_id: group_id.map(str::to_string) },
    }
}

/// Executes tool calls against one store.
pub struct ReminderTools<'a> {
    store: &'a ReminderStore,
    parser: ChineseParser,
}

impl<'a> ReminderTools<'a> {
    pub fn new(store: &'a ReminderStore, parser: ChineseParser) -> Self {
        Self { store, parser }
    }

    fn tz(&self) -> Tz {
        self.parser.timezone()
    }

    /// Run a tool call and return its user-facing reply.
    pub fn execute(&self, call: ToolCall) -> Result<String, String> {
        match call {
            ToolCall::ReminderCreate { chat_type, user_id, group_id, message_id, request, mention_user_id, now_ms } => {
                self.create(chat_type, &user_id, group_id, message_id, &request, mention_user_id, now_ms)
            }
            ToolCall::ReminderList { chat_type, user_id, group_id, limit } => {
                let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
                let pending = self.pending(chat_type, &user_id, group_id.as_deref())?;
                Ok(self.render_list(&pending, limit))
            }
            ToolCall::ReminderCancel { user_id, reminder_id } => {
                let outcome = self.store.cancel(&user_id, &reminder_id).map_err(|e| e.to_string())?;
                Ok(match outcome {
                    CancelOutcome::Canceled(_) => "已取消提醒",
                    CancelOutcome::AlreadyFinished(_) => "该提醒已不是待执行状态",
                    CancelOutcome::NotFound => "未找到要取消的提醒（请提供提醒ID）",
                }
                .to_string())
            }
        }
    }

    /// Open reminders of `user_id` in this chat, earliest first.
    pub fn pending(
        &self,
        chat_type: ChatType,
        user_id: &str,
        group_id: Option<&str>,
    ) -> Result<Vec<ReminderRecord>, String> {
        self.store
            .list_pending_by_creator(user_id, &scope_for(chat_type, group_id))
            .map_err(|e| e.to_string())
    }

    /// Numbered listing, or the empty-list reply.
    pub fn render_list(&self, pending: &[ReminderRecord], limit: usize) -> String {
        if pending.is_empty() {
            return EMPTY_LIST_REPLY.to_string();
        }
        let lines: Vec<String> = pending
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, r)| format!("{}. {}：{}（{}）", i + 1, self.format_time(r.due_at_ms), r.text, r.short_id()))
            .collect();
        format!("待提醒：\n{}", lines.join("\n"))
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        chat_type: ChatType,
        user_id: &str,
        group_id: Option<String>,
        message_id: Option<String>,
        request: &str,
        mention_user_id: Option<String>,
        now: Option<i64>,
    ) -> Result<String, String> {
        let request = request.trim();
        let now = now.unwrap_or_else(now_ms);
        let parsed = self.parser.parse(request, now);
        if parsed.is_empty() {
            return Ok(UNPARSED_REPLY.to_string());
        }

        let is_group = chat_type == ChatType::Group;
        let mention = mention_user_id
            .or_else(|| is_self_reminder_request(request).then(|| user_id.to_string()))
            .or_else(|| pick_mention_for_request(request))
            .or_else(|| is_group.then(|| user_id.to_string()))
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty() && is_group);

        let target = match chat_type {
            ChatType::Private => DeliveryTarget::Private { user_id: user_id.to_string() },
            ChatType::Group => DeliveryTarget::Group {
                group_id: group_id.clone().unwrap_or_else(|| "unknown".to_string()),
            },
        };
        let scope = scope_for(chat_type, group_id.as_deref());

        let mut created = Vec::with_capacity(parsed.len());
        for item in parsed {
            let rec = self
                .store
                .create(NewReminder {
                    due_at_ms: item.due_at_ms,
                    text: item.message,
                    creator_id: user_id.to_string(),
                    creator_scope: scope.clone(),
                    target: target.clone(),
                    mention_id: mention.clone(),
                    source_request_id: message_id.clone(),
                })
                .map_err(|e| e.to_string())?;
            created.push(rec);
        }
        info!("Scheduled {} reminder(s) for {} ({:?})", created.len(), user_id, chat_type);

        let prefix = if is_group { format!("@{user_id} ") } else { String::new() };
        let who = match mention.as_deref() {
            Some(m) if m != user_id => format!("，提醒对象：@{m}"),
            _ => String::new(),
        };

        if created.len() >= 2 {
            let times: Vec<String> = created.iter().map(|r| self.format_hm(r.due_at_ms)).collect();
            return Ok(format!(
                "{prefix}已设置 {} 个提醒：{}{who}，内容：{}",
                created.len(),
                times.join("、"),
                created[0].text
            ));
        }
        let rec = &created[0];
        Ok(format!("{prefix}已设置提醒：{}{who}，内容：{}", self.format_time(rec.due_at_ms), rec.text))
    }

    fn format_time(&self, ms: i64) -> String {
        self.format_ms(ms, "%Y-%m-%d %H:%M")
    }

    fn format_hm(&self, ms: i64) -> String {
        self.format_ms(ms, "%H:%M")
    }

    fn format_ms(&self, ms: i64, fmt: &str) -> String {
        match Utc.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.with_timezone(&self.tz()).format(fmt).to_string(),
            None => ms.to_string(),
        }
    }
}
