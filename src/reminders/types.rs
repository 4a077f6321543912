//! Reminder records as they live in the persisted table.

use serde::{Deserialize, Serialize};

/// Lifecycle of a reminder.
///
/// `Pending -> Claimed -> Sent`, with `Claimed -> Pending` on a failed attempt
/// or a stale claim, and `Pending | Claimed -> Canceled` on user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    #[default]
    Pending,
    #[serde(alias = "sending")]
    Claimed,
    Sent,
    Canceled,
}

impl ReminderStatus {
    /// Still waiting to be delivered (listable and cancelable).
    pub fn is_open(self) -> bool {
        matches!(self, ReminderStatus::Pending | ReminderStatus::Claimed)
    }
}

/// Who created a reminder and in which conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chatType", rename_all = "lowercase")]
pub enum CreatorScope {
    Private,
    Group {
        #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
}

impl CreatorScope {
    pub fn group(group_id: impl Into<String>) -> Self {
        CreatorScope::Group { group_id: Some(group_id.into()) }
    }
}

/// Where the reminder gets delivered. Only a `Sender` interprets this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "chatType", rename_all = "lowercase")]
pub enum DeliveryTarget {
    Private {
        #[serde(rename = "userId")]
        user_id: String,
    },
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
    },
}

/// One scheduled notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRecord {
    pub id: String,
    #[serde(default)]
    pub created_at_ms: i64,
    pub due_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_request_id: Option<String>,
    #[serde(default)]
    pub creator_id: String,
    pub creator_scope: CreatorScope,
    pub delivery_target: DeliveryTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention_id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub status: ReminderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled_at_ms: Option<i64>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ReminderRecord {
    /// First 8 chars of the id, the form shown to users.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Whether this record belongs to `creator_id` in `scope`.
    pub fn is_owned_by(&self, creator_id: &str, scope: &CreatorScope) -> bool {
        self.creator_id == creator_id && &self.creator_scope == scope
    }
}

/// Input to `ReminderStore::create`.
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub due_at_ms: i64,
    pub text: String,
    pub creator_id: String,
    pub creator_scope: CreatorScope,
    pub target: DeliveryTarget,
    pub mention_id: Option<String>,
    pub source_request_id: Option<String>,
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// No record matched the id or prefix for this creator.
    NotFound,
    /// Matched, but already sent or canceled. Returned unchanged.
    AlreadyFinished(ReminderRecord),
    Canceled(ReminderRecord),
}
