//! Integration tests: two store instances sharing one data directory, the way
//! the bot and a `reminder_tool` process share it.
//!
//! Run with: cargo test --test reminder_delivery

use std::sync::{Arc, Barrier, Mutex};

use chrono_tz::Tz;
use remindbot::reminders::lock::STALE_LOCK_MS;
use remindbot::reminders::store::STALE_CLAIM_MS;
use remindbot::reminders::{
    CancelOutcome, ChatType, ChineseParser, ClaimLock, CreatorScope, DeliveryTarget, ReminderStatus, ReminderStore,
    ReminderTools, Scheduler, Sender, TickReport, ToolCall, now_ms,
};
use tempfile::TempDir;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(DeliveryTarget, String)>>,
}

impl Sender for Outbox {
    fn format_mention(&self, mention_id: &str) -> String {
        format!("@{mention_id}")
    }

    async fn send(&self, target: &DeliveryTarget, text: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push((target.clone(), text.to_string()));
        Ok(())
    }
}

fn tz() -> Tz {
    "Asia/Shanghai".parse().unwrap()
}

fn open_pair(dir: &TempDir) -> (Arc<ReminderStore>, ReminderStore) {
    let bot = Arc::new(ReminderStore::open(dir.path()).unwrap());
    let tool = ReminderStore::open(dir.path()).unwrap();
    (bot, tool)
}

#[tokio::test]
async fn test_reminder_created_elsewhere_is_delivered() {
    let dir = TempDir::new().unwrap();
    let (bot_store, tool_store) = open_pair(&dir);
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::new(bot_store.clone(), outbox.clone());

    let created_at = now_ms();
    let tools = ReminderTools::new(&tool_store, ChineseParser::new(tz()));
    let reply = tools
        .execute(ToolCall::ReminderCreate {
            chat_type: ChatType::Group,
            user_id: "7".to_string(),
            group_id: Some("-1001".to_string()),
            message_id: Some("-1001:55".to_string()),
            request: "1分钟后提醒@8 交周报".to_string(),
            mention_user_id: None,
            now_ms: Some(created_at),
        })
        .unwrap();
    assert!(reply.starts_with("@7 已设置提醒："));

    // Not due yet.
    assert_eq!(scheduler.tick(now_ms()).await.unwrap(), TickReport::default());

    let report = scheduler.tick(created_at + 60_000).await.unwrap();
    assert_eq!(report.sent, 1);

    let sent = outbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, DeliveryTarget::Group { group_id: "-1001".to_string() });
    assert_eq!(sent[0].1, "@8 提醒：交周报");

    // The other instance sees the delivery on its next read.
    let records = tool_store.list_all().unwrap();
    assert_eq!(records[0].status, ReminderStatus::Sent);
    assert!(tool_store.list_pending_by_creator("7", &CreatorScope::group("-1001")).unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_from_other_instance_stops_delivery() {
    let dir = TempDir::new().unwrap();
    let (bot_store, tool_store) = open_pair(&dir);
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::new(bot_store.clone(), outbox.clone());

    let tools = ReminderTools::new(&tool_store, ChineseParser::new(tz()));
    tools
        .execute(ToolCall::ReminderCreate {
            chat_type: ChatType::Private,
            user_id: "7".to_string(),
            group_id: None,
            message_id: None,
            request: "1分钟后提醒我 喝水".to_string(),
            mention_user_id: None,
            now_ms: Some(now_ms() - 120_000),
        })
        .unwrap();
    let id = tool_store.list_all().unwrap()[0].id.clone();

    let reply = tools
        .execute(ToolCall::ReminderCancel { user_id: "7".to_string(), reminder_id: id[..8].to_string() })
        .unwrap();
    assert_eq!(reply, "已取消提醒");

    assert_eq!(scheduler.tick(now_ms()).await.unwrap().claimed, 0);
    assert!(outbox.sent.lock().unwrap().is_empty());
    assert_eq!(bot_store.get(&id).unwrap().unwrap().status, ReminderStatus::Canceled);
}

#[tokio::test]
async fn test_claim_held_by_other_instance_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let (bot_store, tool_store) = open_pair(&dir);
    let outbox = Arc::new(Outbox::default());
    let scheduler = Scheduler::new(bot_store.clone(), outbox.clone());

    let now = now_ms();
    let rec = tool_store
        .create(remindbot::reminders::NewReminder {
            due_at_ms: now - 1_000,
            text: "x".to_string(),
            creator_id: "7".to_string(),
            creator_scope: CreatorScope::Private,
            target: DeliveryTarget::Private { user_id: "7".to_string() },
            mention_id: None,
            source_request_id: None,
        })
        .unwrap();

    // The other instance claims and locks, then "crashes" without finishing.
    assert_eq!(tool_store.claim_due(now, 10).unwrap().len(), 1);
    assert!(tool_store.locks().try_acquire(&rec.id, now).unwrap());

    // A fresh claim is left alone.
    assert_eq!(scheduler.tick(now).await.unwrap().claimed, 0);
    assert!(outbox.sent.lock().unwrap().is_empty());

    // Once both the claim and its lock are stale, the bot takes over.
    let later = now + STALE_CLAIM_MS.max(STALE_LOCK_MS) + 5_000;
    let report = scheduler.tick(later).await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);
    assert_eq!(tool_store.get(&rec.id).unwrap().unwrap().status, ReminderStatus::Sent);
}

#[test]
fn test_lock_contention_across_instances() {
    let dir = TempDir::new().unwrap();
    let lock_dir = dir.path().join("reminders.locks");
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = ClaimLock::new(lock_dir.clone());
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                lock.try_acquire("shared-id", now_ms()).unwrap()
            })
        })
        .collect();

    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
    assert_eq!(winners, 1);
}

#[test]
fn test_cancel_is_scoped_to_creator_across_instances() {
    let dir = TempDir::new().unwrap();
    let (bot_store, tool_store) = open_pair(&dir);
    let tools = ReminderTools::new(&tool_store, ChineseParser::new(tz()));
    tools
        .execute(ToolCall::ReminderCreate {
            chat_type: ChatType::Private,
            user_id: "7".to_string(),
            group_id: None,
            message_id: None,
            request: "5分钟后提醒我 开会".to_string(),
            mention_user_id: None,
            now_ms: None,
        })
        .unwrap();
    let id = bot_store.list_all().unwrap()[0].id.clone();

    assert_eq!(bot_store.cancel("8", &id).unwrap(), CancelOutcome::NotFound);
    assert!(matches!(bot_store.cancel("7", &id).unwrap(), CancelOutcome::Canceled(_)));
    assert_eq!(tool_store.get(&id).unwrap().unwrap().status, ReminderStatus::Canceled);
}
