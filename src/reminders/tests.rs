//! Scenario tests for the reminder core: store, lock and scheduler together.
//!
//! Run with: cargo test reminders::tests

use super::*;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use super::store::{RETRY_BACKOFF_MS, STALE_CLAIM_MS};

fn private_reminder(creator: &str, due_at_ms: i64, text: &str) -> NewReminder {
    NewReminder {
        due_at_ms,
        text: text.to_string(),
        creator_id: creator.to_string(),
        creator_scope: CreatorScope::Private,
        target: DeliveryTarget::Private { user_id: creator.to_string() },
        mention_id: None,
        source_request_id: None,
    }
}

fn open_store() -> (TempDir, ReminderStore) {
    let dir = TempDir::new().unwrap();
    let store = ReminderStore::open(dir.path()).unwrap();
    (dir, store)
}

/// Records deliveries; fails while `fail_with` is set.
#[derive(Default)]
struct RecordingSender {
    delivered: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
}

impl Sender for RecordingSender {
    fn format_mention(&self, mention_id: &str) -> String {
        format!("@{mention_id}")
    }

    async fn send(&self, _target: &DeliveryTarget, text: &str) -> Result<(), String> {
        if let Some(reason) = self.fail_with.lock().unwrap().clone() {
            return Err(reason);
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// =============================================================================
// STORE PROPERTIES
// =============================================================================

mod store_properties {
    use super::*;

    #[test]
    fn test_idempotent_create() {
        let (_dir, store) = open_store();
        let mut req = private_reminder("u1", now_ms() + 60_000, "drink water");
        req.source_request_id = Some("msg-1".to_string());

        let first = store.create(req.clone()).unwrap();
        let second = store.create(req).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_claim_order_follows_due_time() {
        let (_dir, store) = open_store();
        let t = now_ms() - 10_000;
        let c = store.create(private_reminder("u1", t + 2, "third")).unwrap();
        let a = store.create(private_reminder("u1", t, "first")).unwrap();
        let b = store.create(private_reminder("u1", t + 1, "second")).unwrap();

        let claimed: Vec<String> = store.claim_due(now_ms(), 10).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(claimed, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn test_stale_claim_is_recovered() {
        let (_dir, store) = open_store();
        let now = now_ms();
        let rec = store.create(private_reminder("u1", now - 1_000, "x")).unwrap();

        assert_eq!(store.claim_due(now, 10).unwrap().len(), 1);
        // Still fresh: nothing to re-select.
        assert!(store.claim_due(now + 1_000, 10).unwrap().is_empty());

        let later = now + STALE_CLAIM_MS + 1;
        let reclaimed = store.claim_due(later, 10).unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, rec.id);
        assert_eq!(reclaimed[0].claimed_at_ms, Some(later));
    }

    #[test]
    fn test_cancellation_is_final() {
        let (_dir, store) = open_store();
        let now = now_ms();
        let rec = store.create(private_reminder("u1", now - 1_000, "x")).unwrap();

        assert!(matches!(store.cancel("u1", &rec.id).unwrap(), CancelOutcome::Canceled(_)));
        assert!(store.claim_due(now + STALE_CLAIM_MS * 10, 10).unwrap().is_empty());
        assert!(store.list_pending_by_creator("u1", &CreatorScope::Private).unwrap().is_empty());
        assert!(matches!(store.cancel("u1", &rec.id).unwrap(), CancelOutcome::AlreadyFinished(_)));
    }

    #[test]
    fn test_only_one_claimant_wins_the_lock() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);
        let rec = store.create(private_reminder("u1", now_ms() - 1_000, "x")).unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                let id = rec.id.clone();
                std::thread::spawn(move || store.locks().try_acquire(&id, now_ms()).unwrap())
            })
            .collect();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
        assert_eq!(wins, 1);
    }
}

// =============================================================================
// END-TO-END DELIVERY
// =============================================================================

mod end_to_end {
    use super::*;

    #[test]
    fn test_successful_delivery_by_hand() {
        let (_dir, store) = open_store();
        let now = now_ms();
        store.create(private_reminder("u1", now - 1_000, "drink water")).unwrap();

        let due = store.claim_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        let guard = store.locks().acquire_scoped(&due[0].id, now).unwrap();
        assert!(guard.is_some());

        store.mark_sent(&due[0].id).unwrap();
        drop(guard);
        assert!(store.list_pending_by_creator("u1", &CreatorScope::Private).unwrap().is_empty());
        assert_eq!(store.get(&due[0].id).unwrap().unwrap().status, ReminderStatus::Sent);
    }

    #[test]
    fn test_failed_delivery_by_hand() {
        let (_dir, store) = open_store();
        let now = now_ms();
        store.create(private_reminder("u1", now - 1_000, "drink water")).unwrap();

        let due = store.claim_due(now, 10).unwrap();
        store.mark_failed(&due[0].id, "network down").unwrap();

        let rec = store.get(&due[0].id).unwrap().unwrap();
        assert_eq!(rec.status, ReminderStatus::Pending);
        assert_eq!(rec.attempts, 1);
        assert_eq!(rec.last_error.as_deref(), Some("network down"));
        let next = rec.next_attempt_at_ms.unwrap();
        assert!(next > now);

        assert!(store.claim_due(now_ms(), 10).unwrap().is_empty());
        let retried = store.claim_due(next, 10).unwrap();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].id, rec.id);
    }

    #[tokio::test]
    async fn test_scheduler_retries_until_delivered() {
        let (_dir, store) = open_store();
        let store = Arc::new(store);
        let sender = Arc::new(RecordingSender::default());
        *sender.fail_with.lock().unwrap() = Some("network down".to_string());
        let scheduler = Scheduler::new(store.clone(), sender.clone());

        let rec = store.create(private_reminder("u1", now_ms() - 1_000, "drink water")).unwrap();

        let first = scheduler.tick(now_ms()).await.unwrap();
        assert_eq!(first.failed, 1);
        assert_eq!(store.get(&rec.id).unwrap().unwrap().attempts, 1);

        *sender.fail_with.lock().unwrap() = None;
        let second = scheduler.tick(now_ms() + RETRY_BACKOFF_MS + 1_000).await.unwrap();
        assert_eq!(second.sent, 1);

        let done = store.get(&rec.id).unwrap().unwrap();
        assert_eq!(done.status, ReminderStatus::Sent);
        assert_eq!(done.attempts, 1);
        assert!(done.last_error.is_none());
        assert_eq!(*sender.delivered.lock().unwrap(), vec!["提醒：drink water".to_string()]);
    }

    #[tokio::test]
    async fn test_scheduler_skips_reminder_locked_by_other_instance() {
        let dir = TempDir::new().unwrap();
        let sender = Arc::new(RecordingSender::default());
        let a = Scheduler::new(Arc::new(ReminderStore::open(dir.path()).unwrap()), sender.clone());
        let b_store = ReminderStore::open(dir.path()).unwrap();

        let now = now_ms();
        let long_ago = now - STALE_CLAIM_MS - 10_000;
        let ids: Vec<String> = (0..5)
            .map(|i| b_store.create(private_reminder("u1", long_ago + i, &format!("r{i}"))).unwrap().id)
            .collect();

        // B claimed everything a while back and is still sending the first one.
        assert_eq!(b_store.claim_due(long_ago + 5, 10).unwrap().len(), 5);
        assert!(b_store.locks().try_acquire(&ids[0], now).unwrap());

        let report = a.tick(now).await.unwrap();
        assert_eq!(report.claimed, 5);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 4);
        assert_eq!(b_store.get(&ids[0]).unwrap().unwrap().status, ReminderStatus::Claimed);

        b_store.mark_sent(&ids[0]).unwrap();
        assert_eq!(a.tick(now_ms()).await.unwrap(), TickReport::default());
        assert_eq!(sender.delivered.lock().unwrap().len(), 4);
        assert!(b_store.list_all().unwrap().iter().all(|r| r.status == ReminderStatus::Sent));
    }
}
