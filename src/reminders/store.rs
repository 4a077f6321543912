//! Durable reminder table.
//!
//! The table is a single JSON file shared by every process that points at the
//! same data directory. Each operation re-reads the file, applies its change
//! in memory and writes the whole table back through a temp file + rename, so
//! readers never see a partial write.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::lock::ClaimLock;
use super::types::{CancelOutcome, CreatorScope, NewReminder, ReminderRecord, ReminderStatus};

/// A claim older than this is assumed abandoned by a crashed sender.
pub const STALE_CLAIM_MS: i64 = 2 * 60_000;

/// Delay before a failed delivery is retried.
pub const RETRY_BACKOFF_MS: i64 = 10_000;

/// Length of a full (hyphenated UUID) reminder id. Shorter keys match by prefix.
pub const FULL_ID_LEN: usize = 36;

const TABLE_FILE: &str = "reminders.json";
const LOCK_DIR: &str = "reminders.locks";

/// Errors from reading or writing the reminder table.
#[derive(Debug)]
pub enum StoreError {
    /// Filesystem failure on the table, temp file or lock directory.
    Io { path: PathBuf, source: std::io::Error },
    /// Failed to encode the table.
    Serialize(serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "reminder store I/O error on '{}': {}", path.display(), source)
            }
            Self::Serialize(source) => write!(f, "failed to encode reminder table: {}", source),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialize(source) => Some(source),
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The reminder table and its delivery locks.
pub struct ReminderStore {
    path: PathBuf,
    locks: ClaimLock,
    reminders: Mutex<Vec<ReminderRecord>>,
}

impl ReminderStore {
    /// Open the store in `data_dir`, loading whatever is on disk.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir).map_err(|e| StoreError::io(data_dir, e))?;
        let path = data_dir.join(TABLE_FILE);
        let reminders = read_table(&path)?;
        let open = reminders.iter().filter(|r| r.status.is_open()).count();
        info!("Loaded reminder table from {:?} ({} records, {} open)", path, reminders.len(), open);

        Ok(Self {
            path,
            locks: ClaimLock::new(data_dir.join(LOCK_DIR)),
            reminders: Mutex::new(reminders),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delivery lock directory for this table.
    pub fn locks(&self) -> &ClaimLock {
        &self.locks
    }

    /// Lock the in-memory table after reloading it from disk.
    fn refreshed(&self) -> Result<MutexGuard<'_, Vec<ReminderRecord>>, StoreError> {
        let mut table = self.reminders.lock().unwrap_or_else(PoisonError::into_inner);
        *table = read_table(&self.path)?;
        Ok(table)
    }

    fn flush(&self, table: &[ReminderRecord]) -> Result<(), StoreError> {
        write_table(&self.path, table)
    }

    /// Create a reminder, or return the existing one for a repeated request.
    ///
    /// When `source_request_id` is set, a record with the same request id,
    /// creator, scope, due time and text is returned unchanged.
    pub fn create(&self, new: NewReminder) -> Result<ReminderRecord, StoreError> {
        let text = new.text.trim().to_string();
        let source_request_id = new
            .source_request_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut table = self.refreshed()?;

        if let Some(ref sid) = source_request_id
            && let Some(existing) = table.iter().find(|r| {
                r.source_request_id.as_deref() == Some(sid.as_str())
                    && r.is_owned_by(&new.creator_id, &new.creator_scope)
                    && r.due_at_ms == new.due_at_ms
                    && r.text == text
            })
        {
            debug!("Duplicate create for request {} -> reminder {}", sid, existing.id);
            return Ok(existing.clone());
        }

        let record = ReminderRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at_ms: now_ms(),
            due_at_ms: new.due_at_ms,
            source_request_id,
            creator_id: new.creator_id,
            creator_scope: new.creator_scope,
            delivery_target: new.target,
            mention_id: new.mention_id,
            text,
            status: ReminderStatus::Pending,
            claimed_at_ms: None,
            sent_at_ms: None,
            canceled_at_ms: None,
            attempts: 0,
            next_attempt_at_ms: None,
            last_error: None,
        };
        table.push(record.clone());
        self.flush(&table)?;

        info!("Created reminder {} for {} due at {}", record.id, record.creator_id, record.due_at_ms);
        Ok(record)
    }

    /// Open reminders of one creator in one scope, earliest first.
    pub fn list_pending_by_creator(
        &self,
        creator_id: &str,
        scope: &CreatorScope,
    ) -> Result<Vec<ReminderRecord>, StoreError> {
        let table = self.refreshed()?;
        let mut out: Vec<ReminderRecord> = table
            .iter()
            .filter(|r| r.status.is_open() && r.is_owned_by(creator_id, scope))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.due_at_ms);
        Ok(out)
    }

    /// Full table copy.
    pub fn list_all(&self) -> Result<Vec<ReminderRecord>, StoreError> {
        Ok(self.refreshed()?.clone())
    }

    pub fn get(&self, id: &str) -> Result<Option<ReminderRecord>, StoreError> {
        Ok(self.refreshed()?.iter().find(|r| r.id == id).cloned())
    }

    /// Claim up to `limit` due reminders for delivery, earliest first.
    ///
    /// Stale claims are returned to `pending` first. This only keeps one
    /// process from re-selecting its own claims; the delivery lock decides
    /// who actually sends.
    pub fn claim_due(&self, now_ms: i64, limit: usize) -> Result<Vec<ReminderRecord>, StoreError> {
        let mut table = self.refreshed()?;
        let mut changed = false;

        for r in table.iter_mut().filter(|r| r.status == ReminderStatus::Claimed) {
            let claimed_at = r.claimed_at_ms.unwrap_or(0);
            if now_ms - claimed_at > STALE_CLAIM_MS {
                warn!("Releasing stale claim on reminder {} (claimed at {})", r.id, claimed_at);
                r.status = ReminderStatus::Pending;
                r.claimed_at_ms = None;
                changed = true;
            }
        }

        let mut due: Vec<usize> = table
            .iter()
            .enumerate()
            .filter(|(_, r)| {
                r.status == ReminderStatus::Pending
                    && r.due_at_ms <= now_ms
                    && r.next_attempt_at_ms.is_none_or(|next| next <= now_ms)
            })
            .map(|(i, _)| i)
            .collect();
        due.sort_by_key(|&i| table[i].due_at_ms);
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            let r = &mut table[i];
            r.status = ReminderStatus::Claimed;
            r.claimed_at_ms = Some(now_ms);
            claimed.push(r.clone());
            changed = true;
        }

        if changed {
            self.flush(&table)?;
        }
        Ok(claimed)
    }

    /// Cancel a reminder by full id or, for shorter keys, by id prefix.
    ///
    /// Only the creator's own reminders are considered.
    pub fn cancel(&self, caller_id: &str, id_or_prefix: &str) -> Result<CancelOutcome, StoreError> {
        let key = id_or_prefix.trim();
        if key.is_empty() {
            return Ok(CancelOutcome::NotFound);
        }

        let mut table = self.refreshed()?;
        let idx = table
            .iter()
            .position(|r| r.id == key && r.creator_id == caller_id)
            .or_else(|| {
                if key.len() < FULL_ID_LEN {
                    table.iter().position(|r| r.creator_id == caller_id && r.id.starts_with(key))
                } else {
                    None
                }
            });

        let Some(idx) = idx else {
            return Ok(CancelOutcome::NotFound);
        };
        if !table[idx].status.is_open() {
            return Ok(CancelOutcome::AlreadyFinished(table[idx].clone()));
        }

        let r = &mut table[idx];
        r.status = ReminderStatus::Canceled;
        r.canceled_at_ms = Some(now_ms());
        r.next_attempt_at_ms = None;
        r.claimed_at_ms = None;
        let record = r.clone();

        self.flush(&table)?;
        self.locks.release(&record.id);

        info!("Canceled reminder {} for {}", record.id, caller_id);
        Ok(CancelOutcome::Canceled(record))
    }

    /// Record a successful delivery.
    pub fn mark_sent(&self, id: &str) -> Result<(), StoreError> {
        let mut table = self.refreshed()?;
        let Some(r) = table.iter_mut().find(|r| r.id == id) else {
            warn!("mark_sent: reminder {} no longer exists", id);
            return Ok(());
        };
        if r.status == ReminderStatus::Canceled {
            // Canceled mid-send; the cancel stays final.
            info!("Reminder {} was canceled during delivery", id);
        } else {
            r.status = ReminderStatus::Sent;
        }
        r.sent_at_ms = Some(now_ms());
        r.last_error = None;
        r.next_attempt_at_ms = None;
        r.claimed_at_ms = None;

        self.flush(&table)?;
        self.locks.release(id);
        Ok(())
    }

    /// Record a failed delivery; the reminder is retried after the backoff
    /// unless it was canceled in the meantime.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let mut table = self.refreshed()?;
        let Some(r) = table.iter_mut().find(|r| r.id == id) else {
            warn!("mark_failed: reminder {} no longer exists", id);
            return Ok(());
        };
        r.attempts += 1;
        r.last_error = Some(if error.is_empty() { "send_failed".to_string() } else { error.to_string() });
        r.claimed_at_ms = None;
        if r.status == ReminderStatus::Canceled {
            r.next_attempt_at_ms = None;
        } else {
            r.status = ReminderStatus::Pending;
            r.next_attempt_at_ms = Some(now_ms() + RETRY_BACKOFF_MS);
        }

        self.flush(&table)?;
        self.locks.release(id);
        Ok(())
    }
}

/// Load the table. A missing file is an empty table; so is unparseable content.
fn read_table(path: &Path) -> Result<Vec<ReminderRecord>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(e) => {
            warn!("Reminder table {:?} is unreadable ({}), treating as empty", path, e);
            set_aside_corrupt(path);
            return Ok(Vec::new());
        }
    };

    let mut records = Vec::with_capacity(values.len());
    let mut skipped = false;
    for value in values {
        match serde_json::from_value::<ReminderRecord>(value) {
            Ok(r) => records.push(r),
            Err(e) => {
                warn!("Skipping undecodable reminder in {:?}: {}", path, e);
                skipped = true;
            }
        }
    }
    // The next write drops skipped records, so keep the original around.
    if skipped {
        set_aside_corrupt(path);
    }
    Ok(records)
}

/// Keep one copy of a corrupt table for inspection before it gets overwritten.
fn set_aside_corrupt(path: &Path) {
    let backup = path.with_extension("json.corrupt");
    if backup.exists() {
        return;
    }
    if let Err(e) = fs::copy(path, &backup) {
        warn!("Failed to copy corrupt table to {:?}: {}", backup, e);
    }
}

fn write_table(path: &Path, table: &[ReminderRecord]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let json = serde_json::to_string_pretty(table).map_err(StoreError::Serialize)?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or(TABLE_FILE);
    let tmp = dir.join(format!("{}.{}.{}.tmp", file_name, std::process::id(), now_ms()));

    fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}
