//! Durable outbox: the queue of unsent messages and the dispatcher that
//! drains it.
//!
//! The queue survives restarts. Every mutation writes the full item list
//! through [`OutboxStorage`]; a failed write marks the queue dirty and the
//! next dispatcher tick retries it, so callers never fail on persistence.
//!
//! # Item lifecycle
//!
//! 1. A send command validates the draft and enqueues an [`OutboxItem`]
//! 2. The dispatcher picks the item up when due and attempts the send
//! 3. Retryable failures back off exponentially (capped); permanent
//!    rejections halt the item until an explicit retry
//! 4. A successful send merges the response and removes the item

pub mod dispatcher;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use teamchat_api::ids::{ChatId, MessageId, OutboxId, RemoteChatId, Timestamp};
use teamchat_api::outbox::{OutboxItem, SnapshotError, decode_snapshot, encode_snapshot};

/// Error from the durable storage layer.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// Reading or writing the snapshot file failed.
    #[error("outbox storage: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot bytes could not be encoded or decoded.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Durable storage for the outbox item list.
///
/// Implementations persist the whole list atomically; partial writes must
/// never be observable by a later `load`.
pub trait OutboxStorage: Send + Sync + 'static {
    /// Restores the persisted item list.
    fn load(&self) -> impl std::future::Future<Output = Result<Vec<OutboxItem>, OutboxError>> + Send;

    /// Replaces the persisted item list.
    fn save(
        &self,
        items: &[OutboxItem],
    ) -> impl std::future::Future<Output = Result<(), OutboxError>> + Send;
}

/// File-backed storage: postcard snapshot written via temp-file-then-rename.
pub struct FileOutboxStorage {
    path: PathBuf,
}

impl FileOutboxStorage {
    /// Creates storage at the given snapshot path. Parent directories are
    /// created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutboxStorage for FileOutboxStorage {
    async fn load(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(decode_snapshot(&bytes)?)
    }

    async fn save(&self, items: &[OutboxItem]) -> Result<(), OutboxError> {
        let bytes = encode_snapshot(items)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory storage for tests, with a save-failure toggle.
#[derive(Default)]
pub struct MemoryOutboxStorage {
    items: Mutex<Vec<OutboxItem>>,
    fail_saves: AtomicBool,
}

impl MemoryOutboxStorage {
    /// Creates empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent saves fail (or succeed again) on demand.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// What the storage currently holds.
    #[must_use]
    pub fn stored(&self) -> Vec<OutboxItem> {
        self.items.lock().clone()
    }
}

impl OutboxStorage for MemoryOutboxStorage {
    async fn load(&self) -> Result<Vec<OutboxItem>, OutboxError> {
        Ok(self.items.lock().clone())
    }

    async fn save(&self, items: &[OutboxItem]) -> Result<(), OutboxError> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(OutboxError::Io(std::io::Error::other("save disabled")));
        }
        *self.items.lock() = items.to_vec();
        Ok(())
    }
}

/// Backoff schedule for retryable send failures.
///
/// `min(2^attempt, cap)` seconds: monotonically increasing until the cap,
/// then flat. No jitter; only one queue drains per client.
#[must_use]
pub fn retry_backoff(attempt: u32, cap: Duration) -> Duration {
    let exp = attempt.min(62);
    Duration::from_secs(1u64 << exp).min(cap)
}

/// The unsent-message queue.
///
/// Items stay ordered by enqueue time. All mutating operations persist the
/// full list through the storage backend before returning; persistence
/// failures degrade to a dirty flag instead of failing the caller.
pub struct OutboxQueue<S> {
    items: Mutex<Vec<OutboxItem>>,
    storage: S,
    /// Set when a save failed; the next dispatcher tick re-saves.
    dirty: AtomicBool,
    /// Serializes saves so a slow write never clobbers a newer one.
    save_gate: tokio::sync::Mutex<()>,
    retry_cap: Duration,
}

impl<S: OutboxStorage> OutboxQueue<S> {
    /// Creates an empty queue over the given storage.
    pub fn new(storage: S, retry_cap: Duration) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            storage,
            dirty: AtomicBool::new(false),
            save_gate: tokio::sync::Mutex::new(()),
            retry_cap,
        }
    }

    /// Restores persisted items. A missing or corrupt snapshot loads as an
    /// empty queue with a warning; engine start never fails on this.
    pub async fn load(&self) {
        match self.storage.load().await {
            Ok(items) => {
                tracing::debug!(count = items.len(), "outbox restored");
                *self.items.lock() = items;
            }
            Err(e) => {
                tracing::warn!(error = %e, "outbox snapshot unreadable, starting empty");
                self.items.lock().clear();
            }
        }
    }

    /// Appends an item and persists. Returns the new queue length.
    pub async fn enqueue(&self, item: OutboxItem) -> usize {
        let len = {
            let mut items = self.items.lock();
            items.push(item);
            items.len()
        };
        self.persist().await;
        len
    }

    /// Items ready for an attempt at `now`, ordered by enqueue time then
    /// id. Halted items are skipped.
    #[must_use]
    pub fn due_items(&self, now: Timestamp) -> Vec<OutboxItem> {
        let mut due: Vec<OutboxItem> = self
            .items
            .lock()
            .iter()
            .filter(|item| item.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|item| (item.created_at, item.id));
        due
    }

    /// Removes an item after a successful send (or a merge that made it
    /// moot). Returns `false` if it was already gone.
    pub async fn remove(&self, id: OutboxId) -> bool {
        let removed = {
            let mut items = self.items.lock();
            let before = items.len();
            items.retain(|item| item.id != id);
            items.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Removes the item backing a message (explicit delete path).
    pub async fn remove_by_message(&self, message_id: MessageId) -> Option<OutboxItem> {
        let removed = {
            let mut items = self.items.lock();
            items
                .iter()
                .position(|item| item.message_id == message_id)
                .map(|pos| items.remove(pos))
        };
        if removed.is_some() {
            self.persist().await;
        }
        removed
    }

    /// Records a failed attempt.
    ///
    /// Retryable failures schedule the next attempt at
    /// `now + min(2^attempt_count, cap)` with the incremented count;
    /// permanent ones (`halt`) park the item until an explicit retry.
    /// Returns the new attempt count, or `None` for an unknown item.
    pub async fn record_failure(
        &self,
        id: OutboxId,
        error: &str,
        halt: bool,
        now: Timestamp,
    ) -> Option<u32> {
        let cap = self.retry_cap;
        let attempts = {
            let mut items = self.items.lock();
            let item = items.iter_mut().find(|item| item.id == id)?;
            item.attempt_count = item.attempt_count.saturating_add(1);
            item.last_error = Some(error.to_string());
            if halt {
                item.halted = true;
                item.next_retry_at = None;
            } else {
                item.next_retry_at = Some(now.saturating_add(retry_backoff(item.attempt_count, cap)));
            }
            Some(item.attempt_count)
        };
        if attempts.is_some() {
            self.persist().await;
        }
        attempts
    }

    /// Explicit user retry: resets the attempt counter, clears the halt and
    /// the schedule so the item is due immediately. Returns the item id.
    pub async fn reset_for_retry(&self, message_id: MessageId) -> Option<OutboxId> {
        let reset = {
            let mut items = self.items.lock();
            let item = items.iter_mut().find(|item| item.message_id == message_id)?;
            item.attempt_count = 0;
            item.next_retry_at = None;
            item.last_error = None;
            item.halted = false;
            Some(item.id)
        };
        if reset.is_some() {
            self.persist().await;
        }
        reset
    }

    /// Rebinds each item's session-local chat id after a restart.
    ///
    /// Local ids do not survive the process, so bootstrap resolves each
    /// item's durable `remote_chat_id` against the fresh store and rewrites
    /// the binding. Items the resolver cannot place keep their stale id and
    /// are sent via their remote id alone. Returns how many items changed.
    pub async fn rebind_chats(&self, resolve: impl Fn(&OutboxItem) -> Option<ChatId>) -> usize {
        let changed = {
            let mut items = self.items.lock();
            let mut changed = 0usize;
            for item in items.iter_mut() {
                if let Some(chat_id) = resolve(item)
                    && item.chat_id != chat_id
                {
                    item.chat_id = chat_id;
                    changed += 1;
                }
            }
            changed
        };
        if changed > 0 {
            self.persist().await;
        }
        changed
    }

    /// Stamps the server chat id onto every item waiting on the given
    /// local chat (create-response path). Returns how many items gained it.
    pub async fn backfill_remote_chat(&self, chat_id: ChatId, remote: &RemoteChatId) -> usize {
        let changed = {
            let mut items = self.items.lock();
            let mut changed = 0usize;
            for item in items.iter_mut() {
                if item.chat_id == chat_id && item.remote_chat_id.is_none() {
                    item.remote_chat_id = Some(remote.clone());
                    changed += 1;
                }
            }
            changed
        };
        if changed > 0 {
            self.persist().await;
        }
        changed
    }

    /// Number of queued items (the outbox badge value).
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// A copy of all items, in queue order.
    #[must_use]
    pub fn items_snapshot(&self) -> Vec<OutboxItem> {
        self.items.lock().clone()
    }

    /// Re-saves if the last save failed. Called from the dispatcher tick.
    pub async fn flush_if_dirty(&self) {
        if self.dirty.load(Ordering::Relaxed) {
            self.persist().await;
        }
    }

    async fn persist(&self) {
        let _gate = self.save_gate.lock().await;
        let items = self.items.lock().clone();
        match self.storage.save(&items).await {
            Ok(()) => self.dirty.store(false, Ordering::Relaxed),
            Err(e) => {
                tracing::warn!(error = %e, "outbox save failed, will retry next tick");
                self.dirty.store(true, Ordering::Relaxed);
            }
        }
    }
}
