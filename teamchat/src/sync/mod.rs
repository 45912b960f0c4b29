//! Sync engine orchestration.
//!
//! [`start`] wires the whole engine together: it restores the outbox,
//! bootstraps identity and the first chat page, and spawns the three
//! background tasks (outbox dispatcher, realtime supervisor, connection
//! watcher). The returned [`SyncHandle`] is the command surface; the
//! returned receiver delivers [`SyncEvent`]s to the embedding app.
//!
//! ```text
//! app  ←── SyncEvent ───  dispatcher / realtime / commands
//!      ─── SyncHandle ──→
//! ```
//!
//! Every command applies optimistically to the local store first; network
//! work happens on the dispatcher tick or a detached task afterwards.
//! Starting offline is normal: bootstrap fetches that fail are logged and
//! repeated by the connection watcher once the stream comes up.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use url::Url;

use teamchat_api::chat::{Chat, ChatKind, ChatPatch, Participant};
use teamchat_api::ids::{ChatId, MessageId, UserId};
use teamchat_api::message::{ClipRef, Message, MessageKind, MessageStatus};
use teamchat_api::outbox::{OutboxItem, OutboxPayload, ValidationError};
use teamchat_api::rest::{
    ChatListQuery, CreateChatRequest, MarkReadRequest, SearchQuery, SearchResult, UserProfile,
};

use crate::backend::{Backend, MediaService};
use crate::config::{ReconnectConfig, SyncConfig};
use crate::outbox::dispatcher::run_dispatcher;
use crate::outbox::{OutboxQueue, OutboxStorage};
use crate::realtime::{ConnectionState, RealtimeConfig, run_supervisor};
use crate::search::{ClipCatalog, local_results, merge_results};
use crate::store::{MergeOrigin, StoreHandle};

/// Capacity of the dispatcher nudge channel. A full channel means a pass
/// is already pending, so dropped nudges are harmless.
const NUDGE_CAPACITY: usize = 8;

/// Observable engine events consumed by the embedding app.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The chat list changed: membership, order, flags, or previews.
    ChatsChanged,
    /// The message list of the given chat changed.
    MessagesChanged(ChatId),
    /// A message's delivery status changed.
    MessageStatusChanged {
        /// The affected message.
        message_id: MessageId,
        /// Its new status.
        status: MessageStatus,
    },
    /// The outbox badge value changed.
    OutboxCountChanged(usize),
    /// The realtime connection state changed.
    ConnectionChanged(ConnectionState),
    /// A send attempt failed; the message shows as failed and stays
    /// retryable.
    SendFailed {
        /// The affected message.
        message_id: MessageId,
        /// Human-readable failure description.
        reason: String,
    },
    /// A search pass finished: the immediate local set first, the merged
    /// set second once the remote call resolves.
    SearchResults(Vec<SearchResult>),
    /// The current user's identity resolved.
    IdentityResolved(UserProfile),
}

/// Why a command was rejected before touching the network.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The draft failed validation and never entered the outbox.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The target chat is not in local state.
    #[error("unknown chat")]
    UnknownChat,
    /// The target message is not in local state.
    #[error("unknown message")]
    UnknownMessage,
}

/// Settings consumed by [`start`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base REST URL; also the root the stream URL derives from.
    pub server_url: Url,
    /// Dispatch and paging settings.
    pub sync: SyncConfig,
    /// Realtime supervision settings.
    pub reconnect: ReconnectConfig,
}

/// Forward-pagination bookkeeping for one list.
#[derive(Debug, Default)]
struct PageState {
    next: Option<String>,
    exhausted: bool,
}

struct EngineShared<B, M, K, S> {
    backend: Arc<B>,
    media: Arc<M>,
    clips: Arc<K>,
    store: StoreHandle,
    outbox: Arc<OutboxQueue<S>>,
    events: mpsc::UnboundedSender<SyncEvent>,
    nudge_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    chat_pages: parking_lot::Mutex<PageState>,
    message_pages: parking_lot::Mutex<HashMap<ChatId, PageState>>,
    /// Whether a chat page has ever been merged this session.
    synced_once: AtomicBool,
    sync_config: SyncConfig,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Command surface of a running engine. Cheap to clone; all clones drive
/// the same engine.
pub struct SyncHandle<B, M, K, S> {
    shared: Arc<EngineShared<B, M, K, S>>,
}

impl<B, M, K, S> Clone for SyncHandle<B, M, K, S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Build and start the engine.
///
/// The bootstrap sequence runs before this returns: restore the outbox
/// snapshot, resolve identity, merge the first chat page, re-home restored
/// items, then spawn the dispatcher, the realtime supervisor, and the
/// connection watcher. Identity and chat fetches tolerate being offline;
/// the watcher repeats them on the first successful connect.
pub async fn start<B, M, K, S>(
    backend: B,
    media: M,
    clips: K,
    storage: S,
    config: EngineConfig,
) -> (SyncHandle<B, M, K, S>, mpsc::UnboundedReceiver<SyncEvent>)
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (nudge_tx, nudge_rx) = mpsc::channel(NUDGE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    let outbox = Arc::new(OutboxQueue::new(storage, config.sync.retry_cap));
    outbox.load().await;

    let shared = Arc::new(EngineShared {
        backend: Arc::new(backend),
        media: Arc::new(media),
        clips: Arc::new(clips),
        store: StoreHandle::new(),
        outbox,
        events: events_tx.clone(),
        nudge_tx,
        shutdown_tx,
        state_rx: state_rx.clone(),
        chat_pages: parking_lot::Mutex::new(PageState::default()),
        message_pages: parking_lot::Mutex::new(HashMap::new()),
        synced_once: AtomicBool::new(false),
        sync_config: config.sync.clone(),
        tasks: parking_lot::Mutex::new(Vec::new()),
    });

    shared.resolve_identity().await;
    shared.fetch_chat_page(None).await;
    shared.restore_outbox().await;

    let dispatcher = tokio::spawn(run_dispatcher(
        Arc::clone(&shared.backend),
        Arc::clone(&shared.media),
        shared.store.clone(),
        Arc::clone(&shared.outbox),
        events_tx.clone(),
        nudge_rx,
        shutdown_rx.clone(),
        config.sync.dispatch_interval,
        config.sync.send_timeout,
    ));
    let supervisor = tokio::spawn(run_supervisor(
        Arc::clone(&shared.backend),
        shared.store.clone(),
        events_tx,
        state_tx,
        RealtimeConfig {
            server_url: config.server_url,
            reconnect: config.reconnect,
        },
        shutdown_rx.clone(),
    ));
    let watcher = tokio::spawn(watch_connection(Arc::clone(&shared), state_rx, shutdown_rx));
    shared.tasks.lock().extend([dispatcher, supervisor, watcher]);

    // Items restored from a prior session should not wait for the first
    // tick.
    shared.nudge();

    (SyncHandle { shared }, events_rx)
}

impl<B, M, K, S> SyncHandle<B, M, K, S>
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    // --- send commands ---

    /// Queue a text message. The message appears immediately with status
    /// `Queued`; delivery happens on the next dispatch pass.
    ///
    /// # Errors
    ///
    /// Rejects empty or oversized text, and unknown chats.
    pub async fn send_text(
        &self,
        chat_id: ChatId,
        text: impl Into<String> + Send,
        context_label: Option<String>,
    ) -> Result<MessageId, SendError> {
        self.enqueue_send(
            chat_id,
            OutboxPayload::Text {
                text: text.into(),
                context_label,
            },
        )
        .await
    }

    /// Queue a media message. The upload itself runs on the dispatch pass,
    /// through the media collaborator.
    ///
    /// # Errors
    ///
    /// Rejects an empty source path, non-media kinds, and unknown chats.
    pub async fn send_media(
        &self,
        chat_id: ChatId,
        source_path: impl Into<String> + Send,
        kind: MessageKind,
        caption: Option<String>,
    ) -> Result<MessageId, SendError> {
        self.enqueue_send(
            chat_id,
            OutboxPayload::Media {
                source_path: source_path.into(),
                kind,
                text: caption,
            },
        )
        .await
    }

    /// Queue a clip-reference message carrying analysis metadata verbatim.
    ///
    /// # Errors
    ///
    /// Rejects malformed clip references and unknown chats.
    pub async fn send_clip(
        &self,
        chat_id: ChatId,
        clip: ClipRef,
        text: Option<String>,
    ) -> Result<MessageId, SendError> {
        self.enqueue_send(chat_id, OutboxPayload::Clip { clip, text })
            .await
    }

    async fn enqueue_send(
        &self,
        chat_id: ChatId,
        payload: OutboxPayload,
    ) -> Result<MessageId, SendError> {
        payload.validate()?;
        if self.shared.store.chat(chat_id).is_none() {
            return Err(SendError::UnknownChat);
        }

        let (sender_id, sender_name) = self.shared.author();
        let mut msg = Message::new_local(chat_id, sender_id, sender_name, payload.kind());
        if let Some(text) = payload.text() {
            msg.text = text.to_string();
        }
        if let OutboxPayload::Clip { clip, .. } = &payload {
            msg.clip = Some(clip.clone());
        }
        let message_id = msg.id;
        self.shared.store.insert_local_message(msg);

        let item = OutboxItem::new(
            message_id,
            chat_id,
            self.shared.store.remote_chat_id(chat_id),
            payload,
        );
        let count = self.shared.outbox.enqueue(item).await;

        let _ = self.shared.events.send(SyncEvent::MessagesChanged(chat_id));
        let _ = self.shared.events.send(SyncEvent::ChatsChanged);
        let _ = self.shared.events.send(SyncEvent::OutboxCountChanged(count));
        self.shared.nudge();
        Ok(message_id)
    }

    /// Re-queue a failed message from attempt zero, due immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownMessage`] if no outbox item carries the
    /// message.
    pub async fn retry_message(&self, message_id: MessageId) -> Result<(), SendError> {
        if self
            .shared
            .outbox
            .reset_for_retry(message_id)
            .await
            .is_none()
        {
            return Err(SendError::UnknownMessage);
        }
        if self
            .shared
            .store
            .set_message_status(message_id, MessageStatus::Queued)
            .is_some()
        {
            let _ = self.shared.events.send(SyncEvent::MessageStatusChanged {
                message_id,
                status: MessageStatus::Queued,
            });
        }
        self.shared.nudge();
        Ok(())
    }

    /// Delete a message locally, drop its pending send if one exists, and
    /// issue a best-effort remote delete when the message ever synced.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownMessage`] if neither the store nor the
    /// outbox knows the message.
    pub async fn delete_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<(), SendError> {
        let pending = self.shared.outbox.remove_by_message(message_id).await;
        let removed = self.shared.store.remove_message(chat_id, message_id);
        if pending.is_none() && removed.is_none() {
            return Err(SendError::UnknownMessage);
        }

        let _ = self.shared.events.send(SyncEvent::MessagesChanged(chat_id));
        let _ = self.shared.events.send(SyncEvent::ChatsChanged);
        let _ = self
            .shared
            .events
            .send(SyncEvent::OutboxCountChanged(self.shared.outbox.len()));

        if let Some(remote_id) = removed.and_then(|m| m.remote_id) {
            let backend = Arc::clone(&self.shared.backend);
            tokio::spawn(async move {
                if let Err(e) = backend.delete_message(&remote_id).await {
                    tracing::warn!(message = %remote_id, error = %e, "remote delete failed");
                }
            });
        }
        Ok(())
    }

    // --- chat commands ---

    /// Create a direct chat with one peer, optimistically. Returns the
    /// stable local id; the server record reconciles onto it when the
    /// create call lands.
    pub async fn create_direct_chat(
        &self,
        title: impl Into<String> + Send,
        peer: UserId,
    ) -> ChatId {
        self.create_chat(ChatKind::Direct, title.into(), vec![peer])
            .await
    }

    /// Create a group chat, optimistically.
    pub async fn create_group_chat(
        &self,
        title: impl Into<String> + Send,
        participants: Vec<UserId>,
    ) -> ChatId {
        self.create_chat(ChatKind::Group, title.into(), participants)
            .await
    }

    async fn create_chat(
        &self,
        kind: ChatKind,
        title: String,
        participant_ids: Vec<UserId>,
    ) -> ChatId {
        let participants = participant_ids
            .iter()
            .map(|id| Participant {
                user_id: id.clone(),
                name: String::new(),
            })
            .collect();
        let chat = Chat::new_local(kind, title.clone(), participants);
        let chat_id = chat.id;
        self.shared.store.insert_local_chat(chat);
        let _ = self.shared.events.send(SyncEvent::ChatsChanged);

        let request = CreateChatRequest {
            kind,
            title: match kind {
                ChatKind::Group => Some(title),
                ChatKind::Direct => None,
            },
            participant_ids,
        };
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match shared.backend.create_chat(&request).await {
                Ok(remote) => {
                    shared.store.adopt_remote_chat(chat_id, &remote);
                    shared.outbox.backfill_remote_chat(chat_id, &remote.id).await;
                    let _ = shared.events.send(SyncEvent::ChatsChanged);
                    // Sends queued against the fresh chat can go out now.
                    shared.nudge();
                }
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "chat create failed, sends stay queued");
                }
            }
        });
        chat_id
    }

    /// Apply a pin/mute/archive/write-policy/temporary-until patch,
    /// optimistically, then reconcile against the server's confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownChat`] for a chat not in local state.
    pub async fn update_chat(&self, chat_id: ChatId, patch: ChatPatch) -> Result<(), SendError> {
        if patch.is_empty() {
            return Ok(());
        }
        if !self.shared.store.apply_chat_patch(chat_id, &patch) {
            return Err(SendError::UnknownChat);
        }
        let _ = self.shared.events.send(SyncEvent::ChatsChanged);

        if let Some(remote) = self.shared.store.remote_chat_id(chat_id) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                match shared.backend.update_chat(&remote, &patch).await {
                    Ok(confirmed) => {
                        shared.store.upsert_chat(&confirmed);
                        let _ = shared.events.send(SyncEvent::ChatsChanged);
                    }
                    Err(e) => {
                        tracing::warn!(chat = %chat_id, error = %e, "chat update not confirmed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Zero a chat's unread count and report the read position to the
    /// server, best effort.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::UnknownChat`] for a chat not in local state.
    pub async fn mark_chat_read(&self, chat_id: ChatId) -> Result<(), SendError> {
        if self.shared.store.chat(chat_id).is_none() {
            return Err(SendError::UnknownChat);
        }
        let newest = self.shared.store.mark_chat_read(chat_id);
        let _ = self.shared.events.send(SyncEvent::ChatsChanged);

        if let (Some(remote_chat), Some(last_read)) =
            (self.shared.store.remote_chat_id(chat_id), newest)
        {
            let backend = Arc::clone(&self.shared.backend);
            tokio::spawn(async move {
                let request = MarkReadRequest {
                    last_read_message_id: Some(last_read),
                };
                if let Err(e) = backend.mark_read(&remote_chat, &request).await {
                    tracing::warn!(chat = %remote_chat, error = %e, "mark-read not delivered");
                }
            });
        }
        Ok(())
    }

    // --- pagination ---

    /// Fetch and merge the next chat page, if any remain.
    pub async fn load_more_chats(&self) {
        let cursor = {
            let pages = self.shared.chat_pages.lock();
            if pages.exhausted {
                return;
            }
            pages.next.clone()
        };
        self.shared.fetch_chat_page(cursor).await;
    }

    /// Re-fetch the first chat page and restart chat pagination.
    pub async fn refresh_chats(&self) {
        self.shared.fetch_chat_page(None).await;
    }

    /// Fetch and merge the next (older) history page of a chat. History
    /// pages never touch unread counts.
    pub async fn load_older_messages(&self, chat_id: ChatId) {
        let Some(remote_chat) = self.shared.store.remote_chat_id(chat_id) else {
            // Never synced; there is no server history to fetch.
            return;
        };
        let cursor = {
            let mut pages = self.shared.message_pages.lock();
            let state = pages.entry(chat_id).or_default();
            if state.exhausted {
                return;
            }
            state.next.clone()
        };

        let limit = self.shared.sync_config.page_size;
        match self
            .shared
            .backend
            .message_history(&remote_chat, cursor.as_deref(), limit)
            .await
        {
            Ok(page) => {
                for msg in &page.items {
                    self.shared
                        .store
                        .upsert_message(chat_id, msg, MergeOrigin::Backfill);
                }
                {
                    let mut pages = self.shared.message_pages.lock();
                    let state = pages.entry(chat_id).or_default();
                    state.exhausted = page.next_cursor.is_none();
                    state.next = page.next_cursor;
                }
                let _ = self.shared.events.send(SyncEvent::MessagesChanged(chat_id));
                let _ = self.shared.events.send(SyncEvent::ChatsChanged);
            }
            Err(e) => {
                tracing::warn!(chat = %chat_id, error = %e, "history page fetch failed");
            }
        }
    }

    // --- search ---

    /// Run a search: the local pass emits immediately, the merged set
    /// follows when the remote call resolves. A failing remote call
    /// degrades to the local set silently.
    pub async fn search(&self, query: &str) {
        let clips = self.shared.clips.entries().await;
        let local = local_results(&self.shared.store.snapshot(), &clips, query);
        let _ = self
            .shared
            .events
            .send(SyncEvent::SearchResults(local.clone()));

        let trimmed = query.trim();
        if trimmed.is_empty() {
            return;
        }
        let request = SearchQuery {
            query: trimmed.to_string(),
            cursor: None,
            limit: self.shared.sync_config.page_size,
            include_archived: true,
        };
        match self.shared.backend.search(&request).await {
            Ok(page) => {
                let merged = merge_results(local, page.items);
                let _ = self.shared.events.send(SyncEvent::SearchResults(merged));
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote search failed, keeping local results");
            }
        }
    }

    // --- teardown ---

    /// Stop all background tasks cooperatively and flush a dirty outbox
    /// snapshot. In-flight network calls resolve and are discarded.
    pub async fn shutdown(&self) {
        let _ = self.shared.shutdown_tx.send(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.shared.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await
                && !e.is_cancelled()
            {
                tracing::warn!(error = %e, "engine task ended abnormally");
            }
        }
        self.shared.outbox.flush_if_dirty().await;
        tracing::info!("sync engine stopped");
    }

    // --- accessors ---

    /// The chat list as the UI shows it: pinned first, then by latest
    /// activity. Archived chats are excluded.
    #[must_use]
    pub fn chats(&self) -> Vec<Chat> {
        self.shared.store.chats_sorted()
    }

    /// A chat's messages, ascending by creation time.
    #[must_use]
    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.shared.store.messages(chat_id)
    }

    /// The resolved identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<UserProfile> {
        self.shared.store.identity()
    }

    /// The outbox badge value.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.shared.outbox.len()
    }

    /// Total unread messages across non-archived chats.
    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.shared.store.unread_total()
    }

    /// The current realtime connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state_rx.borrow().clone()
    }
}

impl<B, M, K, S> EngineShared<B, M, K, S>
where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    fn nudge(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    /// The sender identity stamped onto locally authored messages. Before
    /// identity resolves (fresh offline start) a placeholder is used; the
    /// server echo corrects the fields on adoption.
    fn author(&self) -> (UserId, String) {
        self.store.identity().map_or_else(
            || (UserId::new("local"), "You".to_string()),
            |profile| (profile.user_id, profile.name),
        )
    }

    async fn resolve_identity(&self) {
        if self.store.identity().is_some() {
            return;
        }
        match self.backend.identity().await {
            Ok(profile) => {
                self.store.set_identity(profile.clone());
                let _ = self.events.send(SyncEvent::IdentityResolved(profile));
            }
            Err(e) => {
                tracing::warn!(error = %e, "identity not resolved, starting offline");
            }
        }
    }

    /// Fetch one chat page and merge it. `None` restarts from the first
    /// page. Failures are logged; the engine keeps serving cached state.
    async fn fetch_chat_page(&self, cursor: Option<String>) {
        let query = ChatListQuery {
            cursor,
            limit: self.sync_config.page_size,
            archived: false,
            query: None,
        };
        match self.backend.list_chats(&query).await {
            Ok(page) => {
                for chat in &page.items {
                    self.store.upsert_chat(chat);
                }
                {
                    let mut pages = self.chat_pages.lock();
                    pages.exhausted = page.next_cursor.is_none();
                    pages.next = page.next_cursor;
                }
                self.synced_once.store(true, Ordering::Relaxed);
                let _ = self.events.send(SyncEvent::ChatsChanged);
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat list fetch failed");
            }
        }
    }

    /// Re-home restored outbox items and make their messages visible.
    ///
    /// Local chat ids are minted per session, so restored items are first
    /// rebound through their durable `remote_chat_id`. Each item then gets
    /// its pending message rebuilt under the same persisted message id,
    /// keeping ids stable across restarts. Items whose chat cannot be
    /// resolved stay queued invisibly; the dispatcher can still deliver
    /// them through the remote chat id.
    async fn restore_outbox(&self) {
        let rebound = self
            .outbox
            .rebind_chats(|item| {
                item.remote_chat_id
                    .as_ref()
                    .and_then(|remote| self.store.local_chat_id(remote))
            })
            .await;
        if rebound > 0 {
            tracing::debug!(rebound, "restored outbox items rebound to this session's chats");
        }

        let (author_id, author_name) = self.author();
        let mut restored = 0usize;
        for item in self.outbox.items_snapshot() {
            if self.store.message(item.message_id).is_some() {
                continue;
            }
            let mut msg = Message::new_local(
                item.chat_id,
                author_id.clone(),
                author_name.clone(),
                item.payload.kind(),
            );
            msg.id = item.message_id;
            msg.created_at = item.created_at;
            msg.updated_at = item.created_at;
            if let Some(text) = item.payload.text() {
                msg.text = text.to_string();
            }
            if let OutboxPayload::Clip { clip, .. } = &item.payload {
                msg.clip = Some(clip.clone());
            }
            if item.halted || item.last_error.is_some() {
                msg.status = MessageStatus::Failed;
            }
            if self.store.insert_local_message(msg) {
                restored += 1;
            }
        }
        if restored > 0 {
            tracing::info!(restored, "pending sends restored from outbox snapshot");
            let _ = self.events.send(SyncEvent::ChatsChanged);
        }
        let _ = self
            .events
            .send(SyncEvent::OutboxCountChanged(self.outbox.len()));
    }
}

/// Background task: reacts to connection transitions.
///
/// Every entry into `Connected` nudges the dispatcher so queued sends go
/// out immediately. The first chat page is re-fetched when the engine has
/// never synced, or on any reconnect, which closes the event gap left by
/// the offline window.
async fn watch_connection<B, M, K, S>(
    shared: Arc<EngineShared<B, M, K, S>>,
    mut state_rx: watch::Receiver<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) where
    B: Backend,
    M: MediaService,
    K: ClipCatalog,
    S: OutboxStorage,
{
    let mut was_connected = false;
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected =
                    matches!(*state_rx.borrow_and_update(), ConnectionState::Connected);
                if connected {
                    shared.nudge();
                    shared.resolve_identity().await;
                    if was_connected || !shared.synced_once.load(Ordering::Relaxed) {
                        shared.fetch_chat_page(None).await;
                    }
                    was_connected = true;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
