//! Local chat and message state, the single source of truth for reads.
//!
//! Contains the [`StoreHandle`] that every engine task shares. All mutation
//! funnels through one `parking_lot` mutex held only for the duration of a
//! synchronous step, never across an await point. Reads hand out clones.
//!
//! # Merge discipline
//!
//! Server payloads are merged, never blindly inserted: matching is by server
//! id first, and a record's client-minted id survives every merge. Applying
//! the same payload twice (an event racing a response, a history page
//! overlapping an event) converges to a single record, which is what makes
//! at-least-once delivery safe upstream.

mod reconcile;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use teamchat_api::chat::{Chat, ChatPatch, RemoteChat};
use teamchat_api::ids::{ChatId, MessageId, RemoteChatId, RemoteMessageId, Timestamp};
use teamchat_api::message::{Message, MessageStatus, ReadReceipt, RemoteMessage};
use teamchat_api::rest::UserProfile;

/// Where a remote message merge came from.
///
/// Realtime inserts bump the chat's unread count for foreign senders;
/// history backfill never does, because the server-reported count already
/// accounts for old messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrigin {
    /// Pushed over the event stream while connected.
    Realtime,
    /// Fetched via a history or refresh page.
    Backfill,
}

#[derive(Debug, Default)]
struct StoreState {
    identity: Option<UserProfile>,
    chats: HashMap<ChatId, Chat>,
    messages: HashMap<ChatId, Vec<Message>>,
}

/// Shared handle to the local state store.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone, Default)]
pub struct StoreHandle {
    state: Arc<Mutex<StoreState>>,
}

impl StoreHandle {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the authenticated user. Unread accounting and receipt
    /// handling need it to tell own messages from foreign ones.
    pub fn set_identity(&self, profile: UserProfile) {
        self.state.lock().identity = Some(profile);
    }

    /// The authenticated user, once the identity fetch has succeeded.
    #[must_use]
    pub fn identity(&self) -> Option<UserProfile> {
        self.state.lock().identity.clone()
    }

    // --- Chat mutations ---

    /// Merges a server chat into the store.
    ///
    /// Matches by server id; a chat seen for the first time is inserted
    /// under a freshly minted [`ChatId`]. Returns the local id either way.
    pub fn upsert_chat(&self, remote: &RemoteChat) -> ChatId {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(id) = reconcile::local_chat_id(state, &remote.id) {
            if let Some(chat) = state.chats.get_mut(&id) {
                reconcile::merge_chat_fields(chat, remote);
            }
            id
        } else {
            let chat = reconcile::chat_from_remote(remote);
            let id = chat.id;
            state.chats.insert(id, chat);
            id
        }
    }

    /// Inserts a locally created chat (optimistic create path).
    pub fn insert_local_chat(&self, chat: Chat) {
        let mut guard = self.state.lock();
        let id = chat.id;
        guard.chats.insert(id, chat);
        guard.messages.entry(id).or_default();
    }

    /// Binds a create response onto the locally created chat.
    ///
    /// If an event raced the response and already inserted the same server
    /// chat under another local id, that duplicate is collapsed: its
    /// messages move into the surviving chat and it is removed. The caller's
    /// local id always wins, so ids handed out by the optimistic create
    /// stay valid.
    ///
    /// Returns `false` if `local` is unknown.
    pub fn adopt_remote_chat(&self, local: ChatId, remote: &RemoteChat) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(dup) = reconcile::local_chat_id(state, &remote.id)
            && dup != local
            && state.chats.remove(&dup).is_some()
        {
            let moved = state.messages.remove(&dup).unwrap_or_default();
            let list = state.messages.entry(local).or_default();
            for mut msg in moved {
                msg.chat_id = local;
                insert_sorted(list, msg);
            }
        }
        let Some(chat) = state.chats.get_mut(&local) else {
            return false;
        };
        reconcile::merge_chat_fields(chat, remote);
        // An empty list here just means history is not fetched yet; the
        // merged server summary stands.
        if let Some(list) = state.messages.get(&local)
            && !list.is_empty()
        {
            refresh_summary(chat, list);
        }
        true
    }

    /// Applies a partial update optimistically. Returns `false` for an
    /// unknown chat.
    pub fn apply_chat_patch(&self, chat_id: ChatId, patch: &ChatPatch) -> bool {
        let mut guard = self.state.lock();
        let Some(chat) = guard.chats.get_mut(&chat_id) else {
            return false;
        };
        reconcile::apply_patch(chat, patch);
        chat.updated_at = Timestamp::now();
        true
    }

    // --- Message mutations ---

    /// Merges a server message into the given chat.
    ///
    /// Matches by server id; an unseen message is inserted under a fresh
    /// [`MessageId`]. The chat's message list stays sorted ascending by
    /// `(created_at, id)` and its summary fields are recomputed. Returns
    /// `None` when the chat itself is unknown.
    pub fn upsert_message(
        &self,
        chat_id: ChatId,
        remote: &RemoteMessage,
        origin: MergeOrigin,
    ) -> Option<MessageId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.chats.contains_key(&chat_id) {
            return None;
        }
        let own = state.identity.as_ref().map(|p| p.user_id.clone());
        let list = state.messages.entry(chat_id).or_default();

        let matched = list
            .iter()
            .position(|m| m.remote_id.as_ref() == Some(&remote.id));
        let (message_id, inserted) = if let Some(pos) = matched {
            let mut msg = list.remove(pos);
            reconcile::merge_message_fields(&mut msg, remote);
            let id = msg.id;
            insert_sorted(list, msg);
            (id, false)
        } else {
            let msg = reconcile::message_from_remote(chat_id, remote);
            let id = msg.id;
            insert_sorted(list, msg);
            (id, true)
        };

        if let Some(chat) = state.chats.get_mut(&chat_id) {
            let foreign = own.as_ref() != Some(&remote.sender_id);
            if inserted && foreign && origin == MergeOrigin::Realtime {
                chat.unread_count = chat.unread_count.saturating_add(1);
            }
            refresh_summary(chat, list);
        }
        Some(message_id)
    }

    /// Inserts a locally authored message (optimistic send path). Returns
    /// `false` for an unknown chat.
    pub fn insert_local_message(&self, msg: Message) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let chat_id = msg.chat_id;
        if !state.chats.contains_key(&chat_id) {
            return false;
        }
        let list = state.messages.entry(chat_id).or_default();
        insert_sorted(list, msg);
        if let Some(chat) = state.chats.get_mut(&chat_id) {
            refresh_summary(chat, list);
        }
        true
    }

    /// Binds a send response onto the locally queued message.
    ///
    /// The local [`MessageId`] survives; if an event raced the response and
    /// inserted the same server message separately, that duplicate is
    /// dropped. Returns `false` if the chat or message is unknown.
    pub fn adopt_remote_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        remote: &RemoteMessage,
    ) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(list) = state.messages.get_mut(&chat_id) else {
            return false;
        };
        if let Some(dup) = list
            .iter()
            .position(|m| m.id != message_id && m.remote_id.as_ref() == Some(&remote.id))
        {
            list.remove(dup);
        }
        let Some(pos) = list.iter().position(|m| m.id == message_id) else {
            return false;
        };
        let mut msg = list.remove(pos);
        reconcile::merge_message_fields(&mut msg, remote);
        insert_sorted(list, msg);
        if let Some(chat) = state.chats.get_mut(&chat_id) {
            refresh_summary(chat, list);
        }
        true
    }

    /// Transitions a message's delivery status. Returns the owning chat id,
    /// or `None` if the message is unknown.
    pub fn set_message_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
    ) -> Option<ChatId> {
        let mut guard = self.state.lock();
        for (chat_id, list) in &mut guard.messages {
            if let Some(msg) = list.iter_mut().find(|m| m.id == message_id) {
                msg.status = status;
                msg.updated_at = Timestamp::now();
                return Some(*chat_id);
            }
        }
        None
    }

    /// Removes the message carrying the given server id, wherever it lives.
    ///
    /// Returns the removed message's location, or `None` if no chat holds
    /// it (deletes are idempotent; a repeat event is a no-op).
    pub fn remove_message_by_remote(
        &self,
        remote_id: &RemoteMessageId,
    ) -> Option<(ChatId, MessageId)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for (chat_id, list) in &mut state.messages {
            if let Some(pos) = list
                .iter()
                .position(|m| m.remote_id.as_ref() == Some(remote_id))
            {
                let removed = list.remove(pos);
                if let Some(chat) = state.chats.get_mut(chat_id) {
                    refresh_summary(chat, list);
                }
                return Some((*chat_id, removed.id));
            }
        }
        None
    }

    /// Removes a message by local id (explicit delete path). Returns the
    /// removed message, with its server id if it ever synced.
    pub fn remove_message(&self, chat_id: ChatId, message_id: MessageId) -> Option<Message> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let list = state.messages.get_mut(&chat_id)?;
        let pos = list.iter().position(|m| m.id == message_id)?;
        let removed = list.remove(pos);
        if let Some(chat) = state.chats.get_mut(&chat_id) {
            refresh_summary(chat, list);
        }
        Some(removed)
    }

    /// Marks a chat fully read: zeroes the unread count and stamps the own
    /// user's receipt onto foreign messages that lack one.
    ///
    /// Returns the server id of the newest synced message, the value the
    /// read position reported to the backend should carry. `None` when the
    /// chat is unknown or holds no synced message.
    pub fn mark_chat_read(&self, chat_id: ChatId) -> Option<RemoteMessageId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let own = state.identity.as_ref().map(|p| p.user_id.clone());
        let chat = state.chats.get_mut(&chat_id)?;
        chat.unread_count = 0;
        chat.updated_at = Timestamp::now();

        let list = state.messages.get_mut(&chat_id)?;
        if let Some(own) = own {
            let read_at = Timestamp::now();
            for msg in list.iter_mut() {
                if msg.sender_id != own && !msg.receipts.iter().any(|r| r.user_id == own) {
                    msg.receipts.push(ReadReceipt {
                        user_id: own.clone(),
                        read_at,
                    });
                }
            }
        }
        list.iter().rev().find_map(|m| m.remote_id.clone())
    }

    // --- Snapshot reads ---

    /// Chats for display: pinned first, then most recent activity first.
    /// Archived chats are excluded.
    #[must_use]
    pub fn chats_sorted(&self) -> Vec<Chat> {
        let guard = self.state.lock();
        let mut chats: Vec<Chat> = guard
            .chats
            .values()
            .filter(|c| !c.archived)
            .cloned()
            .collect();
        chats.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| activity_stamp(b).cmp(&activity_stamp(a)))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        chats
    }

    /// A chat by local id.
    #[must_use]
    pub fn chat(&self, chat_id: ChatId) -> Option<Chat> {
        self.state.lock().chats.get(&chat_id).cloned()
    }

    /// The chat's messages, sorted ascending by `(created_at, id)`.
    #[must_use]
    pub fn messages(&self, chat_id: ChatId) -> Vec<Message> {
        self.state
            .lock()
            .messages
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// A message by local id, wherever it lives.
    #[must_use]
    pub fn message(&self, message_id: MessageId) -> Option<Message> {
        self.state
            .lock()
            .messages
            .values()
            .flatten()
            .find(|m| m.id == message_id)
            .cloned()
    }

    /// Resolves a server chat id to its local id.
    #[must_use]
    pub fn local_chat_id(&self, remote: &RemoteChatId) -> Option<ChatId> {
        reconcile::local_chat_id(&self.state.lock(), remote)
    }

    /// Resolves a server message id to its local id.
    #[must_use]
    pub fn local_message_id(&self, remote: &RemoteMessageId) -> Option<MessageId> {
        reconcile::local_message_id(&self.state.lock(), remote)
    }

    /// The chat's server id, once known.
    #[must_use]
    pub fn remote_chat_id(&self, chat_id: ChatId) -> Option<RemoteChatId> {
        self.state
            .lock()
            .chats
            .get(&chat_id)
            .and_then(|c| c.remote_id.clone())
    }

    /// Unread badge value: the sum over non-archived chats.
    #[must_use]
    pub fn unread_total(&self) -> u32 {
        self.state
            .lock()
            .chats
            .values()
            .filter(|c| !c.archived)
            .fold(0u32, |acc, c| acc.saturating_add(c.unread_count))
    }

    /// A full copy of current state for read-only consumers (search).
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let guard = self.state.lock();
        StoreSnapshot {
            chats: guard.chats.values().cloned().collect(),
            messages: guard.messages.values().flatten().cloned().collect(),
        }
    }
}

/// Point-in-time copy of the store for lock-free scanning.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// All chats, archived included.
    pub chats: Vec<Chat>,
    /// All messages across all chats, unordered.
    pub messages: Vec<Message>,
}

/// Sort key for the chat list: latest activity, falling back to creation.
fn activity_stamp(chat: &Chat) -> Timestamp {
    chat.last_message_at.unwrap_or(chat.created_at)
}

/// Inserts preserving ascending `(created_at, id)` order.
fn insert_sorted(list: &mut Vec<Message>, msg: Message) {
    let key = (msg.created_at, msg.id);
    let pos = list.partition_point(|m| (m.created_at, m.id) <= key);
    list.insert(pos, msg);
}

/// Recomputes the chat-list summary from the (sorted) message list. An
/// empty list clears it, so a deleted message never lingers as a preview.
fn refresh_summary(chat: &mut Chat, list: &[Message]) {
    if let Some(last) = list.last() {
        chat.last_message_preview = Some(reconcile::preview_text(last));
        chat.last_message_at = Some(last.created_at);
    } else {
        chat.last_message_preview = None;
        chat.last_message_at = None;
    }
}
