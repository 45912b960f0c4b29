//! In-memory state of record for the stub server.
//!
//! Holds chats, messages and media registrations keyed by server-assigned
//! identifiers, plus the registry of realtime stream connections. Failure
//! switches let tests make the REST surface fail transiently (503), reject
//! sends permanently (422), or refuse stream upgrades, without tearing the
//! server down.
//!
//! All records are ephemeral and lost on restart, same as the connection
//! registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::Message;
use tokio::sync::{RwLock, mpsc};

use teamchat_api::chat::{ChatKind, ChatPatch, Participant, RemoteChat, WritePermission};
use teamchat_api::event::EventEnvelope;
use teamchat_api::ids::{RemoteChatId, RemoteMessageId, Timestamp, UserId};
use teamchat_api::message::{Attachment, MessageKind, MessageStatus, RemoteMessage};
use teamchat_api::rest::{
    Page, RegisterMediaRequest, SearchKind, SearchResult, SendMessageRequest, UserProfile,
};

/// A registered media upload and its progress through the two-phase flow.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    /// File name from registration.
    pub file_name: String,
    /// Declared MIME type.
    pub mime_type: String,
    /// Whether the byte upload arrived.
    pub uploaded: bool,
    /// Whether completion was confirmed.
    pub completed: bool,
}

/// Record tables behind one lock; all mutation goes through [`StubState`].
#[derive(Default)]
struct Records {
    chats: Vec<RemoteChat>,
    /// Messages per chat, ascending by creation.
    messages: HashMap<String, Vec<RemoteMessage>>,
    read_marks: HashMap<String, RemoteMessageId>,
    media: HashMap<String, MediaRecord>,
    next_chat: u64,
    next_message: u64,
    next_media: u64,
}

/// Shared stub server state: record tables, stream connections, failure
/// switches.
pub struct StubState {
    /// Bearer credential accepted on REST requests and the stream.
    auth_token: String,
    /// The single authenticated user the stub serves.
    profile: UserProfile,
    records: RwLock<Records>,
    /// Maps connection id to the sender half of its stream writer channel.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_connection: AtomicU64,
    next_cursor: AtomicU64,
    fail_requests: AtomicBool,
    reject_sends: AtomicBool,
    refuse_streams: AtomicBool,
}

impl StubState {
    /// Creates stub state serving the given user behind the given credential.
    #[must_use]
    pub fn new(auth_token: impl Into<String>, profile: UserProfile) -> Self {
        Self {
            auth_token: auth_token.into(),
            profile,
            records: RwLock::new(Records::default()),
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            next_cursor: AtomicU64::new(1),
            fail_requests: AtomicBool::new(false),
            reject_sends: AtomicBool::new(false),
            refuse_streams: AtomicBool::new(false),
        }
    }

    /// Creates stub state with a default development user.
    #[must_use]
    pub fn with_token(auth_token: impl Into<String>) -> Self {
        Self::new(
            auth_token,
            UserProfile {
                user_id: UserId::new("u1"),
                name: "Dev User".to_string(),
            },
        )
    }

    /// The profile returned by the identity endpoint.
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        self.profile.clone()
    }

    /// Whether the given bearer credential is accepted.
    #[must_use]
    pub fn authorize(&self, bearer: Option<&str>) -> bool {
        bearer == Some(self.auth_token.as_str())
    }

    /// The credential handed out by the stream token endpoint. The stub
    /// reuses the REST credential rather than minting session tokens.
    #[must_use]
    pub fn stream_token(&self) -> String {
        self.auth_token.clone()
    }

    // --- failure switches ---

    /// When set, every REST request answers 503.
    pub fn set_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    /// Whether REST requests currently fail transiently.
    #[must_use]
    pub fn fail_requests(&self) -> bool {
        self.fail_requests.load(Ordering::SeqCst)
    }

    /// When set, message sends answer 422 while the rest of the surface
    /// stays healthy.
    pub fn set_reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Whether message sends are currently rejected.
    #[must_use]
    pub fn reject_sends(&self) -> bool {
        self.reject_sends.load(Ordering::SeqCst)
    }

    /// When set, stream upgrade requests answer 403.
    pub fn set_refuse_streams(&self, refuse: bool) {
        self.refuse_streams.store(refuse, Ordering::SeqCst);
    }

    /// Whether stream upgrades are currently refused.
    #[must_use]
    pub fn refuse_streams(&self) -> bool {
        self.refuse_streams.load(Ordering::SeqCst)
    }

    // --- chats ---

    /// Creates a chat, minting its server id. Direct chats take the peer's
    /// id as title; the caller is always a participant.
    pub async fn create_chat(
        &self,
        kind: ChatKind,
        title: Option<String>,
        participant_ids: &[UserId],
    ) -> RemoteChat {
        let mut records = self.records.write().await;
        records.next_chat += 1;
        let id = format!("c{}", records.next_chat);

        let mut participants = vec![Participant {
            user_id: self.profile.user_id.clone(),
            name: self.profile.name.clone(),
        }];
        participants.extend(participant_ids.iter().map(|id| Participant {
            user_id: id.clone(),
            name: id.to_string(),
        }));

        let title = match kind {
            ChatKind::Direct => participant_ids
                .first()
                .map_or_else(|| "direct".to_string(), ToString::to_string),
            ChatKind::Group => title.unwrap_or_else(|| "Group".to_string()),
        };

        let chat = new_remote_chat(&id, kind, title, participants);
        records.chats.push(chat.clone());
        records.messages.insert(id, Vec::new());
        chat
    }

    /// Test convenience: creates a group chat with the given title.
    pub async fn seed_chat(&self, title: &str) -> RemoteChat {
        self.create_chat(ChatKind::Group, Some(title.to_string()), &[])
            .await
    }

    /// Applies a patch to a chat, returning the updated record.
    pub async fn patch_chat(&self, chat_id: &str, patch: &ChatPatch) -> Option<RemoteChat> {
        let mut records = self.records.write().await;
        let chat = records.chats.iter_mut().find(|c| c.id.as_str() == chat_id)?;
        if let Some(pinned) = patch.pinned {
            chat.pinned = pinned;
        }
        if let Some(muted) = patch.muted {
            chat.muted = muted;
        }
        if let Some(archived) = patch.archived {
            chat.archived = archived;
        }
        if let Some(permission) = patch.write_permission {
            chat.write_permission = permission;
        }
        if let Some(until) = patch.temporary_until {
            chat.temporary_until = Some(until);
        }
        chat.updated_at = Timestamp::now();
        Some(chat.clone())
    }

    /// Replaces a stored chat wholesale. Test seam for shaping exact
    /// server-side records.
    pub async fn put_chat(&self, chat: RemoteChat) {
        let mut records = self.records.write().await;
        let key = chat.id.as_str().to_string();
        records.messages.entry(key).or_default();
        if let Some(existing) = records
            .chats
            .iter_mut()
            .find(|c| c.id.as_str() == chat.id.as_str())
        {
            *existing = chat;
        } else {
            records.chats.push(chat);
        }
    }

    /// One page of the chat list, oldest-created first, offset cursors.
    pub async fn list_chats(
        &self,
        limit: usize,
        archived: bool,
        query: Option<&str>,
        cursor: Option<&str>,
    ) -> Page<RemoteChat> {
        let records = self.records.read().await;
        let filtered: Vec<&RemoteChat> = records
            .chats
            .iter()
            .filter(|c| archived || !c.archived)
            .filter(|c| {
                query.is_none_or(|q| c.title.to_lowercase().contains(&q.to_lowercase()))
            })
            .collect();
        paginate(&filtered, limit, cursor)
    }

    /// Looks up a chat by server id. Test accessor.
    pub async fn chat(&self, chat_id: &str) -> Option<RemoteChat> {
        let records = self.records.read().await;
        records
            .chats
            .iter()
            .find(|c| c.id.as_str() == chat_id)
            .cloned()
    }

    // --- messages ---

    /// Appends a message from a send request, minting its server id and
    /// updating the owning chat's preview. Returns `None` for an unknown
    /// chat.
    pub async fn append_message(
        &self,
        chat_id: &str,
        req: &SendMessageRequest,
    ) -> Option<RemoteMessage> {
        let attachment = match &req.attachment_id {
            Some(id) => Some(self.attachment_for(id).await),
            None => None,
        };

        let mut records = self.records.write().await;
        if !records.chats.iter().any(|c| c.id.as_str() == chat_id) {
            return None;
        }
        records.next_message += 1;
        let id = format!("m{}", records.next_message);
        let now = Timestamp::now();

        let message = RemoteMessage {
            id: RemoteMessageId::new(id),
            chat_id: RemoteChatId::new(chat_id),
            sender_id: self.profile.user_id.clone(),
            sender_name: self.profile.name.clone(),
            kind: req.kind,
            text: req.text.clone().unwrap_or_default(),
            attachment,
            clip: req.clip.clone(),
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
            receipts: Vec::new(),
        };
        store_message(&mut records, message.clone());
        Some(message)
    }

    /// Test convenience: appends a text message from an arbitrary sender,
    /// as if another client had sent it.
    pub async fn seed_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        sender_name: &str,
        text: &str,
    ) -> RemoteMessage {
        let mut records = self.records.write().await;
        records.next_message += 1;
        let id = format!("m{}", records.next_message);
        let now = Timestamp::now();

        let message = RemoteMessage {
            id: RemoteMessageId::new(id),
            chat_id: RemoteChatId::new(chat_id),
            sender_id: UserId::new(sender_id),
            sender_name: sender_name.to_string(),
            kind: MessageKind::Text,
            text: text.to_string(),
            attachment: None,
            clip: None,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
            receipts: Vec::new(),
        };
        store_message(&mut records, message.clone());
        message
    }

    /// One page of a chat's history, newest first, offset cursors. Returns
    /// `None` for an unknown chat.
    pub async fn message_page(
        &self,
        chat_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Option<Page<RemoteMessage>> {
        let records = self.records.read().await;
        let messages = records.messages.get(chat_id)?;
        let newest_first: Vec<&RemoteMessage> = messages.iter().rev().collect();
        Some(paginate(&newest_first, limit, cursor))
    }

    /// Removes a message by server id, returning the owning chat's id.
    pub async fn delete_message(&self, message_id: &str) -> Option<String> {
        let mut records = self.records.write().await;
        for (chat_id, messages) in &mut records.messages {
            if let Some(pos) = messages.iter().position(|m| m.id.as_str() == message_id) {
                messages.remove(pos);
                return Some(chat_id.clone());
            }
        }
        None
    }

    /// Records the read position for a chat. Returns `false` for an
    /// unknown chat.
    pub async fn mark_read(&self, chat_id: &str, last: Option<RemoteMessageId>) -> bool {
        let mut records = self.records.write().await;
        if !records.chats.iter().any(|c| c.id.as_str() == chat_id) {
            return false;
        }
        if let Some(last) = last {
            records.read_marks.insert(chat_id.to_string(), last);
        }
        true
    }

    /// The recorded read position for a chat. Test accessor.
    pub async fn read_mark(&self, chat_id: &str) -> Option<RemoteMessageId> {
        let records = self.records.read().await;
        records.read_marks.get(chat_id).cloned()
    }

    /// All messages of a chat, ascending. Test accessor.
    pub async fn messages_in(&self, chat_id: &str) -> Vec<RemoteMessage> {
        let records = self.records.read().await;
        records.messages.get(chat_id).cloned().unwrap_or_default()
    }

    // --- search ---

    /// Case-insensitive substring search over chat titles and message
    /// texts, shaped like the client's local hits so identical entities
    /// de-duplicate.
    pub async fn search(&self, query: &str, limit: usize) -> Page<SearchResult> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Page::empty();
        }
        let records = self.records.read().await;
        let mut results = Vec::new();

        for chat in &records.chats {
            if chat.title.to_lowercase().contains(&needle) {
                results.push(SearchResult {
                    kind: SearchKind::Chat,
                    title: chat.title.clone(),
                    subtitle: chat.last_message_preview.clone().unwrap_or_default(),
                    occurred_at: Some(chat.last_message_at.unwrap_or(chat.created_at)),
                });
            }
        }
        for chat in &records.chats {
            let Some(messages) = records.messages.get(chat.id.as_str()) else {
                continue;
            };
            for message in messages {
                if message.text.to_lowercase().contains(&needle) {
                    results.push(SearchResult {
                        kind: SearchKind::Message,
                        title: chat.title.clone(),
                        subtitle: message.text.clone(),
                        occurred_at: Some(message.created_at),
                    });
                }
            }
        }

        results.truncate(limit.max(1));
        Page {
            items: results,
            next_cursor: None,
        }
    }

    // --- media ---

    /// Registers a media upload, minting its id.
    pub async fn register_media(&self, req: &RegisterMediaRequest) -> String {
        let mut records = self.records.write().await;
        records.next_media += 1;
        let id = format!("media-{}", records.next_media);
        records.media.insert(
            id.clone(),
            MediaRecord {
                file_name: req.file_name.clone(),
                mime_type: req.mime_type.clone(),
                uploaded: false,
                completed: false,
            },
        );
        id
    }

    /// Marks a registered upload's bytes as received. Returns `false` for
    /// an unknown id.
    pub async fn media_uploaded(&self, media_id: &str) -> bool {
        let mut records = self.records.write().await;
        match records.media.get_mut(media_id) {
            Some(record) => {
                record.uploaded = true;
                true
            }
            None => false,
        }
    }

    /// Completes a registered upload. Returns readiness, or `None` for an
    /// unknown id.
    pub async fn complete_media(&self, media_id: &str) -> Option<bool> {
        let mut records = self.records.write().await;
        let record = records.media.get_mut(media_id)?;
        record.completed = record.uploaded;
        Some(record.completed)
    }

    async fn attachment_for(&self, media_id: &str) -> Attachment {
        let records = self.records.read().await;
        let mime_type = records.media.get(media_id).map(|r| r.mime_type.clone());
        Attachment {
            media_id: media_id.to_string(),
            url: Some(format!("https://media.invalid/{media_id}")),
            mime_type,
            width: None,
            height: None,
            duration_ms: None,
        }
    }

    // --- stream connections ---

    /// Registers a stream connection, returning its id.
    pub async fn register_connection(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let mut conns = self.connections.write().await;
        conns.insert(id, sender);
        id
    }

    /// Removes a stream connection from the registry.
    pub async fn unregister_connection(&self, id: u64) {
        let mut conns = self.connections.write().await;
        conns.remove(&id);
    }

    /// Number of live stream connections.
    pub async fn connection_count(&self) -> usize {
        let conns = self.connections.read().await;
        conns.len()
    }

    /// Send a Close frame to every stream connection.
    ///
    /// Each connection's writer task forwards the close frame, which the
    /// client's reader detects as a disconnect. Useful for reconnect tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(connection = %id, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Broadcasts an event to every stream connection, stamping the next
    /// event cursor onto the envelope.
    pub async fn push_event(&self, mut envelope: EventEnvelope) {
        let cursor = self.next_cursor.fetch_add(1, Ordering::SeqCst);
        envelope.event_cursor = Some(cursor.to_string());
        let Ok(json) = serde_json::to_string(&envelope) else {
            return;
        };
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.send(Message::Text(json.clone().into()));
        }
    }
}

/// Builds a fresh remote chat record with default flags.
fn new_remote_chat(
    id: &str,
    kind: ChatKind,
    title: String,
    participants: Vec<Participant>,
) -> RemoteChat {
    let now = Timestamp::now();
    RemoteChat {
        id: RemoteChatId::new(id),
        title,
        kind,
        participants,
        last_message_preview: None,
        last_message_at: None,
        unread_count: 0,
        pinned: false,
        muted: false,
        archived: false,
        write_permission: WritePermission::Everyone,
        temporary_until: None,
        created_at: now,
        updated_at: now,
    }
}

/// Appends a message and refreshes the owning chat's summary fields.
fn store_message(records: &mut Records, message: RemoteMessage) {
    let chat_key = message.chat_id.as_str().to_string();
    if let Some(chat) = records
        .chats
        .iter_mut()
        .find(|c| c.id.as_str() == chat_key.as_str())
    {
        chat.last_message_preview = Some(preview_for(&message));
        chat.last_message_at = Some(message.created_at);
        chat.updated_at = message.created_at;
    }
    records.messages.entry(chat_key).or_default().push(message);
}

/// Preview text for the chat list, mirroring what clients display.
fn preview_for(message: &RemoteMessage) -> String {
    if !message.text.is_empty() {
        return message.text.clone();
    }
    match message.kind {
        MessageKind::Image => "Photo".to_string(),
        MessageKind::Video => "Video".to_string(),
        MessageKind::Clip => "Clip".to_string(),
        MessageKind::Text => String::new(),
    }
}

/// Offset-cursor pagination over a filtered view.
fn paginate<T: Clone>(items: &[&T], limit: usize, cursor: Option<&str>) -> Page<T> {
    let offset = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
    let limit = limit.max(1);
    let page: Vec<T> = items
        .iter()
        .skip(offset)
        .take(limit)
        .map(|item| (*item).clone())
        .collect();
    let consumed = offset.saturating_add(page.len());
    let next_cursor = (consumed < items.len()).then(|| consumed.to_string());
    Page {
        items: page,
        next_cursor,
    }
}
