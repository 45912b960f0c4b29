//! Message entity model, delivery status, and the backend wire shape.

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, RemoteChatId, RemoteMessageId, Timestamp, UserId};

/// Maximum allowed message text length in bytes.
pub const MAX_TEXT_LEN: usize = 10_000;

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Reference to a recorded clip with a time range.
    #[serde(rename = "clip-reference")]
    Clip,
}

/// Delivery lifecycle of a message, as seen by this client.
///
/// `Queued`, `Uploading` and `Failed` exist only locally while an outbox
/// item is pending; the backend reports `Sent`, `Delivered` and `Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Waiting in the outbox for its first or next attempt.
    Queued,
    /// Attachment upload in progress.
    Uploading,
    /// Accepted by the backend.
    Sent,
    /// Delivered to at least one other participant.
    Delivered,
    /// Read by at least one other participant.
    Read,
    /// Last attempt failed; retained for explicit retry or deletion.
    Failed,
}

/// Descriptor of an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Identifier assigned by the media service.
    #[serde(rename = "mediaID")]
    pub media_id: String,
    /// Download URL, if already available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// MIME type reported by the media service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Playback length for videos, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Reference to a clip from the analysis service, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRef {
    /// Clip identifier from the analysis service.
    #[serde(rename = "clipID")]
    pub clip_id: String,
    /// Clip start offset in milliseconds.
    pub start_ms: u64,
    /// Clip end offset in milliseconds.
    pub end_ms: u64,
    /// Optional human-readable label.
    ///
    /// No `skip_serializing_if` here: `ClipRef` is embedded in the postcard
    /// outbox snapshot, and skipped fields break non-self-describing decode.
    #[serde(default)]
    pub label: Option<String>,
}

/// A single read receipt on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Who read the message.
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// When they read it.
    #[serde(rename = "readAt")]
    pub read_at: Timestamp,
}

/// Client-side message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stable client-minted identifier, preserved across all merges.
    pub id: MessageId,
    /// Server identifier, populated once the send succeeds.
    pub remote_id: Option<RemoteMessageId>,
    /// Owning chat; membership is immutable after creation.
    pub chat_id: ChatId,
    /// Author.
    pub sender_id: UserId,
    /// Author display name at send time.
    pub sender_name: String,
    pub kind: MessageKind,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub clip: Option<ClipRef>,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Read receipts accumulated so far.
    pub receipts: Vec<ReadReceipt>,
}

impl Message {
    /// Creates a locally-authored message in `Queued` status, ready to be
    /// paired with an outbox item.
    #[must_use]
    pub fn new_local(
        chat_id: ChatId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        kind: MessageKind,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: MessageId::new(),
            remote_id: None,
            chat_id,
            sender_id,
            sender_name: sender_name.into(),
            kind,
            text: String::new(),
            attachment: None,
            clip: None,
            status: MessageStatus::Queued,
            created_at: now,
            updated_at: now,
            receipts: Vec::new(),
        }
    }
}

/// Wire representation of a message as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    /// Server-assigned identifier.
    pub id: RemoteMessageId,
    /// Server identifier of the owning chat.
    #[serde(rename = "chatID")]
    pub chat_id: RemoteChatId,
    #[serde(rename = "senderID")]
    pub sender_id: UserId,
    pub sender_name: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipRef>,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub receipts: Vec<ReadReceipt>,
}
