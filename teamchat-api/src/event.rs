//! Realtime event envelope delivered over the push stream.
//!
//! Every frame on the event stream is a JSON object of this shape:
//! `{eventCursor, type, chat?, message?, chatID?, messageID?, receipt?,
//! userID?}`. The `type` string selects which optional fields are present;
//! unknown types must be ignored for forward compatibility, so the envelope
//! deserializes any well-formed frame regardless of its type.

use serde::{Deserialize, Serialize};

use crate::chat::RemoteChat;
use crate::ids::{RemoteChatId, RemoteMessageId, Timestamp, UserId};
use crate::message::RemoteMessage;

/// A chat's metadata changed (title, flags, participants, preview).
pub const CHAT_UPDATED: &str = "chat.updated";
/// A new message arrived.
pub const MESSAGE_CREATED: &str = "message.created";
/// An existing message changed (edit, status, receipts).
pub const MESSAGE_UPDATED: &str = "message.updated";
/// A message was deleted server-side.
pub const MESSAGE_DELETED: &str = "message.deleted";
/// A read receipt changed; the envelope carries the updated message.
pub const RECEIPT_UPDATED: &str = "receipt.updated";

/// Read-receipt detail carried by `receipt.updated` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptUpdate {
    /// Who read.
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// The message the receipt refers to.
    #[serde(default, rename = "messageID", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<RemoteMessageId>,
    /// When it was read.
    #[serde(rename = "readAt")]
    pub read_at: Timestamp,
}

/// One frame from the realtime event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Opaque resume cursor; retained for observability only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_cursor: Option<String>,
    /// Event type string, e.g. [`MESSAGE_CREATED`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Full chat payload (`chat.updated`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<RemoteChat>,
    /// Full message payload (`message.created`, `message.updated`,
    /// `receipt.updated`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<RemoteMessage>,
    /// Bare chat reference.
    #[serde(default, rename = "chatID", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<RemoteChatId>,
    /// Bare message reference (`message.deleted`).
    #[serde(default, rename = "messageID", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<RemoteMessageId>,
    /// Receipt detail (`receipt.updated`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptUpdate>,
    /// Acting user, where relevant.
    #[serde(default, rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl EventEnvelope {
    /// Creates a bare envelope of the given type with all payload fields
    /// empty; callers fill in what the type carries.
    #[must_use]
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            event_cursor: None,
            kind: kind.into(),
            chat: None,
            message: None,
            chat_id: None,
            message_id: None,
            receipt: None,
            user_id: None,
        }
    }
}
