//! Chat entity model and the wire representation the backend serves.
//!
//! [`Chat`] is the client-side record keyed by a stable [`ChatId`];
//! [`RemoteChat`] is the JSON shape the backend returns from chat endpoints
//! and inside realtime events. Mapping between the two never changes the
//! local id.

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, RemoteChatId, Timestamp, UserId};

/// Whether a chat is a two-party direct thread or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one conversation.
    Direct,
    /// Multi-participant conversation.
    Group,
}

/// Who may write into a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePermission {
    /// Every participant may send messages.
    #[default]
    Everyone,
    /// Only chat administrators may send messages.
    Admins,
}

/// A chat participant as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Server-assigned user identifier.
    #[serde(rename = "userID")]
    pub user_id: UserId,
    /// Display name at the time the chat was fetched.
    pub name: String,
}

/// Client-side chat record.
///
/// `remote_id` is `None` only in the window between optimistic local
/// creation and the first successful create response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    /// Stable client-minted identifier.
    pub id: ChatId,
    /// Server identifier, populated on first sync.
    pub remote_id: Option<RemoteChatId>,
    /// Chat title (peer name for direct chats, group name otherwise).
    pub title: String,
    /// Direct or group.
    pub kind: ChatKind,
    /// Current participant list.
    pub participants: Vec<Participant>,
    /// Text preview of the most recent message.
    pub last_message_preview: Option<String>,
    /// Creation time of the most recent message.
    pub last_message_at: Option<Timestamp>,
    /// Number of unread messages.
    pub unread_count: u32,
    /// Pinned to the top of the chat list.
    pub pinned: bool,
    /// Notifications muted.
    pub muted: bool,
    /// Hidden from the default chat list.
    pub archived: bool,
    /// Write policy for this chat.
    pub write_permission: WritePermission,
    /// For ephemeral chats, the time after which the chat expires.
    pub temporary_until: Option<Timestamp>,
    /// When the chat was created.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl Chat {
    /// Creates a chat that exists only locally, before the create request
    /// has been confirmed by the backend.
    #[must_use]
    pub fn new_local(
        kind: ChatKind,
        title: impl Into<String>,
        participants: Vec<Participant>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id: ChatId::new(),
            remote_id: None,
            title: title.into(),
            kind,
            participants,
            last_message_preview: None,
            last_message_at: None,
            unread_count: 0,
            pinned: false,
            muted: false,
            archived: false,
            write_permission: WritePermission::default(),
            temporary_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Wire representation of a chat as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChat {
    /// Server-assigned identifier.
    pub id: RemoteChatId,
    pub title: String,
    pub kind: ChatKind,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub write_permission: WritePermission,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Partial chat update, applied optimistically and sent as a PATCH body.
///
/// Only the populated fields change; everything else is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_permission: Option<WritePermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_until: Option<Timestamp>,
}

impl ChatPatch {
    /// True when no field is populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pinned.is_none()
            && self.muted.is_none()
            && self.archived.is_none()
            && self.write_permission.is_none()
            && self.temporary_until.is_none()
    }

    /// Convenience patch toggling only the pinned flag.
    #[must_use]
    pub fn pin(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Self::default()
        }
    }

    /// Convenience patch toggling only the muted flag.
    #[must_use]
    pub fn mute(muted: bool) -> Self {
        Self {
            muted: Some(muted),
            ..Self::default()
        }
    }

    /// Convenience patch toggling only the archived flag.
    #[must_use]
    pub fn archive(archived: bool) -> Self {
        Self {
            archived: Some(archived),
            ..Self::default()
        }
    }
}
