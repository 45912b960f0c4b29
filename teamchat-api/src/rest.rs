//! Request and response bodies for the backend's REST-style operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chat::ChatKind;
use crate::ids::{RemoteMessageId, Timestamp, UserId};
use crate::message::{ClipRef, MessageKind};

/// One page of a cursor-paginated listing.
///
/// `next_cursor` is opaque; `None` means the listing is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A page with no items and no continuation.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

/// The authenticated user, as reported by the identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub name: String,
}

/// Query parameters for the chat list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatListQuery {
    /// Continuation cursor from a previous page.
    pub cursor: Option<String>,
    /// Maximum number of chats to return.
    pub limit: u32,
    /// Include archived chats.
    pub archived: bool,
    /// Optional title filter.
    pub query: Option<String>,
}

/// Body for creating a direct or group chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub kind: ChatKind,
    /// Group title; ignored for direct chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The other participants (the caller is implicit).
    #[serde(rename = "participantIDs")]
    pub participant_ids: Vec<UserId>,
}

/// Body for sending a message into a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Free-form context label (e.g. the session the message refers to).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_label: Option<String>,
    /// Media identifier from a completed upload.
    #[serde(default, rename = "attachmentID", skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
    /// Clip metadata, carried verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipRef>,
}

/// Body for marking a chat read up to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadRequest {
    #[serde(
        default,
        rename = "lastReadMessageID",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_read_message_id: Option<RemoteMessageId>,
}

/// Query parameters for the search endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub cursor: Option<String>,
    pub limit: u32,
    pub include_archived: bool,
}

/// What kind of entity a search result points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Chat,
    Message,
    Clip,
}

/// One search hit, local or remote.
///
/// Results are de-duplicated on the `(kind, title, subtitle)` triple and
/// ordered by `occurred_at` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub kind: SearchKind,
    pub title: String,
    pub subtitle: String,
    /// Most recent occurrence backing this hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<Timestamp>,
}

impl SearchResult {
    /// The de-duplication key.
    #[must_use]
    pub fn dedupe_key(&self) -> (SearchKind, &str, &str) {
        (self.kind, self.title.as_str(), self.subtitle.as_str())
    }
}

/// Body for registering a media upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterMediaRequest {
    pub file_name: String,
    pub mime_type: String,
    /// Size in bytes, when known up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Ticket returned by the media registration endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTicket {
    #[serde(rename = "mediaID")]
    pub media_id: String,
    /// Where to PUT the bytes.
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    /// Headers the upload request must carry.
    #[serde(default, rename = "uploadHeaders")]
    pub upload_headers: HashMap<String, String>,
}

/// Response of the media completion endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCompletion {
    /// Whether the attachment is ready to be referenced in a send.
    pub ready: bool,
}

/// Credential for opening the realtime event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeToken {
    pub token: String,
    /// Stream URL override; when absent the client derives it from the
    /// configured server URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
