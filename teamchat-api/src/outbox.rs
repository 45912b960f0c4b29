//! Outbox item types and the durable snapshot encoding.
//!
//! An [`OutboxItem`] pairs 1:1 with a locally-authored [`Message`] whose
//! status is `Queued`, `Uploading` or `Failed`, and is removed exactly when
//! the send finally succeeds. The full outbox list is persisted as a
//! postcard snapshot after every mutation and reloaded at engine start.
//!
//! [`Message`]: crate::message::Message

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, OutboxId, RemoteChatId, Timestamp};
use crate::message::{ClipRef, MessageKind, MAX_TEXT_LEN};

/// Send-specific data for one pending outbox item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxPayload {
    /// Plain text send.
    Text {
        text: String,
        /// Optional context label attached to the send (e.g. a training
        /// session the message refers to).
        context_label: Option<String>,
    },
    /// Media send: the attachment must be uploaded through the media
    /// collaborator before the message referencing it goes out.
    Media {
        /// Path to the local source file.
        source_path: String,
        /// Image or Video.
        kind: MessageKind,
        /// Optional caption.
        text: Option<String>,
    },
    /// Clip-reference send carrying analysis metadata verbatim.
    Clip {
        clip: ClipRef,
        /// Optional accompanying text.
        text: Option<String>,
    },
}

/// Error returned when a draft fails validation before entering the outbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text send with empty or whitespace-only text.
    #[error("message text is empty")]
    EmptyText,
    /// Text exceeds the maximum allowed length.
    #[error("message text too large ({size} bytes, max {max} bytes)")]
    TextTooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Media send without a source file.
    #[error("media send has no source file")]
    MissingSource,
    /// Media send with a kind that is not image or video.
    #[error("media send must be image or video, got {kind:?}")]
    InvalidMediaKind {
        /// The offending kind.
        kind: MessageKind,
    },
    /// Clip reference with an empty identifier or inverted time range.
    #[error("invalid clip reference ({detail})")]
    InvalidClip {
        /// What was wrong with the reference.
        detail: String,
    },
}

impl OutboxPayload {
    /// The message kind this payload produces.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media { kind, .. } => *kind,
            Self::Clip { .. } => MessageKind::Clip,
        }
    }

    /// The user-visible text carried by this payload, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text.as_str()),
            Self::Media { text, .. } | Self::Clip { text, .. } => text.as_deref(),
        }
    }

    /// Validates a draft before it is allowed into the outbox.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found;
    /// a rejected draft must never be enqueued.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Text { text, .. } => {
                if text.trim().is_empty() {
                    return Err(ValidationError::EmptyText);
                }
                if text.len() > MAX_TEXT_LEN {
                    return Err(ValidationError::TextTooLarge {
                        size: text.len(),
                        max: MAX_TEXT_LEN,
                    });
                }
            }
            Self::Media {
                source_path, kind, ..
            } => {
                if source_path.is_empty() {
                    return Err(ValidationError::MissingSource);
                }
                if !matches!(kind, MessageKind::Image | MessageKind::Video) {
                    return Err(ValidationError::InvalidMediaKind { kind: *kind });
                }
            }
            Self::Clip { clip, .. } => {
                if clip.clip_id.is_empty() {
                    return Err(ValidationError::InvalidClip {
                        detail: "empty clip id".into(),
                    });
                }
                if clip.end_ms <= clip.start_ms {
                    return Err(ValidationError::InvalidClip {
                        detail: format!("end {} not after start {}", clip.end_ms, clip.start_ms),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One pending send, durable until the send succeeds or the user deletes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: OutboxId,
    /// The message awaiting send.
    pub message_id: MessageId,
    /// The chat the message belongs to, as known to the enqueuing session.
    ///
    /// Local ids are minted per session, so after a restart this may no
    /// longer resolve; `remote_chat_id` is the durable binding.
    pub chat_id: ChatId,
    /// Server id of the chat, captured at enqueue time or backfilled once
    /// the chat's create call succeeds. A send needs this to proceed.
    pub remote_chat_id: Option<RemoteChatId>,
    /// When the item was enqueued.
    pub created_at: Timestamp,
    pub payload: OutboxPayload,
    /// Number of attempts made so far.
    pub attempt_count: u32,
    /// Earliest time of the next attempt; `None` means due immediately.
    pub next_retry_at: Option<Timestamp>,
    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Set after a permanent rejection; the dispatcher skips the item until
    /// an explicit user retry clears it.
    pub halted: bool,
}

impl OutboxItem {
    /// Creates a fresh item for a just-authored message, due immediately.
    #[must_use]
    pub fn new(
        message_id: MessageId,
        chat_id: ChatId,
        remote_chat_id: Option<RemoteChatId>,
        payload: OutboxPayload,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            message_id,
            chat_id,
            remote_chat_id,
            created_at: Timestamp::now(),
            payload,
            attempt_count: 0,
            next_retry_at: None,
            last_error: None,
            halted: false,
        }
    }

    /// Whether the item should be attempted now.
    ///
    /// Halted items are never due; otherwise an item is due when it has no
    /// scheduled retry time or that time has passed.
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        if self.halted {
            return false;
        }
        self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Error wrapping a failed snapshot encode or decode.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Serialization of the outbox list failed.
    #[error("snapshot encoding failed: {0}")]
    Encode(#[source] postcard::Error),
    /// The persisted bytes could not be decoded.
    #[error("snapshot decoding failed: {0}")]
    Decode(#[source] postcard::Error),
}

/// Encodes the full outbox list for durable storage.
///
/// # Errors
///
/// Returns [`SnapshotError::Encode`] if serialization fails.
pub fn encode_snapshot(items: &[OutboxItem]) -> Result<Vec<u8>, SnapshotError> {
    postcard::to_allocvec(items).map_err(SnapshotError::Encode)
}

/// Decodes a persisted outbox snapshot back into the ordered item list.
///
/// # Errors
///
/// Returns [`SnapshotError::Decode`] if the bytes are not a valid snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Vec<OutboxItem>, SnapshotError> {
    postcard::from_bytes(bytes).map_err(SnapshotError::Decode)
}
