//! Identifier reconciliation and pure field-merge rules.
//!
//! Remote payloads never carry client-minted ids, so every merge starts by
//! resolving the server id against current state. The merge helpers
//! overwrite fields from the server copy but never touch the local id; they
//! are idempotent, so replaying the same payload (event after response,
//! history page after event) converges to the same record.

use teamchat_api::chat::{Chat, ChatPatch, RemoteChat};
use teamchat_api::ids::{ChatId, MessageId, RemoteChatId, RemoteMessageId};
use teamchat_api::message::{Message, MessageKind, RemoteMessage};

use super::StoreState;

/// Resolves a server chat id to the local chat that carries it.
pub(crate) fn local_chat_id(state: &StoreState, remote: &RemoteChatId) -> Option<ChatId> {
    state
        .chats
        .values()
        .find(|c| c.remote_id.as_ref() == Some(remote))
        .map(|c| c.id)
}

/// Resolves a server message id to the local message that carries it.
pub(crate) fn local_message_id(state: &StoreState, remote: &RemoteMessageId) -> Option<MessageId> {
    state
        .messages
        .values()
        .flatten()
        .find(|m| m.remote_id.as_ref() == Some(remote))
        .map(|m| m.id)
}

/// Builds a fresh local chat record for a server chat seen for the first
/// time. Mints a new [`ChatId`]; everything else comes from the wire.
pub(crate) fn chat_from_remote(remote: &RemoteChat) -> Chat {
    let mut chat = Chat::new_local(remote.kind, remote.title.clone(), Vec::new());
    merge_chat_fields(&mut chat, remote);
    chat
}

/// Overwrites a chat's fields from the server copy, preserving the local id.
///
/// Two exceptions to plain overwrite: an empty participant list never
/// replaces a populated one, and absent summary fields keep the locally
/// derived preview (optimistic sends may be ahead of the server).
pub(crate) fn merge_chat_fields(chat: &mut Chat, remote: &RemoteChat) {
    chat.remote_id = Some(remote.id.clone());
    chat.title = remote.title.clone();
    chat.kind = remote.kind;
    if !remote.participants.is_empty() || chat.participants.is_empty() {
        chat.participants = remote.participants.clone();
    }
    if remote.last_message_preview.is_some() {
        chat.last_message_preview = remote.last_message_preview.clone();
    }
    if remote.last_message_at.is_some() {
        chat.last_message_at = remote.last_message_at;
    }
    chat.unread_count = remote.unread_count;
    chat.pinned = remote.pinned;
    chat.muted = remote.muted;
    chat.archived = remote.archived;
    chat.write_permission = remote.write_permission;
    chat.temporary_until = remote.temporary_until;
    chat.created_at = remote.created_at;
    chat.updated_at = remote.updated_at;
}

/// Applies an optimistic partial update; only populated fields change.
pub(crate) fn apply_patch(chat: &mut Chat, patch: &ChatPatch) {
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
}

/// Builds a fresh local message record for a server message seen for the
/// first time. Mints a new [`MessageId`]; everything else comes from the
/// wire.
pub(crate) fn message_from_remote(chat_id: ChatId, remote: &RemoteMessage) -> Message {
    let mut msg = Message::new_local(
        chat_id,
        remote.sender_id.clone(),
        remote.sender_name.clone(),
        remote.kind,
    );
    merge_message_fields(&mut msg, remote);
    msg
}

/// Overwrites a message's fields from the server copy, preserving the local
/// id and chat membership.
pub(crate) fn merge_message_fields(msg: &mut Message, remote: &RemoteMessage) {
    msg.remote_id = Some(remote.id.clone());
    msg.sender_id = remote.sender_id.clone();
    msg.sender_name = remote.sender_name.clone();
    msg.kind = remote.kind;
    msg.text = remote.text.clone();
    msg.attachment = remote.attachment.clone();
    msg.clip = remote.clip.clone();
    msg.status = remote.status;
    msg.created_at = remote.created_at;
    msg.updated_at = remote.updated_at;
    msg.receipts = remote.receipts.clone();
}

/// One-line summary of a message for the chat list.
pub(crate) fn preview_text(msg: &Message) -> String {
    if !msg.text.is_empty() {
        return msg.text.clone();
    }
    match msg.kind {
        MessageKind::Image => "Photo".to_string(),
        MessageKind::Video => "Video".to_string(),
        MessageKind::Clip => "Clip".to_string(),
        MessageKind::Text => String::new(),
    }
}
