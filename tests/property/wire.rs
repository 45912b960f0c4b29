//! Property-based wire-format tests.
//!
//! Uses proptest to verify:
//! 1. Realtime event envelopes survive a JSON serialize → deserialize round-trip.
//! 2. Envelope parsing tolerates unknown fields (forward compatibility).
//! 3. Wire chats and messages round-trip, and minimal chat JSON fills defaults.
//! 4. Outbox snapshots survive an encode → decode round-trip.
//! 5. Random bytes never cause a panic in snapshot decoding (returns `Err`).
//! 6. Draft validation enforces its documented bounds.

use proptest::prelude::*;
use teamchat_api::chat::{ChatKind, Participant, RemoteChat, WritePermission};
use teamchat_api::event::{
    EventEnvelope, ReceiptUpdate, CHAT_UPDATED, MESSAGE_CREATED, MESSAGE_DELETED, MESSAGE_UPDATED,
    RECEIPT_UPDATED,
};
use teamchat_api::ids::{ChatId, MessageId, RemoteChatId, RemoteMessageId, Timestamp, UserId};
use teamchat_api::message::{
    Attachment, ClipRef, MessageKind, MessageStatus, ReadReceipt, RemoteMessage, MAX_TEXT_LEN,
};
use teamchat_api::outbox::{
    decode_snapshot, encode_snapshot, OutboxItem, OutboxPayload, ValidationError,
};
use uuid::Uuid;

// --- Arbitrary implementations for wire types ---

/// Strategy for generating arbitrary `ChatId` values.
fn arb_chat_id() -> impl Strategy<Value = ChatId> {
    any::<u128>().prop_map(|n| ChatId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary `MessageId` values.
fn arb_message_id() -> impl Strategy<Value = MessageId> {
    any::<u128>().prop_map(|n| MessageId::from_uuid(Uuid::from_u128(n)))
}

/// Strategy for generating arbitrary server-assigned chat ids.
fn arb_remote_chat_id() -> impl Strategy<Value = RemoteChatId> {
    "[a-z0-9]{1,12}".prop_map(RemoteChatId::new)
}

/// Strategy for generating arbitrary server-assigned message ids.
fn arb_remote_message_id() -> impl Strategy<Value = RemoteMessageId> {
    "[a-z0-9]{1,12}".prop_map(RemoteMessageId::new)
}

/// Strategy for generating arbitrary `UserId` values.
fn arb_user_id() -> impl Strategy<Value = UserId> {
    "[a-z0-9]{1,12}".prop_map(UserId::new)
}

/// Strategy for generating arbitrary `Timestamp` values.
fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    any::<u64>().prop_map(Timestamp::from_millis)
}

/// Strategy for generating arbitrary `MessageKind` values.
fn arb_message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Image),
        Just(MessageKind::Video),
        Just(MessageKind::Clip),
    ]
}

/// Strategy for generating arbitrary `MessageStatus` values.
fn arb_message_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Queued),
        Just(MessageStatus::Uploading),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

/// Strategy for generating well-formed `ClipRef` values (forward range).
fn arb_clip_ref() -> impl Strategy<Value = ClipRef> {
    (
        "[a-z0-9-]{1,16}",
        0u64..1_000_000,
        1u64..1_000_000,
        prop::option::of("[^\x00]{0,32}"),
    )
        .prop_map(|(clip_id, start_ms, extent, label)| ClipRef {
            clip_id,
            start_ms,
            end_ms: start_ms + extent,
            label,
        })
}

/// Strategy for generating arbitrary `Attachment` values.
fn arb_attachment() -> impl Strategy<Value = Attachment> {
    (
        "[a-z0-9-]{1,16}",
        prop::option::of("[a-z:/.]{1,40}"),
        prop::option::of("[a-z/]{1,20}"),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u64>()),
    )
        .prop_map(
            |(media_id, url, mime_type, width, height, duration_ms)| Attachment {
                media_id,
                url,
                mime_type,
                width,
                height,
                duration_ms,
            },
        )
}

/// Strategy for generating arbitrary `ReadReceipt` values.
fn arb_read_receipt() -> impl Strategy<Value = ReadReceipt> {
    (arb_user_id(), arb_timestamp()).prop_map(|(user_id, read_at)| ReadReceipt { user_id, read_at })
}

/// Strategy for generating arbitrary `Participant` values.
fn arb_participant() -> impl Strategy<Value = Participant> {
    (arb_user_id(), "[^\x00]{1,24}").prop_map(|(user_id, name)| Participant { user_id, name })
}

/// Strategy for generating arbitrary `RemoteChat` values.
fn arb_remote_chat() -> impl Strategy<Value = RemoteChat> {
    (
        (
            arb_remote_chat_id(),
            "[^\x00]{1,32}",
            prop_oneof![Just(ChatKind::Direct), Just(ChatKind::Group)],
            prop::collection::vec(arb_participant(), 0..4),
            prop::option::of("[^\x00]{0,40}"),
            prop::option::of(arb_timestamp()),
        ),
        (
            any::<u32>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            prop_oneof![Just(WritePermission::Everyone), Just(WritePermission::Admins)],
            prop::option::of(arb_timestamp()),
            arb_timestamp(),
            arb_timestamp(),
        ),
    )
        .prop_map(
            |(
                (id, title, kind, participants, last_message_preview, last_message_at),
                (
                    unread_count,
                    pinned,
                    muted,
                    archived,
                    write_permission,
                    temporary_until,
                    created_at,
                    updated_at,
                ),
            )| RemoteChat {
                id,
                title,
                kind,
                participants,
                last_message_preview,
                last_message_at,
                unread_count,
                pinned,
                muted,
                archived,
                write_permission,
                temporary_until,
                created_at,
                updated_at,
            },
        )
}

/// Strategy for generating arbitrary `RemoteMessage` values.
fn arb_remote_message() -> impl Strategy<Value = RemoteMessage> {
    (
        (
            arb_remote_message_id(),
            arb_remote_chat_id(),
            arb_user_id(),
            "[^\x00]{1,24}",
            arb_message_kind(),
            "[^\x00]{0,256}",
        ),
        (
            prop::option::of(arb_attachment()),
            prop::option::of(arb_clip_ref()),
            arb_message_status(),
            arb_timestamp(),
            arb_timestamp(),
            prop::collection::vec(arb_read_receipt(), 0..3),
        ),
    )
        .prop_map(
            |(
                (id, chat_id, sender_id, sender_name, kind, text),
                (attachment, clip, status, created_at, updated_at, receipts),
            )| RemoteMessage {
                id,
                chat_id,
                sender_id,
                sender_name,
                kind,
                text,
                attachment,
                clip,
                status,
                created_at,
                updated_at,
                receipts,
            },
        )
}

/// Strategy for generating arbitrary `ReceiptUpdate` values.
fn arb_receipt_update() -> impl Strategy<Value = ReceiptUpdate> {
    (
        arb_user_id(),
        prop::option::of(arb_remote_message_id()),
        arb_timestamp(),
    )
        .prop_map(|(user_id, message_id, read_at)| ReceiptUpdate {
            user_id,
            message_id,
            read_at,
        })
}

/// Strategy for event type strings: the known constants plus unknown types
/// a newer server might introduce.
fn arb_event_kind() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(CHAT_UPDATED.to_string()),
        Just(MESSAGE_CREATED.to_string()),
        Just(MESSAGE_UPDATED.to_string()),
        Just(MESSAGE_DELETED.to_string()),
        Just(RECEIPT_UPDATED.to_string()),
        "[a-z]{2,10}\\.[a-z]{2,10}",
    ]
}

/// Strategy for generating arbitrary `EventEnvelope` values.
fn arb_envelope() -> impl Strategy<Value = EventEnvelope> {
    (
        prop::option::of("[0-9]{1,8}"),
        arb_event_kind(),
        prop::option::of(arb_remote_chat()),
        prop::option::of(arb_remote_message()),
        prop::option::of(arb_remote_chat_id()),
        prop::option::of(arb_remote_message_id()),
        prop::option::of(arb_receipt_update()),
        prop::option::of(arb_user_id()),
    )
        .prop_map(
            |(event_cursor, kind, chat, message, chat_id, message_id, receipt, user_id)| {
                EventEnvelope {
                    event_cursor,
                    kind,
                    chat,
                    message,
                    chat_id,
                    message_id,
                    receipt,
                    user_id,
                }
            },
        )
}

/// Strategy for generating arbitrary `OutboxPayload` values.
fn arb_payload() -> impl Strategy<Value = OutboxPayload> {
    prop_oneof![
        ("[^\x00]{1,64}", prop::option::of("[^\x00]{1,16}")).prop_map(|(text, context_label)| {
            OutboxPayload::Text {
                text,
                context_label,
            }
        }),
        (
            "[a-z/.]{1,40}",
            prop_oneof![Just(MessageKind::Image), Just(MessageKind::Video)],
            prop::option::of("[^\x00]{0,32}"),
        )
            .prop_map(|(source_path, kind, text)| OutboxPayload::Media {
                source_path,
                kind,
                text,
            }),
        (arb_clip_ref(), prop::option::of("[^\x00]{0,32}"))
            .prop_map(|(clip, text)| OutboxPayload::Clip { clip, text }),
    ]
}

/// Strategy for generating arbitrary `OutboxItem` values, including items
/// mid-retry and halted ones.
fn arb_outbox_item() -> impl Strategy<Value = OutboxItem> {
    (
        arb_message_id(),
        arb_chat_id(),
        prop::option::of(arb_remote_chat_id()),
        arb_payload(),
        0u32..10,
        prop::option::of(arb_timestamp()),
        prop::option::of("[^\x00]{1,32}"),
        any::<bool>(),
    )
        .prop_map(
            |(
                message_id,
                chat_id,
                remote_chat_id,
                payload,
                attempt_count,
                next_retry_at,
                last_error,
                halted,
            )| {
                let mut item = OutboxItem::new(message_id, chat_id, remote_chat_id, payload);
                item.attempt_count = attempt_count;
                item.next_retry_at = next_retry_at;
                item.last_error = last_error;
                item.halted = halted;
                item
            },
        )
}

// --- Property tests ---

proptest! {
    /// Any event envelope survives a JSON serialize → deserialize round-trip.
    #[test]
    fn event_envelope_json_round_trip(envelope in arb_envelope()) {
        let json = serde_json::to_string(&envelope).expect("serialize should succeed");
        let decoded: EventEnvelope =
            serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(envelope, decoded);
    }

    /// Extra fields a newer server adds to an event frame are ignored;
    /// the envelope parses to the same value.
    #[test]
    fn event_envelope_tolerates_unknown_fields(
        envelope in arb_envelope(),
        extra in any::<u64>(),
    ) {
        let mut value = serde_json::to_value(&envelope).expect("serialize should succeed");
        let object = value.as_object_mut().expect("envelope serializes to an object");
        object.insert("debugTrace".to_string(), serde_json::json!(extra));
        object.insert(
            "experimental".to_string(),
            serde_json::json!({"nested": [1, 2, 3]}),
        );
        let decoded: EventEnvelope =
            serde_json::from_value(value).expect("deserialize should succeed");
        prop_assert_eq!(envelope, decoded);
    }

    /// Any wire chat survives a JSON round-trip.
    #[test]
    fn remote_chat_json_round_trip(chat in arb_remote_chat()) {
        let json = serde_json::to_string(&chat).expect("serialize should succeed");
        let decoded: RemoteChat = serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(chat, decoded);
    }

    /// Any wire message survives a JSON round-trip.
    #[test]
    fn remote_message_json_round_trip(message in arb_remote_message()) {
        let json = serde_json::to_string(&message).expect("serialize should succeed");
        let decoded: RemoteMessage =
            serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(message, decoded);
    }

    /// A chat frame carrying only the required fields parses, with every
    /// optional field taking its default.
    #[test]
    fn minimal_chat_json_parses_with_defaults(
        id in "[a-z0-9]{1,8}",
        title in "[a-zA-Z ]{1,24}",
        at in any::<u64>(),
    ) {
        let json = serde_json::json!({
            "id": id.clone(),
            "title": title.clone(),
            "kind": "group",
            "createdAt": at,
            "updatedAt": at,
        });
        let chat: RemoteChat = serde_json::from_value(json).expect("deserialize should succeed");
        prop_assert_eq!(chat.id, RemoteChatId::new(id));
        prop_assert_eq!(chat.title, title);
        prop_assert!(chat.participants.is_empty());
        prop_assert_eq!(chat.last_message_preview, None);
        prop_assert_eq!(chat.last_message_at, None);
        prop_assert_eq!(chat.unread_count, 0);
        prop_assert!(!chat.pinned && !chat.muted && !chat.archived);
        prop_assert_eq!(chat.write_permission, WritePermission::Everyone);
    }

    /// Any outbox list survives an encode → decode snapshot round-trip,
    /// preserving order and per-item retry state.
    #[test]
    fn outbox_snapshot_round_trip(items in prop::collection::vec(arb_outbox_item(), 0..8)) {
        let bytes = encode_snapshot(&items).expect("encode should succeed");
        let decoded = decode_snapshot(&bytes).expect("decode should succeed");
        prop_assert_eq!(items, decoded);
    }

    /// Random bytes never cause a panic when decoded as a snapshot; they
    /// return Err gracefully.
    #[test]
    fn random_bytes_snapshot_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        // We don't care if it returns Ok or Err, just that it doesn't panic.
        let _ = decode_snapshot(&bytes);
    }

    /// `MessageStatus` and `MessageKind` survive JSON round-trips.
    #[test]
    fn status_and_kind_json_round_trip(
        status in arb_message_status(),
        kind in arb_message_kind(),
    ) {
        let json = serde_json::to_string(&status).expect("serialize should succeed");
        let decoded: MessageStatus =
            serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(status, decoded);

        let json = serde_json::to_string(&kind).expect("serialize should succeed");
        let decoded: MessageKind = serde_json::from_str(&json).expect("deserialize should succeed");
        prop_assert_eq!(kind, decoded);
    }

    /// Text drafts validate exactly up to the length cap and fail with the
    /// actual size beyond it.
    #[test]
    fn text_validation_respects_length_bounds(extra in 1usize..200) {
        let at_cap = OutboxPayload::Text {
            text: "a".repeat(MAX_TEXT_LEN),
            context_label: None,
        };
        prop_assert!(at_cap.validate().is_ok());

        let over = OutboxPayload::Text {
            text: "a".repeat(MAX_TEXT_LEN + extra),
            context_label: None,
        };
        prop_assert!(
            matches!(
                over.validate(),
                Err(ValidationError::TextTooLarge { size, .. }) if size == MAX_TEXT_LEN + extra
            ),
            "expected TextTooLarge with size {}, got {:?}",
            MAX_TEXT_LEN + extra,
            over.validate()
        );
    }

    /// Whitespace-only text is rejected regardless of length.
    #[test]
    fn whitespace_only_text_is_rejected(n in 1usize..40) {
        let draft = OutboxPayload::Text {
            text: " ".repeat(n),
            context_label: None,
        };
        prop_assert_eq!(draft.validate(), Err(ValidationError::EmptyText));
    }

    /// A clip draft is valid exactly when its range runs forward.
    #[test]
    fn clip_validation_requires_forward_range(
        start in 0u64..1_000_000,
        end in 0u64..1_000_000,
    ) {
        let payload = OutboxPayload::Clip {
            clip: ClipRef {
                clip_id: "clip-1".into(),
                start_ms: start,
                end_ms: end,
                label: None,
            },
            text: None,
        };
        prop_assert_eq!(payload.validate().is_ok(), end > start);
    }
}
