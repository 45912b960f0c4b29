//! Background task that drains due outbox items.
//!
//! One dispatcher runs per engine. It wakes on a fixed tick and on nudges
//! (enqueue, explicit retry, connectivity regained) and attempts every due
//! item sequentially, oldest first. Sends are at-least-once; the store's
//! merge rules make the duplicate case harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use teamchat_api::ids::Timestamp;
use teamchat_api::message::{MessageKind, MessageStatus};
use teamchat_api::outbox::{OutboxItem, OutboxPayload};
use teamchat_api::rest::SendMessageRequest;

use crate::backend::{Backend, BackendError, MediaService};
use crate::store::StoreHandle;
use crate::sync::SyncEvent;

use super::{OutboxQueue, OutboxStorage};

/// Background task: drains the outbox until shutdown.
///
/// Each pass first re-saves a dirty queue, then attempts all currently due
/// items. The loop also ends when the engine drops the nudge sender.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_dispatcher<B, M, S>(
    backend: Arc<B>,
    media: Arc<M>,
    store: StoreHandle,
    outbox: Arc<OutboxQueue<S>>,
    events: mpsc::UnboundedSender<SyncEvent>,
    mut nudge: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
    tick_interval: Duration,
    send_timeout: Duration,
) where
    B: Backend,
    M: MediaService,
    S: OutboxStorage,
{
    let mut tick = tokio::time::interval(tick_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {}
            nudged = nudge.recv() => {
                if nudged.is_none() {
                    break;
                }
            }
        }

        outbox.flush_if_dirty().await;
        for item in outbox.due_items(Timestamp::now()) {
            if *shutdown.borrow() {
                break;
            }
            attempt_item(
                &backend,
                &media,
                &store,
                &outbox,
                &events,
                send_timeout,
                item,
            )
            .await;
        }
    }
    tracing::debug!("outbox dispatcher stopped");
}

/// Attempts a single item: resolve the target chat, materialize the send
/// request (uploading media first if needed), POST it, and reconcile.
pub(crate) async fn attempt_item<B, M, S>(
    backend: &Arc<B>,
    media: &Arc<M>,
    store: &StoreHandle,
    outbox: &Arc<OutboxQueue<S>>,
    events: &mpsc::UnboundedSender<SyncEvent>,
    send_timeout: Duration,
    item: OutboxItem,
) where
    B: Backend,
    M: MediaService,
    S: OutboxStorage,
{
    // A send needs the server chat id. Items enqueued while the chat create
    // was still pending wait here until the create response backfills it.
    let Some(remote_chat) = item
        .remote_chat_id
        .clone()
        .or_else(|| store.remote_chat_id(item.chat_id))
    else {
        tracing::debug!(message_id = %item.message_id, "chat not yet created, send deferred");
        return;
    };
    if item.remote_chat_id.is_none() {
        // Resolved via the store this time; stamp it so the binding
        // survives a restart.
        outbox
            .backfill_remote_chat(item.chat_id, &remote_chat)
            .await;
    }

    let request = match &item.payload {
        OutboxPayload::Text {
            text,
            context_label,
        } => SendMessageRequest {
            kind: MessageKind::Text,
            text: Some(text.clone()),
            context_label: context_label.clone(),
            attachment_id: None,
            clip: None,
        },
        OutboxPayload::Media {
            source_path,
            kind,
            text,
        } => {
            set_status(store, events, &item, MessageStatus::Uploading);
            match media.upload(source_path).await {
                Ok(attachment) => SendMessageRequest {
                    kind: *kind,
                    text: text.clone(),
                    context_label: None,
                    attachment_id: Some(attachment.media_id),
                    clip: None,
                },
                Err(e) => {
                    record_failure(store, outbox, events, &item, &e.to_string(), !e.is_retryable())
                        .await;
                    return;
                }
            }
        }
        OutboxPayload::Clip { clip, text } => SendMessageRequest {
            kind: MessageKind::Clip,
            text: text.clone(),
            context_label: None,
            attachment_id: None,
            clip: Some(clip.clone()),
        },
    };

    let outcome = tokio::time::timeout(
        send_timeout,
        backend.send_message(&remote_chat, &request),
    )
    .await;
    match outcome {
        Ok(Ok(remote_msg)) => {
            if !store.adopt_remote_message(item.chat_id, item.message_id, &remote_msg) {
                // The chat fell out of local state (restart leftovers); the
                // send itself succeeded, so the item is done.
                tracing::debug!(message_id = %item.message_id, "sent message has no local home");
            }
            outbox.remove(item.id).await;
            let _ = events.send(SyncEvent::MessageStatusChanged {
                message_id: item.message_id,
                status: remote_msg.status,
            });
            let _ = events.send(SyncEvent::MessagesChanged(item.chat_id));
            let _ = events.send(SyncEvent::ChatsChanged);
            let _ = events.send(SyncEvent::OutboxCountChanged(outbox.len()));
            tracing::debug!(message_id = %item.message_id, remote_id = %remote_msg.id, "message sent");
        }
        Ok(Err(e)) => {
            record_failure(store, outbox, events, &item, &e.to_string(), !e.is_retryable()).await;
        }
        Err(_elapsed) => {
            let e = BackendError::Connectivity {
                detail: format!("send timed out after {send_timeout:?}"),
            };
            record_failure(store, outbox, events, &item, &e.to_string(), false).await;
        }
    }
}

fn set_status(
    store: &StoreHandle,
    events: &mpsc::UnboundedSender<SyncEvent>,
    item: &OutboxItem,
    status: MessageStatus,
) {
    if store.set_message_status(item.message_id, status).is_some() {
        let _ = events.send(SyncEvent::MessageStatusChanged {
            message_id: item.message_id,
            status,
        });
    }
}

async fn record_failure<S: OutboxStorage>(
    store: &StoreHandle,
    outbox: &Arc<OutboxQueue<S>>,
    events: &mpsc::UnboundedSender<SyncEvent>,
    item: &OutboxItem,
    error: &str,
    halt: bool,
) {
    let attempts = outbox
        .record_failure(item.id, error, halt, Timestamp::now())
        .await;
    set_status(store, events, item, MessageStatus::Failed);
    let _ = events.send(SyncEvent::SendFailed {
        message_id: item.message_id,
        reason: error.to_string(),
    });
    tracing::warn!(
        message_id = %item.message_id,
        attempts = attempts.unwrap_or(0),
        halted = halt,
        error,
        "send attempt failed"
    );
}
