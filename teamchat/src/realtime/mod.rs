//! Realtime event client for the push stream.
//!
//! One supervisor task owns the connection lifecycle: fetch a stream token,
//! open the WebSocket, read frames until the connection drops, sleep a
//! jittered exponential backoff, repeat. Because a single task does all of
//! this, reconnect scheduling is single-flight by construction.
//!
//! Every state transition is published on a [`tokio::sync::watch`] channel;
//! the sync engine watches it to refresh state after a reconnect and the
//! embedding app watches it for the connection indicator.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use teamchat_api::event::{
    CHAT_UPDATED, EventEnvelope, MESSAGE_CREATED, MESSAGE_DELETED, MESSAGE_UPDATED, RECEIPT_UPDATED,
};
use teamchat_api::rest::RealtimeToken;

use crate::backend::Backend;
use crate::config::ReconnectConfig;
use crate::store::{MergeOrigin, StoreHandle};
use crate::sync::SyncEvent;

/// Connection state of the realtime stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; either before the first attempt or after a drop.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The stream is live.
    Connected,
    /// The last connection attempt failed; a retry is scheduled.
    Failed(String),
}

/// Settings for the realtime supervisor.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base REST URL, used to derive the stream URL when the token
    /// response does not carry one.
    pub server_url: Url,
    /// Backoff and timeout settings.
    pub reconnect: ReconnectConfig,
}

/// Compute the delay before reconnect attempt number `attempt`.
///
/// Doubles from `initial_delay` up to `max_delay`, plus a uniform random
/// jitter of at most `jitter` so that clients dropped together do not
/// reconnect together.
#[must_use]
pub fn reconnect_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt.min(31)))
        .min(config.max_delay);
    let jitter_ms = u64::try_from(config.jitter.as_millis()).unwrap_or(u64::MAX);
    if jitter_ms == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
}

/// Background task: supervise the realtime connection until shutdown.
///
/// States walk `Connecting -> Connected -> Disconnected` on the happy path
/// and `Connecting -> Failed(reason)` when an attempt dies early. The
/// attempt counter resets only on a successful connect, so a flapping
/// server still sees growing delays.
pub(crate) async fn run_supervisor<B: Backend>(
    backend: Arc<B>,
    store: StoreHandle,
    events: mpsc::UnboundedSender<SyncEvent>,
    state_tx: watch::Sender<ConnectionState>,
    config: RealtimeConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut last_cursor: Option<String> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }
        publish(&state_tx, &events, ConnectionState::Connecting);

        match connect(&backend, &config).await {
            Ok(mut stream) => {
                attempt = 0;
                publish(&state_tx, &events, ConnectionState::Connected);
                read_frames(&mut stream, &store, &events, &mut last_cursor, &mut shutdown).await;
                if *shutdown.borrow() {
                    break;
                }
                publish(&state_tx, &events, ConnectionState::Disconnected);
            }
            Err(reason) => {
                tracing::warn!(error = %reason, attempt, "realtime connect failed");
                publish(&state_tx, &events, ConnectionState::Failed(reason));
            }
        }

        let delay = reconnect_delay(attempt, &config.reconnect);
        attempt = attempt.saturating_add(1);
        tracing::debug!(?delay, attempt, last_cursor = ?last_cursor, "realtime reconnect scheduled");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    publish(&state_tx, &events, ConnectionState::Disconnected);
    tracing::debug!("realtime supervisor stopped");
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Fetch a stream token and open the WebSocket, all within the configured
/// connect timeout.
async fn connect<B: Backend>(
    backend: &Arc<B>,
    config: &RealtimeConfig,
) -> Result<WsStream, String> {
    let token = backend
        .realtime_token()
        .await
        .map_err(|e| format!("token request failed: {e}"))?;
    let url = stream_url(&config.server_url, &token)?;

    let (stream, _response) = tokio::time::timeout(
        config.reconnect.connect_timeout,
        connect_async(url.as_str()),
    )
    .await
    .map_err(|_| "websocket connect timed out".to_string())?
    .map_err(|e| format!("websocket connect failed: {e}"))?;

    Ok(stream)
}

/// Resolve the stream URL: the token's override if present, otherwise the
/// REST base with a ws scheme and the `events` path. The token rides along
/// as a query parameter because WebSocket clients cannot always set headers.
fn stream_url(server_url: &Url, token: &RealtimeToken) -> Result<Url, String> {
    let mut url = match &token.url {
        Some(explicit) => Url::parse(explicit).map_err(|e| format!("bad stream url: {e}"))?,
        None => {
            let mut derived = server_url
                .join("events")
                .map_err(|e| format!("bad stream url: {e}"))?;
            let scheme = if derived.scheme() == "https" { "wss" } else { "ws" };
            derived
                .set_scheme(scheme)
                .map_err(|()| "stream url scheme not rewritable".to_string())?;
            derived
        }
    };
    url.query_pairs_mut().append_pair("token", &token.token);
    Ok(url)
}

/// Read frames until the stream ends, an error occurs, or shutdown fires.
///
/// Malformed frames are logged and skipped; the connection survives bad
/// data and only drops on transport errors.
async fn read_frames(
    stream: &mut WsStream,
    store: &StoreHandle,
    events: &mpsc::UnboundedSender<SyncEvent>,
    last_cursor: &mut Option<String>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<EventEnvelope>(&text) {
                Ok(envelope) => {
                    if envelope.event_cursor.is_some() {
                        last_cursor.clone_from(&envelope.event_cursor);
                    }
                    for evt in apply_event(store, &envelope) {
                        let _ = events.send(evt);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed event frame, skipping");
                }
            },
            Some(Ok(WsMessage::Close(_))) => {
                tracing::info!("realtime stream closed by server");
                return;
            }
            Some(Ok(
                WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_),
            )) => {
                // Only text frames carry events.
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "realtime stream read error");
                return;
            }
            None => return,
        }
    }
}

/// Apply one event envelope to the store and report what changed.
///
/// Unknown event types are ignored for forward compatibility. Events that
/// reference chats or messages the store does not know are skipped; the
/// record will arrive through its own event or the next refresh.
pub(crate) fn apply_event(store: &StoreHandle, envelope: &EventEnvelope) -> Vec<SyncEvent> {
    match envelope.kind.as_str() {
        CHAT_UPDATED => {
            let Some(chat) = &envelope.chat else {
                tracing::debug!("chat.updated without chat payload");
                return Vec::new();
            };
            store.upsert_chat(chat);
            vec![SyncEvent::ChatsChanged]
        }
        MESSAGE_CREATED | MESSAGE_UPDATED | RECEIPT_UPDATED => {
            let Some(message) = &envelope.message else {
                tracing::debug!(kind = %envelope.kind, "event without message payload");
                return Vec::new();
            };
            let Some(chat_id) = store.local_chat_id(&message.chat_id) else {
                tracing::debug!(remote_chat = %message.chat_id, "event for unknown chat, skipping");
                return Vec::new();
            };
            if store
                .upsert_message(chat_id, message, MergeOrigin::Realtime)
                .is_none()
            {
                return Vec::new();
            }
            vec![
                SyncEvent::MessagesChanged(chat_id),
                SyncEvent::ChatsChanged,
            ]
        }
        MESSAGE_DELETED => {
            let Some(remote_id) = &envelope.message_id else {
                tracing::debug!("message.deleted without message id");
                return Vec::new();
            };
            match store.remove_message_by_remote(remote_id) {
                Some((chat_id, _)) => vec![
                    SyncEvent::MessagesChanged(chat_id),
                    SyncEvent::ChatsChanged,
                ],
                // Already gone; deletes are idempotent.
                None => Vec::new(),
            }
        }
        other => {
            tracing::debug!(kind = %other, "unknown event type ignored");
            Vec::new()
        }
    }
}

fn publish(
    state_tx: &watch::Sender<ConnectionState>,
    events: &mpsc::UnboundedSender<SyncEvent>,
    state: ConnectionState,
) {
    let _ = events.send(SyncEvent::ConnectionChanged(state.clone()));
    let _ = state_tx.send(state);
}
