//! axum server exposing the backend's REST surface and realtime stream.
//!
//! Every REST handler runs the same gate: bearer credential first, then the
//! transient-failure switch. Mutating handlers broadcast the matching
//! realtime event after committing, so a connected client sees its own
//! writes echoed back, in whichever order the response and the frame race.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post, put};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use teamchat_api::chat::{ChatPatch, RemoteChat};
use teamchat_api::event::{CHAT_UPDATED, EventEnvelope, MESSAGE_CREATED, MESSAGE_DELETED};
use teamchat_api::ids::{RemoteChatId, RemoteMessageId};
use teamchat_api::message::RemoteMessage;
use teamchat_api::rest::{
    CreateChatRequest, MarkReadRequest, MediaCompletion, MediaTicket, Page, RealtimeToken,
    RegisterMediaRequest, SearchResult, SendMessageRequest, UserProfile,
};

use crate::config::DEFAULT_AUTH_TOKEN;
use crate::state::StubState;

/// Header carried by media upload tickets and required on the byte upload.
const UPLOAD_TOKEN_HEADER: &str = "x-upload-token";

/// Starts the stub server on the given address with a default state and
/// the development credential.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StubState::with_token(DEFAULT_AUTH_TOKEN))).await
}

/// Starts the stub server with a pre-configured [`StubState`].
///
/// Tests keep their own `Arc` to the state so they can seed records, flip
/// failure switches and broadcast events while the server runs.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StubState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/me", get(identity))
        .route("/chats", get(list_chats))
        .route("/chats/direct", post(create_chat))
        .route("/chats/group", post(create_chat))
        .route("/chats/{chat}", patch(update_chat))
        .route(
            "/chats/{chat}/messages",
            get(message_history).post(send_message),
        )
        .route("/chats/{chat}/read", post(mark_read))
        .route("/messages/{message}", delete(delete_message))
        .route("/search", get(search))
        .route("/media", post(register_media))
        .route("/media/{media}/bytes", put(upload_media))
        .route("/media/{media}/complete", post(complete_media))
        .route("/realtime/token", get(realtime_token))
        .route("/events", get(stream_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "stub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// Extracts the bearer credential from the Authorization header.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Common REST gate: credential check, then the transient-failure switch.
fn gate(state: &StubState, headers: &HeaderMap) -> Result<(), StatusCode> {
    if !state.authorize(bearer(headers)) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if state.fail_requests() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(())
}

async fn identity(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<UserProfile>, StatusCode> {
    gate(&state, &headers)?;
    Ok(Json(state.profile()))
}

fn default_limit() -> usize {
    50
}

#[derive(Deserialize)]
struct ChatListParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    archived: bool,
    cursor: Option<String>,
    query: Option<String>,
}

async fn list_chats(
    State(state): State<Arc<StubState>>,
    Query(params): Query<ChatListParams>,
    headers: HeaderMap,
) -> Result<Json<Page<RemoteChat>>, StatusCode> {
    gate(&state, &headers)?;
    let page = state
        .list_chats(
            params.limit,
            params.archived,
            params.query.as_deref(),
            params.cursor.as_deref(),
        )
        .await;
    Ok(Json(page))
}

async fn create_chat(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<RemoteChat>, StatusCode> {
    gate(&state, &headers)?;
    let chat = state
        .create_chat(req.kind, req.title.clone(), &req.participant_ids)
        .await;

    let mut envelope = EventEnvelope::bare(CHAT_UPDATED);
    envelope.chat = Some(chat.clone());
    state.push_event(envelope).await;

    Ok(Json(chat))
}

async fn update_chat(
    State(state): State<Arc<StubState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatPatch>,
) -> Result<Json<RemoteChat>, StatusCode> {
    gate(&state, &headers)?;
    let chat = state
        .patch_chat(&chat_id, &body)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut envelope = EventEnvelope::bare(CHAT_UPDATED);
    envelope.chat = Some(chat.clone());
    state.push_event(envelope).await;

    Ok(Json(chat))
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: usize,
    cursor: Option<String>,
}

async fn message_history(
    State(state): State<Arc<StubState>>,
    Path(chat_id): Path<String>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<Page<RemoteMessage>>, StatusCode> {
    gate(&state, &headers)?;
    let page = state
        .message_page(&chat_id, params.limit, params.cursor.as_deref())
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(page))
}

async fn send_message(
    State(state): State<Arc<StubState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<RemoteMessage>, StatusCode> {
    gate(&state, &headers)?;
    if state.reject_sends() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let message = state
        .append_message(&chat_id, &req)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut envelope = EventEnvelope::bare(MESSAGE_CREATED);
    envelope.message = Some(message.clone());
    state.push_event(envelope).await;

    Ok(Json(message))
}

async fn delete_message(
    State(state): State<Arc<StubState>>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    gate(&state, &headers)?;
    let chat_id = state
        .delete_message(&message_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut envelope = EventEnvelope::bare(MESSAGE_DELETED);
    envelope.chat_id = Some(RemoteChatId::new(chat_id));
    envelope.message_id = Some(RemoteMessageId::new(message_id));
    state.push_event(envelope).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn mark_read(
    State(state): State<Arc<StubState>>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MarkReadRequest>,
) -> Result<StatusCode, StatusCode> {
    gate(&state, &headers)?;
    if state.mark_read(&chat_id, body.last_read_message_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn search(
    State(state): State<Arc<StubState>>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
) -> Result<Json<Page<SearchResult>>, StatusCode> {
    gate(&state, &headers)?;
    Ok(Json(state.search(&params.query, params.limit).await))
}

async fn register_media(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterMediaRequest>,
) -> Result<Json<MediaTicket>, StatusCode> {
    gate(&state, &headers)?;
    let media_id = state.register_media(&req).await;

    // Upload URL points back at this server; the pre-signed credential is
    // carried in the ticket headers, not the Authorization header.
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1");
    let upload_url = format!("http://{host}/media/{media_id}/bytes");
    let upload_headers = std::iter::once((
        UPLOAD_TOKEN_HEADER.to_string(),
        state.stream_token(),
    ))
    .collect();

    Ok(Json(MediaTicket {
        media_id,
        upload_url,
        upload_headers,
    }))
}

async fn upload_media(
    State(state): State<Arc<StubState>>,
    Path(media_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, StatusCode> {
    let ticket_token = headers
        .get(UPLOAD_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if !state.authorize(ticket_token) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if state.media_uploaded(&media_id).await {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn complete_media(
    State(state): State<Arc<StubState>>,
    Path(media_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MediaCompletion>, StatusCode> {
    gate(&state, &headers)?;
    let ready = state
        .complete_media(&media_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(MediaCompletion { ready }))
}

async fn realtime_token(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> Result<Json<RealtimeToken>, StatusCode> {
    gate(&state, &headers)?;
    Ok(Json(RealtimeToken {
        token: state.stream_token(),
        url: None,
    }))
}

#[derive(Deserialize)]
struct StreamParams {
    token: String,
}

/// Upgrades a stream request after validating the token query parameter.
async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<StreamParams>,
    State(state): State<Arc<StubState>>,
) -> axum::response::Response {
    if state.refuse_streams() {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !state.authorize(Some(params.token.as_str())) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// Handles one upgraded stream connection until either side closes.
///
/// A writer task forwards broadcast frames from the connection's channel;
/// the reader drains client frames (the stream is server-to-client, so
/// anything but a close frame is ignored). Whichever task finishes first
/// aborts the other, then the connection is unregistered.
async fn handle_stream(socket: WebSocket, state: Arc<StubState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection_id = state.register_connection(tx).await;
    tracing::info!(connection = %connection_id, "stream connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister_connection(connection_id).await;
    tracing::info!(connection = %connection_id, "stream disconnected");
}

/// Starts the stub in-process for testing, bound to an OS-assigned port.
#[cfg(test)]
async fn start_test_server() -> (
    std::net::SocketAddr,
    Arc<StubState>,
    tokio::task::JoinHandle<()>,
) {
    let state = Arc::new(StubState::with_token("test-token"));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start test server");
    (addr, state, handle)
}
