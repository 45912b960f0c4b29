// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for chat lifecycle operations: optimistic creation
//! with id reconciliation, sends racing the create call, flag patches,
//! read marks, and deletion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use teamchat::backend::{HttpBackend, RestMedia, StaticToken};
use teamchat::config::{ReconnectConfig, SyncConfig};
use teamchat::outbox::MemoryOutboxStorage;
use teamchat::realtime::ConnectionState;
use teamchat::search::NoClips;
use teamchat::sync::{self, EngineConfig, SyncEvent, SyncHandle};
use teamchat_api::chat::{ChatKind, ChatPatch};
use teamchat_api::event::{EventEnvelope, MESSAGE_CREATED};
use teamchat_api::ids::{MessageId, UserId};
use teamchat_api::message::MessageStatus;
use teamchat_stub::server::start_server_with_state;
use teamchat_stub::state::StubState;

const TOKEN: &str = "test-token";

type Engine = SyncHandle<
    HttpBackend<StaticToken>,
    RestMedia<HttpBackend<StaticToken>>,
    NoClips,
    MemoryOutboxStorage,
>;

// =============================================================================
// Helpers
// =============================================================================

async fn start_stub() -> (SocketAddr, Arc<StubState>, tokio::task::JoinHandle<()>) {
    let state = Arc::new(StubState::with_token(TOKEN));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start stub server");
    (addr, state, handle)
}

async fn start_engine(addr: SocketAddr) -> (Engine, mpsc::UnboundedReceiver<SyncEvent>) {
    let base = Url::parse(&format!("http://{addr}/")).expect("stub url");
    let backend = HttpBackend::new(base.clone(), StaticToken::new(TOKEN)).expect("backend");
    let media_backend = HttpBackend::new(base.clone(), StaticToken::new(TOKEN)).expect("backend");
    let media = RestMedia::new(Arc::new(media_backend)).expect("media service");
    let config = EngineConfig {
        server_url: base,
        sync: SyncConfig {
            dispatch_interval: Duration::from_millis(100),
            retry_cap: Duration::from_millis(500),
            page_size: 50,
            send_timeout: Duration::from_secs(5),
        },
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: Duration::ZERO,
            connect_timeout: Duration::from_secs(5),
        },
    };
    sync::start(backend, media, NoClips, MemoryOutboxStorage::new(), config).await
}

/// Wait for a specific `SyncEvent` matching a predicate, with timeout.
///
/// Skips non-matching events. Panics on timeout or channel close.
async fn wait_for_event<F>(
    rx: &mut mpsc::UnboundedReceiver<SyncEvent>,
    timeout: Duration,
    description: &str,
    pred: F,
) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

async fn wait_for_connected(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) {
    wait_for_event(
        rx,
        Duration::from_secs(10),
        "ConnectionChanged(Connected)",
        |evt| matches!(evt, SyncEvent::ConnectionChanged(ConnectionState::Connected)),
    )
    .await;
}

async fn wait_for_sent(rx: &mut mpsc::UnboundedReceiver<SyncEvent>, message_id: MessageId) {
    wait_for_event(
        rx,
        Duration::from_secs(10),
        "MessageStatusChanged { status: Sent }",
        |evt| {
            matches!(
                evt,
                SyncEvent::MessageStatusChanged {
                    message_id: id,
                    status: MessageStatus::Sent,
                } if *id == message_id
            )
        },
    )
    .await;
}

/// Poll a local-state condition until it holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(description: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timeout waiting until {description}");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        out.push(evt);
    }
    out
}

// =============================================================================
// Test 1: Group creation is optimistic and reconciles onto the local id
// =============================================================================

#[tokio::test]
async fn group_create_reconciles_onto_local_id() {
    let (addr, state, _server) = start_stub().await;
    let (engine, mut rx) = start_engine(addr).await;
    wait_for_connected(&mut rx).await;

    let chat_id = engine
        .create_group_chat("Elternabend", vec![UserId::new("u2"), UserId::new("u3")])
        .await;

    // The chat is usable immediately, before the create call lands.
    let chats = engine.chats();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, chat_id);
    assert_eq!(chats[0].title, "Elternabend");
    assert_eq!(chats[0].kind, ChatKind::Group);

    wait_until("the server id is adopted", || {
        engine.chats().first().is_some_and(|c| c.remote_id.is_some())
    })
    .await;

    // The stub echoed chat.updated over the stream; the echo must have
    // merged onto the optimistic record, not created a second chat.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let chats = engine.chats();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, chat_id);

    let remote_id = chats[0].remote_id.clone().expect("remote id adopted");
    let server_chat = state.chat(remote_id.as_str()).await.expect("chat on server");
    assert_eq!(server_chat.title, "Elternabend");
    assert_eq!(server_chat.kind, ChatKind::Group);
    let participant_ids: Vec<_> = server_chat
        .participants
        .iter()
        .map(|p| p.user_id.as_str().to_string())
        .collect();
    for expected in ["u1", "u2", "u3"] {
        assert!(
            participant_ids.contains(&expected.to_string()),
            "missing participant {expected}: {participant_ids:?}"
        );
    }

    engine.shutdown().await;
}

// =============================================================================
// Test 2: A send racing the create call delivers once the chat exists
// =============================================================================

#[tokio::test]
async fn send_into_fresh_chat_delivers_after_create_lands() {
    let (addr, state, _server) = start_stub().await;
    let (engine, mut rx) = start_engine(addr).await;

    let chat_id = engine.create_group_chat("Ausflug", vec![]).await;
    // Enqueued while the create response may still be in flight.
    let message_id = engine
        .send_text(chat_id, "Willkommen!", None)
        .await
        .expect("send_text failed");

    wait_for_sent(&mut rx, message_id).await;

    let chats = engine.chats();
    let remote_id = chats[0].remote_id.clone().expect("remote id adopted");
    let server_messages = state.messages_in(remote_id.as_str()).await;
    assert_eq!(server_messages.len(), 1);
    assert_eq!(server_messages[0].text, "Willkommen!");
    assert_eq!(engine.outbox_len(), 0);

    engine.shutdown().await;
}

// =============================================================================
// Test 3: When the create call fails, sends stay queued without attempts
// =============================================================================

#[tokio::test]
async fn failed_create_keeps_sends_queued() {
    let (addr, state, _server) = start_stub().await;
    let (engine, mut rx) = start_engine(addr).await;
    state.set_fail_requests(true);

    let chat_id = engine.create_group_chat("Offline Gruppe", vec![]).await;
    let message_id = engine
        .send_text(chat_id, "wartet noch", None)
        .await
        .expect("send_text failed");

    // Several dispatch ticks pass; with no server chat id the item is
    // deferred, not attempted, so the message never flips to failed.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.outbox_len(), 1);
    assert_eq!(engine.messages(chat_id)[0].status, MessageStatus::Queued);
    assert!(engine.chats()[0].remote_id.is_none());
    assert!(
        state.list_chats(50, true, None, None).await.items.is_empty(),
        "no chat may exist server-side"
    );
    assert!(
        !drain(&mut rx)
            .iter()
            .any(|e| matches!(e, SyncEvent::SendFailed { message_id: id, .. } if *id == message_id)),
        "a deferred send must not report failure"
    );

    engine.shutdown().await;
}

// =============================================================================
// Test 4: Pin and archive patches round-trip to the server
// =============================================================================

#[tokio::test]
async fn pin_and_archive_round_trip() {
    let (addr, state, _server) = start_stub().await;
    let remote = state.seed_chat("Orga").await;
    let (engine, _rx) = start_engine(addr).await;
    let chat_id = engine.chats()[0].id;

    engine
        .update_chat(chat_id, ChatPatch::pin(true))
        .await
        .expect("pin failed");
    assert!(engine.chats()[0].pinned, "pin applies optimistically");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !state.chat(remote.id.as_str()).await.expect("chat").pinned {
        assert!(
            tokio::time::Instant::now() < deadline,
            "pin never reached the server"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    engine
        .update_chat(chat_id, ChatPatch::archive(true))
        .await
        .expect("archive failed");
    // Archived chats leave the visible list immediately.
    assert!(engine.chats().is_empty());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !state.chat(remote.id.as_str()).await.expect("chat").archived {
        assert!(
            tokio::time::Instant::now() < deadline,
            "archive never reached the server"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    engine.shutdown().await;
}

// =============================================================================
// Test 5: Mark-read zeroes unread and reports the position
// =============================================================================

#[tokio::test]
async fn mark_read_zeroes_unread_and_reports_position() {
    let (addr, state, _server) = start_stub().await;
    let remote = state.seed_chat("U17 Training").await;
    let (engine, mut rx) = start_engine(addr).await;
    wait_for_connected(&mut rx).await;
    let chat_id = engine.chats()[0].id;

    let msg = state
        .seed_message(remote.id.as_str(), "u2", "Trainer", "Aufstellung steht")
        .await;
    let mut envelope = EventEnvelope::bare(MESSAGE_CREATED);
    envelope.message = Some(msg.clone());
    state.push_event(envelope).await;
    wait_until("the unread count bumps", || engine.unread_total() == 1).await;

    engine
        .mark_chat_read(chat_id)
        .await
        .expect("mark_chat_read failed");
    assert_eq!(engine.unread_total(), 0);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.read_mark(remote.id.as_str()).await != Some(msg.id.clone()) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "read mark never reached the server"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    engine.shutdown().await;
}

// =============================================================================
// Test 6: Deleting a message removes it locally and remotely
// =============================================================================

#[tokio::test]
async fn delete_message_removes_local_and_remote() {
    let (addr, state, _server) = start_stub().await;
    let remote = state.seed_chat("Orga").await;
    let (engine, mut rx) = start_engine(addr).await;
    wait_for_connected(&mut rx).await;
    let chat_id = engine.chats()[0].id;

    let message_id = engine
        .send_text(chat_id, "Tippfehler", None)
        .await
        .expect("send_text failed");
    wait_for_sent(&mut rx, message_id).await;

    engine
        .delete_message(chat_id, message_id)
        .await
        .expect("delete_message failed");
    assert!(engine.messages(chat_id).is_empty(), "local delete is immediate");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !state.messages_in(remote.id.as_str()).await.is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "remote delete never happened"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // The stub broadcasts message.deleted for the remote delete; replaying
    // it onto the already-removed message is a no-op.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.messages(chat_id).is_empty());

    engine.shutdown().await;
}
