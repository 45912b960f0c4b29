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

//! Integration tests for search aggregation: the immediate local pass,
//! the remote merge, duplicate suppression, clip catalog hits, and the
//! degraded path when the remote index is unreachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use teamchat::backend::{HttpBackend, RestMedia, StaticToken};
use teamchat::config::{ReconnectConfig, SyncConfig};
use teamchat::outbox::MemoryOutboxStorage;
use teamchat::search::{ClipCatalog, ClipEntry};
use teamchat::sync::{self, EngineConfig, SyncEvent, SyncHandle};
use teamchat_api::chat::{ChatKind, RemoteChat, WritePermission};
use teamchat_api::ids::{RemoteChatId, Timestamp};
use teamchat_api::message::ClipRef;
use teamchat_api::rest::{SearchKind, SearchResult};
use teamchat_stub::server::start_server_with_state;
use teamchat_stub::state::StubState;

const TOKEN: &str = "test-token";

/// Catalog serving a fixed clip list, standing in for the analysis
/// library of the embedding app.
#[derive(Clone)]
struct FixedClips(Vec<ClipEntry>);

impl ClipCatalog for FixedClips {
    async fn entries(&self) -> Vec<ClipEntry> {
        self.0.clone()
    }
}

type Engine = SyncHandle<
    HttpBackend<StaticToken>,
    RestMedia<HttpBackend<StaticToken>>,
    FixedClips,
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

async fn start_engine(
    addr: SocketAddr,
    clips: Vec<ClipEntry>,
) -> (Engine, mpsc::UnboundedReceiver<SyncEvent>) {
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
    sync::start(
        backend,
        media,
        FixedClips(clips),
        MemoryOutboxStorage::new(),
        config,
    )
    .await
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

/// Wait for the next `SearchResults` event and unwrap its payload.
async fn wait_for_results(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SearchResult> {
    let evt = wait_for_event(rx, Duration::from_secs(10), "SearchResults", |evt| {
        matches!(evt, SyncEvent::SearchResults(_))
    })
    .await;
    match evt {
        SyncEvent::SearchResults(results) => results,
        other => panic!("expected SearchResults, got: {other:?}"),
    }
}

/// Count buffered `SearchResults` events without blocking.
fn drained_result_count(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> usize {
    let mut count = 0;
    while let Ok(evt) = rx.try_recv() {
        if matches!(evt, SyncEvent::SearchResults(_)) {
            count += 1;
        }
    }
    count
}

/// A server-side chat record with controlled timestamps.
fn remote_chat(id: &str, title: &str, at: u64) -> RemoteChat {
    RemoteChat {
        id: RemoteChatId::new(id),
        title: title.to_string(),
        kind: ChatKind::Group,
        participants: vec![],
        last_message_preview: None,
        last_message_at: Some(Timestamp::from_millis(at)),
        unread_count: 0,
        pinned: false,
        muted: false,
        archived: false,
        write_permission: WritePermission::Everyone,
        temporary_until: None,
        created_at: Timestamp::from_millis(at),
        updated_at: Timestamp::from_millis(at),
    }
}

fn clip_entry(title: &str, label: &str, at: u64) -> ClipEntry {
    ClipEntry {
        clip: ClipRef {
            clip_id: "clip-7".into(),
            start_ms: 0,
            end_ms: 8_000,
            label: Some(label.to_string()),
        },
        title: title.to_string(),
        recorded_at: Timestamp::from_millis(at),
    }
}

// =============================================================================
// Test 1: The local pass lands first, the merge adds remote-only hits
// =============================================================================

#[tokio::test]
async fn local_pass_precedes_remote_merge() {
    let (addr, state, _server) = start_stub().await;
    let remote = state.seed_chat("U17 Training").await;
    // A message the client never loaded; only the remote index knows it.
    state
        .seed_message(remote.id.as_str(), "u2", "Trainer", "Training fällt aus")
        .await;

    let (engine, mut rx) = start_engine(addr, vec![]).await;
    engine.search("Training").await;

    // First event: cached state only. The chat matched (its preview is the
    // seeded message), the message itself is not cached.
    let local = wait_for_results(&mut rx).await;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].kind, SearchKind::Chat);
    assert_eq!(local[0].title, "U17 Training");
    assert_eq!(local[0].subtitle, "Training fällt aus");

    // Second event: the merged set. The remote chat hit collapsed into the
    // local one; the remote message hit is new.
    let merged = wait_for_results(&mut rx).await;
    assert_eq!(merged.len(), 2);
    assert_eq!(
        merged
            .iter()
            .filter(|r| r.kind == SearchKind::Chat)
            .count(),
        1
    );
    let message_hit = merged
        .iter()
        .find(|r| r.kind == SearchKind::Message)
        .expect("remote message hit");
    assert_eq!(message_hit.title, "U17 Training");
    assert_eq!(message_hit.subtitle, "Training fällt aus");

    engine.shutdown().await;
}

// =============================================================================
// Test 2: Combined results order most recent first, clips included
// =============================================================================

#[tokio::test]
async fn results_order_most_recent_first_with_clips() {
    let (addr, state, _server) = start_stub().await;
    state.put_chat(remote_chat("c1", "Altes Training", 1_000)).await;
    state.put_chat(remote_chat("c2", "Neues Training", 2_000)).await;

    let clips = vec![clip_entry("Spiel vs. Blau-Weiß", "Pressing Training", 500)];
    let (engine, mut rx) = start_engine(addr, clips).await;
    engine.search("training").await;

    let local = wait_for_results(&mut rx).await;
    let titles: Vec<_> = local.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Neues Training", "Altes Training", "Spiel vs. Blau-Weiß"]
    );
    assert_eq!(local[2].kind, SearchKind::Clip);
    assert_eq!(local[2].subtitle, "Pressing Training");

    // The merge re-finds both chats remotely, drops the duplicates, and
    // keeps the order.
    let merged = wait_for_results(&mut rx).await;
    let titles: Vec<_> = merged.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(
        titles,
        vec!["Neues Training", "Altes Training", "Spiel vs. Blau-Weiß"]
    );

    engine.shutdown().await;
}

// =============================================================================
// Test 3: An empty query stays local and silent
// =============================================================================

#[tokio::test]
async fn empty_query_emits_local_only_once() {
    let (addr, state, _server) = start_stub().await;
    state.seed_chat("Orga").await;
    let (engine, mut rx) = start_engine(addr, vec![]).await;

    engine.search("   ").await;

    let local = wait_for_results(&mut rx).await;
    assert!(local.is_empty());

    // No remote call happens, so no second result set ever arrives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(drained_result_count(&mut rx), 0);

    engine.shutdown().await;
}

// =============================================================================
// Test 4: A failing remote index degrades to the local set silently
// =============================================================================

#[tokio::test]
async fn remote_failure_keeps_local_results() {
    let (addr, state, _server) = start_stub().await;
    state.seed_chat("U17 Training").await;
    let (engine, mut rx) = start_engine(addr, vec![]).await;

    state.set_fail_requests(true);
    engine.search("U17").await;

    let local = wait_for_results(&mut rx).await;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].title, "U17 Training");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        drained_result_count(&mut rx),
        0,
        "a failed remote search must not emit a second set"
    );

    engine.shutdown().await;
}
