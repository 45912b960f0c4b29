//! Search aggregation over cached state and the remote index.
//!
//! A query gets two passes: an immediate local pass over cached chat
//! titles, message texts, and clip references, then a remote pass whose
//! results merge into the local set. De-duplication runs on the triple
//! (kind, title, subtitle) with local hits winning, and the combined set
//! is ordered by most recent occurrence.

use std::collections::HashSet;

use teamchat_api::ids::Timestamp;
use teamchat_api::message::ClipRef;
use teamchat_api::rest::{SearchKind, SearchResult};

use crate::store::StoreSnapshot;

/// One clip reference from the local analysis catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipEntry {
    /// The clip itself, as it would be attached to a message.
    pub clip: ClipRef,
    /// Display title of the recording the clip belongs to.
    pub title: String,
    /// When the recording was made.
    pub recorded_at: Timestamp,
}

/// Source of clip references for the local search pass.
///
/// The embedding app backs this with its analysis library; [`NoClips`]
/// serves deployments without one.
pub trait ClipCatalog: Send + Sync + 'static {
    /// List all clip references available for local search.
    fn entries(&self) -> impl std::future::Future<Output = Vec<ClipEntry>> + Send;
}

/// A catalog with no clips.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClips;

impl ClipCatalog for NoClips {
    async fn entries(&self) -> Vec<ClipEntry> {
        Vec::new()
    }
}

/// Case-insensitive substring search over cached state.
///
/// An empty or whitespace query matches nothing. Results come back already
/// ordered by most recent occurrence.
#[must_use]
pub fn local_results(
    snapshot: &StoreSnapshot,
    clips: &[ClipEntry],
    query: &str,
) -> Vec<SearchResult> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();

    for chat in &snapshot.chats {
        if chat.title.to_lowercase().contains(&needle) {
            results.push(SearchResult {
                kind: SearchKind::Chat,
                title: chat.title.clone(),
                subtitle: chat.last_message_preview.clone().unwrap_or_default(),
                occurred_at: Some(chat.last_message_at.unwrap_or(chat.created_at)),
            });
        }
    }

    for message in &snapshot.messages {
        if message.text.to_lowercase().contains(&needle) {
            let chat_title = snapshot
                .chats
                .iter()
                .find(|c| c.id == message.chat_id)
                .map(|c| c.title.clone())
                .unwrap_or_default();
            results.push(SearchResult {
                kind: SearchKind::Message,
                title: chat_title,
                subtitle: message.text.clone(),
                occurred_at: Some(message.created_at),
            });
        }
    }

    for entry in clips {
        let label_matches = entry
            .clip
            .label
            .as_ref()
            .is_some_and(|l| l.to_lowercase().contains(&needle));
        if entry.title.to_lowercase().contains(&needle) || label_matches {
            results.push(SearchResult {
                kind: SearchKind::Clip,
                title: entry.title.clone(),
                subtitle: entry.clip.label.clone().unwrap_or_default(),
                occurred_at: Some(entry.recorded_at),
            });
        }
    }

    sort_recent_first(&mut results);
    results
}

/// Merge remote hits into the local set.
///
/// A remote result whose (kind, title, subtitle) triple already appears
/// locally is dropped; everything else joins the combined, re-sorted set.
#[must_use]
pub fn merge_results(local: Vec<SearchResult>, remote: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<(SearchKind, String, String)> = local
        .iter()
        .map(|r| (r.kind, r.title.clone(), r.subtitle.clone()))
        .collect();

    let mut merged = local;
    for result in remote {
        let key = (result.kind, result.title.clone(), result.subtitle.clone());
        if seen.insert(key) {
            merged.push(result);
        }
    }

    sort_recent_first(&mut merged);
    merged
}

fn sort_recent_first(results: &mut [SearchResult]) {
    // None sorts after every concrete timestamp.
    results.sort_by(|a, b| match (a.occurred_at, b.occurred_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.title.cmp(&b.title)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.title.cmp(&b.title),
    });
}
