//! `reqwest`-backed implementation of the [`Backend`] trait, plus the
//! two-phase media uploader.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use teamchat_api::chat::{ChatKind, ChatPatch, RemoteChat};
use teamchat_api::ids::{RemoteChatId, RemoteMessageId};
use teamchat_api::message::{Attachment, RemoteMessage};
use teamchat_api::rest::{
    ChatListQuery, CreateChatRequest, MarkReadRequest, MediaCompletion, MediaTicket, Page,
    RealtimeToken, RegisterMediaRequest, SearchQuery, SearchResult, SendMessageRequest,
    UserProfile,
};

use super::{Backend, BackendError, MediaError, MediaService, TokenProvider};

/// Connection establishment timeout for backend requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of response-body bytes kept in error details.
const ERROR_DETAIL_LIMIT: usize = 200;

/// REST client for the service of record.
///
/// Holds the base URL, a shared connection pool and the token provider;
/// cheap to clone would be wrong here, so share it behind an `Arc`.
pub struct HttpBackend<T> {
    base: Url,
    client: reqwest::Client,
    tokens: T,
}

impl<T: TokenProvider> HttpBackend<T> {
    /// Creates a backend client with a default connection pool.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if the TLS backend cannot be
    /// initialized.
    pub fn new(base_url: Url, tokens: T) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, client, tokens))
    }

    /// Creates a backend client from a pre-built `reqwest` client.
    #[must_use]
    pub fn with_client(mut base_url: Url, client: reqwest::Client, tokens: T) -> Self {
        // join() treats the last path segment as a file unless it ends
        // with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base: base_url,
            client,
            tokens,
        }
    }

    /// The normalized base URL this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base.join(path).map_err(|e| BackendError::Malformed {
            detail: format!("bad endpoint {path}: {e}"),
        })
    }

    async fn execute<R: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<R, BackendError> {
        let resp = self.dispatch(req).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, body_excerpt(resp).await));
        }
        resp.json::<R>().await.map_err(|e| BackendError::Malformed {
            detail: e.to_string(),
        })
    }

    /// Variant for endpoints whose success response carries no body.
    async fn execute_empty(&self, req: reqwest::RequestBuilder) -> Result<(), BackendError> {
        let resp = self.dispatch(req).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_for_status(status, body_excerpt(resp).await));
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let token = self.tokens.bearer_token().await?;
        req.bearer_auth(token)
            .send()
            .await
            .map_err(|e| BackendError::Connectivity {
                detail: e.to_string(),
            })
    }
}

/// Maps a non-success HTTP status onto the retry taxonomy.
fn error_for_status(status: StatusCode, detail: String) -> BackendError {
    if status == StatusCode::UNAUTHORIZED {
        BackendError::Unauthorized
    } else if status.is_server_error() {
        BackendError::Server {
            status: status.as_u16(),
        }
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            detail,
        }
    }
}

async fn body_excerpt(resp: reqwest::Response) -> String {
    let mut text = resp.text().await.unwrap_or_default();
    text.truncate(ERROR_DETAIL_LIMIT);
    text
}

impl<T: TokenProvider> Backend for HttpBackend<T> {
    async fn identity(&self) -> Result<UserProfile, BackendError> {
        let url = self.endpoint("me")?;
        self.execute(self.client.get(url)).await
    }

    async fn list_chats(&self, query: &ChatListQuery) -> Result<Page<RemoteChat>, BackendError> {
        let mut url = self.endpoint("chats")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &query.limit.to_string());
            pairs.append_pair("archived", if query.archived { "true" } else { "false" });
            if let Some(cursor) = &query.cursor {
                pairs.append_pair("cursor", cursor);
            }
            if let Some(q) = &query.query {
                pairs.append_pair("query", q);
            }
        }
        self.execute(self.client.get(url)).await
    }

    async fn create_chat(&self, req: &CreateChatRequest) -> Result<RemoteChat, BackendError> {
        let path = match req.kind {
            ChatKind::Direct => "chats/direct",
            ChatKind::Group => "chats/group",
        };
        let url = self.endpoint(path)?;
        self.execute(self.client.post(url).json(req)).await
    }

    async fn update_chat(
        &self,
        chat: &RemoteChatId,
        patch: &ChatPatch,
    ) -> Result<RemoteChat, BackendError> {
        let url = self.endpoint(&format!("chats/{chat}"))?;
        self.execute(self.client.patch(url).json(patch)).await
    }

    async fn message_history(
        &self,
        chat: &RemoteChatId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Page<RemoteMessage>, BackendError> {
        let mut url = self.endpoint(&format!("chats/{chat}/messages"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        self.execute(self.client.get(url)).await
    }

    async fn send_message(
        &self,
        chat: &RemoteChatId,
        req: &SendMessageRequest,
    ) -> Result<RemoteMessage, BackendError> {
        let url = self.endpoint(&format!("chats/{chat}/messages"))?;
        self.execute(self.client.post(url).json(req)).await
    }

    async fn delete_message(&self, message: &RemoteMessageId) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("messages/{message}"))?;
        self.execute_empty(self.client.delete(url)).await
    }

    async fn mark_read(
        &self,
        chat: &RemoteChatId,
        req: &MarkReadRequest,
    ) -> Result<(), BackendError> {
        let url = self.endpoint(&format!("chats/{chat}/read"))?;
        self.execute_empty(self.client.post(url).json(req)).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Page<SearchResult>, BackendError> {
        let mut url = self.endpoint("search")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("query", &query.query);
            pairs.append_pair("limit", &query.limit.to_string());
            pairs.append_pair(
                "includeArchived",
                if query.include_archived { "true" } else { "false" },
            );
            if let Some(cursor) = &query.cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        self.execute(self.client.get(url)).await
    }

    async fn register_media(&self, req: &RegisterMediaRequest) -> Result<MediaTicket, BackendError> {
        let url = self.endpoint("media")?;
        self.execute(self.client.post(url).json(req)).await
    }

    async fn complete_media(&self, media_id: &str) -> Result<MediaCompletion, BackendError> {
        let url = self.endpoint(&format!("media/{media_id}/complete"))?;
        self.execute(self.client.post(url)).await
    }

    async fn realtime_token(&self) -> Result<RealtimeToken, BackendError> {
        let url = self.endpoint("realtime/token")?;
        self.execute(self.client.get(url)).await
    }
}

/// Media collaborator that registers the upload with the backend, PUTs the
/// bytes to the returned URL, then confirms completion.
pub struct RestMedia<B> {
    backend: Arc<B>,
    client: reqwest::Client,
}

impl<B: Backend> RestMedia<B> {
    /// Creates the uploader sharing the given backend.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error if the TLS backend cannot be
    /// initialized.
    pub fn new(backend: Arc<B>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { backend, client })
    }
}

impl<B: Backend> MediaService for RestMedia<B> {
    async fn upload(&self, source_path: &str) -> Result<Attachment, MediaError> {
        let bytes = tokio::fs::read(source_path)
            .await
            .map_err(|e| MediaError::Source {
                detail: format!("{source_path}: {e}"),
            })?;

        let file_name = std::path::Path::new(source_path)
            .file_name()
            .map_or_else(|| "upload.bin".to_string(), |n| n.to_string_lossy().into_owned());
        let mime = mime_for_path(source_path);

        let ticket = self
            .backend
            .register_media(&RegisterMediaRequest {
                file_name,
                mime_type: mime.to_string(),
                size: Some(bytes.len() as u64),
            })
            .await?;

        let mut put = self.client.put(&ticket.upload_url);
        for (name, value) in &ticket.upload_headers {
            put = put.header(name, value);
        }
        let resp = put.body(bytes).send().await.map_err(|e| MediaError::Upload {
            detail: e.to_string(),
        })?;
        if !resp.status().is_success() {
            return Err(MediaError::Upload {
                detail: format!("status {}", resp.status()),
            });
        }

        let completion = self.backend.complete_media(&ticket.media_id).await?;
        if !completion.ready {
            return Err(MediaError::NotReady);
        }

        Ok(Attachment {
            media_id: ticket.media_id,
            url: None,
            mime_type: Some(mime.to_string()),
            width: None,
            height: None,
            duration_ms: None,
        })
    }
}

/// Best-effort MIME type from the file extension.
fn mime_for_path(path: &str) -> &'static str {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}
