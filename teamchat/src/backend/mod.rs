//! Backend seam: the REST operations the engine consumes, the error
//! taxonomy driving retry decisions, and the collaborator contracts for
//! auth tokens and media uploads.
//!
//! The engine never talks HTTP directly; everything goes through the
//! [`Backend`] trait so tests can substitute an in-process implementation.
//! The taxonomy is the load-bearing part: [`BackendError::is_retryable`]
//! decides whether the outbox keeps backing off or halts for an explicit
//! user retry.

pub mod http;

use teamchat_api::chat::{ChatPatch, RemoteChat};
use teamchat_api::ids::{RemoteChatId, RemoteMessageId};
use teamchat_api::message::{Attachment, RemoteMessage};
use teamchat_api::rest::{
    ChatListQuery, CreateChatRequest, MarkReadRequest, MediaCompletion, MediaTicket, Page,
    RealtimeToken, RegisterMediaRequest, SearchQuery, SearchResult, SendMessageRequest,
    UserProfile,
};

pub use http::{HttpBackend, RestMedia};

/// Failure of a backend operation, classified for retry policy.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The network was unreachable or the request timed out.
    #[error("network unreachable: {detail}")]
    Connectivity {
        /// Transport-level detail for logs.
        detail: String,
    },
    /// The server failed transiently (5xx).
    #[error("server error (status {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },
    /// The credential was missing or rejected.
    #[error("unauthorized")]
    Unauthorized,
    /// The server rejected the request permanently (other 4xx).
    #[error("request rejected (status {status}): {detail}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt, if any.
        detail: String,
    },
    /// The response did not match the expected shape.
    #[error("unexpected response: {detail}")]
    Malformed {
        /// Decode failure detail.
        detail: String,
    },
    /// The token provider could not supply a credential.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl BackendError {
    /// Whether automatic retry (outbox backoff, reconnect backoff) applies.
    ///
    /// Connectivity loss, transient server failure and an unavailable token
    /// service are retryable; rejections, bad credentials and malformed
    /// responses stop automatic retry until the user intervenes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::Server { .. } | Self::Auth(AuthError::Unavailable(_))
        )
    }
}

/// Failure reported by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The stored credential is no longer accepted.
    #[error("credential rejected")]
    Unauthorized,
    /// The token service could not be reached.
    #[error("token service unavailable: {0}")]
    Unavailable(String),
}

/// Supplies a bearer credential on demand.
pub trait TokenProvider: Send + Sync + 'static {
    /// Returns a credential suitable for an `Authorization: Bearer` header.
    fn bearer_token(&self) -> impl std::future::Future<Output = Result<String, AuthError>> + Send;
}

/// Token provider backed by a fixed credential from configuration.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a fixed credential.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.0.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        Ok(self.0.clone())
    }
}

/// The REST-style operations of the service of record.
pub trait Backend: Send + Sync + 'static {
    /// Resolves the authenticated user.
    fn identity(
        &self,
    ) -> impl std::future::Future<Output = Result<UserProfile, BackendError>> + Send;

    /// Fetches one page of the chat list.
    fn list_chats(
        &self,
        query: &ChatListQuery,
    ) -> impl std::future::Future<Output = Result<Page<RemoteChat>, BackendError>> + Send;

    /// Creates a direct or group chat.
    fn create_chat(
        &self,
        req: &CreateChatRequest,
    ) -> impl std::future::Future<Output = Result<RemoteChat, BackendError>> + Send;

    /// Applies a partial update to a chat.
    fn update_chat(
        &self,
        chat: &RemoteChatId,
        patch: &ChatPatch,
    ) -> impl std::future::Future<Output = Result<RemoteChat, BackendError>> + Send;

    /// Fetches one page of a chat's message history.
    fn message_history(
        &self,
        chat: &RemoteChatId,
        cursor: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Page<RemoteMessage>, BackendError>> + Send;

    /// Sends a message into a chat, returning the created record.
    fn send_message(
        &self,
        chat: &RemoteChatId,
        req: &SendMessageRequest,
    ) -> impl std::future::Future<Output = Result<RemoteMessage, BackendError>> + Send;

    /// Deletes a message server-side.
    fn delete_message(
        &self,
        message: &RemoteMessageId,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Marks a chat read up to the given message.
    fn mark_read(
        &self,
        chat: &RemoteChatId,
        req: &MarkReadRequest,
    ) -> impl std::future::Future<Output = Result<(), BackendError>> + Send;

    /// Runs a server-side search.
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl std::future::Future<Output = Result<Page<SearchResult>, BackendError>> + Send;

    /// Registers a media upload, returning where to put the bytes.
    fn register_media(
        &self,
        req: &RegisterMediaRequest,
    ) -> impl std::future::Future<Output = Result<MediaTicket, BackendError>> + Send;

    /// Finalizes a media upload.
    fn complete_media(
        &self,
        media_id: &str,
    ) -> impl std::future::Future<Output = Result<MediaCompletion, BackendError>> + Send;

    /// Fetches a credential for the realtime event stream.
    fn realtime_token(
        &self,
    ) -> impl std::future::Future<Output = Result<RealtimeToken, BackendError>> + Send;
}

/// Failure of a media upload.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    /// The local source file could not be read.
    #[error("source file unavailable: {detail}")]
    Source {
        /// IO detail.
        detail: String,
    },
    /// A backend call in the upload flow failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The byte transfer to the upload URL failed.
    #[error("upload failed: {detail}")]
    Upload {
        /// Transport detail.
        detail: String,
    },
    /// The media service reported the attachment as not ready.
    #[error("attachment not ready")]
    NotReady,
}

impl MediaError {
    /// Whether the outbox should keep retrying the owning item.
    ///
    /// A missing source file cannot heal on its own; everything else is
    /// assumed transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Source { .. } => false,
            Self::Backend(e) => e.is_retryable(),
            Self::Upload { .. } | Self::NotReady => true,
        }
    }
}

/// Uploads a local file and returns the attachment descriptor to reference
/// in the subsequent send.
pub trait MediaService: Send + Sync + 'static {
    /// Ensures the file at `source_path` is uploaded.
    fn upload(
        &self,
        source_path: &str,
    ) -> impl std::future::Future<Output = Result<Attachment, MediaError>> + Send;
}
