//! REST adapter for the Arena backend.
//!
//! Defines the [`ChatApi`] trait that every backend implementation must
//! satisfy. Implementations:
//! - [`http::HttpApi`]: `reqwest` client against the real backend
//! - [`scripted::ScriptedApi`]: in-process scripted responses for tests
//!
//! Every call takes the bearer token explicitly so that a rotated token is
//! picked up on the next request without rebuilding the adapter.

pub mod http;
pub mod scripted;

use std::future::Future;

use reqwest::StatusCode;

use arena_proto::model::{ChatMessage, ConversationId, Friend, UnreadSummary, UserId};

/// Errors returned by [`ChatApi`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No usable bearer token is available.
    #[error("not signed in")]
    NoSession,

    /// The backend rejected the credential (401 or 403).
    #[error("request rejected as unauthorized ({0})")]
    Unauthorized(StatusCode),

    /// The endpoint does not exist on this backend (404).
    #[error("endpoint not found")]
    NotFound,

    /// Any other non-success status.
    #[error("unexpected status {0}")]
    Status(StatusCode),

    /// The request never produced a response (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The configured base URL or endpoint path is unusable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Maps a non-success HTTP status to an error.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(status),
            StatusCode::NOT_FOUND => Self::NotFound,
            other => Self::Status(other),
        }
    }

    /// Whether the error means the session is no longer valid.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether the unread poller must stop for good after this error
    /// (401, 403 and 404).
    #[must_use]
    pub const fn disables_unread_polling(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotFound)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::from_status(status)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Async backend API consumed by the messaging core.
///
/// Mirrors the six endpoints the core depends on. Implementations must be
/// shareable across tasks; the pollers hold them behind an `Arc`.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch the unread-message summary for the token's user.
    fn unread_summary(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<UnreadSummary, ApiError>> + Send;

    /// Mark every message from `sender` as read.
    fn mark_read_from(
        &self,
        token: &str,
        sender: &UserId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// List the friends of `username`.
    fn friends(
        &self,
        token: &str,
        username: &str,
    ) -> impl Future<Output = Result<Vec<Friend>, ApiError>> + Send;

    /// Resolve (creating if needed) the conversation with `peer`.
    fn open_conversation(
        &self,
        token: &str,
        peer: &UserId,
    ) -> impl Future<Output = Result<ConversationId, ApiError>> + Send;

    /// Fetch the ordered message history with `peer`.
    fn message_history(
        &self,
        token: &str,
        peer: &UserId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, ApiError>> + Send;

    /// Fetch the number of requests awaiting moderator review.
    fn pending_request_count(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send;
}
