//! `reqwest`-backed [`ChatApi`] implementation.

use std::time::Duration;

use reqwest::{Client, Response};
use url::Url;

use arena_proto::model::{ChatMessage, ConversationId, Friend, UnreadSummary, UserId};

use super::{ApiError, ChatApi};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Endpoint path templates, relative to the API base URL.
///
/// Placeholders `{senderId}`, `{username}` and `{peerId}` are substituted
/// with percent-encoded path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPaths {
    /// `GET` unread summary.
    pub unread_summary: String,
    /// `POST` mark-read, with `{senderId}`.
    pub mark_read: String,
    /// `GET` friend list, with `{username}`.
    pub friends: String,
    /// `GET` resolve/open conversation, with `{peerId}`.
    pub open_conversation: String,
    /// `GET` message history, with `{peerId}`.
    pub message_history: String,
    /// `GET` pending moderator request count.
    pub pending_count: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            unread_summary: "messages/unread/summary".to_string(),
            mark_read: "messages/read-from/{senderId}".to_string(),
            friends: "friends/{username}".to_string(),
            open_conversation: "chat/conversation/{peerId}".to_string(),
            message_history: "chat/messages/{peerId}".to_string(),
            pending_count: "moderation/pending/count".to_string(),
        }
    }
}

/// HTTP client for the Arena REST API.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
    paths: EndpointPaths,
}

impl HttpApi {
    /// Creates a client for `base_url` (e.g. `http://localhost:8080/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the base URL does not parse or
    /// cannot carry a path, and [`ApiError::Network`] if the TLS backend
    /// fails to initialize.
    pub fn new(base_url: &str, paths: EndpointPaths, timeout: Duration) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "{base_url}: expected an http(s) base URL"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("arena/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            paths,
        })
    }

    /// The normalized base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Renders an endpoint template against the base URL.
    fn endpoint(&self, template: &str, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty();
            for raw in template.split('/').filter(|s| !s.is_empty()) {
                let value = raw
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .and_then(|name| params.iter().find(|(k, _)| *k == name))
                    .map_or(raw, |(_, v)| *v);
                segments.push(value);
            }
        }
        Ok(url)
    }

    async fn get(&self, url: Url, token: &str) -> Result<Response, ApiError> {
        tracing::debug!(%url, "GET");
        let response = self.client.get(url).bearer_auth(token).send().await?;
        check_status(response)
    }
}

fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::debug!(%status, url = %response.url(), "request failed");
        Err(ApiError::from_status(status))
    }
}

/// Parses the conversation endpoint body: plain text, a JSON string or a
/// JSON number.
fn parse_conversation_id(body: &str) -> Result<ConversationId, ApiError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ApiError::Decode("empty conversation id".to_string()));
    }
    Ok(serde_json::from_str::<ConversationId>(trimmed)
        .unwrap_or_else(|_| ConversationId::new(trimmed)))
}

/// Parses the pending-count body: a JSON number or numeric text.
fn parse_count(body: &str) -> Result<u64, ApiError> {
    let trimmed = body.trim().trim_matches('"');
    trimmed
        .parse::<u64>()
        .map_err(|_| ApiError::Decode(format!("expected a count, got {trimmed:?}")))
}

impl ChatApi for HttpApi {
    async fn unread_summary(&self, token: &str) -> Result<UnreadSummary, ApiError> {
        let url = self.endpoint(&self.paths.unread_summary, &[])?;
        Ok(self.get(url, token).await?.json().await?)
    }

    async fn mark_read_from(&self, token: &str, sender: &UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&self.paths.mark_read, &[("senderId", sender.as_str())])?;
        tracing::debug!(%url, "POST");
        let response = self.client.post(url).bearer_auth(token).send().await?;
        check_status(response).map(drop)
    }

    async fn friends(&self, token: &str, username: &str) -> Result<Vec<Friend>, ApiError> {
        let url = self.endpoint(&self.paths.friends, &[("username", username)])?;
        Ok(self.get(url, token).await?.json().await?)
    }

    async fn open_conversation(
        &self,
        token: &str,
        peer: &UserId,
    ) -> Result<ConversationId, ApiError> {
        let url = self.endpoint(&self.paths.open_conversation, &[("peerId", peer.as_str())])?;
        let body = self.get(url, token).await?.text().await?;
        parse_conversation_id(&body)
    }

    async fn message_history(
        &self,
        token: &str,
        peer: &UserId,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let url = self.endpoint(&self.paths.message_history, &[("peerId", peer.as_str())])?;
        Ok(self.get(url, token).await?.json().await?)
    }

    async fn pending_request_count(&self, token: &str) -> Result<u64, ApiError> {
        let url = self.endpoint(&self.paths.pending_count, &[])?;
        let body = self.get(url, token).await?.text().await?;
        parse_count(&body)
    }
}
