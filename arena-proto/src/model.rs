//! Data model shared by the Arena REST endpoints and the real-time channel.
//!
//! All types use the backend's camelCase JSON field names. Identifiers are
//! opaque strings on the client side: the backend emits them as JSON numbers
//! in some payloads and as strings in others, so both forms are accepted and
//! normalized to their decimal text.

use serde::{Deserialize, Deserializer, Serialize};

/// Message type tag used for one-to-one friend chat.
pub const PRIVATE_MESSAGE_TYPE: &str = "PRIVATE";

/// Raw identifier as it may appear on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// Largest magnitude at which every integer is exactly representable in `f64`.
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

impl RawId {
    /// Textual form. A float is accepted only when it holds an exact
    /// integer (`42.0` becomes `"42"`).
    #[allow(clippy::cast_possible_truncation)]
    fn into_text(self) -> Result<String, String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Signed(n) => Ok(n.to_string()),
            Self::Unsigned(n) => Ok(n.to_string()),
            Self::Float(n) if n.fract() == 0.0 && n.abs() <= MAX_EXACT_FLOAT => {
                Ok((n as i64).to_string())
            }
            Self::Float(n) => Err(format!("identifier {n} is not an integer")),
        }
    }
}

/// Identifies a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the textual form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer)?
            .into_text()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Opaque conversation identifier resolved from a (user, peer) pair.
///
/// Equality is textual, so `42` and `"42"` on the wire compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a conversation identifier from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the textual form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ConversationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawId::deserialize(deserializer)?
            .into_text()
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A platform role name such as `USER`, `MODERATOR` or `ADMIN`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Creates a role from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the role name as given by the backend.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this role may review pending requests.
    ///
    /// Accepts `MODERATOR` and `ADMIN` in any case, with or without a
    /// `ROLE_` prefix.
    #[must_use]
    pub fn is_moderator(&self) -> bool {
        let name = self.0.trim();
        let name = name
            .get(..5)
            .filter(|p| p.eq_ignore_ascii_case("ROLE_"))
            .map_or(name, |_| &name[5..]);
        name.eq_ignore_ascii_case("MODERATOR") || name.eq_ignore_ascii_case("ADMIN")
    }
}

/// The signed-in user as held by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Platform role.
    #[serde(default)]
    pub role: Role,
    /// Avatar URL, if the user uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// An accepted friend of the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    /// Friend's user identifier.
    pub id: UserId,
    /// Friend's login name.
    pub username: String,
    /// Friend's platform role.
    #[serde(default)]
    pub role: Role,
    /// Given name.
    #[serde(default)]
    pub firstname: String,
    /// Family name.
    #[serde(default)]
    pub lastname: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// Unread messages from a single sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadItem {
    /// Sender of the unread messages.
    pub from_user_id: UserId,
    /// Sender's login name.
    pub from_username: String,
    /// Short preview of the latest unread message.
    #[serde(default)]
    pub preview: String,
    /// Number of unread messages from this sender.
    pub count: u64,
}

/// Unread-summary endpoint payload. Replaced wholesale on every poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    /// Total unread messages across all senders.
    pub total_unread: u64,
    /// Per-sender breakdown, in backend order.
    #[serde(default)]
    pub items: Vec<UnreadItem>,
}

/// Free-form message type tag (`PRIVATE` for friend chat).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    /// The `PRIVATE` message type.
    #[must_use]
    pub fn private() -> Self {
        Self(PRIVATE_MESSAGE_TYPE.to_string())
    }

    /// Returns the tag text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A chat message, as returned by the history endpoint and as carried on
/// the broadcast topic.
///
/// Inbound broadcast payloads may omit everything but the sender, the
/// conversation and the content, so the remaining fields are optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author of the message.
    pub sender_id: UserId,
    /// Addressee of the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    /// Conversation the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Message type tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
}

impl ChatMessage {
    /// Builds an outgoing `PRIVATE` message.
    pub fn private(
        sender_id: UserId,
        receiver_id: UserId,
        conversation_id: ConversationId,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            receiver_id: Some(receiver_id),
            conversation_id: Some(conversation_id),
            content: content.into(),
            message_type: Some(MessageType::private()),
        }
    }
}
