//! Real-time channel for friend chat.
//!
//! Defines the [`Connector`] / [`Link`] pair every duplex channel must
//! satisfy, the inbound conversation filter, and the two pieces of state the
//! channel shares with the conversation view: the active-conversation cell
//! and the [`Transcript`]. Implementations:
//! - [`stomp::StompConnector`]: STOMP 1.2 over a WebSocket
//! - [`loopback::LoopbackBroker`]: in-process broker for testing
//!
//! [`manager::ChannelManager`] supervises a single connection per session.

pub mod loopback;
pub mod manager;
pub mod stomp;

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use arena_proto::model::{ChatMessage, ConversationId};

/// Errors raised by channel connections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Connecting or the protocol handshake timed out.
    #[error("channel handshake timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("channel endpoint unreachable: {0}")]
    Unreachable(String),

    /// The broker refused the connection or reported an error frame.
    #[error("broker rejected the channel: {0}")]
    Rejected(String),

    /// The connection is closed.
    #[error("channel closed")]
    Closed,

    /// No connection is currently established.
    #[error("channel not connected")]
    NotConnected,

    /// The peer violated the framing protocol.
    #[error("channel protocol error: {0}")]
    Protocol(String),

    /// The configured endpoint URL is unusable.
    #[error("invalid channel url: {0}")]
    InvalidUrl(String),
}

/// A message delivered on a subscribed destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Destination the message was published to.
    pub destination: String,
    /// Raw message body.
    pub body: String,
}

/// Opens duplex channel connections.
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Link: Link;

    /// Connects, sending `headers` with the handshake. Resolves once the
    /// broker has accepted the connection.
    fn connect(
        &self,
        headers: Vec<(String, String)>,
    ) -> impl Future<Output = Result<Self::Link, ChannelError>> + Send;
}

/// An established duplex channel connection.
pub trait Link: Send + Sized + 'static {
    /// Subscribes to `destination` under subscription `id`.
    fn subscribe(
        &mut self,
        id: &str,
        destination: &str,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Publishes a JSON body to `destination`.
    fn publish(
        &mut self,
        destination: &str,
        body: String,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Waits for the next delivery. An error means the connection is gone.
    fn recv(&mut self) -> impl Future<Output = Result<Delivery, ChannelError>> + Send;

    /// Closes the connection gracefully.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Parses an inbound body and keeps it only if it belongs to the active
/// conversation. Ids compare by their text form, so a numeric id on the
/// wire matches its string counterpart.
#[must_use]
pub fn accept_inbound(body: &str, active: Option<&ConversationId>) -> Option<ChatMessage> {
    let message: ChatMessage = match serde_json::from_str(body) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed inbound message");
            return None;
        }
    };
    let active = active?;
    match &message.conversation_id {
        Some(id) if id == active => Some(message),
        _ => None,
    }
}

/// Creates the active-conversation cell. The writer belongs to the
/// conversation view; readers go to the channel manager.
#[must_use]
pub fn active_conversation() -> (ActiveConversationWriter, ActiveConversationReader) {
    let cell = Arc::new(RwLock::new(None));
    (
        ActiveConversationWriter(Arc::clone(&cell)),
        ActiveConversationReader(cell),
    )
}

/// Sole writer of the active conversation id. Deliberately not `Clone`.
#[derive(Debug)]
pub struct ActiveConversationWriter(Arc<RwLock<Option<ConversationId>>>);

impl ActiveConversationWriter {
    /// Sets the active conversation.
    pub fn set(&self, id: ConversationId) {
        *self.0.write() = Some(id);
    }

    /// Clears the active conversation; inbound messages are dropped until
    /// a new one is set.
    pub fn clear(&self) {
        *self.0.write() = None;
    }

    /// The active conversation id.
    #[must_use]
    pub fn get(&self) -> Option<ConversationId> {
        self.0.read().clone()
    }
}

/// Read-only view of the active conversation id.
#[derive(Debug, Clone)]
pub struct ActiveConversationReader(Arc<RwLock<Option<ConversationId>>>);

impl ActiveConversationReader {
    /// The active conversation id.
    #[must_use]
    pub fn get(&self) -> Option<ConversationId> {
        self.0.read().clone()
    }
}

/// Transcript contents as seen by subscribers.
///
/// `epoch` changes whenever the list is cleared or replaced, so a reader
/// can tell a history load from appends even when several updates are
/// observed as one change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    /// Bumped by `clear` and `replace`, never by `append`.
    pub epoch: u64,
    /// Messages in arrival order.
    pub messages: Vec<ChatMessage>,
}

/// Visible message list of the active conversation.
#[derive(Debug, Clone)]
pub struct Transcript {
    state: Arc<watch::Sender<TranscriptSnapshot>>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TranscriptSnapshot::default());
        Self {
            state: Arc::new(tx),
        }
    }

    /// Snapshot of the messages in order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.borrow().messages.clone()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().messages.len()
    }

    /// Whether the transcript is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().messages.is_empty()
    }

    /// Appends an inbound message.
    pub fn append(&self, message: ChatMessage) {
        self.state.send_modify(|state| state.messages.push(message));
    }

    /// Replaces the whole list (history load).
    pub fn replace(&self, messages: Vec<ChatMessage>) {
        self.state.send_modify(|state| {
            state.epoch = state.epoch.wrapping_add(1);
            state.messages = messages;
        });
    }

    /// Empties the list.
    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// Subscribes to transcript changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.state.subscribe()
    }
}

/// Tracks how much of a transcript a reader has already rendered.
#[derive(Debug, Clone, Copy, Default)]
pub struct TranscriptCursor {
    epoch: u64,
    shown: usize,
}

impl TranscriptCursor {
    /// Returns the messages of `snapshot` not yet rendered and marks them
    /// rendered. A new epoch restarts from the first message.
    pub fn advance<'a>(&mut self, snapshot: &'a TranscriptSnapshot) -> &'a [ChatMessage] {
        if snapshot.epoch != self.epoch || snapshot.messages.len() < self.shown {
            self.epoch = snapshot.epoch;
            self.shown = 0;
        }
        let fresh = &snapshot.messages[self.shown..];
        self.shown = snapshot.messages.len();
        fresh
    }
}
