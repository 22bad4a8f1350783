//! Scripted in-process [`ChatApi`] for tests.
//!
//! Each endpoint answers from a queue of one-shot responses and falls back
//! to a sticky default once the queue is empty. A queued response may be
//! held behind a [`Gate`] so tests can keep a request in flight, and every
//! request that is dropped before it completes (an aborted task) is
//! counted by [`ScriptedApi::cancelled`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use arena_proto::model::{ChatMessage, ConversationId, Friend, UnreadSummary, UserId};

use super::{ApiError, ChatApi};

/// A request observed by [`ScriptedApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `unread_summary`
    UnreadSummary {
        /// Token the request carried.
        token: String,
    },
    /// `mark_read_from`
    MarkRead {
        /// Token the request carried.
        token: String,
        /// Sender whose messages were marked read.
        sender: UserId,
    },
    /// `friends`
    Friends {
        /// Token the request carried.
        token: String,
        /// Whose friend list was requested.
        username: String,
    },
    /// `open_conversation`
    OpenConversation {
        /// Token the request carried.
        token: String,
        /// Peer of the conversation.
        peer: UserId,
    },
    /// `message_history`
    MessageHistory {
        /// Token the request carried.
        token: String,
        /// Peer of the conversation.
        peer: UserId,
    },
    /// `pending_request_count`
    PendingCount {
        /// Token the request carried.
        token: String,
    },
}

/// Holds a scripted response until [`Gate::open`] is called.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<Notify>);

impl Gate {
    /// Releases the held response.
    pub fn open(&self) {
        self.0.notify_one();
    }

    async fn wait(&self) {
        self.0.notified().await;
    }
}

struct Scripted<T> {
    result: Result<T, ApiError>,
    gate: Option<Gate>,
}

struct Responses<T> {
    queue: VecDeque<Scripted<T>>,
    fallback: Result<T, ApiError>,
}

impl<T: Clone> Responses<T> {
    const fn new(fallback: Result<T, ApiError>) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback,
        }
    }

    fn next(&mut self) -> Scripted<T> {
        self.queue.pop_front().unwrap_or_else(|| Scripted {
            result: self.fallback.clone(),
            gate: None,
        })
    }

    fn push(&mut self, result: Result<T, ApiError>, gate: Option<Gate>) {
        self.queue.push_back(Scripted { result, gate });
    }
}

struct Script {
    unread: Responses<UnreadSummary>,
    mark_read: Responses<()>,
    friends: Responses<Vec<Friend>>,
    conversations: HashMap<UserId, Responses<ConversationId>>,
    histories: HashMap<UserId, Responses<Vec<ChatMessage>>>,
    pending: Responses<u64>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            unread: Responses::new(Ok(UnreadSummary::default())),
            mark_read: Responses::new(Ok(())),
            friends: Responses::new(Ok(Vec::new())),
            conversations: HashMap::new(),
            histories: HashMap::new(),
            pending: Responses::new(Ok(0)),
        }
    }
}

/// Marks a request cancelled if its future is dropped before completion.
struct InFlight<'a> {
    cancelled: &'a AtomicUsize,
    done: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// In-process [`ChatApi`] with scripted responses.
#[derive(Default)]
pub struct ScriptedApi {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    cancelled: AtomicUsize,
}

impl ScriptedApi {
    /// Creates an API whose endpoints all succeed with empty data, except
    /// conversation resolution, which answers 404 until scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sticky unread-summary response.
    pub fn set_unread(&self, result: Result<UnreadSummary, ApiError>) {
        self.script.lock().unread.fallback = result;
    }

    /// Queues a one-shot unread-summary response held until the returned
    /// gate opens.
    pub fn push_unread_gated(&self, result: Result<UnreadSummary, ApiError>) -> Gate {
        let gate = Gate::default();
        self.script.lock().unread.push(result, Some(gate.clone()));
        gate
    }

    /// Sets the sticky mark-read response.
    pub fn set_mark_read(&self, result: Result<(), ApiError>) {
        self.script.lock().mark_read.fallback = result;
    }

    /// Sets the sticky friend-list response.
    pub fn set_friends(&self, result: Result<Vec<Friend>, ApiError>) {
        self.script.lock().friends.fallback = result;
    }

    /// Sets the sticky conversation id for `peer`.
    pub fn set_conversation(&self, peer: &UserId, result: Result<ConversationId, ApiError>) {
        self.conversation_responses(peer, |r| r.fallback = result);
    }

    /// Queues a gated conversation response for `peer`.
    pub fn push_conversation_gated(
        &self,
        peer: &UserId,
        result: Result<ConversationId, ApiError>,
    ) -> Gate {
        let gate = Gate::default();
        self.conversation_responses(peer, |r| r.push(result, Some(gate.clone())));
        gate
    }

    /// Sets the sticky message history for `peer`.
    pub fn set_history(&self, peer: &UserId, result: Result<Vec<ChatMessage>, ApiError>) {
        let mut script = self.script.lock();
        script
            .histories
            .entry(peer.clone())
            .or_insert_with(|| Responses::new(Ok(Vec::new())))
            .fallback = result;
    }

    /// Sets the sticky pending-count response.
    pub fn set_pending_count(&self, result: Result<u64, ApiError>) {
        self.script.lock().pending.fallback = result;
    }

    fn conversation_responses(
        &self,
        peer: &UserId,
        apply: impl FnOnce(&mut Responses<ConversationId>),
    ) {
        let mut script = self.script.lock();
        let responses = script
            .conversations
            .entry(peer.clone())
            .or_insert_with(|| Responses::new(Err(ApiError::NotFound)));
        apply(responses);
    }

    /// All requests observed so far, in issue order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Number of observed requests matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Number of unread-summary requests observed.
    #[must_use]
    pub fn unread_requests(&self) -> usize {
        self.count(|c| matches!(c, Call::UnreadSummary { .. }))
    }

    /// Number of pending-count requests observed.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.count(|c| matches!(c, Call::PendingCount { .. }))
    }

    /// Number of requests dropped before they completed.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn respond<T>(&self, call: Call, scripted: Scripted<T>) -> Result<T, ApiError> {
        self.calls.lock().push(call);
        let mut in_flight = InFlight {
            cancelled: &self.cancelled,
            done: false,
        };
        if let Some(gate) = &scripted.gate {
            gate.wait().await;
        }
        in_flight.done = true;
        scripted.result
    }
}

impl ChatApi for ScriptedApi {
    async fn unread_summary(&self, token: &str) -> Result<UnreadSummary, ApiError> {
        let scripted = self.script.lock().unread.next();
        let call = Call::UnreadSummary {
            token: token.to_string(),
        };
        self.respond(call, scripted).await
    }

    async fn mark_read_from(&self, token: &str, sender: &UserId) -> Result<(), ApiError> {
        let scripted = self.script.lock().mark_read.next();
        let call = Call::MarkRead {
            token: token.to_string(),
            sender: sender.clone(),
        };
        self.respond(call, scripted).await
    }

    async fn friends(&self, token: &str, username: &str) -> Result<Vec<Friend>, ApiError> {
        let scripted = self.script.lock().friends.next();
        let call = Call::Friends {
            token: token.to_string(),
            username: username.to_string(),
        };
        self.respond(call, scripted).await
    }

    async fn open_conversation(
        &self,
        token: &str,
        peer: &UserId,
    ) -> Result<ConversationId, ApiError> {
        let scripted = {
            let mut script = self.script.lock();
            script
                .conversations
                .entry(peer.clone())
                .or_insert_with(|| Responses::new(Err(ApiError::NotFound)))
                .next()
        };
        let call = Call::OpenConversation {
            token: token.to_string(),
            peer: peer.clone(),
        };
        self.respond(call, scripted).await
    }

    async fn message_history(
        &self,
        token: &str,
        peer: &UserId,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let scripted = {
            let mut script = self.script.lock();
            script
                .histories
                .entry(peer.clone())
                .or_insert_with(|| Responses::new(Ok(Vec::new())))
                .next()
        };
        let call = Call::MessageHistory {
            token: token.to_string(),
            peer: peer.clone(),
        };
        self.respond(call, scripted).await
    }

    async fn pending_request_count(&self, token: &str) -> Result<u64, ApiError> {
        let scripted = self.script.lock().pending.next();
        let call = Call::PendingCount {
            token: token.to_string(),
        };
        self.respond(call, scripted).await
    }
}
