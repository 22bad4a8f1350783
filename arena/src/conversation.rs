//! Conversation view-model: friend list, peer selection, history load and
//! sending.
//!
//! The view is the only writer of the active conversation id. Selecting a
//! peer clears the id first, so nothing from the previous conversation is
//! accepted while the new one resolves, then records the resolved id
//! before loading history.
//!
//! Every selection takes a new generation number. A response that arrives
//! after a newer selection started is discarded without touching state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use arena_proto::model::{ChatMessage, ConversationId, Friend};

use crate::api::{ApiError, ChatApi};
use crate::channel::manager::ChannelManager;
use crate::channel::{ActiveConversationWriter, Connector, Transcript};
use crate::session::SessionStore;

/// History load state of the selected conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing selected yet.
    Idle,
    /// Resolving the conversation or loading its history.
    Loading,
    /// History loaded.
    Ready,
    /// Resolution or history load failed.
    Error(String),
}

/// How a [`ConversationView::select_peer`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The conversation is active and its history is shown.
    Ready(ConversationId),
    /// A request failed; the status holds the message.
    Failed(ApiError),
    /// A newer selection started first; this one changed nothing further.
    Superseded,
}

/// State and operations behind the chat screen.
pub struct ConversationView<A: ChatApi, C: Connector> {
    api: Arc<A>,
    session: SessionStore,
    channel: Arc<ChannelManager<C>>,
    active: ActiveConversationWriter,
    transcript: Transcript,
    friends: watch::Sender<Vec<Friend>>,
    selected: watch::Sender<Option<Friend>>,
    status: watch::Sender<LoadStatus>,
    generation: AtomicU64,
    handled_deep_link: Mutex<Option<String>>,
}

impl<A: ChatApi, C: Connector> ConversationView<A, C> {
    /// Creates a view. `active` must be the writer paired with the reader
    /// the channel manager holds.
    pub fn new(
        api: Arc<A>,
        session: SessionStore,
        channel: Arc<ChannelManager<C>>,
        active: ActiveConversationWriter,
        transcript: Transcript,
    ) -> Self {
        Self {
            api,
            session,
            channel,
            active,
            transcript,
            friends: watch::channel(Vec::new()).0,
            selected: watch::channel(None).0,
            status: watch::channel(LoadStatus::Idle).0,
            generation: AtomicU64::new(0),
            handled_deep_link: Mutex::new(None),
        }
    }

    /// Loaded friends.
    #[must_use]
    pub fn friends(&self) -> Vec<Friend> {
        self.friends.borrow().clone()
    }

    /// Currently selected peer.
    #[must_use]
    pub fn selected(&self) -> Option<Friend> {
        self.selected.borrow().clone()
    }

    /// Current load status.
    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to load status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<LoadStatus> {
        self.status.subscribe()
    }

    /// Active conversation id, if resolved.
    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active.get()
    }

    /// Visible messages.
    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Fetches the signed-in user's friends.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NoSession`] when signed out, or the backend
    /// error. Auth failures also expire the session.
    pub async fn load_friends(&self) -> Result<Vec<Friend>, ApiError> {
        let session = self.session.current().ok_or(ApiError::NoSession)?;
        let token = session.bearer().ok_or(ApiError::NoSession)?;
        match self.api.friends(&token, &session.user.username).await {
            Ok(friends) => {
                tracing::debug!(count = friends.len(), "friends loaded");
                self.friends.send_replace(friends.clone());
                Ok(friends)
            }
            Err(e) => {
                self.expire_on_auth_failure(&e);
                Err(e)
            }
        }
    }

    /// Selects `peer`, resolves the conversation and loads its history.
    pub async fn select_peer(&self, peer: Friend) -> SelectOutcome {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(peer = %peer.username, generation, "selecting peer");
        self.selected.send_replace(Some(peer.clone()));
        self.active.clear();
        self.transcript.clear();
        self.status.send_replace(LoadStatus::Loading);

        let Some(token) = self.session.token() else {
            return self.fail(generation, ApiError::NoSession);
        };

        let conversation = match self.api.open_conversation(&token, &peer.id).await {
            Ok(id) => id,
            Err(e) => return self.fail(generation, e),
        };
        if !self.is_current(generation) {
            return SelectOutcome::Superseded;
        }
        self.active.set(conversation.clone());

        let history = match self.api.message_history(&token, &peer.id).await {
            Ok(history) => history,
            Err(e) => return self.fail(generation, e),
        };
        if !self.is_current(generation) {
            return SelectOutcome::Superseded;
        }
        tracing::debug!(
            conversation = %conversation,
            messages = history.len(),
            "history loaded"
        );
        self.transcript.replace(history);
        self.status.send_replace(LoadStatus::Ready);
        SelectOutcome::Ready(conversation)
    }

    /// Selects the friend named by a deep-link query once per distinct
    /// query value. Returns `None` when nothing was selected.
    ///
    /// A query that cannot be applied yet (friends not loaded, no match) is
    /// retried on the next call. Clearing the query resets the memory.
    pub async fn apply_deep_link(&self, query: Option<&str>) -> Option<SelectOutcome> {
        let Some(wanted) = query.map(str::trim).filter(|q| !q.is_empty()) else {
            *self.handled_deep_link.lock() = None;
            return None;
        };
        let key = wanted.to_lowercase();
        if self.handled_deep_link.lock().as_deref() == Some(key.as_str()) {
            return None;
        }

        let friend = self
            .friends
            .borrow()
            .iter()
            .find(|f| f.username.eq_ignore_ascii_case(wanted))
            .cloned()?;
        *self.handled_deep_link.lock() = Some(key);

        if self.selected().is_some_and(|s| s.id == friend.id) {
            tracing::trace!(peer = %friend.username, "deep-linked peer already selected");
            return None;
        }
        tracing::info!(peer = %friend.username, "opening deep-linked conversation");
        Some(self.select_peer(friend).await)
    }

    /// Whether `text` can be sent right now.
    #[must_use]
    pub fn can_send(&self, text: &str) -> bool {
        self.channel.is_connected()
            && self.selected.borrow().is_some()
            && self.active.get().is_some()
            && !text.trim().is_empty()
            && self.session.current().is_some()
    }

    /// Publishes `text` to the selected peer. Returns `false` (and does
    /// nothing) when sending is not possible. The transcript only shows the
    /// message once the broker echoes it back.
    pub fn send(&self, text: &str) -> bool {
        if !self.can_send(text) {
            return false;
        }
        let (Some(peer), Some(conversation), Some(session)) =
            (self.selected(), self.active.get(), self.session.current())
        else {
            return false;
        };
        let message = ChatMessage::private(session.user.id, peer.id, conversation, text);
        match self.channel.publish(&message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "message not sent");
                false
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn fail(&self, generation: u64, error: ApiError) -> SelectOutcome {
        if !self.is_current(generation) {
            return SelectOutcome::Superseded;
        }
        tracing::warn!(error = %error, "conversation load failed");
        self.expire_on_auth_failure(&error);
        self.status.send_replace(LoadStatus::Error(error.to_string()));
        SelectOutcome::Failed(error)
    }

    fn expire_on_auth_failure(&self, error: &ApiError) {
        if error.is_auth_failure() && self.session.expire() {
            tracing::warn!("session rejected by backend, signing out");
        }
    }
}
