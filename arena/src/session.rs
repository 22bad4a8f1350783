//! Session state shared by every messaging component.
//!
//! The [`SessionStore`] is handed to each service explicitly; nothing reads
//! the session from ambient global state. Components observe sign-in and
//! sign-out through [`SessionStore::subscribe`].

use std::sync::Arc;

use tokio::sync::watch;

use arena_proto::model::User;

/// Normalizes a bearer credential: trims whitespace and strips a leading
/// `Bearer ` scheme (any case). Returns `None` when nothing remains.
#[must_use]
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .get(..6)
        .filter(|scheme| scheme.eq_ignore_ascii_case("bearer"))
        .map(|_| &trimmed[6..])
        .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
        .unwrap_or(trimmed);
    let token = stripped.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer credential as issued (may still carry a `Bearer ` prefix).
    pub token: String,
    /// The signed-in user.
    pub user: User,
}

impl Session {
    /// Creates a session.
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    /// The normalized bearer token, if any.
    #[must_use]
    pub fn bearer(&self) -> Option<String> {
        normalize_token(&self.token)
    }
}

/// Why the store holds no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// No session was ever established.
    NeverSignedIn,
    /// The user signed out.
    UserRequested,
    /// A request was rejected as unauthorized; the user must sign in again.
    Expired,
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// A user is signed in.
    SignedIn(Session),
    /// No user is signed in.
    SignedOut(LogoutReason),
}

/// Cheaply cloneable handle to the process session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Creates a signed-out store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::SignedOut(LogoutReason::NeverSignedIn));
        Self {
            state: Arc::new(tx),
        }
    }

    /// Creates a store that is already signed in.
    #[must_use]
    pub fn signed_in(session: Session) -> Self {
        let store = Self::new();
        store.login(session);
        store
    }

    /// Installs a session, replacing any previous one.
    pub fn login(&self, session: Session) {
        tracing::info!(username = %session.user.username, "session established");
        self.state.send_replace(SessionState::SignedIn(session));
    }

    /// Signs the user out.
    pub fn logout(&self) {
        self.sign_out(LogoutReason::UserRequested);
    }

    /// Signs the user out after an auth failure. Returns `false` if no
    /// session was active.
    pub fn expire(&self) -> bool {
        self.sign_out(LogoutReason::Expired)
    }

    fn sign_out(&self, reason: LogoutReason) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SessionState::SignedIn(_)) {
                tracing::info!(?reason, "session ended");
                *state = SessionState::SignedOut(reason);
                true
            } else {
                false
            }
        })
    }

    /// The current session, if signed in.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        match &*self.state.borrow() {
            SessionState::SignedIn(session) => Some(session.clone()),
            SessionState::SignedOut(_) => None,
        }
    }

    /// The current normalized bearer token, if signed in with a usable one.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        match &*self.state.borrow() {
            SessionState::SignedIn(session) => session.bearer(),
            SessionState::SignedOut(_) => None,
        }
    }

    /// The reason the store is signed out, or `None` while signed in.
    #[must_use]
    pub fn logout_reason(&self) -> Option<LogoutReason> {
        match &*self.state.borrow() {
            SessionState::SignedIn(_) => None,
            SessionState::SignedOut(reason) => Some(*reason),
        }
    }

    /// Subscribes to session changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}
