//! In-memory backend state: fixture users, friendships, conversations,
//! message history and unread counters.
//!
//! Everything lives behind [`parking_lot::Mutex`] and no lock is held across
//! an `.await`, so handlers and broker connections share one
//! [`MockState`] through an `Arc`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use arena_proto::model::{
    ChatMessage, ConversationId, Friend, Role, UnreadItem, UnreadSummary, User, UserId,
};
use parking_lot::Mutex;

use crate::broker::Topics;

/// Default destination clients `SEND` chat messages to.
pub const DEFAULT_SEND_DESTINATION: &str = "/app/chat.sendMessage";

/// Default topic stored messages are broadcast on.
pub const DEFAULT_BROADCAST_TOPIC: &str = "/topic/public";

/// Default pending moderation count.
pub const DEFAULT_PENDING_COUNT: u64 = 2;

/// Longest unread preview, in characters.
const PREVIEW_CHARS: usize = 40;

/// A fixture account.
#[derive(Debug, Clone)]
struct Account {
    user: User,
    token: String,
    firstname: String,
    lastname: String,
}

impl Account {
    fn as_friend(&self) -> Friend {
        Friend {
            id: self.user.id.clone(),
            username: self.user.username.clone(),
            role: self.user.role.clone(),
            firstname: self.firstname.clone(),
            lastname: self.lastname.clone(),
            profile_image: self.user.profile_image.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Unread {
    count: u64,
    preview: String,
}

#[derive(Debug, Default)]
struct Store {
    accounts: Vec<Account>,
    friendships: HashSet<(UserId, UserId)>,
    conversations: HashMap<(UserId, UserId), ConversationId>,
    history: HashMap<ConversationId, Vec<ChatMessage>>,
    /// Keyed by (receiver, sender).
    unread: BTreeMap<(UserId, UserId), Unread>,
}

impl Store {
    fn account_by_token(&self, token: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.token == token)
    }

    fn account_by_id(&self, id: &UserId) -> Option<&Account> {
        self.accounts.iter().find(|a| a.user.id == *id)
    }
}

/// Destinations the broker routes between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    /// Application destination accepting chat `SEND`s.
    pub send: String,
    /// Topic stored messages are broadcast on.
    pub broadcast: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            send: DEFAULT_SEND_DESTINATION.to_string(),
            broadcast: DEFAULT_BROADCAST_TOPIC.to_string(),
        }
    }
}

/// Shared state for the REST routes and the STOMP broker.
pub struct MockState {
    store: Mutex<Store>,
    pending_count: AtomicU64,
    destinations: Destinations,
    /// Live broker connections and their subscriptions.
    pub topics: Topics,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new(Destinations::default())
    }
}

/// Strips an optional `Bearer ` prefix and surrounding whitespace.
fn bare_token(raw: &str) -> &str {
    let raw = raw.trim();
    raw.get(..7)
        .filter(|p| p.eq_ignore_ascii_case("bearer "))
        .map_or(raw, |_| raw[7..].trim())
}

fn pair_key(a: &UserId, b: &UserId) -> (UserId, UserId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

impl MockState {
    /// Creates an empty backend with no accounts.
    #[must_use]
    pub fn new(destinations: Destinations) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            pending_count: AtomicU64::new(DEFAULT_PENDING_COUNT),
            destinations,
            topics: Topics::default(),
        }
    }

    /// Creates a backend seeded with the demo accounts:
    ///
    /// | id | username | role | token |
    /// |---|---|---|---|
    /// | 1 | alice | USER | `alice-token` |
    /// | 7 | bob | USER | `bob-token` |
    /// | 3 | carol | MODERATOR | `carol-token` |
    ///
    /// Everyone is friends with everyone.
    #[must_use]
    pub fn with_fixtures(destinations: Destinations) -> Self {
        let state = Self::new(destinations);
        state.add_user(UserId::new("1"), "alice", "USER", "alice-token");
        state.add_user(UserId::new("7"), "bob", "USER", "bob-token");
        state.add_user(UserId::new("3"), "carol", "MODERATOR", "carol-token");
        state.befriend(&UserId::new("1"), &UserId::new("7"));
        state.befriend(&UserId::new("1"), &UserId::new("3"));
        state.befriend(&UserId::new("7"), &UserId::new("3"));
        state
    }

    /// Broker destinations.
    #[must_use]
    pub const fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    /// Adds an account. The username doubles as the first name.
    pub fn add_user(&self, id: UserId, username: &str, role: &str, token: &str) {
        let mut firstname = username.to_string();
        if let Some(first) = firstname.get_mut(..1) {
            first.make_ascii_uppercase();
        }
        self.store.lock().accounts.push(Account {
            user: User {
                id,
                username: username.to_string(),
                role: Role::new(role),
                profile_image: None,
            },
            token: token.to_string(),
            firstname,
            lastname: String::new(),
        });
    }

    /// Records a mutual friendship.
    pub fn befriend(&self, a: &UserId, b: &UserId) {
        self.store.lock().friendships.insert(pair_key(a, b));
    }

    /// Invalidates a token; later requests carrying it get 401.
    pub fn revoke_token(&self, token: &str) {
        let mut store = self.store.lock();
        for account in store.accounts.iter_mut().filter(|a| a.token == token) {
            account.token.clear();
        }
    }

    /// Resolves a bearer token (with or without the `Bearer ` prefix).
    #[must_use]
    pub fn authenticate(&self, raw: &str) -> Option<User> {
        let token = bare_token(raw);
        if token.is_empty() {
            return None;
        }
        self.store.lock().account_by_token(token).map(|a| a.user.clone())
    }

    /// Looks up a user by id.
    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.store.lock().account_by_id(id).map(|a| a.user.clone())
    }

    /// Friends of `username`, or `None` if there is no such user.
    #[must_use]
    pub fn friends_of(&self, username: &str) -> Option<Vec<Friend>> {
        let store = self.store.lock();
        let me = store
            .accounts
            .iter()
            .find(|a| a.user.username == username)?
            .user
            .id
            .clone();
        Some(
            store
                .accounts
                .iter()
                .filter(|a| a.user.id != me && store.friendships.contains(&pair_key(&me, &a.user.id)))
                .map(Account::as_friend)
                .collect(),
        )
    }

    /// Returns the conversation between two users, minting a UUID v7 id on
    /// first use. The same id is returned for either argument order.
    #[must_use]
    pub fn conversation_between(&self, a: &UserId, b: &UserId) -> ConversationId {
        self.store
            .lock()
            .conversations
            .entry(pair_key(a, b))
            .or_insert_with(|| ConversationId::new(uuid::Uuid::now_v7().to_string()))
            .clone()
    }

    /// Stored messages of a conversation, oldest first.
    #[must_use]
    pub fn history(&self, conversation: &ConversationId) -> Vec<ChatMessage> {
        self.store
            .lock()
            .history
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Stores a message and counts it as unread for its receiver.
    ///
    /// A message without a conversation id is filed under the sender/receiver
    /// pair's conversation, and the returned copy carries that id.
    pub fn record_message(&self, mut message: ChatMessage) -> ChatMessage {
        if message.conversation_id.is_none()
            && let Some(receiver) = &message.receiver_id
        {
            message.conversation_id = Some(self.conversation_between(&message.sender_id, receiver));
        }

        let mut store = self.store.lock();
        if let Some(conversation) = &message.conversation_id {
            store
                .history
                .entry(conversation.clone())
                .or_default()
                .push(message.clone());
        }
        if let Some(receiver) = &message.receiver_id
            && *receiver != message.sender_id
        {
            let unread = store
                .unread
                .entry((receiver.clone(), message.sender_id.clone()))
                .or_default();
            unread.count += 1;
            unread.preview = preview(&message.content);
        }
        message
    }

    /// Unread summary for `receiver`, one item per sender with unread
    /// messages.
    #[must_use]
    pub fn unread_summary(&self, receiver: &UserId) -> UnreadSummary {
        let store = self.store.lock();
        let items: Vec<UnreadItem> = store
            .unread
            .iter()
            .filter(|((to, _), unread)| to == receiver && unread.count > 0)
            .map(|((_, from), unread)| UnreadItem {
                from_user_id: from.clone(),
                from_username: store
                    .account_by_id(from)
                    .map_or_else(|| from.to_string(), |a| a.user.username.clone()),
                preview: unread.preview.clone(),
                count: unread.count,
            })
            .collect();
        UnreadSummary {
            total_unread: items.iter().map(|i| i.count).sum(),
            items,
        }
    }

    /// Clears the unread count of messages from `sender` to `receiver`.
    pub fn mark_read(&self, receiver: &UserId, sender: &UserId) {
        self.store
            .lock()
            .unread
            .remove(&(receiver.clone(), sender.clone()));
    }

    /// Number of requests awaiting moderator review.
    #[must_use]
    pub fn pending_count(&self) -> u64 {
        self.pending_count.load(Ordering::Relaxed)
    }

    /// Overrides the pending moderation count.
    pub fn set_pending_count(&self, count: u64) {
        self.pending_count.store(count, Ordering::Relaxed);
    }
}
