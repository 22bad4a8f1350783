// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! End-to-end tests against the in-process `arena-mock` backend.
//!
//! Each client is assembled the way the `arena` binary assembles it: the
//! `reqwest` adapter for REST, STOMP over WebSocket for the real-time
//! channel, one shared session store. Covers:
//! - two users chatting through the broker, with history and unread counts
//! - the broker refusing a bad bearer token
//! - reconnecting after the broker drops every connection
//! - the moderator badge
//! - an auth failure during selection expiring the session

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arena::api::http::{DEFAULT_REQUEST_TIMEOUT, EndpointPaths, HttpApi};
use arena::api::{ApiError, ChatApi};
use arena::badge::PendingBadgePoller;
use arena::channel::manager::{ChannelConfig, ChannelManager, DEFAULT_BROADCAST_TOPIC, auth_headers};
use arena::channel::stomp::{DEFAULT_CONNECT_TIMEOUT, StompConnector};
use arena::channel::{ChannelError, Connector, Transcript, active_conversation};
use arena::conversation::{ConversationView, SelectOutcome};
use arena::session::{LogoutReason, Session, SessionStore};
use arena_mock::server::start_server;
use arena_mock::state::{Destinations, MockState};
use arena_proto::model::{Role, User, UserId};

struct Client {
    api: Arc<HttpApi>,
    session: SessionStore,
    channel: Arc<ChannelManager<StompConnector>>,
    view: Arc<ConversationView<HttpApi, StompConnector>>,
}

async fn backend() -> (SocketAddr, Arc<MockState>) {
    let state = Arc::new(MockState::with_fixtures(Destinations::default()));
    let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

fn api(addr: SocketAddr) -> Arc<HttpApi> {
    Arc::new(
        HttpApi::new(
            &format!("http://{addr}/api"),
            EndpointPaths::default(),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .unwrap(),
    )
}

fn connector(addr: SocketAddr) -> StompConnector {
    StompConnector::new(&format!("ws://{addr}/ws"), DEFAULT_CONNECT_TIMEOUT).unwrap()
}

fn session(id: &str, username: &str, role: &str, token: &str) -> SessionStore {
    SessionStore::signed_in(Session::new(
        token,
        User {
            id: UserId::new(id),
            username: username.to_string(),
            role: Role::new(role),
            profile_image: None,
        },
    ))
}

fn client(addr: SocketAddr, id: &str, username: &str, token: &str) -> Client {
    let api = api(addr);
    let session = session(id, username, "USER", token);
    let (writer, reader) = active_conversation();
    let transcript = Transcript::new();
    let channel = Arc::new(ChannelManager::new(
        connector(addr),
        session.clone(),
        ChannelConfig {
            reconnect_delay: Duration::from_millis(50),
            ..ChannelConfig::default()
        },
        reader,
        transcript.clone(),
    ));
    let view = Arc::new(ConversationView::new(
        Arc::clone(&api),
        session.clone(),
        Arc::clone(&channel),
        writer,
        transcript,
    ));
    Client {
        api,
        session,
        channel,
        view,
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Loads friends and opens the conversation with `peer`.
async fn open_with(client: &Client, peer: &str) -> SelectOutcome {
    client.view.load_friends().await.unwrap();
    let friend = client
        .view
        .friends()
        .into_iter()
        .find(|f| f.username == peer)
        .unwrap();
    client.view.select_peer(friend).await
}

#[tokio::test]
async fn two_users_chat_through_the_broker() {
    let (addr, state) = backend().await;
    let alice = client(addr, "1", "alice", "alice-token");
    let bob = client(addr, "7", "bob", "bob-token");
    alice.channel.activate();
    bob.channel.activate();
    wait_until("both subscribed", || {
        state.topics.subscriber_count(DEFAULT_BROADCAST_TOPIC) == 2
            && alice.channel.is_connected()
            && bob.channel.is_connected()
    })
    .await;

    let SelectOutcome::Ready(from_alice) = open_with(&alice, "bob").await else {
        panic!("alice could not open the conversation");
    };
    let SelectOutcome::Ready(from_bob) = open_with(&bob, "alice").await else {
        panic!("bob could not open the conversation");
    };
    assert_eq!(from_alice, from_bob);

    assert!(alice.view.send("glhf"));
    wait_until("delivery to both", || {
        alice.view.transcript().len() == 1 && bob.view.transcript().len() == 1
    })
    .await;
    let received = &bob.view.transcript().messages()[0];
    assert_eq!(received.sender_id, UserId::new("1"));
    assert_eq!(received.content, "glhf");
    assert_eq!(received.conversation_id.as_ref(), Some(&from_alice));

    let history = bob
        .api
        .message_history("bob-token", &UserId::new("1"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    let unread = bob.api.unread_summary("bob-token").await.unwrap();
    assert_eq!(unread.total_unread, 1);
    assert_eq!(unread.items[0].from_username, "alice");

    // Reopening loads the stored history.
    open_with(&bob, "alice").await;
    assert_eq!(bob.view.transcript().messages()[0].content, "glhf");

    alice.channel.deactivate().await;
    bob.channel.deactivate().await;
}

#[tokio::test]
async fn broker_rejects_unknown_token() {
    let (addr, state) = backend().await;
    let result = connector(addr).connect(auth_headers("forged")).await;
    assert!(matches!(result, Err(ChannelError::Rejected(_))));
    assert_eq!(state.topics.connect_attempts(), 1);
    assert_eq!(state.topics.connection_count(), 0);
}

#[tokio::test]
async fn reconnects_after_broker_drops_connections() {
    let (addr, state) = backend().await;
    let alice = client(addr, "1", "alice", "alice-token");
    alice.channel.activate();
    wait_until("connected", || {
        alice.channel.is_connected() && state.topics.subscriber_count(DEFAULT_BROADCAST_TOPIC) == 1
    })
    .await;
    open_with(&alice, "bob").await;

    state.topics.close_all();
    wait_until("reconnected", || {
        state.topics.connect_attempts() >= 2
            && alice.channel.is_connected()
            && state.topics.subscriber_count(DEFAULT_BROADCAST_TOPIC) == 1
    })
    .await;
    assert_eq!(state.topics.connection_count(), 1);

    assert!(alice.view.send("still here"));
    wait_until("echo after reconnect", || alice.view.transcript().len() == 1).await;
    alice.channel.deactivate().await;
}

#[tokio::test]
async fn moderator_badge_reports_pending_count() {
    let (addr, state) = backend().await;
    state.set_pending_count(4);

    let carol = PendingBadgePoller::spawn(
        api(addr),
        session("3", "carol", "MODERATOR", "carol-token"),
        Duration::from_secs(3600),
    );
    wait_until("badge", || carol.count() == 4).await;

    let alice = PendingBadgePoller::spawn(
        api(addr),
        session("1", "alice", "USER", "alice-token"),
        Duration::from_millis(10),
    );
    assert!(!alice.is_running());
    assert_eq!(alice.count(), 0);
}

#[tokio::test]
async fn revoked_token_expires_session_on_select() {
    let (addr, state) = backend().await;
    let alice = client(addr, "1", "alice", "alice-token");
    alice.view.load_friends().await.unwrap();
    let bob = alice.view.friends()[0].clone();

    state.revoke_token("alice-token");
    let outcome = alice.view.select_peer(bob).await;
    assert!(matches!(
        outcome,
        SelectOutcome::Failed(ApiError::Unauthorized(_))
    ));
    assert_eq!(alice.session.logout_reason(), Some(LogoutReason::Expired));
    assert!(alice.session.token().is_none());
}
