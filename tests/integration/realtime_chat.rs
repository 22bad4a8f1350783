// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! Integration tests for the real-time conversation flow.
//!
//! Wires the conversation view, the channel manager and the shared
//! transcript together over the in-process loopback broker and a scripted
//! REST API, then drives them the way the terminal client does:
//! - selecting a peer resolves the conversation and loads history
//! - broadcast deliveries reach the transcript only for the active conversation
//! - switching peers discards the previous conversation's traffic
//! - reconnects resubscribe and keep filtering
//! - signing out closes the channel and stops the reconnect loop

use std::sync::Arc;
use std::time::Duration;

use arena::api::scripted::ScriptedApi;
use arena::channel::loopback::LoopbackBroker;
use arena::channel::manager::{ChannelConfig, ChannelManager, DEFAULT_BROADCAST_TOPIC};
use arena::channel::{Transcript, active_conversation};
use arena::conversation::{ConversationView, LoadStatus, SelectOutcome};
use arena::session::{Session, SessionStore};
use arena_proto::model::{ChatMessage, ConversationId, Friend, Role, User, UserId};

struct Client {
    api: Arc<ScriptedApi>,
    broker: LoopbackBroker,
    session: SessionStore,
    channel: Arc<ChannelManager<LoopbackBroker>>,
    view: Arc<ConversationView<ScriptedApi, LoopbackBroker>>,
}

fn friend(id: &str, username: &str) -> Friend {
    Friend {
        id: UserId::new(id),
        username: username.to_string(),
        role: Role::new("USER"),
        firstname: String::new(),
        lastname: String::new(),
        profile_image: None,
    }
}

/// Alice (id 1) signed in, with bob (7) and carol (3) as friends.
fn client() -> Client {
    let api = Arc::new(ScriptedApi::new());
    api.set_friends(Ok(vec![friend("7", "bob"), friend("3", "carol")]));
    api.set_conversation(&UserId::new("7"), Ok(ConversationId::new("conv-42")));
    api.set_history(&UserId::new("7"), Ok(Vec::new()));
    api.set_conversation(&UserId::new("3"), Ok(ConversationId::new("conv-99")));
    api.set_history(&UserId::new("3"), Ok(Vec::new()));

    let broker = LoopbackBroker::new();
    let session = SessionStore::signed_in(Session::new(
        "alice-token",
        User {
            id: UserId::new("1"),
            username: "alice".to_string(),
            role: Role::new("USER"),
            profile_image: None,
        },
    ));
    let (writer, reader) = active_conversation();
    let transcript = Transcript::new();
    let channel = Arc::new(ChannelManager::new(
        broker.clone(),
        session.clone(),
        ChannelConfig {
            reconnect_delay: Duration::from_millis(20),
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
        broker,
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

async fn online(client: &Client) {
    assert!(client.channel.activate());
    wait_until("subscription", || {
        client.channel.is_connected() && client.broker.subscribers(DEFAULT_BROADCAST_TOPIC) == 1
    })
    .await;
}

fn inbound(conversation: &str, sender: u64, content: &str) -> String {
    format!(r#"{{"conversationId":"{conversation}","senderId":{sender},"content":"{content}"}}"#)
}

#[tokio::test]
async fn selecting_bob_then_receiving_hey() {
    let client = client();
    online(&client).await;
    client.view.load_friends().await.unwrap();

    let bob = client.view.friends()[0].clone();
    let outcome = client.view.select_peer(bob).await;
    assert_eq!(outcome, SelectOutcome::Ready(ConversationId::new("conv-42")));
    assert_eq!(client.view.status(), LoadStatus::Ready);
    assert!(client.view.transcript().is_empty());

    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-42", 7, "hey"));
    wait_until("delivery", || client.view.transcript().len() == 1).await;

    assert_eq!(
        client.view.transcript().messages(),
        [ChatMessage {
            sender_id: UserId::new("7"),
            receiver_id: None,
            conversation_id: Some(ConversationId::new("conv-42")),
            content: "hey".to_string(),
            message_type: None,
        }]
    );
}

#[tokio::test]
async fn switching_peers_discards_previous_conversation() {
    let client = client();
    online(&client).await;
    client.view.load_friends().await.unwrap();
    let friends = client.view.friends();

    client.view.select_peer(friends[0].clone()).await;
    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-42", 7, "first"));
    wait_until("bob's message", || client.view.transcript().len() == 1).await;

    let outcome = client.view.select_peer(friends[1].clone()).await;
    assert_eq!(outcome, SelectOutcome::Ready(ConversationId::new("conv-99")));
    assert!(client.view.transcript().is_empty());

    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-42", 7, "late"));
    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-99", 3, "hi alice"));
    wait_until("carol's message", || client.view.transcript().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let contents: Vec<_> = client
        .view
        .transcript()
        .messages()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["hi alice"]);
}

#[tokio::test]
async fn sent_messages_arrive_only_through_the_broadcast() {
    let client = client();
    online(&client).await;
    client.view.load_friends().await.unwrap();
    client.view.select_peer(client.view.friends()[0].clone()).await;

    assert!(client.view.send("gg"));
    wait_until("publish", || client.broker.published().len() == 1).await;
    let published = client.broker.published();
    assert_eq!(published.len(), 1);
    let wire: serde_json::Value = serde_json::from_str(&published[0].body).unwrap();
    assert_eq!(wire["senderId"], "1");
    assert_eq!(wire["receiverId"], "7");
    assert_eq!(wire["conversationId"], "conv-42");
    assert_eq!(wire["messageType"], "PRIVATE");
    assert_eq!(wire["content"], "gg");

    wait_until("echo", || client.view.transcript().len() == 1).await;
    assert_eq!(client.view.transcript().messages()[0].sender_id, UserId::new("1"));
}

#[tokio::test]
async fn reconnect_resubscribes_and_keeps_filtering() {
    let client = client();
    online(&client).await;
    client.view.load_friends().await.unwrap();
    client.view.select_peer(client.view.friends()[0].clone()).await;

    client.broker.drop_all_links();
    wait_until("reconnect", || {
        client.broker.connect_attempts() >= 2
            && client.channel.is_connected()
            && client.broker.subscribers(DEFAULT_BROADCAST_TOPIC) == 1
    })
    .await;

    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-7", 9, "stranger"));
    client
        .broker
        .inject(DEFAULT_BROADCAST_TOPIC, &inbound("conv-42", 7, "back"));
    wait_until("delivery after reconnect", || {
        client.view.transcript().len() == 1
    })
    .await;
    assert_eq!(client.view.transcript().messages()[0].content, "back");
    assert_eq!(client.broker.open_links(), 1);
}

#[tokio::test]
async fn signing_out_stops_reconnecting() {
    let client = client();
    online(&client).await;

    client.session.logout();
    wait_until("disconnect", || {
        !client.channel.is_connected() && client.broker.open_links() == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(client.broker.connect_attempts(), 1);
    assert_eq!(client.broker.open_links(), 0);
    assert!(!client.view.send("anyone?"));
    assert_eq!(client.api.unread_requests(), 0);
}
