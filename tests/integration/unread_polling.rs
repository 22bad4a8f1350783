// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::doc_markdown
)]

//! Integration tests for the unread-message poller.
//!
//! The first test runs against the scripted API with the production
//! interval; the rest drive the poller through the real HTTP adapter
//! against the in-process `arena-mock` backend:
//! - the summary is published exactly as the backend returned it
//! - marking a sender read clears its entry without waiting for a tick
//! - a revoked token locks polling out until restart
//! - token rotation moves polling to the new account

use std::sync::Arc;
use std::time::Duration;

use arena::api::ChatApi;
use arena::api::http::{DEFAULT_REQUEST_TIMEOUT, EndpointPaths, HttpApi};
use arena::api::scripted::ScriptedApi;
use arena::unread::{DEFAULT_POLL_INTERVAL, UnreadPoller, UnreadPollerConfig};
use arena_mock::server::start_server;
use arena_mock::state::{Destinations, MockState};
use arena_proto::model::{ChatMessage, UnreadItem, UnreadSummary, UserId};

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

async fn backend() -> (Arc<MockState>, Arc<HttpApi>) {
    let state = Arc::new(MockState::with_fixtures(Destinations::default()));
    let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    let api = HttpApi::new(
        &format!("http://{addr}/api"),
        EndpointPaths::default(),
        DEFAULT_REQUEST_TIMEOUT,
    )
    .unwrap();
    (state, Arc::new(api))
}

/// Records one message per entry of `contents` from `from` to `to`.
fn chat(state: &MockState, from: &str, to: &str, contents: &[&str]) {
    let (from, to) = (UserId::new(from), UserId::new(to));
    let conversation = state.conversation_between(&from, &to);
    for content in contents {
        state.record_message(ChatMessage::private(
            from.clone(),
            to.clone(),
            conversation.clone(),
            *content,
        ));
    }
}

fn poller(api: &Arc<HttpApi>, token: &str, interval: Duration) -> UnreadPoller<HttpApi> {
    UnreadPoller::spawn(
        Arc::clone(api),
        UnreadPollerConfig {
            token: Some(token.to_string()),
            enabled: true,
            poll_interval: interval,
        },
    )
}

#[tokio::test]
async fn first_fetch_is_published_unchanged() {
    let expected = UnreadSummary {
        total_unread: 3,
        items: vec![UnreadItem {
            from_user_id: UserId::new("7"),
            from_username: "bob".to_string(),
            preview: "hi".to_string(),
            count: 3,
        }],
    };
    let api = Arc::new(ScriptedApi::new());
    api.set_unread(Ok(expected.clone()));

    let poller = UnreadPoller::spawn(
        Arc::clone(&api),
        UnreadPollerConfig {
            token: Some("tok".to_string()),
            enabled: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        },
    );
    wait_until("first summary", || poller.total_unread() == 3).await;
    assert_eq!(poller.summary(), expected);
    assert_eq!(api.unread_requests(), 1);
    poller.shutdown().await;
}

#[tokio::test]
async fn summary_over_http_matches_backend() {
    let (state, api) = backend().await;
    chat(&state, "7", "1", &["gl", "hf", "hi"]);
    chat(&state, "3", "1", &["review pls"]);

    let poller = poller(&api, "alice-token", DEFAULT_POLL_INTERVAL);
    wait_until("summary", || poller.total_unread() == 4).await;

    let direct = api.unread_summary("alice-token").await.unwrap();
    assert_eq!(poller.summary(), direct);
    let bob = direct
        .items
        .iter()
        .find(|i| i.from_user_id == UserId::new("7"))
        .unwrap();
    assert_eq!((bob.count, bob.preview.as_str()), (3, "hi"));
    poller.shutdown().await;
}

#[tokio::test]
async fn mark_read_refreshes_without_waiting_for_a_tick() {
    let (state, api) = backend().await;
    chat(&state, "7", "1", &["one", "two"]);

    let poller = poller(&api, "alice-token", Duration::from_secs(3600));
    wait_until("summary", || poller.total_unread() == 2).await;

    poller
        .mark_read_from_sender(&UserId::new("7"))
        .await
        .unwrap();
    wait_until("cleared summary", || poller.total_unread() == 0).await;
    assert!(poller.summary().items.is_empty());
    poller.shutdown().await;
}

#[tokio::test]
async fn revoked_token_locks_polling_out() {
    let (state, api) = backend().await;
    chat(&state, "7", "1", &["hey"]);

    let poller = poller(&api, "alice-token", Duration::from_millis(30));
    wait_until("summary", || poller.total_unread() == 1).await;

    state.revoke_token("alice-token");
    wait_until("lockout", || poller.is_locked_out()).await;

    // The last good summary stays visible.
    assert_eq!(poller.total_unread(), 1);

    // Refreshing or changing the token does not lift the lockout.
    poller.set_token(Some("bob-token"));
    poller.refresh();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(poller.is_locked_out());
    assert_eq!(poller.total_unread(), 1);
    poller.shutdown().await;
}

#[tokio::test]
async fn token_rotation_switches_accounts() {
    let (state, api) = backend().await;
    chat(&state, "7", "1", &["for alice"]);
    chat(&state, "1", "7", &["for bob", "again"]);

    let poller = poller(&api, "alice-token", Duration::from_secs(3600));
    wait_until("alice's summary", || poller.total_unread() == 1).await;

    poller.set_token(Some("Bearer bob-token"));
    wait_until("bob's summary", || poller.total_unread() == 2).await;
    assert_eq!(poller.summary().items[0].from_username, "alice");

    poller.set_token(None);
    chat(&state, "1", "7", &["unseen"]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(poller.total_unread(), 2);
    poller.shutdown().await;
}
