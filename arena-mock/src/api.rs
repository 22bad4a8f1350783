//! REST routes mirroring the Arena backend endpoints the client uses.
//!
//! Every route requires `Authorization: Bearer <token>` naming a fixture
//! account; anything else is `401`. Unknown users are `404`, and the
//! pending-count route is `403` for non-moderators.

use std::sync::Arc;

use arena_proto::model::{ChatMessage, Friend, UnreadSummary, User, UserId};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};

use crate::state::MockState;

/// Routes relative to the API base (mounted under `/api`).
pub fn routes() -> Router<Arc<MockState>> {
    Router::new()
        .route("/messages/unread/summary", get(unread_summary))
        .route("/messages/read-from/{sender_id}", post(mark_read_from))
        .route("/friends/{username}", get(friends))
        .route("/chat/conversation/{peer_id}", get(open_conversation))
        .route("/chat/messages/{peer_id}", get(message_history))
        .route("/moderation/pending/count", get(pending_count))
}

/// Resolves the caller from the `Authorization` header.
fn caller(state: &MockState, headers: &HeaderMap) -> Result<User, StatusCode> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| state.authenticate(raw))
        .ok_or(StatusCode::UNAUTHORIZED)
}

async fn unread_summary(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Result<Json<UnreadSummary>, StatusCode> {
    let me = caller(&state, &headers)?;
    Ok(Json(state.unread_summary(&me.id)))
}

async fn mark_read_from(
    State(state): State<Arc<MockState>>,
    Path(sender_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    let me = caller(&state, &headers)?;
    let sender = UserId::new(sender_id);
    state.mark_read(&me.id, &sender);
    tracing::debug!(receiver = %me.id, %sender, "marked read");
    Ok(StatusCode::NO_CONTENT)
}

async fn friends(
    State(state): State<Arc<MockState>>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Friend>>, StatusCode> {
    caller(&state, &headers)?;
    state
        .friends_of(&username)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn open_conversation(
    State(state): State<Arc<MockState>>,
    Path(peer_id): Path<String>,
    headers: HeaderMap,
) -> Result<String, StatusCode> {
    let me = caller(&state, &headers)?;
    let peer = state
        .user(&UserId::new(peer_id))
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(state.conversation_between(&me.id, &peer.id).to_string())
}

async fn message_history(
    State(state): State<Arc<MockState>>,
    Path(peer_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    let me = caller(&state, &headers)?;
    let peer = state
        .user(&UserId::new(peer_id))
        .ok_or(StatusCode::NOT_FOUND)?;
    let conversation = state.conversation_between(&me.id, &peer.id);
    Ok(Json(state.history(&conversation)))
}

async fn pending_count(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Result<Json<u64>, StatusCode> {
    let me = caller(&state, &headers)?;
    if !me.role.is_moderator() {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(state.pending_count()))
}
