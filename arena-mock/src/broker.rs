//! Minimal STOMP 1.2 broker over axum WebSockets.
//!
//! Each connection must open with `CONNECT` (or `STOMP`) carrying an
//! `Authorization: Bearer <token>` header. After `CONNECTED` the client may
//! `SUBSCRIBE`, `UNSUBSCRIBE`, `SEND` and `DISCONNECT`. A `SEND` to the chat
//! destination is stored through [`MockState::record_message`] and then
//! broadcast as `MESSAGE` to every subscriber of the broadcast topic,
//! sender included. `SEND`s to a `/topic/` destination are relayed verbatim.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arena_proto::model::{ChatMessage, User, UserId};
use arena_proto::stomp::{self, Command, Frame, headers};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::state::MockState;

struct Subscription {
    id: String,
    destination: String,
}

struct Connection {
    user: UserId,
    tx: mpsc::UnboundedSender<Message>,
    subscriptions: Vec<Subscription>,
}

/// Registry of live broker connections and their subscriptions.
#[derive(Default)]
pub struct Topics {
    next_connection: AtomicU64,
    next_message: AtomicU64,
    connect_attempts: AtomicU64,
    connections: Mutex<HashMap<u64, Connection>>,
}

impl Topics {
    fn register(&self, user: UserId, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(
            id,
            Connection {
                user,
                tx,
                subscriptions: Vec::new(),
            },
        );
        id
    }

    fn unregister(&self, connection: u64) {
        self.connections.lock().remove(&connection);
    }

    fn subscribe(&self, connection: u64, id: &str, destination: &str) {
        if let Some(conn) = self.connections.lock().get_mut(&connection) {
            conn.subscriptions.retain(|s| s.id != id);
            conn.subscriptions.push(Subscription {
                id: id.to_string(),
                destination: destination.to_string(),
            });
        }
    }

    fn unsubscribe(&self, connection: u64, id: &str) {
        if let Some(conn) = self.connections.lock().get_mut(&connection) {
            conn.subscriptions.retain(|s| s.id != id);
        }
    }

    fn send_to(&self, connection: u64, frame: &Frame) {
        if let Some(conn) = self.connections.lock().get(&connection) {
            let _ = conn.tx.send(Message::Text(frame.encode().into()));
        }
    }

    /// Delivers `body` as a `MESSAGE` to every subscription on
    /// `destination`. Returns the number of deliveries.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let connections = self.connections.lock();
        let mut delivered = 0;
        for conn in connections.values() {
            for sub in conn.subscriptions.iter().filter(|s| s.destination == destination) {
                let message_id = self.next_message.fetch_add(1, Ordering::Relaxed);
                let frame = Frame::new(Command::Message)
                    .header(headers::DESTINATION, destination)
                    .header(headers::SUBSCRIPTION, sub.id.as_str())
                    .header(headers::MESSAGE_ID, message_id.to_string())
                    .header(headers::CONTENT_TYPE, "application/json")
                    .body(body);
                if conn.tx.send(Message::Text(frame.encode().into())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Number of `CONNECT` frames received, accepted or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Number of authenticated connections currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Users with an open connection, one entry per connection.
    #[must_use]
    pub fn connected_users(&self) -> Vec<UserId> {
        self.connections
            .lock()
            .values()
            .map(|c| c.user.clone())
            .collect()
    }

    /// Number of subscriptions on `destination` across all connections.
    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.connections
            .lock()
            .values()
            .flat_map(|c| &c.subscriptions)
            .filter(|s| s.destination == destination)
            .count()
    }

    /// Sends a WebSocket close frame to every connection.
    pub fn close_all(&self) {
        for (id, conn) in self.connections.lock().iter() {
            tracing::info!(connection = id, user = %conn.user, "closing broker connection");
            let _ = conn.tx.send(Message::Close(None));
        }
    }
}

enum Handshake {
    Accepted(User),
    Rejected(String),
    Closed,
}

enum Flow {
    Continue,
    Stop,
}

/// axum handler that upgrades `/ws` to a broker connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serves one broker connection until it closes or sends `DISCONNECT`.
pub async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user = match wait_for_connect(&mut ws_receiver, &state).await {
        Handshake::Accepted(user) => user,
        Handshake::Rejected(reason) => {
            tracing::warn!(%reason, "rejecting broker connection");
            let error = Frame::new(Command::Error).header(headers::MESSAGE, reason);
            let _ = ws_sender.send(Message::Text(error.encode().into())).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
        Handshake::Closed => {
            tracing::debug!("connection closed before CONNECT");
            return;
        }
    };

    let connected = Frame::new(Command::Connected)
        .header(headers::VERSION, "1.2")
        .header(headers::HEART_BEAT, "0,0")
        .header("user-name", user.username.as_str());
    if ws_sender
        .send(Message::Text(connected.encode().into()))
        .await
        .is_err()
    {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let connection = state.topics.register(user.id.clone(), tx);
    tracing::info!(connection, username = %user.username, "broker client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let frame = match stomp::decode(text.as_str()) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(connection, error = %e, "malformed frame");
                    let error = Frame::new(Command::Error).header(headers::MESSAGE, e.to_string());
                    reader_state.topics.send_to(connection, &error);
                    continue;
                }
            };
            if let Flow::Stop = handle_frame(connection, &reader_user, &frame, &reader_state) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            // Let queued frames (a final RECEIPT) flush before closing.
            state.topics.unregister(connection);
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            read_task.abort();
            state.topics.unregister(connection);
        }
    }
    tracing::info!(connection, username = %user.username, "broker client disconnected");
}

/// Waits for the opening `CONNECT` and authenticates it.
async fn wait_for_connect(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &MockState,
) -> Handshake {
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => return Handshake::Closed,
            _ => continue,
        };
        let frame = match stomp::decode(text.as_str()) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => return Handshake::Rejected(e.to_string()),
        };
        if !matches!(frame.command, Command::Connect | Command::Stomp) {
            return Handshake::Rejected(format!("expected CONNECT, got {}", frame.command));
        }
        state.topics.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let authorization = frame
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(headers::AUTHORIZATION))
            .map(|(_, v)| v.as_str());
        return match authorization.and_then(|raw| state.authenticate(raw)) {
            Some(user) => Handshake::Accepted(user),
            None => Handshake::Rejected("401 Unauthorized: invalid or missing bearer token".to_string()),
        };
    }
    Handshake::Closed
}

fn handle_frame(connection: u64, user: &User, frame: &Frame, state: &MockState) -> Flow {
    let topics = &state.topics;
    let flow = match frame.command {
        Command::Subscribe => {
            match (frame.get(headers::ID), frame.get(headers::DESTINATION)) {
                (Some(id), Some(destination)) => {
                    tracing::debug!(connection, id, destination, "subscribe");
                    topics.subscribe(connection, id, destination);
                }
                _ => reply_error(topics, connection, "SUBSCRIBE requires id and destination"),
            }
            Flow::Continue
        }
        Command::Unsubscribe => {
            if let Some(id) = frame.get(headers::ID) {
                topics.unsubscribe(connection, id);
            }
            Flow::Continue
        }
        Command::Send => {
            handle_send(connection, user, frame, state);
            Flow::Continue
        }
        Command::Disconnect => Flow::Stop,
        Command::Connect | Command::Stomp => {
            reply_error(topics, connection, "already connected");
            Flow::Continue
        }
        other => {
            tracing::debug!(connection, command = %other, "ignoring frame");
            Flow::Continue
        }
    };

    if let Some(receipt) = frame.get(headers::RECEIPT) {
        let reply = Frame::new(Command::Receipt).header(headers::RECEIPT_ID, receipt);
        topics.send_to(connection, &reply);
    }
    flow
}

fn handle_send(connection: u64, user: &User, frame: &Frame, state: &MockState) {
    let Some(destination) = frame.get(headers::DESTINATION) else {
        reply_error(&state.topics, connection, "SEND requires a destination");
        return;
    };

    if destination == state.destinations().send {
        let mut message: ChatMessage = match serde_json::from_str(&frame.body) {
            Ok(m) => m,
            Err(e) => {
                reply_error(&state.topics, connection, &format!("bad chat message: {e}"));
                return;
            }
        };
        if message.sender_id != user.id {
            tracing::warn!(
                connection,
                claimed = %message.sender_id,
                actual = %user.id,
                "overriding spoofed sender"
            );
            message.sender_id = user.id.clone();
        }
        let stored = state.record_message(message);
        match serde_json::to_string(&stored) {
            Ok(body) => {
                let delivered = state.topics.publish(&state.destinations().broadcast, &body);
                tracing::debug!(connection, delivered, "chat message broadcast");
            }
            Err(e) => tracing::error!(error = %e, "failed to encode chat message"),
        }
    } else if destination.starts_with("/topic/") {
        state.topics.publish(destination, &frame.body);
    } else {
        tracing::warn!(connection, destination, "SEND to unknown destination");
    }
}

fn reply_error(topics: &Topics, connection: u64, reason: &str) {
    let frame = Frame::new(Command::Error).header(headers::MESSAGE, reason);
    topics.send_to(connection, &frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::start_server;
    use crate::state::{DEFAULT_BROADCAST_TOPIC, DEFAULT_SEND_DESTINATION, Destinations};
    use arena_proto::model::ConversationId;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite;

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn start() -> (std::net::SocketAddr, Arc<MockState>) {
        let state = Arc::new(MockState::with_fixtures(Destinations::default()));
        let (addr, _handle) = start_server("127.0.0.1:0", Arc::clone(&state)).await.unwrap();
        (addr, state)
    }

    async fn send(ws: &mut Client, frame: &Frame) {
        ws.send(tungstenite::Message::text(frame.encode())).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> Frame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = msg
                && let Some(frame) = stomp::decode(text.as_str()).unwrap()
            {
                return frame;
            }
        }
    }

    async fn open(addr: std::net::SocketAddr, token: &str) -> (Client, Frame) {
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let auth = [("Authorization".to_string(), format!("Bearer {token}"))];
        send(&mut ws, &Frame::connect("localhost", &auth)).await;
        let reply = recv(&mut ws).await;
        (ws, reply)
    }

    async fn subscribed(addr: std::net::SocketAddr, token: &str, state: &MockState) -> Client {
        let before = state.topics.subscriber_count(DEFAULT_BROADCAST_TOPIC);
        let (mut ws, reply) = open(addr, token).await;
        assert_eq!(reply.command, Command::Connected);
        send(&mut ws, &Frame::subscribe("sub-0", DEFAULT_BROADCAST_TOPIC)).await;
        for _ in 0..200 {
            if state.topics.subscriber_count(DEFAULT_BROADCAST_TOPIC) > before {
                return ws;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription never registered");
    }

    #[tokio::test]
    async fn valid_token_is_connected() {
        let (addr, state) = start().await;
        let (_ws, reply) = open(addr, "alice-token").await;
        assert_eq!(reply.command, Command::Connected);
        assert_eq!(reply.get(headers::VERSION), Some("1.2"));
        assert_eq!(reply.get("user-name"), Some("alice"));
        assert_eq!(state.topics.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn unknown_token_gets_error_frame() {
        let (addr, state) = start().await;
        let (_ws, reply) = open(addr, "forged").await;
        assert_eq!(reply.command, Command::Error);
        assert!(reply.get(headers::MESSAGE).unwrap().contains("401"));
        assert_eq!(state.topics.connection_count(), 0);
    }

    #[tokio::test]
    async fn chat_send_is_stored_and_broadcast() {
        let (addr, state) = start().await;
        let mut alice = subscribed(addr, "alice-token", &state).await;
        let mut bob = subscribed(addr, "bob-token", &state).await;

        let conv = state.conversation_between(&UserId::new("1"), &UserId::new("7"));
        let message = ChatMessage::private(UserId::new("7"), UserId::new("1"), conv.clone(), "hey");
        let body = serde_json::to_string(&message).unwrap();
        send(&mut bob, &Frame::send_json(DEFAULT_SEND_DESTINATION, body)).await;

        for ws in [&mut alice, &mut bob] {
            let frame = recv(ws).await;
            assert_eq!(frame.command, Command::Message);
            assert_eq!(frame.get(headers::SUBSCRIPTION), Some("sub-0"));
            let got: ChatMessage = serde_json::from_str(&frame.body).unwrap();
            assert_eq!(got, message);
        }
        assert_eq!(state.history(&conv), [message]);
        assert_eq!(state.unread_summary(&UserId::new("1")).total_unread, 1);
    }

    #[tokio::test]
    async fn spoofed_sender_is_overridden() {
        let (addr, state) = start().await;
        let mut alice = subscribed(addr, "alice-token", &state).await;

        let forged = ChatMessage::private(
            UserId::new("7"),
            UserId::new("3"),
            ConversationId::new("c"),
            "not really bob",
        );
        let body = serde_json::to_string(&forged).unwrap();
        send(&mut alice, &Frame::send_json(DEFAULT_SEND_DESTINATION, body)).await;

        let frame = recv(&mut alice).await;
        let got: ChatMessage = serde_json::from_str(&frame.body).unwrap();
        assert_eq!(got.sender_id, UserId::new("1"));
    }

    #[tokio::test]
    async fn bad_chat_body_is_an_error_not_a_disconnect() {
        let (addr, state) = start().await;
        let mut alice = subscribed(addr, "alice-token", &state).await;
        send(&mut alice, &Frame::send_json(DEFAULT_SEND_DESTINATION, "{oops")).await;
        assert_eq!(recv(&mut alice).await.command, Command::Error);
        assert_eq!(state.topics.connection_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_receipt_then_close() {
        let (addr, state) = start().await;
        let (mut ws, _) = open(addr, "alice-token").await;
        send(&mut ws, &Frame::disconnect().header(headers::RECEIPT, "bye")).await;
        let receipt = recv(&mut ws).await;
        assert_eq!(receipt.command, Command::Receipt);
        assert_eq!(receipt.get(headers::RECEIPT_ID), Some("bye"));
        for _ in 0..200 {
            if state.topics.connection_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection still registered after DISCONNECT");
    }
}
