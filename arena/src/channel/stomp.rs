//! STOMP 1.2 over WebSocket.
//!
//! [`StompConnector`] opens a WebSocket to the broker endpoint, sends a
//! `CONNECT` frame carrying the handshake headers and waits for
//! `CONNECTED`. Each WebSocket text message holds exactly one frame.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use arena_proto::stomp::{self, Command, Frame, headers};

use super::{ChannelError, Connector, Delivery, Link};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for the WebSocket connect plus the STOMP handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to a STOMP broker over `ws://` or `wss://`.
#[derive(Debug, Clone)]
pub struct StompConnector {
    url: Url,
    host: String,
    timeout: Duration,
}

impl StompConnector {
    /// Creates a connector for `ws_url` (e.g. `ws://localhost:8080/ws`).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidUrl`] unless the URL parses with a
    /// `ws` or `wss` scheme and a host.
    pub fn new(ws_url: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let url = Url::parse(ws_url.trim())
            .map_err(|e| ChannelError::InvalidUrl(format!("{ws_url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl(format!(
                "{ws_url}: expected a ws:// or wss:// url"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ChannelError::InvalidUrl(format!("{ws_url}: missing host")))?
            .to_string();
        Ok(Self { url, host, timeout })
    }

    /// The broker endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    async fn handshake(&self, extra: &[(String, String)]) -> Result<StompLink, ChannelError> {
        let (mut ws, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            tracing::warn!(url = %self.url, error = %e, "channel WebSocket connect failed");
            map_ws_connect_error(e)
        })?;

        let connect = Frame::connect(&self.host, extra);
        ws.send(Message::text(connect.encode()))
            .await
            .map_err(|e| ChannelError::Protocol(format!("failed to send CONNECT: {e}")))?;

        loop {
            let frame = match next_frame(&mut ws).await? {
                Some(frame) => frame,
                None => continue,
            };
            match frame.command {
                Command::Connected => {
                    tracing::info!(
                        url = %self.url,
                        version = frame.get(headers::VERSION).unwrap_or("1.2"),
                        "STOMP session established"
                    );
                    return Ok(StompLink { ws });
                }
                Command::Error => return Err(error_frame(&frame)),
                other => {
                    return Err(ChannelError::Protocol(format!(
                        "expected CONNECTED, got {other}"
                    )));
                }
            }
        }
    }
}

impl Connector for StompConnector {
    type Link = StompLink;

    async fn connect(&self, extra: Vec<(String, String)>) -> Result<StompLink, ChannelError> {
        tokio::time::timeout(self.timeout, self.handshake(&extra))
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "STOMP handshake timed out");
                ChannelError::Timeout
            })?
    }
}

/// An established STOMP session.
pub struct StompLink {
    ws: WsStream,
}

impl StompLink {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ChannelError> {
        self.ws.send(Message::text(frame.encode())).await.map_err(|e| {
            tracing::warn!(error = %e, command = %frame.command, "STOMP send failed");
            ChannelError::Closed
        })
    }
}

impl Link for StompLink {
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<(), ChannelError> {
        tracing::debug!(id, destination, "subscribing");
        self.send_frame(&Frame::subscribe(id, destination)).await
    }

    async fn publish(&mut self, destination: &str, body: String) -> Result<(), ChannelError> {
        self.send_frame(&Frame::send_json(destination, body)).await
    }

    async fn recv(&mut self) -> Result<Delivery, ChannelError> {
        loop {
            let frame = match next_frame(&mut self.ws).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(ChannelError::Protocol(reason)) => {
                    tracing::warn!(%reason, "malformed STOMP frame, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match frame.command {
                Command::Message => {
                    let destination = frame.get(headers::DESTINATION).unwrap_or_default();
                    return Ok(Delivery {
                        destination: destination.to_string(),
                        body: frame.body,
                    });
                }
                Command::Error => return Err(error_frame(&frame)),
                Command::Receipt => {
                    tracing::trace!(receipt = ?frame.get(headers::RECEIPT_ID), "receipt");
                }
                other => tracing::debug!(command = %other, "ignoring unexpected frame"),
            }
        }
    }

    async fn close(mut self) {
        let _ = self.send_frame(&Frame::disconnect()).await;
        let _ = self.ws.close(None).await;
    }
}

/// Reads the next frame. `Ok(None)` means a heart-beat or a non-text
/// control message.
async fn next_frame(ws: &mut WsStream) -> Result<Option<Frame>, ChannelError> {
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            stomp::decode(text.as_str()).map_err(|e| ChannelError::Protocol(e.to_string()))
        }
        Some(Ok(Message::Binary(data))) => {
            let text = std::str::from_utf8(&data)
                .map_err(|e| ChannelError::Protocol(format!("binary frame is not UTF-8: {e}")))?;
            stomp::decode(text).map_err(|e| ChannelError::Protocol(e.to_string()))
        }
        Some(Ok(Message::Close(_))) => {
            tracing::info!("channel WebSocket closed by server");
            Err(ChannelError::Closed)
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => Ok(None),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "channel WebSocket read error");
            Err(ChannelError::Closed)
        }
        None => Err(ChannelError::Closed),
    }
}

fn error_frame(frame: &Frame) -> ChannelError {
    let reason = frame
        .get(headers::MESSAGE)
        .map_or_else(|| frame.body.trim().to_string(), str::to_string);
    tracing::warn!(%reason, "broker sent ERROR frame");
    ChannelError::Rejected(reason)
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => ChannelError::Unreachable(io_err.to_string()),
        WsError::Http(response) => {
            ChannelError::Rejected(format!("HTTP status {}", response.status()))
        }
        WsError::Url(e) => ChannelError::InvalidUrl(e.to_string()),
        other => ChannelError::Unreachable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection and answers the CONNECT frame with `reply`,
    /// then forwards every later client frame to the returned receiver.
    async fn one_shot_broker(
        reply: Frame,
    ) -> (String, tokio::sync::mpsc::UnboundedReceiver<Frame>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let Ok(Some(frame)) = stomp::decode(text.as_str()) else {
                    continue;
                };
                match frame.command {
                    Command::Connect => {
                        let _ = tx.send(frame);
                        ws.send(Message::text(reply.encode())).await.unwrap();
                    }
                    Command::Subscribe => {
                        let destination = frame.get(headers::DESTINATION).unwrap().to_string();
                        let _ = tx.send(frame);
                        let message = Frame::new(Command::Message)
                            .header(headers::DESTINATION, destination)
                            .header(headers::SUBSCRIPTION, "sub-0")
                            .body(r#"{"senderId":7,"conversationId":"c","content":"hi"}"#);
                        // heart-beat first, then the message
                        ws.send(Message::text("\n".to_string())).await.unwrap();
                        ws.send(Message::text(message.encode())).await.unwrap();
                    }
                    _ => {
                        let _ = tx.send(frame);
                    }
                }
            }
        });

        (url, rx)
    }

    fn auth() -> Vec<(String, String)> {
        vec![(headers::AUTHORIZATION.to_string(), "Bearer tok".to_string())]
    }

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(matches!(
            StompConnector::new("http://localhost/ws", DEFAULT_CONNECT_TIMEOUT),
            Err(ChannelError::InvalidUrl(_))
        ));
        assert!(StompConnector::new("wss://example.com/ws", DEFAULT_CONNECT_TIMEOUT).is_ok());
    }

    #[tokio::test]
    async fn handshake_sends_auth_and_subscribe_delivers_messages() {
        let connected = Frame::new(Command::Connected).header(headers::VERSION, "1.2");
        let (url, mut seen) = one_shot_broker(connected).await;

        let connector = StompConnector::new(&url, DEFAULT_CONNECT_TIMEOUT).unwrap();
        let mut link = connector.connect(auth()).await.unwrap();

        let connect = seen.recv().await.unwrap();
        assert_eq!(connect.get(headers::AUTHORIZATION), Some("Bearer tok"));
        assert_eq!(connect.get(headers::ACCEPT_VERSION), Some("1.2,1.1"));
        assert_eq!(connect.get(headers::HOST), Some("127.0.0.1"));

        link.subscribe("sub-0", "/topic/public").await.unwrap();
        let delivery = link.recv().await.unwrap();
        assert_eq!(delivery.destination, "/topic/public");
        assert!(delivery.body.contains("\"content\":\"hi\""));

        link.publish("/app/chat.sendMessage", "{}".to_string())
            .await
            .unwrap();
        let subscribe = seen.recv().await.unwrap();
        assert_eq!(subscribe.command, Command::Subscribe);
        let send = seen.recv().await.unwrap();
        assert_eq!(send.command, Command::Send);
        assert_eq!(send.get(headers::DESTINATION), Some("/app/chat.sendMessage"));
        assert_eq!(send.body, "{}");
    }

    #[tokio::test]
    async fn error_frame_rejects_handshake() {
        let error = Frame::new(Command::Error).header(headers::MESSAGE, "Invalid token");
        let (url, _seen) = one_shot_broker(error).await;

        let connector = StompConnector::new(&url, DEFAULT_CONNECT_TIMEOUT).unwrap();
        let result = connector.connect(auth()).await;
        assert_eq!(
            result.err(),
            Some(ChannelError::Rejected("Invalid token".to_string()))
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_fast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector =
            StompConnector::new(&format!("ws://{addr}/ws"), DEFAULT_CONNECT_TIMEOUT).unwrap();
        assert!(matches!(
            connector.connect(auth()).await,
            Err(ChannelError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn silent_broker_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connector = StompConnector::new(&url, Duration::from_millis(100)).unwrap();
        assert_eq!(
            connector.connect(auth()).await.err(),
            Some(ChannelError::Timeout)
        );
    }
}
