//! Channel supervisor.
//!
//! One [`ChannelManager`] owns the session's only duplex connection. Its
//! background task connects with headers computed from the current session
//! token, subscribes to the broadcast topic, pumps deliveries through
//! [`accept_inbound`] into the [`Transcript`], and after any disconnect
//! waits a fixed delay before reconnecting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use arena_proto::model::ChatMessage;
use arena_proto::stomp::headers;

use super::{
    ActiveConversationReader, ChannelError, Connector, Delivery, Link, Transcript, accept_inbound,
};
use crate::session::{SessionState, SessionStore};

/// Broadcast topic carrying every chat message.
pub const DEFAULT_BROADCAST_TOPIC: &str = "/topic/public";

/// Application destination outgoing messages are published to.
pub const DEFAULT_SEND_DESTINATION: &str = "/app/chat.sendMessage";

/// Delay between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Time allowed for a graceful close before the task is aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

const SUBSCRIPTION_ID: &str = "sub-0";

/// Channel destinations and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Topic subscribed to after every connect.
    pub broadcast_topic: String,
    /// Destination outgoing messages are published to.
    pub send_destination: String,
    /// Fixed delay before reconnecting.
    pub reconnect_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            broadcast_topic: DEFAULT_BROADCAST_TOPIC.to_string(),
            send_destination: DEFAULT_SEND_DESTINATION.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Handshake headers for a bearer token.
#[must_use]
pub fn auth_headers(token: &str) -> Vec<(String, String)> {
    vec![(headers::AUTHORIZATION.to_string(), format!("Bearer {token}"))]
}

#[derive(Debug)]
enum Outbound {
    Publish(String),
    Shutdown,
}

struct Supervisor {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

/// Owns the session's real-time connection.
pub struct ChannelManager<C: Connector> {
    connector: Arc<C>,
    session: SessionStore,
    config: ChannelConfig,
    active: ActiveConversationReader,
    transcript: Transcript,
    connected: Arc<watch::Sender<bool>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl<C: Connector> ChannelManager<C> {
    /// Creates an inactive manager.
    pub fn new(
        connector: C,
        session: SessionStore,
        config: ChannelConfig,
        active: ActiveConversationReader,
        transcript: Transcript,
    ) -> Self {
        let (connected, _rx) = watch::channel(false);
        Self {
            connector: Arc::new(connector),
            session,
            config,
            active,
            transcript,
            connected: Arc::new(connected),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the connection supervisor.
    ///
    /// Requires a usable token and a known username. Returns `false` without
    /// doing anything when those are missing or a supervisor is already
    /// running; a running connection is never replaced.
    pub fn activate(&self) -> bool {
        let has_identity = self
            .session
            .current()
            .is_some_and(|s| s.bearer().is_some() && !s.user.username.trim().is_empty());
        if !has_identity {
            tracing::debug!("channel activation skipped, no usable session");
            return false;
        }

        let mut slot = self.supervisor.lock();
        if slot.as_ref().is_some_and(|s| !s.task.is_finished()) {
            tracing::trace!("channel already active");
            return false;
        }

        let (outbound, rx) = mpsc::unbounded_channel();
        let pump = Pump {
            connector: Arc::clone(&self.connector),
            session: self.session.clone(),
            config: self.config.clone(),
            active: self.active.clone(),
            transcript: self.transcript.clone(),
            connected: Arc::clone(&self.connected),
        };
        let task = tokio::spawn(pump.supervise(rx));
        *slot = Some(Supervisor { outbound, task });
        tracing::info!(topic = %self.config.broadcast_topic, "channel activated");
        true
    }

    /// Closes the connection and stops reconnecting. Safe to call when the
    /// channel was never activated.
    pub async fn deactivate(&self) {
        let supervisor = self.supervisor.lock().take();
        if let Some(Supervisor { outbound, mut task }) = supervisor {
            let _ = outbound.send(Outbound::Shutdown);
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                tracing::warn!("channel did not close in time, aborting");
                task.abort();
            }
            tracing::info!("channel deactivated");
        }
        self.connected.send_replace(false);
    }

    /// Whether a supervisor is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Whether the connection is currently established and subscribed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Publishes `message` to the send destination. Fire-and-forget: the
    /// transcript is only updated when the broker echoes the message back.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] while disconnected and
    /// [`ChannelError::Protocol`] if the message cannot be serialized.
    pub fn publish(&self, message: &ChatMessage) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let body =
            serde_json::to_string(message).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        let slot = self.supervisor.lock();
        let supervisor = slot.as_ref().ok_or(ChannelError::NotConnected)?;
        supervisor
            .outbound
            .send(Outbound::Publish(body))
            .map_err(|_| ChannelError::NotConnected)
    }
}

impl<C: Connector> Drop for ChannelManager<C> {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.task.abort();
        }
    }
}

enum Exit {
    Lost,
    Shutdown,
}

struct Pump<C: Connector> {
    connector: Arc<C>,
    session: SessionStore,
    config: ChannelConfig,
    active: ActiveConversationReader,
    transcript: Transcript,
    connected: Arc<watch::Sender<bool>>,
}

impl<C: Connector> Pump<C> {
    async fn supervise(self, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        let mut session = self.session.subscribe();
        loop {
            // Headers are rebuilt every attempt so a rotated token is used.
            let Some(token) = self.session.token() else {
                tracing::info!("session ended, channel supervisor stopping");
                break;
            };

            match self.connector.connect(auth_headers(&token)).await {
                Ok(mut link) => match link
                    .subscribe(SUBSCRIPTION_ID, &self.config.broadcast_topic)
                    .await
                {
                    Ok(()) => {
                        self.connected.send_replace(true);
                        tracing::info!("channel connected");
                        let exit = self.pump(&mut link, &mut outbound, &mut session).await;
                        self.connected.send_replace(false);
                        if matches!(exit, Exit::Shutdown) {
                            link.close().await;
                            return;
                        }
                        tracing::info!("channel disconnected");
                    }
                    Err(e) => tracing::warn!(error = %e, "subscribe failed"),
                },
                Err(e) => tracing::warn!(error = %e, "channel connect failed"),
            }

            if !self.wait_before_reconnect(&mut outbound, &mut session).await {
                return;
            }
        }
        self.connected.send_replace(false);
    }

    /// Sleeps out the reconnect delay. Returns `false` if shutdown was
    /// requested or the session ended meanwhile.
    async fn wait_before_reconnect(
        &self,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
        session: &mut watch::Receiver<SessionState>,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.reconnect_delay;
        tracing::debug!(delay = ?self.config.reconnect_delay, "reconnecting after delay");
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return true,
                () = signed_out(session) => {
                    tracing::info!("session ended, channel supervisor stopping");
                    return false;
                }
                cmd = outbound.recv() => match cmd {
                    Some(Outbound::Publish(_)) => {
                        tracing::debug!("dropping outbound message while disconnected");
                    }
                    Some(Outbound::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn pump(
        &self,
        link: &mut C::Link,
        outbound: &mut mpsc::UnboundedReceiver<Outbound>,
        session: &mut watch::Receiver<SessionState>,
    ) -> Exit {
        loop {
            tokio::select! {
                () = signed_out(session) => {
                    tracing::info!("session ended, closing channel");
                    return Exit::Shutdown;
                }
                cmd = outbound.recv() => match cmd {
                    Some(Outbound::Publish(body)) => {
                        if let Err(e) = link.publish(&self.config.send_destination, body).await {
                            tracing::warn!(error = %e, "publish failed");
                            return Exit::Lost;
                        }
                    }
                    Some(Outbound::Shutdown) | None => return Exit::Shutdown,
                },
                delivery = link.recv() => match delivery {
                    Ok(delivery) => self.deliver(&delivery),
                    Err(e) => {
                        tracing::info!(error = %e, "channel connection lost");
                        return Exit::Lost;
                    }
                },
            }
        }
    }

    fn deliver(&self, delivery: &Delivery) {
        let active = self.active.get();
        match accept_inbound(&delivery.body, active.as_ref()) {
            Some(message) => {
                tracing::debug!(sender = %message.sender_id, "inbound message accepted");
                self.transcript.append(message);
            }
            None => tracing::trace!(destination = %delivery.destination, "inbound message filtered"),
        }
    }
}

/// Resolves once the session is signed out.
async fn signed_out(session: &mut watch::Receiver<SessionState>) {
    let ended = session
        .wait_for(|state| matches!(state, SessionState::SignedOut(_)))
        .await
        .is_ok();
    if !ended {
        // The store outlives every supervisor; a closed channel never signs out.
        std::future::pending::<()>().await;
    }
}
