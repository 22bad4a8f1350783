//! Loopback broker for testing.
//!
//! An in-process stand-in for the STOMP broker. Every [`LoopbackLink`] is
//! backed by an unbounded [`tokio::sync::mpsc`] channel; publishing to a
//! routed destination fans the body out to every link subscribed to the
//! route's target, the way the real backend echoes chat messages onto the
//! broadcast topic.
//!
//! The broker also records handshakes, can refuse connections, and can
//! sever every open link to simulate a dropped socket.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::manager::{DEFAULT_BROADCAST_TOPIC, DEFAULT_SEND_DESTINATION};
use super::{ChannelError, Connector, Delivery, Link};

struct Slot {
    subscriptions: Vec<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    links: HashMap<u64, Slot>,
    next_link: u64,
    handshakes: Vec<Vec<(String, String)>>,
    refuse_next: usize,
    routes: HashMap<String, String>,
    published: Vec<Delivery>,
}

impl BrokerState {
    fn fan_out(&mut self, destination: &str, body: &str) {
        self.links.retain(|_, slot| {
            if !slot.subscriptions.iter().any(|s| s == destination) {
                return true;
            }
            slot.tx
                .send(Delivery {
                    destination: destination.to_string(),
                    body: body.to_string(),
                })
                .is_ok()
        });
    }
}

/// In-process broker implementing [`Connector`].
///
/// Cheap to clone; clones share the same broker.
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for LoopbackBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBroker {
    /// Creates a broker that echoes the default send destination onto the
    /// default broadcast topic.
    #[must_use]
    pub fn new() -> Self {
        let broker = Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
        };
        broker.route(DEFAULT_SEND_DESTINATION, DEFAULT_BROADCAST_TOPIC);
        broker
    }

    /// Routes publishes on `from` to subscribers of `to`.
    pub fn route(&self, from: &str, to: &str) {
        self.state
            .lock()
            .routes
            .insert(from.to_string(), to.to_string());
    }

    /// Delivers `body` to every subscriber of `destination`, as if another
    /// client had sent it.
    pub fn inject(&self, destination: &str, body: &str) {
        self.state.lock().fan_out(destination, body);
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse_next = n;
    }

    /// Severs every open link; their `recv` calls fail with
    /// [`ChannelError::Closed`].
    pub fn drop_all_links(&self) {
        self.state.lock().links.clear();
    }

    /// Number of connection attempts, including refused ones.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.lock().handshakes.len()
    }

    /// Handshake headers of every connection attempt, in order.
    #[must_use]
    pub fn handshakes(&self) -> Vec<Vec<(String, String)>> {
        self.state.lock().handshakes.clone()
    }

    /// Number of links currently open.
    #[must_use]
    pub fn open_links(&self) -> usize {
        self.state.lock().links.len()
    }

    /// Number of open links subscribed to `destination`.
    #[must_use]
    pub fn subscribers(&self, destination: &str) -> usize {
        self.state
            .lock()
            .links
            .values()
            .filter(|slot| slot.subscriptions.iter().any(|s| s == destination))
            .count()
    }

    /// Everything published by clients, in order.
    #[must_use]
    pub fn published(&self) -> Vec<Delivery> {
        self.state.lock().published.clone()
    }
}

impl Connector for LoopbackBroker {
    type Link = LoopbackLink;

    async fn connect(&self, headers: Vec<(String, String)>) -> Result<LoopbackLink, ChannelError> {
        let mut state = self.state.lock();
        state.handshakes.push(headers);
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(ChannelError::Unreachable("loopback refused".to_string()));
        }
        let id = state.next_link;
        state.next_link += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.links.insert(
            id,
            Slot {
                subscriptions: Vec::new(),
                tx,
            },
        );
        drop(state);

        Ok(LoopbackLink {
            id,
            broker: self.clone(),
            rx,
        })
    }
}

/// One client connection to a [`LoopbackBroker`].
pub struct LoopbackLink {
    id: u64,
    broker: LoopbackBroker,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Link for LoopbackLink {
    async fn subscribe(&mut self, _id: &str, destination: &str) -> Result<(), ChannelError> {
        let mut state = self.broker.state.lock();
        let slot = state.links.get_mut(&self.id).ok_or(ChannelError::Closed)?;
        slot.subscriptions.push(destination.to_string());
        Ok(())
    }

    async fn publish(&mut self, destination: &str, body: String) -> Result<(), ChannelError> {
        let mut state = self.broker.state.lock();
        if !state.links.contains_key(&self.id) {
            return Err(ChannelError::Closed);
        }
        let target = state.routes.get(destination).cloned();
        if let Some(target) = target {
            state.fan_out(&target, &body);
        }
        state.published.push(Delivery {
            destination: destination.to_string(),
            body,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<Delivery, ChannelError> {
        self.rx.recv().await.ok_or(ChannelError::Closed)
    }

    async fn close(self) {}
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.broker.state.lock().links.remove(&self.id);
    }
}
