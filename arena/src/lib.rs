//! `Arena`: real-time messaging and notification client library.
//!
//! Friend chat over a STOMP/WebSocket channel, unread-message polling and
//! the moderator pending-request badge, wired together by explicit
//! dependency injection of a [`session::SessionStore`].

pub mod api;
pub mod app;
pub mod badge;
pub mod channel;
pub mod config;
pub mod conversation;
pub mod session;
pub mod unread;
