//! Shared data model and wire codec for the Arena messaging client.

pub mod model;
pub mod stomp;
