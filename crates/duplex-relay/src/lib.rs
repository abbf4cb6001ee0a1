//! # duplex-relay
//!
//! A single, explicitly owned connection to the backend relay.
//!
//! - [`RelayConnection`]: idempotent `connect`, at-most-once `emit`, ordered
//!   handler registry, bounded fixed-delay reconnects
//! - [`packet`]: Engine.IO v4 / Socket.IO v5 text packet codec
//! - [`websocket`]: `tokio-tungstenite` transport
//! - [`names`]: reserved and domain event names

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod names;
pub mod packet;
pub mod transport;
pub mod websocket;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use connection::{CloseReason, ConnectionState, RelayConfig, RelayConnection};
pub use error::RelayError;
pub use transport::{RelayConnector, RelayLink};
pub use websocket::WsConnector;
