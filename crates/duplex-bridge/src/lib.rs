//! # duplex-bridge
//!
//! Ties a peer session to the backend relay.
//!
//! - [`SessionBridge`]: lifecycle, relaying in both directions, one
//!   dispatcher task over peer events and backend updates
//! - [`translator`]: pure conversions between backend payloads, control
//!   events and relay events
//! - [`EventLog`]: newest-first record of control traffic for the current
//!   session

#![deny(unsafe_code)]

pub mod coordinator;
pub mod event_log;
pub mod translator;

pub use coordinator::{BridgeEvents, SessionBridge};
pub use event_log::EventLog;
pub use translator::{BackendUpdate, RelayEvent};
