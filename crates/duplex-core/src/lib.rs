//! # duplex-core
//!
//! Shared vocabulary for the duplex session bridge.
//!
//! - **Branded IDs**: `EventId`, `SessionId` as newtypes for type safety
//! - **Control events**: lossless `ControlEvent` wire frames and the typed
//!   `ClientEvent` sum type for everything the bridge originates
//! - **Errors**: `BridgeError` taxonomy via `thiserror`
//! - **Reconnect policy**: fixed-delay, bounded retry parameters
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod retry;

pub use errors::BridgeError;
pub use events::{ClientEvent, ControlEvent};
pub use ids::{EventId, SessionId};
