//! # duplex-settings
//!
//! Configuration for the session bridge.
//!
//! Loading order, lowest to highest priority:
//! 1. Compiled defaults ([`DuplexSettings::default`])
//! 2. `~/.duplex/settings.json`, deep-merged over the defaults
//! 3. `DUPLEX_*` environment variables
//!
//! Settings are loaded once by the binary and handed to each component as
//! plain values; there is no global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{DuplexSettings, LoggingSettings, PeerSettings, RelaySettings, SignalingSettings};
