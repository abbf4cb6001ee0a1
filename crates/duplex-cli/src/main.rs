//! # duplex
//!
//! Console binary: loads settings, wires the peer session, the relay and the
//! bridge together, and reads commands from stdin.

#![deny(unsafe_code)]

mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use duplex_bridge::SessionBridge;
use duplex_core::logging::{init_json_subscriber, init_subscriber};
use duplex_peer::audio::SilenceSource;
use duplex_peer::rtc::RtcBackend;
use duplex_peer::{HttpSignaling, HttpSignalingConfig, PeerConfig};
use duplex_relay::{RelayConfig, RelayConnection, WsConnector};
use duplex_settings::DuplexSettings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::console::{Command, HELP};

/// Duplex session bridge console.
#[derive(Parser, Debug)]
#[command(name = "duplex", about = "Bridge a realtime peer session with a backend relay")]
struct Cli {
    /// Settings file (defaults to `~/.duplex/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Relay URL (overrides settings).
    #[arg(long)]
    relay_url: Option<String>,

    /// Realtime model (overrides settings).
    #[arg(long)]
    model: Option<String>,

    /// Log level (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn load_settings(&self) -> Result<DuplexSettings> {
        let path = self
            .settings
            .clone()
            .unwrap_or_else(duplex_settings::settings_path);
        let mut settings = duplex_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;

        if let Some(ref url) = self.relay_url {
            settings.relay.url.clone_from(url);
        }
        if let Some(ref model) = self.model {
            settings.signaling.model.clone_from(model);
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }
}

fn build_bridge(
    settings: &DuplexSettings,
) -> Result<(Arc<SessionBridge>, duplex_bridge::BridgeEvents)> {
    let relay = RelayConnection::new(
        RelayConfig {
            url: settings.relay.url.clone(),
            reconnect: settings.relay.reconnect.clone(),
            connect_timeout: Duration::from_millis(settings.relay.connect_timeout_ms),
        },
        Arc::new(WsConnector::new(settings.relay.outbound_buffer)),
    );

    let signaling = HttpSignaling::new(HttpSignalingConfig {
        credential_url: settings.signaling.credential_url.clone(),
        base_url: settings.signaling.base_url.clone(),
        model: settings.signaling.model.clone(),
        request_timeout: Duration::from_millis(settings.signaling.request_timeout_ms),
    })
    .context("Failed to build signaling client")?;

    let backend = RtcBackend::new(settings.peer.ice_servers.clone())
        .context("Failed to initialize WebRTC")?;

    Ok(SessionBridge::new(
        PeerConfig {
            control_channel_label: settings.peer.control_channel_label.clone(),
        },
        Arc::new(backend),
        Arc::new(SilenceSource),
        Arc::new(signaling),
        relay,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;

    if settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }
    tracing::info!(
        relay = %settings.relay.url,
        model = %settings.signaling.model,
        "duplex starting"
    );

    let (bridge, events) = build_bridge(&settings)?;
    let cancel = CancellationToken::new();
    let dispatcher = tokio::spawn(Arc::clone(&bridge).run(events, cancel.clone()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else { break };
                if !console::execute(&bridge, Command::parse(&line)).await {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    tracing::info!("Shutting down...");
    bridge.shutdown().await;
    cancel.cancel();
    let _ = dispatcher.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"relay": {"url": "http://file:5000"}, "signaling": {"model": "from-file"}}"#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "duplex",
            "--settings",
            path.to_str().unwrap(),
            "--model",
            "from-flag",
            "--json-logs",
        ]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.signaling.model, "from-flag");
        assert!(settings.logging.json);
        // Only compare when the environment does not override it.
        if std::env::var("DUPLEX_RELAY_URL").is_err() {
            assert_eq!(settings.relay.url, "http://file:5000");
        }
    }

    #[test]
    fn invalid_flag_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::parse_from([
            "duplex",
            "--settings",
            dir.path().join("missing.json").to_str().unwrap(),
            "--relay-url",
            "localhost:5000",
        ]);
        assert!(cli.load_settings().is_err());
    }

    #[test]
    fn defaults_without_flags() {
        let cli = Cli::parse_from(["duplex"]);
        assert!(cli.settings.is_none());
        assert!(cli.relay_url.is_none());
        assert!(!cli.json_logs);
    }
}
