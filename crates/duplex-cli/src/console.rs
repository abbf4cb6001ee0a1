//! Console commands.

use duplex_bridge::SessionBridge;
use duplex_core::ControlEvent;
use serde_json::Value;
use tracing::warn;

/// One line of console input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/start`
    Start,
    /// `/stop`
    Stop,
    /// `/events`
    Events,
    /// `/event <json>`
    Event(String),
    /// `/reconnect`
    Reconnect,
    /// `/quit` or `/exit`
    Quit,
    /// `/help`
    Help,
    /// Any other non-empty line: a user text message.
    Say(String),
    /// An unrecognized `/command`.
    Unknown(String),
    /// Blank line.
    Empty,
}

/// Printed at startup and on `/help`.
pub const HELP: &str = "\
commands:
  /start          start a peer session (connects the relay on first use)
  /stop           end the current session
  /events         print the event log, newest first
  /event <json>   send a raw control event
  /reconnect      retry the relay after its reconnect attempts ran out
  /quit           shut down
anything else is sent as a text message";

impl Command {
    /// Parse a console line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Say(line.to_owned());
        };
        let (name, arg) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(name, arg)| (name, arg.trim()));
        match name {
            "start" => Self::Start,
            "stop" => Self::Stop,
            "events" => Self::Events,
            "event" => Self::Event(arg.to_owned()),
            "reconnect" => Self::Reconnect,
            "quit" | "exit" => Self::Quit,
            "help" => Self::Help,
            _ => Self::Unknown(name.to_owned()),
        }
    }
}

/// Run one command. Returns `false` when the console should exit.
pub async fn execute(bridge: &SessionBridge, command: Command) -> bool {
    match command {
        Command::Start => match bridge.start().await {
            Ok(session_id) => println!("session {session_id} negotiating"),
            Err(err) => println!("start failed [{}]: {err}", err.code()),
        },
        Command::Stop => {
            bridge.stop().await;
            println!("session stopped");
        }
        Command::Events => {
            let events = bridge.events();
            if events.is_empty() {
                println!("(no events)");
            }
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "failed to render event"),
                }
            }
        }
        Command::Event(raw) => match parse_event(&raw) {
            Ok(event) => match bridge.send_client_event(event).await {
                Some(sent) => println!("sent {}", sent.event_type),
                None => println!("not sent (no open session)"),
            },
            Err(reason) => println!("invalid event: {reason}"),
        },
        Command::Reconnect => {
            if bridge.reconnect_relay() {
                println!("relay reconnecting");
            } else {
                println!("relay already {}", bridge.relay().state());
            }
        }
        Command::Say(text) => {
            if !bridge.send_text_message(&text).await {
                println!("not sent (no open session)");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Unknown(name) => println!("unknown command /{name}, try /help"),
        Command::Empty => {}
        Command::Quit => return false,
    }
    true
}

fn parse_event(raw: &str) -> Result<ControlEvent, String> {
    let value: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    ControlEvent::from_value(value).map_err(|e| e.to_string())
}
