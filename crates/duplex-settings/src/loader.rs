//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DuplexSettings;

/// Resolve the path to the settings file (`~/.duplex/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".duplex").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DuplexSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<DuplexSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_merged(path: &Path) -> Result<DuplexSettings> {
    let defaults = serde_json::to_value(DuplexSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `DUPLEX_*` environment variable overrides.
///
/// Out-of-range or unparsable numbers are ignored with a warning.
pub fn apply_env_overrides(settings: &mut DuplexSettings) {
    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = read_env_string("DUPLEX_RELAY_URL") {
        settings.relay.url = v;
    }
    if let Some(v) = read_env_u32("DUPLEX_RELAY_RECONNECT_ATTEMPTS", 0, 100) {
        settings.relay.reconnect.max_attempts = v;
    }
    if let Some(v) = read_env_u64("DUPLEX_RELAY_RECONNECT_DELAY_MS", 1, 600_000) {
        settings.relay.reconnect.delay_ms = v;
    }

    // ── Signaling ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("DUPLEX_MODEL") {
        settings.signaling.model = v;
    }
    if let Some(v) = read_env_string("DUPLEX_NEGOTIATION_URL") {
        settings.signaling.base_url = v;
    }
    if let Some(v) = read_env_string("DUPLEX_CREDENTIAL_URL") {
        settings.signaling.credential_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("DUPLEX_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use serde_json::json;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override_keeps_siblings() {
        let target = json!({"relay": {"url": "http://a", "connectTimeoutMs": 5}});
        let source = json!({"relay": {"url": "http://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["relay"]["url"], "http://b");
        assert_eq!(merged["relay"]["connectTimeoutMs"], 5);
    }

    #[test]
    fn merge_array_replaces() {
        let target = json!({"iceServers": ["stun:a"]});
        let source = json!({"iceServers": ["stun:b", "stun:c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["iceServers"], json!(["stun:b", "stun:c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_u32_range_bounds() {
        assert_eq!(parse_u32_range("0", 0, 100), Some(0));
        assert_eq!(parse_u32_range("100", 0, 100), Some(100));
        assert_eq!(parse_u32_range("101", 0, 100), None);
        assert_eq!(parse_u32_range("-1", 0, 100), None);
        assert_eq!(parse_u32_range(" 7 ", 0, 100), Some(7));
    }

    #[test]
    fn parse_u64_range_rejects_garbage() {
        assert_eq!(parse_u64_range("1000", 1, 600_000), Some(1000));
        assert_eq!(parse_u64_range("0", 1, 600_000), None);
        assert_eq!(parse_u64_range("1s", 1, 600_000), None);
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let settings = read_merged(Path::new("/nonexistent/duplex/settings.json")).unwrap();
        assert_eq!(settings, DuplexSettings::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"relay": {"url": "http://10.0.0.2:5000", "reconnect": {"maxAttempts": 2}}}"#,
        )
        .unwrap();

        let settings = read_merged(&path).unwrap();
        assert_eq!(settings.relay.url, "http://10.0.0.2:5000");
        assert_eq!(settings.relay.reconnect.max_attempts, 2);
        assert_eq!(settings.relay.reconnect.delay_ms, 1000);
        assert_eq!(settings.peer.control_channel_label, "oai-events");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(read_merged(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_merged_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"relay": {"url": "localhost:5000"}}"#).unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result, Err(SettingsError::InvalidValue { .. })));
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".duplex/settings.json"));
    }
}
