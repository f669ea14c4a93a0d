//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TETHER_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or a
/// combination rejected by [`TetherSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `env`.
///
/// Invalid values are logged and ignored (falling back to file/default).
/// Booleans accept `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
fn apply_overrides(settings: &mut TetherSettings, env: impl Fn(&str) -> Option<String>) {
    let reader = EnvReader { env };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = reader.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = reader.u16("TETHER_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Protocol ────────────────────────────────────────────────────
    if let Some(v) = reader.u64("TETHER_HEARTBEAT_INTERVAL_MS", 1, 600_000) {
        settings.protocol.heartbeat_interval_ms = v;
    }
    if let Some(v) = reader.u64("TETHER_LIVENESS_TIMEOUT_MS", 1, 3_600_000) {
        settings.protocol.liveness_timeout_ms = v;
    }
    if let Some(v) = reader.u64("TETHER_REQUEST_TIMEOUT_MS", 1, 3_600_000) {
        settings.protocol.request_timeout_ms = v;
    }
    if let Some(v) = reader.u64("TETHER_MIN_SEND_INTERVAL_MS", 0, 60_000) {
        settings.protocol.min_send_interval_ms = v;
    }
    if let Some(v) = reader.bool("TETHER_DISCONNECT_ON_LIVENESS_TIMEOUT") {
        settings.protocol.disconnect_on_liveness_timeout = v;
    }
    if let Some(v) = reader.bool("TETHER_REJECT_PENDING_ON_CLOSE") {
        settings.protocol.reject_pending_on_close = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = reader.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.env)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn deep_merge_nested_objects() {
        let target = json!({"protocol": {"heartbeatIntervalMs": 2500, "livenessTimeoutMs": 10000}});
        let source = json!({"protocol": {"livenessTimeoutMs": 30000}});
        let result = deep_merge(target, source);
        assert_eq!(result["protocol"]["heartbeatIntervalMs"], 2500);
        assert_eq!(result["protocol"]["livenessTimeoutMs"], 30000);
    }

    #[test]
    fn deep_merge_null_preserves_target() {
        let result = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(result["a"], 1);
    }

    #[test]
    fn deep_merge_primitive_replaces() {
        let result = deep_merge(json!({"a": {"b": 1}}), json!({"a": 5}));
        assert_eq!(result["a"], 5);
    }

    #[test]
    fn deep_merge_adds_new_keys() {
        let result = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(result, json!({"a": 1, "b": 2}));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_with_env(&dir.path().join("nope.json"), no_env).unwrap();
        assert_eq!(settings.protocol.heartbeat_interval_ms, 2_500);
        assert_eq!(settings.server.port, 8080);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"port":9100},"protocol":{"disconnectOnLivenessTimeout":true}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(settings.protocol.disconnect_on_liveness_timeout);
        assert_eq!(settings.protocol.request_timeout_ms, 2_000);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_combination_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"protocol":{"livenessTimeoutMs":100}}"#).unwrap();
        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_beat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9100}}"#).unwrap();

        let env = env_from(&[
            ("TETHER_PORT", "9200"),
            ("TETHER_HOST", "0.0.0.0"),
            ("TETHER_REJECT_PENDING_ON_CLOSE", "yes"),
            ("TETHER_LOG_LEVEL", "debug"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(settings.protocol.reject_pending_on_close);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            env_from(&[
                ("TETHER_PORT", "not-a-port"),
                ("TETHER_HEARTBEAT_INTERVAL_MS", "0"),
                ("TETHER_DISCONNECT_ON_LIVENESS_TIMEOUT", "maybe"),
                ("TETHER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.protocol.heartbeat_interval_ms, 2_500);
        assert!(!settings.protocol.disconnect_on_liveness_timeout);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn env_timing_overrides() {
        let mut settings = TetherSettings::default();
        apply_overrides(
            &mut settings,
            env_from(&[
                ("TETHER_HEARTBEAT_INTERVAL_MS", "1000"),
                ("TETHER_LIVENESS_TIMEOUT_MS", "4000"),
                ("TETHER_REQUEST_TIMEOUT_MS", "750"),
                ("TETHER_MIN_SEND_INTERVAL_MS", "0"),
            ]),
        );
        assert_eq!(settings.protocol.heartbeat_interval_ms, 1_000);
        assert_eq!(settings.protocol.liveness_timeout_ms, 4_000);
        assert_eq!(settings.protocol.request_timeout_ms, 750);
        assert_eq!(settings.protocol.min_send_interval_ms, 0);
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 100, 1000), Some(500));
        assert_eq!(parse_u64_range("50", 100, 1000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn settings_path_ends_with_tether_dir() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }
}
