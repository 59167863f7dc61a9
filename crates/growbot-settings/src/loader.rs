//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::GrowbotSettings;

/// `$GROWBOT_CONFIG`, or `growbot.json` in the working directory.
pub fn settings_path() -> PathBuf {
    std::env::var("GROWBOT_CONFIG")
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from("growbot.json"), PathBuf::from)
}

pub fn load_settings() -> Result<GrowbotSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GrowbotSettings> {
    let defaults = serde_json::to_value(GrowbotSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GrowbotSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

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

/// Apply `GROWBOT_*` overrides read through `lookup`.
///
/// Invalid values are warned about and ignored.
pub fn apply_overrides<F>(settings: &mut GrowbotSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("GROWBOT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("GROWBOT_PORT").and_then(|v| parse_checked("GROWBOT_PORT", &v, 0u16, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read("GROWBOT_MAX_SEND_QUEUE")
        .and_then(|v| parse_checked("GROWBOT_MAX_SEND_QUEUE", &v, 1usize, 65_536))
    {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = read("GROWBOT_HEARTBEAT_SECS")
        .and_then(|v| parse_checked("GROWBOT_HEARTBEAT_SECS", &v, 1u64, 3_600))
    {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read("GROWBOT_RELAY_TICK_MS")
        .and_then(|v| parse_checked("GROWBOT_RELAY_TICK_MS", &v, 10u64, 60_000))
    {
        settings.relay.tick_ms = v;
    }
    if let Some(v) = read("GROWBOT_DEATH_THRESHOLD_MS")
        .and_then(|v| parse_checked("GROWBOT_DEATH_THRESHOLD_MS", &v, 100u64, 600_000))
    {
        settings.relay.death_threshold_ms = v;
    }
    if let Some(v) = read("GROWBOT_PLACEHOLDER") {
        settings.relay.placeholder_path = Some(v);
    }
    if let Some(v) = read("GROWBOT_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = read("GROWBOT_BLOB_DIR") {
        settings.storage.blob_dir = v;
    }
    if let Some(v) = read("GROWBOT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("GROWBOT_LOG_JSON").and_then(|v| parse_bool_logged("GROWBOT_LOG_JSON", &v)) {
        settings.logging.json = v;
    }
}

fn validate(settings: &GrowbotSettings) -> Result<()> {
    if settings.relay.tick_ms == 0 {
        return Err(SettingsError::InvalidValue("relay.tickMs must be positive".into()));
    }
    if settings.relay.death_threshold_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "relay.deathThresholdMs must be positive".into(),
        ));
    }
    if settings.server.max_send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxSendQueue must be positive".into(),
        ));
    }
    if settings.server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be positive".into(),
        ));
    }
    Ok(())
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_logged(name: &str, val: &str) -> Option<bool> {
    let result = parse_bool(val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn parse_checked<T>(name: &str, val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let result = val.parse::<T>().ok().filter(|n| *n >= min && *n <= max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid numeric env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"relay": {"tickMs": 1000, "deathThresholdMs": 5000}}),
            json!({"relay": {"deathThresholdMs": 2000}}),
        );
        assert_eq!(merged["relay"]["tickMs"], 1000);
        assert_eq!(merged["relay"]["deathThresholdMs"], 2000);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged["a"], json!([3]));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.relay.death_threshold_ms, 5_000);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growbot.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090}, "storage": {"blobDir": "/var/lib/growbot"}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.storage.blob_dir, "/var/lib/growbot");
        assert_eq!(settings.storage.database_path, "growbot.db");
        assert_eq!(settings.server.max_send_queue, 64);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growbot.json");
        std::fs::write(&path, "{nope").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_tick_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growbot.json");
        std::fs::write(&path, r#"{"relay": {"tickMs": 0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growbot.json");
        std::fs::write(&path, r#"{"server": {"heartbeatIntervalSecs": 0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(ref msg) if msg.contains("heartbeat")));
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = GrowbotSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("GROWBOT_PORT", "9000"),
                ("GROWBOT_DEATH_THRESHOLD_MS", "2000"),
                ("GROWBOT_LOG_JSON", "yes"),
                ("GROWBOT_BLOB_DIR", "/tmp/blobs"),
            ]),
        );
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.relay.death_threshold_ms, 2_000);
        assert!(s.logging.json);
        assert_eq!(s.storage.blob_dir, "/tmp/blobs");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = GrowbotSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("GROWBOT_PORT", "eighty"),
                ("GROWBOT_RELAY_TICK_MS", "1"),
                ("GROWBOT_LOG_JSON", "maybe"),
                ("GROWBOT_HOST", ""),
            ]),
        );
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.relay.tick_ms, 1_000);
        assert!(!s.logging.json);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }
}
