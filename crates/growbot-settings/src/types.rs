//! Settings tree. Every section defaults independently so a partial JSON file
//! only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrowbotSettings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per socket before sends start failing.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_send_queue: 64,
            heartbeat_interval_secs: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Video relay liveness settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// How often each relay checks for a stalled producer.
    pub tick_ms: u64,
    /// Silence after which the offline placeholder is shown.
    pub death_threshold_ms: u64,
    /// JPEG shown while a robot's video is offline. Built-in image when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder_path: Option<String>,
    /// Frames a slow viewer may fall behind before it skips ahead.
    pub subscriber_buffer: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            death_threshold_ms: 5_000,
            placeholder_path: None,
            subscriber_buffer: 16,
        }
    }
}

impl RelaySettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn death_threshold(&self) -> Duration {
        Duration::from_millis(self.death_threshold_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: String,
    pub blob_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "growbot.db".to_string(),
            blob_dir: "blobs".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub log_to_sqlite: bool,
    pub log_db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            json: false,
            log_to_sqlite: false,
            log_db_path: "growbot-logs.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = GrowbotSettings::default();
        assert_eq!(s.server.bind_address(), "0.0.0.0:8080");
        assert_eq!(s.relay.tick(), Duration::from_secs(1));
        assert_eq!(s.relay.death_threshold(), Duration::from_secs(5));
        assert!(s.relay.placeholder_path.is_none());
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(GrowbotSettings::default()).unwrap();
        assert_eq!(v["server"]["maxSendQueue"], 64);
        assert_eq!(v["relay"]["deathThresholdMs"], 5000);
        assert!(v["relay"].get("placeholderPath").is_none());
        assert_eq!(v["storage"]["blobDir"], "blobs");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let s: RelaySettings = serde_json::from_str(r#"{"tickMs": 250}"#).unwrap();
        assert_eq!(s.tick_ms, 250);
        assert_eq!(s.death_threshold_ms, 5_000);
    }
}
