use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use growbot_settings::GrowbotSettings;

use crate::relay::RelayConfig;

/// Built-in JPEG shown while a robot's video is offline.
pub const DEFAULT_PLACEHOLDER: &[u8] = include_bytes!("../assets/offline.jpeg");

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// 0 picks a free port.
    pub port: u16,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub shutdown_timeout: Duration,
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_send_queue: 64,
            heartbeat_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings, reading the placeholder image if one is
    /// configured.
    pub fn from_settings(settings: &GrowbotSettings) -> std::io::Result<Self> {
        let placeholder = match settings.relay.placeholder_path.as_deref() {
            Some(path) => Bytes::from(std::fs::read(Path::new(path))?),
            None => Bytes::from_static(DEFAULT_PLACEHOLDER),
        };
        Ok(Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_send_queue: settings.server.max_send_queue,
            heartbeat_interval: Duration::from_secs(settings.server.heartbeat_interval_secs.max(1)),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            relay: RelayConfig {
                tick: settings.relay.tick(),
                death_threshold: settings.relay.death_threshold(),
                subscriber_buffer: settings.relay.subscriber_buffer.max(1),
                placeholder,
            },
        })
    }

    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
