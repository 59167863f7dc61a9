mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive (e.g. "debug"). `RUST_LOG` wins when set.
    pub log_level: String,
    /// Per-module overrides appended to the filter, e.g. ("growbot_store", "warn").
    pub module_levels: Vec<(String, String)>,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
    /// Persist warn+ events to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
            log_to_sqlite: false,
            log_db_path: PathBuf::from("growbot-logs.db"),
        }
    }
}

impl TelemetryConfig {
    /// The filter directive string built from the level and module overrides.
    pub fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_lowercase()));
        }
        filter
    }
}

/// Keeps the optional log sink alive for the life of the process.
pub struct TelemetryGuard {
    _log_sink: Option<Arc<SqliteLogSink>>,
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let (sqlite_layer, log_sink) = if config.log_to_sqlite {
        match SqliteLogSink::new(&config.log_db_path) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                (Some(SqliteLogLayer::new(sink.clone())), Some(sink))
            }
            Err(e) => {
                eprintln!("growbot-telemetry: failed to open log DB: {e}");
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    TelemetryGuard {
        _log_sink: log_sink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_directive_appends_modules() {
        let config = TelemetryConfig {
            log_level: "DEBUG".into(),
            module_levels: vec![
                ("growbot_store".into(), "warn".into()),
                ("tower_http".into(), "INFO".into()),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.filter_directive(),
            "debug,growbot_store=warn,tower_http=info"
        );
    }

    #[test]
    fn default_config_is_quiet_and_local() {
        let config = TelemetryConfig::default();
        assert_eq!(config.filter_directive(), "info");
        assert!(!config.json);
        assert!(!config.log_to_sqlite);
    }
}
