use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A persisted warn+ log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub robot_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub robot_id: Option<String>,
    pub limit: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS server_logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 robot_id TEXT,
                 user_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_server_logs_robot ON server_logs(robot_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO server_logs (timestamp, level, target, message, fields, robot_id, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.robot_id,
                record.user_id,
            ],
        );
    }

    /// Most recent first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let limit = i64::from(q.limit.unwrap_or(100));
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, fields, robot_id, user_id
             FROM server_logs
             WHERE (?1 IS NULL OR level = ?1) AND (?2 IS NULL OR robot_id = ?2)
             ORDER BY id DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![q.level, q.robot_id, limit], |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                robot_id: row.get(6)?,
                user_id: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    #[cfg(test)]
    fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM server_logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    robot_id: Option<String>,
    user_id: Option<String>,
}

/// Layer that writes warn+ events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    robot_id: Option<String>,
    user_id: Option<String>,
}

impl FieldVisitor {
    fn put(&mut self, name: &str, text: String, raw: serde_json::Value) {
        match name {
            "message" => self.message = Some(text),
            "robot_id" => self.robot_id = Some(text),
            "user_id" => self.user_id = Some(text),
            other => {
                self.fields.insert(other.to_string(), raw);
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}").trim_matches('"').to_string();
        self.put(field.name(), text.clone(), serde_json::Value::String(text));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(
            field.name(),
            value.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.to_string(), value.into());
    }
}

/// Robot/user ids captured from a span, inherited by events inside it.
struct SpanIds {
    robot_id: Option<String>,
    user_id: Option<String>,
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if visitor.robot_id.is_none() || visitor.user_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(ids) = extensions.get::<SpanIds>() {
                        if visitor.robot_id.is_none() {
                            visitor.robot_id.clone_from(&ids.robot_id);
                        }
                        if visitor.user_id.is_none() {
                            visitor.user_id.clone_from(&ids.user_id);
                        }
                    }
                }
            }
        }

        let fields = (!visitor.fields.is_empty())
            .then(|| serde_json::Value::Object(visitor.fields).to_string());

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            robot_id: visitor.robot_id,
            user_id: visitor.user_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if visitor.robot_id.is_some() || visitor.user_id.is_some() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(SpanIds {
                    robot_id: visitor.robot_id,
                    user_id: visitor.user_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn sink() -> (tempfile::TempDir, Arc<SqliteLogSink>) {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("logs.db")).unwrap();
        (dir, Arc::new(sink))
    }

    fn warn_row(sink: &SqliteLogSink, message: &str, robot: Option<&str>) {
        sink.insert(&LogInsert {
            timestamp: "2026-03-01T08:00:00Z".into(),
            level: "WARN".into(),
            target: "growbot_server::link".into(),
            message: message.into(),
            fields: None,
            robot_id: robot.map(str::to_string),
            user_id: None,
        });
    }

    #[test]
    fn query_filters_by_robot() {
        let (_dir, sink) = sink();
        warn_row(&sink, "a", Some("r-1"));
        warn_row(&sink, "b", Some("r-2"));
        warn_row(&sink, "c", None);

        let rows = sink
            .query(&LogQuery {
                robot_id: Some("r-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "a");
        assert_eq!(sink.count().unwrap(), 3);
    }

    #[test]
    fn query_limit_returns_newest_first() {
        let (_dir, sink) = sink();
        for i in 0..5 {
            warn_row(&sink, &format!("msg {i}"), None);
        }
        let rows = sink
            .query(&LogQuery {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "msg 4");
    }

    #[test]
    fn layer_persists_only_warn_and_above() {
        let (_dir, sink) = sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("ignored");
            tracing::warn!(robot_id = "r-9", attempts = 3, "link dropped");
            tracing::error!("boom");
        });

        assert_eq!(sink.count().unwrap(), 2);
        let rows = sink
            .query(&LogQuery {
                robot_id: Some("r-9".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "link dropped");
        assert_eq!(rows[0].fields.as_deref(), Some(r#"{"attempts":3}"#));
    }

    #[test]
    fn layer_inherits_ids_from_span() {
        let (_dir, sink) = sink();
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("robot_link", robot_id = "r-3", user_id = 12);
            let _enter = span.enter();
            tracing::warn!("unknown message type");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows[0].robot_id.as_deref(), Some("r-3"));
        assert_eq!(rows[0].user_id.as_deref(), Some("12"));
    }
}
