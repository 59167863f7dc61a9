use chrono::Utc;
use tracing::instrument;

use growbot_core::ids::{LogEntryId, PlantId, UserId};
use growbot_core::records::{LogEntry, LogSeverity, NewLogEntry};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// The user-facing activity log robots write into.
pub struct LogRepo {
    db: Database,
}

impl LogRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, entry), fields(user_id = %entry.user_id, kind = %entry.kind))]
    pub fn insert(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        let created_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO log (user_id, type, message, severity, robot_id, plant_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    entry.user_id.get(),
                    entry.kind,
                    entry.message,
                    u8::from(entry.severity),
                    entry.robot_id.map(|r| r.to_string()),
                    entry.plant_id.map(|p| p.get()),
                    created_at.to_rfc3339(),
                ],
            )?;
            let id = LogEntryId::new(conn.last_insert_rowid());
            Ok(LogEntry::from_new(id, entry, created_at))
        })
    }

    /// Newest first.
    pub fn list_for_user(&self, user: UserId, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, type, message, severity, robot_id, plant_id, created_at
                 FROM log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(rusqlite::params![user.get(), limit], |row| {
                    let severity: u8 = row.get(4)?;
                    Ok(LogEntry {
                        id: LogEntryId::new(row.get(0)?),
                        user_id: UserId::new(row.get(1)?),
                        kind: row.get(2)?,
                        message: row.get(3)?,
                        severity: LogSeverity::try_from(severity).unwrap_or(LogSeverity::Info),
                        robot_id: row_helpers::robot_id_opt(row, 5)?,
                        plant_id: row.get::<_, Option<i64>>(6)?.map(PlantId::new),
                        created_at: row_helpers::timestamp(row, 7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}
