use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tracing::instrument;

use growbot_core::ids::{RobotId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq)]
pub struct RobotRow {
    pub id: RobotId,
    pub user_id: Option<UserId>,
    pub title: String,
    pub seen_at: Option<DateTime<Utc>>,
}

pub struct RobotRepo {
    db: Database,
}

impl RobotRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Provision a robot, optionally already claimed by a user.
    #[instrument(skip(self))]
    pub fn create(&self, user: Option<UserId>, title: &str) -> Result<RobotId, StoreError> {
        let id = RobotId::generate();
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO robots (id, user_id, title) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), user.map(|u| u.get()), title],
            )?;
            tx.execute(
                "INSERT INTO robot_state (id, seen_at) VALUES (?1, NULL)",
                [id.to_string()],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    #[instrument(skip(self), fields(robot_id = %id))]
    pub fn get(&self, id: RobotId) -> Result<Option<RobotRow>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT r.id, r.user_id, r.title, s.seen_at
                     FROM robots r LEFT JOIN robot_state s ON s.id = r.id
                     WHERE r.id = ?1",
                    [id.to_string()],
                    |row| {
                        let seen_at: Option<String> = row.get(3)?;
                        Ok(RobotRow {
                            id: row_helpers::robot_id(row, 0)?,
                            user_id: row.get::<_, Option<i64>>(1)?.map(UserId::new),
                            title: row.get(2)?,
                            seen_at: seen_at
                                .as_deref()
                                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                                .map(|t| t.with_timezone(&Utc)),
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn owner(&self, id: RobotId) -> Result<Option<UserId>, StoreError> {
        Ok(self.get(id)?.and_then(|r| r.user_id))
    }

    #[instrument(skip(self), fields(robot_id = %id))]
    pub fn touch(&self, id: RobotId, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO robot_state (id, seen_at) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET seen_at = excluded.seen_at",
                rusqlite::params![id.to_string(), seen_at.to_rfc3339()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(robot_id = %id))]
    pub fn rename(&self, id: RobotId, title: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE robots SET title = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), title],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("robot {id}")));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (RobotRepo, UserId) {
        let db = Database::in_memory().unwrap();
        let user = UserRepo::new(db.clone()).create("ada@example.com").unwrap();
        (RobotRepo::new(db), user)
    }

    #[test]
    fn create_and_get() {
        let (repo, user) = setup();
        let id = repo.create(Some(user), "kitchen").unwrap();
        let row = repo.get(id).unwrap().unwrap();
        assert_eq!(row.user_id, Some(user));
        assert_eq!(row.title, "kitchen");
        assert!(row.seen_at.is_none());
        assert_eq!(repo.owner(id).unwrap(), Some(user));
    }

    #[test]
    fn unclaimed_robot_has_no_owner() {
        let (repo, _) = setup();
        let id = repo.create(None, "").unwrap();
        assert_eq!(repo.owner(id).unwrap(), None);
        assert!(repo.get(RobotId::generate()).unwrap().is_none());
    }

    #[test]
    fn touch_records_seen_at() {
        let (repo, user) = setup();
        let id = repo.create(Some(user), "porch").unwrap();
        let now = Utc::now();
        repo.touch(id, now).unwrap();
        let seen = repo.get(id).unwrap().unwrap().seen_at.unwrap();
        assert_eq!(seen.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn rename_unknown_robot_is_not_found() {
        let (repo, user) = setup();
        let id = repo.create(Some(user), "a").unwrap();
        repo.rename(id, "b").unwrap();
        assert_eq!(repo.get(id).unwrap().unwrap().title, "b");
        assert!(matches!(
            repo.rename(RobotId::generate(), "c"),
            Err(StoreError::NotFound(_))
        ));
    }
}
