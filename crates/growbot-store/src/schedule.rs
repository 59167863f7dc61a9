use rusqlite::{Connection, OptionalExtension, ToSql};
use tracing::instrument;

use growbot_core::ids::{ActionId, EventId, PlantId, RobotId, UserId};
use growbot_core::records::{CreatedEvent, NewEvent, PendingAction};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Events (schedules) and the per-robot actions they fire.
pub struct ScheduleRepo {
    db: Database,
}

const ACTION_COLUMNS: &str = "a.id, a.event_id, a.name, a.data, a.plant_id, a.robot_id, e.recurrence, e.ephemeral";

fn action_rows(
    conn: &Connection,
    filter: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<PendingAction>, StoreError> {
    let sql = format!(
        "SELECT {ACTION_COLUMNS} FROM event_actions a JOIN events e ON e.id = a.event_id
         WHERE {filter} ORDER BY a.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let actions = stmt
        .query_map(params, |row| {
            Ok(PendingAction {
                id: ActionId::new(row.get(0)?),
                event_id: EventId::new(row.get(1)?),
                name: row.get(2)?,
                data: row_helpers::json(row, 3)?,
                plant_id: row.get::<_, Option<i64>>(4)?.map(PlantId::new),
                robot_id: row_helpers::robot_id(row, 5)?,
                recurrences: row_helpers::json(row, 6)?,
                ephemeral: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(actions)
}

impl ScheduleRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store an event with all of its actions in one transaction.
    #[instrument(skip(self, event), fields(user_id = %user, actions = event.actions.len()))]
    pub fn create_event(&self, user: UserId, event: &NewEvent) -> Result<CreatedEvent, StoreError> {
        let recurrence = serde_json::to_string(&event.recurrences)?;
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO events (summary, recurrence, user_id, ephemeral) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![event.summary, recurrence, user.get(), event.ephemeral],
            )?;
            let id = EventId::new(tx.last_insert_rowid());

            let mut robots: Vec<RobotId> = Vec::new();
            for action in &event.actions {
                tx.execute(
                    "INSERT INTO event_actions (event_id, name, data, plant_id, robot_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        id.get(),
                        action.name,
                        action.data.to_string(),
                        action.plant_id.map(|p| p.get()),
                        action.robot_id.to_string(),
                    ],
                )?;
                if !robots.contains(&action.robot_id) {
                    robots.push(action.robot_id);
                }
            }
            tx.commit()?;
            Ok(CreatedEvent { id, robots })
        })
    }

    #[instrument(skip(self), fields(robot_id = %robot))]
    pub fn pending_for_robot(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Vec<PendingAction>, StoreError> {
        let robot = robot.to_string();
        self.db.with_conn(|conn| {
            action_rows(
                conn,
                "a.robot_id = ?1 AND (?2 = 0 OR e.ephemeral = 0)",
                &[&robot as &dyn ToSql, &exclude_ephemeral],
            )
        })
    }

    pub fn for_user(&self, user: UserId) -> Result<Vec<PendingAction>, StoreError> {
        self.db
            .with_conn(|conn| action_rows(conn, "e.user_id = ?1", &[&user.get() as &dyn ToSql]))
    }

    /// Delete one action. An ephemeral event left without actions goes too.
    #[instrument(skip(self), fields(action_id = %id))]
    pub fn delete_action(&self, id: ActionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let event: Option<i64> = tx
                .query_row(
                    "SELECT event_id FROM event_actions WHERE id = ?1",
                    [id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(event) = event else {
                return Err(StoreError::NotFound(format!("action {id}")));
            };
            tx.execute("DELETE FROM event_actions WHERE id = ?1", [id.get()])?;
            tx.execute(
                "DELETE FROM events WHERE id = ?1 AND ephemeral = 1
                 AND NOT EXISTS (SELECT 1 FROM event_actions WHERE event_id = ?1)",
                [event],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robots::RobotRepo;
    use crate::users::UserRepo;
    use growbot_core::records::{NewAction, ACTION_PLANT_WATER, ACTION_ROBOT_RANDOM_MOVE};
    use serde_json::json;

    struct Fixture {
        db: Database,
        repo: ScheduleRepo,
        user: UserId,
        robot: RobotId,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let user = UserRepo::new(db.clone()).create("ada@example.com").unwrap();
        let robot = RobotRepo::new(db.clone()).create(Some(user), "r").unwrap();
        Fixture {
            repo: ScheduleRepo::new(db.clone()),
            db,
            user,
            robot,
        }
    }

    fn event(robot: RobotId, ephemeral: bool, name: &str) -> NewEvent {
        NewEvent {
            summary: format!("{name} schedule"),
            recurrences: vec!["RRULE:FREQ=DAILY".into()],
            ephemeral,
            actions: vec![NewAction {
                name: name.into(),
                robot_id: robot,
                plant_id: None,
                data: json!({"n": 1}),
            }],
        }
    }

    #[test]
    fn create_returns_targeted_robots_once() {
        let f = fixture();
        let mut ev = event(f.robot, false, ACTION_PLANT_WATER);
        ev.actions.push(ev.actions[0].clone());
        let created = f.repo.create_event(f.user, &ev).unwrap();
        assert_eq!(created.robots, vec![f.robot]);
        assert_eq!(f.repo.pending_for_robot(f.robot, false).unwrap().len(), 2);
    }

    #[test]
    fn pending_can_exclude_ephemeral() {
        let f = fixture();
        f.repo.create_event(f.user, &event(f.robot, false, ACTION_PLANT_WATER)).unwrap();
        f.repo.create_event(f.user, &event(f.robot, true, ACTION_ROBOT_RANDOM_MOVE)).unwrap();

        let all = f.repo.pending_for_robot(f.robot, false).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|a| a.ephemeral));
        assert_eq!(all[0].recurrences, vec!["RRULE:FREQ=DAILY".to_string()]);
        assert_eq!(all[0].data, json!({"n": 1}));

        let persistent = f.repo.pending_for_robot(f.robot, true).unwrap();
        assert_eq!(persistent.len(), 1);
        assert_eq!(persistent[0].name, ACTION_PLANT_WATER);
    }

    #[test]
    fn deleting_last_ephemeral_action_removes_event() {
        let f = fixture();
        let created = f.repo.create_event(f.user, &event(f.robot, true, ACTION_ROBOT_RANDOM_MOVE)).unwrap();
        let action = f.repo.pending_for_robot(f.robot, false).unwrap()[0].id;
        f.repo.delete_action(action).unwrap();

        let events: i64 = f
            .db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM events WHERE id = ?1",
                    [created.id.get()],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(events, 0);
        assert!(matches!(f.repo.delete_action(action), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn corrupt_recurrence_is_an_error() {
        let f = fixture();
        let created = f.repo.create_event(f.user, &event(f.robot, false, ACTION_PLANT_WATER)).unwrap();
        f.db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE events SET recurrence = 'not json' WHERE id = ?1",
                    [created.id.get()],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            f.repo.pending_for_robot(f.robot, false),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn for_user_lists_across_robots() {
        let f = fixture();
        let other = RobotRepo::new(f.db.clone()).create(Some(f.user), "second").unwrap();
        f.repo.create_event(f.user, &event(f.robot, false, ACTION_PLANT_WATER)).unwrap();
        f.repo.create_event(f.user, &event(other, false, ACTION_PLANT_WATER)).unwrap();
        assert_eq!(f.repo.for_user(f.user).unwrap().len(), 2);
    }
}
