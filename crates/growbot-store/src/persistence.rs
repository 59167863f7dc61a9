//! The store seen through the link layer's collaborator traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use growbot_core::collaborators::{Persistence, SessionAuthority};
use growbot_core::errors::PersistenceError;
use growbot_core::ids::{ActionId, PlantId, RobotId, UserId};
use growbot_core::records::{CreatedEvent, LogEntry, NewEvent, NewLogEntry, PendingAction, PlantPhoto};

use crate::database::Database;
use crate::logs::LogRepo;
use crate::plants::PlantRepo;
use crate::robots::RobotRepo;
use crate::schedule::ScheduleRepo;
use crate::users::UserRepo;

pub struct SqlitePersistence {
    pub users: UserRepo,
    pub robots: RobotRepo,
    pub plants: PlantRepo,
    pub logs: LogRepo,
    pub schedule: ScheduleRepo,
}

impl SqlitePersistence {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            robots: RobotRepo::new(db.clone()),
            plants: PlantRepo::new(db.clone()),
            logs: LogRepo::new(db.clone()),
            schedule: ScheduleRepo::new(db),
        }
    }
}

#[async_trait]
impl Persistence for SqlitePersistence {
    async fn get_pending_actions(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Vec<PendingAction>, PersistenceError> {
        Ok(self.schedule.pending_for_robot(robot, exclude_ephemeral)?)
    }

    async fn get_user_actions(&self, user: UserId) -> Result<Vec<PendingAction>, PersistenceError> {
        Ok(self.schedule.for_user(user)?)
    }

    async fn delete_action(&self, id: ActionId) -> Result<(), PersistenceError> {
        Ok(self.schedule.delete_action(id)?)
    }

    async fn insert_log_entry(&self, entry: NewLogEntry) -> Result<LogEntry, PersistenceError> {
        Ok(self.logs.insert(entry)?)
    }

    async fn update_soil_moisture(&self, plant: PlantId, value: i64) -> Result<(), PersistenceError> {
        Ok(self.plants.set_soil_moisture(plant, value)?)
    }

    async fn get_owning_user(&self, robot: RobotId) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.robots.owner(robot)?)
    }

    async fn robot_exists(&self, robot: RobotId) -> Result<bool, PersistenceError> {
        Ok(self.robots.get(robot)?.is_some())
    }

    async fn touch_robot(&self, robot: RobotId, seen_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        Ok(self.robots.touch(robot, seen_at)?)
    }

    async fn rename_robot(&self, robot: RobotId, title: &str) -> Result<(), PersistenceError> {
        Ok(self.robots.rename(robot, title)?)
    }

    async fn get_plant_owner(&self, plant: PlantId) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.plants.owner(plant)?)
    }

    async fn insert_photo(&self, photo: PlantPhoto) -> Result<(), PersistenceError> {
        Ok(self.plants.insert_photo(&photo)?)
    }

    async fn create_event(&self, user: UserId, event: NewEvent) -> Result<CreatedEvent, PersistenceError> {
        Ok(self.schedule.create_event(user, &event)?)
    }
}

#[async_trait]
impl SessionAuthority for SqlitePersistence {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.users.resolve_token(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use growbot_core::records::{LogSeverity, NewAction};

    fn store() -> SqlitePersistence {
        SqlitePersistence::new(Database::in_memory().unwrap())
    }

    #[tokio::test]
    async fn robot_lifecycle_through_trait() {
        let store = store();
        let user = store.users.create("ada@example.com").unwrap();
        let robot = store.robots.create(Some(user), "r1").unwrap();

        assert!(store.robot_exists(robot).await.unwrap());
        assert!(!store.robot_exists(RobotId::generate()).await.unwrap());
        assert_eq!(store.get_owning_user(robot).await.unwrap(), Some(user));

        store.touch_robot(robot, Utc::now()).await.unwrap();
        store.rename_robot(robot, "greenhouse").await.unwrap();
        assert_eq!(store.robots.get(robot).unwrap().unwrap().title, "greenhouse");
    }

    #[tokio::test]
    async fn rename_missing_robot_is_not_found() {
        let store = store();
        let err = store.rename_robot(RobotId::generate(), "x").await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn ephemeral_actions_disappear_after_delete() {
        let store = store();
        let user = store.users.create("ada@example.com").unwrap();
        let robot = store.robots.create(Some(user), "r1").unwrap();
        store
            .create_event(
                user,
                NewEvent {
                    summary: "once".into(),
                    recurrences: vec![],
                    ephemeral: true,
                    actions: vec![NewAction {
                        name: "ROBOT_RANDOM_MOVE".into(),
                        robot_id: robot,
                        plant_id: None,
                        data: serde_json::Value::Null,
                    }],
                },
            )
            .await
            .unwrap();

        let pending = store.get_pending_actions(robot, false).await.unwrap();
        assert_eq!(pending.len(), 1);
        store.delete_action(pending[0].id).await.unwrap();
        assert!(store.get_pending_actions(robot, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn log_and_moisture_through_trait() {
        let store = store();
        let user = store.users.create("ada@example.com").unwrap();
        let plant = store.plants.create(user, "mint").unwrap();

        assert_eq!(store.get_plant_owner(plant).await.unwrap(), Some(user));
        store.update_soil_moisture(plant, 55).await.unwrap();
        assert_eq!(store.plants.soil_moisture(plant).unwrap(), Some(55));

        let entry = store
            .insert_log_entry(NewLogEntry {
                user_id: user,
                kind: "MOISTURE".into(),
                message: "dry".into(),
                severity: LogSeverity::Danger,
                robot_id: None,
                plant_id: Some(plant),
            })
            .await
            .unwrap();
        assert_eq!(entry.plant_id, Some(plant));
    }

    #[tokio::test]
    async fn session_tokens_resolve() {
        let store = store();
        let user = store.users.create("ada@example.com").unwrap();
        let token = store.users.issue_token(user).unwrap();
        assert_eq!(store.resolve(&token).await.unwrap(), Some(user));
        assert_eq!(store.resolve("nope").await.unwrap(), None);
    }
}
