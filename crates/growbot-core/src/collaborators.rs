//! Interfaces the link layer needs from the rest of the system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{PersistenceError, StorageError};
use crate::ids::{ActionId, PlantId, RobotId, UserId};
use crate::records::{CreatedEvent, LogEntry, NewEvent, NewLogEntry, PendingAction, PlantPhoto};

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Scheduled actions targeting `robot`, oldest first.
    async fn get_pending_actions(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Vec<PendingAction>, PersistenceError>;

    /// Actions across every robot owned by `user`.
    async fn get_user_actions(&self, user: UserId) -> Result<Vec<PendingAction>, PersistenceError>;

    async fn delete_action(&self, id: ActionId) -> Result<(), PersistenceError>;

    async fn insert_log_entry(&self, entry: NewLogEntry) -> Result<LogEntry, PersistenceError>;

    async fn update_soil_moisture(&self, plant: PlantId, value: i64) -> Result<(), PersistenceError>;

    async fn get_owning_user(&self, robot: RobotId) -> Result<Option<UserId>, PersistenceError>;

    async fn robot_exists(&self, robot: RobotId) -> Result<bool, PersistenceError>;

    /// Record that the robot was heard from at `seen_at`.
    async fn touch_robot(&self, robot: RobotId, seen_at: DateTime<Utc>) -> Result<(), PersistenceError>;

    async fn rename_robot(&self, robot: RobotId, title: &str) -> Result<(), PersistenceError>;

    async fn get_plant_owner(&self, plant: PlantId) -> Result<Option<UserId>, PersistenceError>;

    async fn insert_photo(&self, photo: PlantPhoto) -> Result<(), PersistenceError>;

    async fn create_event(&self, user: UserId, event: NewEvent) -> Result<CreatedEvent, PersistenceError>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Resolves a browser session token to its user.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, PersistenceError>;
}
