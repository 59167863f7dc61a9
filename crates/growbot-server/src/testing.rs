//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use growbot_core::collaborators::{BlobStorage, Persistence, SessionAuthority};
use growbot_core::errors::{PersistenceError, StorageError};
use growbot_core::ids::{ActionId, EventId, LogEntryId, PlantId, RobotId, UserId};
use growbot_core::records::{
    CreatedEvent, LogEntry, NewEvent, NewLogEntry, PendingAction, PlantPhoto,
};

#[derive(Default)]
pub struct MemoryPersistence {
    next_id: AtomicI64,
    pub robots: Mutex<HashMap<RobotId, (Option<UserId>, String)>>,
    pub seen: Mutex<HashMap<RobotId, DateTime<Utc>>>,
    pub plants: Mutex<HashMap<PlantId, (UserId, Option<i64>)>>,
    pub actions: Mutex<BTreeMap<ActionId, PendingAction>>,
    pub logs: Mutex<Vec<LogEntry>>,
    pub photos: Mutex<Vec<PlantPhoto>>,
    pub tokens: Mutex<HashMap<String, UserId>>,
    pub fail_photo_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MemoryPersistence {
    fn next(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_robot(&self, owner: Option<UserId>) -> RobotId {
        let robot = RobotId::generate();
        self.robots.lock().insert(robot, (owner, "robot".into()));
        robot
    }

    pub fn add_plant(&self, owner: UserId) -> PlantId {
        let plant = PlantId::new(self.next());
        self.plants.lock().insert(plant, (owner, None));
        plant
    }

    pub fn add_action(&self, robot: RobotId, name: &str, ephemeral: bool) -> ActionId {
        let id = ActionId::new(self.next());
        self.actions.lock().insert(
            id,
            PendingAction {
                id,
                event_id: EventId::new(1),
                name: name.into(),
                data: serde_json::Value::Null,
                plant_id: None,
                robot_id: robot,
                recurrences: Vec::new(),
                ephemeral,
            },
        );
        id
    }

    pub fn title(&self, robot: RobotId) -> Option<String> {
        self.robots.lock().get(&robot).map(|(_, t)| t.clone())
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn get_pending_actions(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Vec<PendingAction>, PersistenceError> {
        Ok(self
            .actions
            .lock()
            .values()
            .filter(|a| a.robot_id == robot && !(exclude_ephemeral && a.ephemeral))
            .cloned()
            .collect())
    }

    async fn get_user_actions(&self, user: UserId) -> Result<Vec<PendingAction>, PersistenceError> {
        let robots = self.robots.lock();
        let owned: HashSet<RobotId> = robots
            .iter()
            .filter(|(_, (owner, _))| *owner == Some(user))
            .map(|(id, _)| *id)
            .collect();
        Ok(self
            .actions
            .lock()
            .values()
            .filter(|a| owned.contains(&a.robot_id))
            .cloned()
            .collect())
    }

    async fn delete_action(&self, id: ActionId) -> Result<(), PersistenceError> {
        if self.fail_delete.load(Ordering::Relaxed) {
            return Err(PersistenceError::Backend("delete refused".into()));
        }
        self.actions
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound(format!("action {id}")))
    }

    async fn insert_log_entry(&self, entry: NewLogEntry) -> Result<LogEntry, PersistenceError> {
        let stored = LogEntry::from_new(LogEntryId::new(self.next()), entry, Utc::now());
        self.logs.lock().push(stored.clone());
        Ok(stored)
    }

    async fn update_soil_moisture(&self, plant: PlantId, value: i64) -> Result<(), PersistenceError> {
        match self.plants.lock().get_mut(&plant) {
            Some(entry) => {
                entry.1 = Some(value);
                Ok(())
            }
            None => Err(PersistenceError::NotFound(format!("plant {plant}"))),
        }
    }

    async fn get_owning_user(&self, robot: RobotId) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.robots.lock().get(&robot).and_then(|(owner, _)| *owner))
    }

    async fn robot_exists(&self, robot: RobotId) -> Result<bool, PersistenceError> {
        Ok(self.robots.lock().contains_key(&robot))
    }

    async fn touch_robot(&self, robot: RobotId, seen_at: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.seen.lock().insert(robot, seen_at);
        Ok(())
    }

    async fn rename_robot(&self, robot: RobotId, title: &str) -> Result<(), PersistenceError> {
        match self.robots.lock().get_mut(&robot) {
            Some(entry) => {
                entry.1 = title.to_string();
                Ok(())
            }
            None => Err(PersistenceError::NotFound(format!("robot {robot}"))),
        }
    }

    async fn get_plant_owner(&self, plant: PlantId) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.plants.lock().get(&plant).map(|(owner, _)| *owner))
    }

    async fn insert_photo(&self, photo: PlantPhoto) -> Result<(), PersistenceError> {
        if self.fail_photo_insert.load(Ordering::Relaxed) {
            return Err(PersistenceError::Backend("photo insert refused".into()));
        }
        self.photos.lock().push(photo);
        Ok(())
    }

    async fn create_event(&self, _user: UserId, event: NewEvent) -> Result<CreatedEvent, PersistenceError> {
        let event_id = EventId::new(self.next());
        let mut robots = Vec::new();
        for action in event.actions {
            let id = ActionId::new(self.next());
            if !robots.contains(&action.robot_id) {
                robots.push(action.robot_id);
            }
            self.actions.lock().insert(
                id,
                PendingAction {
                    id,
                    event_id,
                    name: action.name,
                    data: action.data,
                    plant_id: action.plant_id,
                    robot_id: action.robot_id,
                    recurrences: event.recurrences.clone(),
                    ephemeral: event.ephemeral,
                },
            );
        }
        Ok(CreatedEvent { id: event_id, robots })
    }
}

#[async_trait]
impl SessionAuthority for MemoryPersistence {
    async fn resolve(&self, token: &str) -> Result<Option<UserId>, PersistenceError> {
        Ok(self.tokens.lock().get(token).copied())
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_write: AtomicBool,
}

#[async_trait]
impl BlobStorage for MemoryBlobs {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_write.load(Ordering::Relaxed) {
            return Err(StorageError::Write {
                key: key.into(),
                reason: "disk full".into(),
            });
        }
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().remove(key);
        Ok(())
    }
}
