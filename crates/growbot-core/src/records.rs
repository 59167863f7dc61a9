//! Domain records exchanged between the link layer and the persistence
//! collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ActionId, EventId, LogEntryId, PhotoId, PlantId, RobotId, UserId};

pub const ACTION_PLANT_WATER: &str = "PLANT_WATER";
pub const ACTION_PLANT_CAPTURE_PHOTO: &str = "PLANT_CAPTURE_PHOTO";
pub const ACTION_ROBOT_RANDOM_MOVE: &str = "ROBOT_RANDOM_MOVE";

/// A scheduled action waiting to be handed to its robot.
///
/// Ephemeral actions are consumed by their first delivery; persistent ones
/// are re-sent every time pending actions are gathered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: ActionId,
    pub event_id: EventId,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_id: Option<PlantId>,
    pub robot_id: RobotId,
    #[serde(default)]
    pub recurrences: Vec<String>,
    #[serde(default)]
    pub ephemeral: bool,
}

/// Log entry severity, carried on the wire as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogSeverity {
    Info,
    Success,
    Warning,
    Danger,
}

impl TryFrom<u8> for LogSeverity {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Info),
            1 => Ok(Self::Success),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Danger),
            other => Err(format!("unknown log severity {other}")),
        }
    }
}

impl From<LogSeverity> for u8 {
    fn from(severity: LogSeverity) -> Self {
        match severity {
            LogSeverity::Info => 0,
            LogSeverity::Success => 1,
            LogSeverity::Warning => 2,
            LogSeverity::Danger => 3,
        }
    }
}

/// A log entry as reported by a robot, before the store assigns its id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLogEntry {
    pub user_id: UserId,
    pub kind: String,
    pub message: String,
    pub severity: LogSeverity,
    pub robot_id: Option<RobotId>,
    pub plant_id: Option<PlantId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogEntryId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: LogSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<RobotId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_id: Option<PlantId>,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn from_new(id: LogEntryId, entry: NewLogEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: entry.user_id,
            kind: entry.kind,
            message: entry.message,
            severity: entry.severity,
            robot_id: entry.robot_id,
            plant_id: entry.plant_id,
            created_at,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlantPhoto {
    pub id: PhotoId,
    pub plant_id: PlantId,
}

impl PlantPhoto {
    pub fn new(plant_id: PlantId) -> Self {
        Self {
            id: PhotoId::new(),
            plant_id,
        }
    }

    pub fn blob_key(&self) -> String {
        self.id.blob_key()
    }
}

/// A schedule submitted by a user, with the actions it fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub summary: String,
    #[serde(default)]
    pub recurrences: Vec<String>,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub actions: Vec<NewAction>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAction {
    pub name: String,
    pub robot_id: RobotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_id: Option<PlantId>,
    #[serde(default)]
    pub data: Value,
}

/// Result of storing a [`NewEvent`]: its id and the distinct robots its
/// actions target, so delivery can push to each of them.
#[derive(Clone, Debug, PartialEq)]
pub struct CreatedEvent {
    pub id: EventId,
    pub robots: Vec<RobotId>,
}
