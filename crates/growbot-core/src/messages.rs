//! Wire messages for robot links and user notification sessions.
//!
//! Every frame on every socket is a JSON envelope `{"type": ..., "data": ...}`.
//! Inbound robot frames are parsed exactly once, here, into [`InboundMessage`];
//! nothing downstream touches untyped JSON.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::ProtocolError;
use crate::ids::{PlantId, RobotId};
use crate::records::{LogEntry, LogSeverity, PendingAction};

pub const PLANT_CAPTURE_PHOTO: &str = "PLANT_CAPTURE_PHOTO";
pub const CREATE_LOG_ENTRY: &str = "CREATE_LOG_ENTRY";
pub const UPDATE_SOIL_MOISTURE: &str = "UPDATE_SOIL_MOISTURE";
pub const UPDATE_ROBOT_STATE: &str = "UPDATE_ROBOT_STATE";

pub const CMD_MOVE: &str = "move";
pub const CMD_DEMO_START: &str = "demo/start";
pub const CMD_SETTINGS_PATCH: &str = "settings/patch";
pub const CMD_EVENTS: &str = "events";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Envelope(e.to_string()))
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> String {
        json!({ "type": self.kind, "data": self.data }).to_string()
    }
}

/// A message received from a robot over its link.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    PlantCapturePhoto {
        plant_id: PlantId,
        image: Vec<u8>,
    },
    CreateLogEntry {
        kind: String,
        message: String,
        severity: LogSeverity,
        plant_id: Option<PlantId>,
    },
    UpdateSoilMoisture {
        plant_id: PlantId,
        moisture: i64,
    },
    Unknown {
        kind: String,
    },
}

#[derive(Deserialize)]
struct CapturePhotoData {
    id: PlantId,
    image: String,
}

#[derive(Deserialize)]
struct LogEntryData {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    severity: LogSeverity,
    #[serde(default)]
    plant_id: Option<PlantId>,
}

#[derive(Deserialize)]
struct SoilMoistureData {
    #[serde(default)]
    plant_id: Option<PlantId>,
    moisture: f64,
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::Payload {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::from_envelope(Envelope::parse(text)?)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let Envelope { kind, data } = envelope;
        match kind.as_str() {
            PLANT_CAPTURE_PHOTO => {
                let d: CapturePhotoData = payload(&kind, data)?;
                let image = base64::engine::general_purpose::STANDARD.decode(d.image.trim())?;
                Ok(Self::PlantCapturePhoto {
                    plant_id: d.id,
                    image,
                })
            }
            CREATE_LOG_ENTRY => {
                let d: LogEntryData = payload(&kind, data)?;
                Ok(Self::CreateLogEntry {
                    kind: d.kind,
                    message: d.message,
                    severity: d.severity,
                    plant_id: d.plant_id,
                })
            }
            UPDATE_SOIL_MOISTURE => {
                let d: SoilMoistureData = payload(&kind, data)?;
                let plant_id = d.plant_id.ok_or(ProtocolError::MissingField {
                    kind: kind.clone(),
                    field: "plant_id",
                })?;
                Ok(Self::UpdateSoilMoisture {
                    plant_id,
                    moisture: d.moisture as i64,
                })
            }
            _ => Ok(Self::Unknown { kind }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::PlantCapturePhoto { .. } => PLANT_CAPTURE_PHOTO,
            Self::CreateLogEntry { .. } => CREATE_LOG_ENTRY,
            Self::UpdateSoilMoisture { .. } => UPDATE_SOIL_MOISTURE,
            Self::Unknown { kind } => kind,
        }
    }
}

/// A typed command for a robot. Anything else can still be sent through the
/// dispatcher as a raw `(type, data)` pair.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Move(String),
    DemoStart(String),
    SettingsPatch { key: String, value: Value },
    Events(Vec<PendingAction>),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Move(_) => CMD_MOVE,
            Self::DemoStart(_) => CMD_DEMO_START,
            Self::SettingsPatch { .. } => CMD_SETTINGS_PATCH,
            Self::Events(_) => CMD_EVENTS,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Move(direction) => Value::String(direction.clone()),
            Self::DemoStart(procedure) => Value::String(procedure.clone()),
            Self::SettingsPatch { key, value } => json!({ "key": key, "value": value }),
            Self::Events(actions) => json!(actions),
        }
    }

    pub fn into_envelope(self) -> Envelope {
        Envelope::new(self.kind(), self.payload())
    }
}

/// A user-visible state change pushed to every open session of a user.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    UpdateRobotState {
        id: RobotId,
        seen_at: DateTime<Utc>,
    },
    CreateLogEntry(LogEntry),
    UpdateSoilMoisture {
        plant_id: PlantId,
        moisture: i64,
    },
    Events(Vec<PendingAction>),
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UpdateRobotState { .. } => UPDATE_ROBOT_STATE,
            Self::CreateLogEntry(_) => CREATE_LOG_ENTRY,
            Self::UpdateSoilMoisture { .. } => UPDATE_SOIL_MOISTURE,
            Self::Events(_) => CMD_EVENTS,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::UpdateRobotState { id, seen_at } => json!({ "id": id, "seen_at": seen_at }),
            Self::CreateLogEntry(entry) => json!(entry),
            Self::UpdateSoilMoisture { plant_id, moisture } => {
                json!({ "plant_id": plant_id, "moisture": moisture })
            }
            Self::Events(actions) => json!(actions),
        }
    }
}
