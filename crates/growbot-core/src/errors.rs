use crate::ids::RobotId;

/// A frame from a robot or browser that could not be understood.
/// The frame is dropped; the connection stays open.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Envelope(String),
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: String, reason: String },
    #[error("missing field `{field}` in {kind}")]
    MissingField { kind: String, field: &'static str },
    #[error("undecodable base64: {0}")]
    Base64(String),
}

impl ProtocolError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Envelope(_) => "envelope",
            Self::Payload { .. } => "payload",
            Self::MissingField { .. } => "missing_field",
            Self::Base64(_) => "base64",
        }
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e.to_string())
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("persistence failure: {0}")]
    Backend(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum StorageError {
    #[error("blob write failed for {key}: {reason}")]
    Write { key: String, reason: String },
    #[error("blob delete failed for {key}: {reason}")]
    Delete { key: String, reason: String },
}

/// Failure to hand a command to a robot.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The robot exists but has no active link.
    #[error("robot {0} is not connected")]
    NotConnected(RobotId),
    /// The link was registered but its outbound queue is closed or full.
    #[error("send to robot {robot} failed: {reason}")]
    SendFailed { robot: RobotId, reason: String },
    /// A setting value the server itself must interpret was malformed.
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl DispatchError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::SendFailed { .. } => "send_failed",
            Self::InvalidSetting { .. } => "invalid_setting",
            Self::Persistence(_) => "persistence",
        }
    }
}
