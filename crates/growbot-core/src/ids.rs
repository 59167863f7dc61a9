use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// UUID-backed identifier. Robots are provisioned externally, so there is no
/// `new()`; photo and connection ids get their own constructors below.
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

/// Integer row key owned by the persistence layer.
macro_rules! row_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

uuid_id!(RobotId);
uuid_id!(PhotoId);
uuid_id!(LinkId);
uuid_id!(SessionId);

row_id!(UserId);
row_id!(PlantId);
row_id!(ActionId);
row_id!(EventId);
row_id!(LogEntryId);

impl RobotId {
    /// Fresh random id. Used when provisioning robots in the store and in tests.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl PhotoId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Blob storage key for this photo.
    pub fn blob_key(&self) -> String {
        format!("plantphotos.{}", self.0)
    }
}

impl Default for PhotoId {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}
