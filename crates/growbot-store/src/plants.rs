use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use growbot_core::ids::{PhotoId, PlantId, UserId};
use growbot_core::records::PlantPhoto;

use crate::database::Database;
use crate::error::StoreError;

pub struct PlantRepo {
    db: Database,
}

impl PlantRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user))]
    pub fn create(&self, user: UserId, name: &str) -> Result<PlantId, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO plants (user_id, name) VALUES (?1, ?2)",
                rusqlite::params![user.get(), name],
            )?;
            Ok(PlantId::new(conn.last_insert_rowid()))
        })
    }

    pub fn owner(&self, plant: PlantId) -> Result<Option<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let user = conn
                .query_row("SELECT user_id FROM plants WHERE id = ?1", [plant.get()], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            Ok(user.map(UserId::new))
        })
    }

    #[instrument(skip(self), fields(plant_id = %plant))]
    pub fn set_soil_moisture(&self, plant: PlantId, value: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE plants SET soil_moisture = ?2 WHERE id = ?1",
                rusqlite::params![plant.get(), value],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("plant {plant}")));
            }
            Ok(())
        })
    }

    pub fn soil_moisture(&self, plant: PlantId) -> Result<Option<i64>, StoreError> {
        self.db.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT soil_moisture FROM plants WHERE id = ?1",
                    [plant.get()],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?;
            Ok(value.flatten())
        })
    }

    #[instrument(skip(self), fields(plant_id = %photo.plant_id, photo_id = %photo.id))]
    pub fn insert_photo(&self, photo: &PlantPhoto) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO plant_photos (filename, plant_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![photo.id.to_string(), photo.plant_id.get(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn photos(&self, plant: PlantId) -> Result<Vec<PhotoId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT filename FROM plant_photos WHERE plant_id = ?1 ORDER BY created_at",
            )?;
            let raw = stmt
                .query_map([plant.get()], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            let ids = raw
                .iter()
                .map(|s| s.parse::<PhotoId>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok(ids)
        })
    }
}
