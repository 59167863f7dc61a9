//! Side effects of messages received on a robot link.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use growbot_core::collaborators::{BlobStorage, Persistence};
use growbot_core::errors::{PersistenceError, StorageError};
use growbot_core::ids::{PlantId, RobotId, UserId};
use growbot_core::messages::{InboundMessage, Notification};
use growbot_core::records::{NewLogEntry, PlantPhoto};

use crate::fanout::NotificationFanout;

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("plant {plant} does not belong to the owner of robot {robot}")]
    ForeignPlant { robot: RobotId, plant: PlantId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    PhotoStored(PlantPhoto),
    LogCreated,
    MoistureUpdated,
    Ignored(&'static str),
}

pub struct InboundHandler {
    persistence: Arc<dyn Persistence>,
    blobs: Arc<dyn BlobStorage>,
    fanout: Arc<NotificationFanout>,
}

impl InboundHandler {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        blobs: Arc<dyn BlobStorage>,
        fanout: Arc<NotificationFanout>,
    ) -> Self {
        Self {
            persistence,
            blobs,
            fanout,
        }
    }

    /// Stamp the robot as seen now and tell its owner.
    pub async fn mark_seen(&self, robot: RobotId) -> Result<(), PersistenceError> {
        let seen_at = Utc::now();
        self.persistence.touch_robot(robot, seen_at).await?;
        if let Some(user) = self.persistence.get_owning_user(robot).await? {
            self.fanout
                .notify(user, &Notification::UpdateRobotState { id: robot, seen_at });
        }
        Ok(())
    }

    #[instrument(skip(self, message), fields(robot_id = %robot, kind = message.kind()))]
    pub async fn handle(&self, robot: RobotId, message: InboundMessage) -> Result<Handled, InboundError> {
        match message {
            InboundMessage::PlantCapturePhoto { plant_id, image } => {
                self.store_photo(plant_id, &image).await
            }
            InboundMessage::CreateLogEntry {
                kind,
                message,
                severity,
                plant_id,
            } => {
                let Some(user) = self.persistence.get_owning_user(robot).await? else {
                    debug!("unowned robot, log entry dropped");
                    return Ok(Handled::Ignored("robot has no owner"));
                };
                let entry = self
                    .persistence
                    .insert_log_entry(NewLogEntry {
                        user_id: user,
                        kind,
                        message,
                        severity,
                        robot_id: Some(robot),
                        plant_id,
                    })
                    .await?;
                self.fanout.notify(user, &Notification::CreateLogEntry(entry));
                Ok(Handled::LogCreated)
            }
            InboundMessage::UpdateSoilMoisture { plant_id, moisture } => {
                let user = self.owner_of_both(robot, plant_id).await?;
                self.persistence.update_soil_moisture(plant_id, moisture).await?;
                self.fanout.notify(
                    user,
                    &Notification::UpdateSoilMoisture { plant_id, moisture },
                );
                Ok(Handled::MoistureUpdated)
            }
            InboundMessage::Unknown { kind } => {
                warn!(%kind, "unrecognized message type");
                Ok(Handled::Ignored("unknown message type"))
            }
        }
    }

    /// Blob first, then the row. A failed row insert removes the blob.
    async fn store_photo(&self, plant: PlantId, image: &[u8]) -> Result<Handled, InboundError> {
        let photo = PlantPhoto::new(plant);
        let key = photo.blob_key();
        self.blobs.write(&key, image).await?;

        if let Err(e) = self.persistence.insert_photo(photo).await {
            if let Err(cleanup) = self.blobs.delete(&key).await {
                warn!(key = %key, error = %cleanup, "orphaned photo blob");
            }
            return Err(e.into());
        }
        info!(plant_id = %plant, photo_id = %photo.id, bytes = image.len(), "plant photo stored");
        Ok(Handled::PhotoStored(photo))
    }

    async fn owner_of_both(&self, robot: RobotId, plant: PlantId) -> Result<UserId, InboundError> {
        let robot_owner = self.persistence.get_owning_user(robot).await?;
        let plant_owner = self.persistence.get_plant_owner(plant).await?;
        match (robot_owner, plant_owner) {
            (Some(a), Some(b)) if a == b => Ok(a),
            (_, None) => Err(PersistenceError::NotFound(format!("plant {plant}")).into()),
            _ => Err(InboundError::ForeignPlant { robot, plant }),
        }
    }
}
