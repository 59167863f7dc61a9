//! Writing commands to robot links.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use growbot_core::collaborators::Persistence;
use growbot_core::errors::DispatchError;
use growbot_core::ids::RobotId;
use growbot_core::messages::{Command, Envelope, CMD_SETTINGS_PATCH};

use crate::link::LinkRegistry;
use crate::metrics::{COMMANDS_DISPATCHED_TOTAL, COMMANDS_NOT_CONNECTED_TOTAL};

/// Setting key the server keeps for itself; it never reaches the robot.
pub const RENAME_KEY: &str = "name";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingOutcome {
    /// Stored server-side only.
    Persisted,
    /// Forwarded to the robot as `settings/patch`.
    Dispatched,
}

pub struct CommandDispatcher {
    links: Arc<LinkRegistry>,
    persistence: Arc<dyn Persistence>,
}

impl CommandDispatcher {
    pub fn new(links: Arc<LinkRegistry>, persistence: Arc<dyn Persistence>) -> Self {
        Self { links, persistence }
    }

    /// Write `{type, data}` to the robot's link. Success means the frame was
    /// queued, not that the robot acted on it.
    #[instrument(skip(self, payload), fields(robot_id = %robot))]
    pub fn dispatch(&self, robot: RobotId, kind: &str, payload: Value) -> Result<(), DispatchError> {
        let Some(link) = self.links.lookup(robot) else {
            metrics::counter!(COMMANDS_NOT_CONNECTED_TOTAL).increment(1);
            debug!(kind, "robot has no link");
            return Err(DispatchError::NotConnected(robot));
        };

        link.send(Envelope::new(kind, payload).encode())
            .map_err(|e| DispatchError::SendFailed {
                robot,
                reason: e.to_string(),
            })?;
        metrics::counter!(COMMANDS_DISPATCHED_TOTAL, "type" => kind.to_string()).increment(1);
        debug!(kind, link_id = %link.id(), "command queued");
        Ok(())
    }

    pub fn send(&self, robot: RobotId, command: Command) -> Result<(), DispatchError> {
        let Envelope { kind, data } = command.into_envelope();
        self.dispatch(robot, &kind, data)
    }

    /// Apply one setting. The rename key is stored without consulting the
    /// link; everything else goes to the robot.
    #[instrument(skip(self, value), fields(robot_id = %robot))]
    pub async fn patch_setting(
        &self,
        robot: RobotId,
        key: &str,
        value: Value,
    ) -> Result<SettingOutcome, DispatchError> {
        if key == RENAME_KEY {
            let title = value.as_str().ok_or_else(|| DispatchError::InvalidSetting {
                key: key.to_string(),
                reason: "expected a string".to_string(),
            })?;
            self.persistence.rename_robot(robot, title).await?;
            info!(title, "robot renamed");
            return Ok(SettingOutcome::Persisted);
        }

        self.send(
            robot,
            Command::SettingsPatch {
                key: key.to_string(),
                value,
            },
        )?;
        debug!(key, kind = CMD_SETTINGS_PATCH, "setting forwarded");
        Ok(SettingOutcome::Dispatched)
    }
}
