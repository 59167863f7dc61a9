//! Pushing scheduled actions to robots.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, instrument, warn};

use growbot_core::collaborators::Persistence;
use growbot_core::errors::DispatchError;
use growbot_core::ids::RobotId;
use growbot_core::messages::Command;

use crate::link::LinkRegistry;
use crate::metrics::PENDING_ACTIONS_DELIVERED_TOTAL;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The robot had no link; nothing was read or sent.
    NoLink,
    Sent {
        actions: usize,
        ephemeral_removed: usize,
    },
}

pub struct EventDelivery {
    links: Arc<LinkRegistry>,
    persistence: Arc<dyn Persistence>,
    // Serializes pushes per robot so an ephemeral action cannot be read by
    // two concurrent pushes before either deletes it.
    in_flight: DashMap<RobotId, Arc<tokio::sync::Mutex<()>>>,
}

impl EventDelivery {
    pub fn new(links: Arc<LinkRegistry>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            links,
            persistence,
            in_flight: DashMap::new(),
        }
    }

    /// Send every pending action for `robot` as one `events` batch. Ephemeral
    /// actions are deleted before the send; one that cannot be deleted stays
    /// out of the batch until a later push. An empty batch is still sent.
    #[instrument(skip(self), fields(robot_id = %robot))]
    pub async fn push_pending(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Delivery, DispatchError> {
        if self.links.lookup(robot).is_none() {
            debug!("no link, skipping push");
            return Ok(Delivery::NoLink);
        }

        let gate = self.in_flight.entry(robot).or_default().clone();
        let outcome = {
            let _guard = gate.lock().await;
            self.push_locked(robot, exclude_ephemeral).await
        };
        drop(gate);
        // Only the map's own reference left: nobody holds or waits on it.
        self.in_flight
            .remove_if(&robot, |_, gate| Arc::strong_count(gate) == 1);
        outcome
    }

    async fn push_locked(
        &self,
        robot: RobotId,
        exclude_ephemeral: bool,
    ) -> Result<Delivery, DispatchError> {
        let pending = self
            .persistence
            .get_pending_actions(robot, exclude_ephemeral)
            .await?;

        // Re-checked after the query: the robot may have dropped meanwhile.
        let Some(link) = self.links.lookup(robot) else {
            return Ok(Delivery::NoLink);
        };

        let mut batch = Vec::with_capacity(pending.len());
        let mut removed = 0;
        for action in pending {
            if action.ephemeral {
                if let Err(e) = self.persistence.delete_action(action.id).await {
                    warn!(action_id = %action.id, error = %e, "ephemeral action not consumed, holding it back");
                    continue;
                }
                removed += 1;
            }
            batch.push(action);
        }
        let count = batch.len();

        link.send(Command::Events(batch).into_envelope().encode())
            .map_err(|e| DispatchError::SendFailed {
                robot,
                reason: e.to_string(),
            })?;
        metrics::counter!(PENDING_ACTIONS_DELIVERED_TOTAL).increment(count as u64);

        debug!(actions = count, ephemeral_removed = removed, "pending actions pushed");
        Ok(Delivery::Sent {
            actions: count,
            ephemeral_removed: removed,
        })
    }

    /// Push to each robot, logging failures instead of returning them.
    pub async fn push_to_all(&self, robots: &[RobotId]) {
        for &robot in robots {
            if let Err(e) = self.push_pending(robot, false).await {
                warn!(robot_id = %robot, error = %e, "incremental push failed");
            }
        }
    }
}
