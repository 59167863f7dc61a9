//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Robot links opened (counter).
pub const ROBOT_LINKS_TOTAL: &str = "robot_links_total";
/// Links force-closed because the same robot connected again (counter).
pub const ROBOT_LINKS_EVICTED_TOTAL: &str = "robot_links_evicted_total";
/// Currently registered robot links (gauge).
pub const ROBOT_LINKS_ACTIVE: &str = "robot_links_active";
/// Inbound robot frames that failed to parse (counter, labels: kind).
pub const ROBOT_PROTOCOL_ERRORS_TOTAL: &str = "robot_protocol_errors_total";
/// Commands written to a link (counter, labels: type).
pub const COMMANDS_DISPATCHED_TOTAL: &str = "commands_dispatched_total";
/// Commands refused because the robot had no link (counter).
pub const COMMANDS_NOT_CONNECTED_TOTAL: &str = "commands_not_connected_total";
/// Real video frames accepted (counter).
pub const RELAY_FRAMES_TOTAL: &str = "relay_frames_total";
/// Offline placeholder frames injected (counter).
pub const RELAY_PLACEHOLDER_FRAMES_TOTAL: &str = "relay_placeholder_frames_total";
/// Video frames dropped as undecodable (counter).
pub const RELAY_DECODE_ERRORS_TOTAL: &str = "relay_decode_errors_total";
/// Relays created (gauge).
pub const RELAYS_ACTIVE: &str = "relays_active";
/// Notification frames queued to a user session (counter).
pub const NOTIFICATIONS_SENT_TOTAL: &str = "notifications_sent_total";
/// Notification frames dropped on a full or closed session (counter).
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "notifications_dropped_total";
/// Open user notification sessions (gauge).
pub const USER_SESSIONS_ACTIVE: &str = "user_sessions_active";
/// Pending actions sent to robots (counter).
pub const PENDING_ACTIONS_DELIVERED_TOTAL: &str = "pending_actions_delivered_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            ROBOT_LINKS_TOTAL,
            ROBOT_LINKS_EVICTED_TOTAL,
            ROBOT_LINKS_ACTIVE,
            ROBOT_PROTOCOL_ERRORS_TOTAL,
            COMMANDS_DISPATCHED_TOTAL,
            COMMANDS_NOT_CONNECTED_TOTAL,
            RELAY_FRAMES_TOTAL,
            RELAY_PLACEHOLDER_FRAMES_TOTAL,
            RELAY_DECODE_ERRORS_TOTAL,
            RELAYS_ACTIVE,
            NOTIFICATIONS_SENT_TOTAL,
            NOTIFICATIONS_DROPPED_TOTAL,
            USER_SESSIONS_ACTIVE,
            PENDING_ACTIONS_DELIVERED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "not snake_case: {name}"
            );
        }
    }
}
