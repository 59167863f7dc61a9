//! Per-robot video relays.
//!
//! A [`Relay`] keeps the most recent frame and fans every update out to its
//! viewers over a `broadcast` channel. A viewer that subscribes is handed the
//! current frame straight away, then every later update. Viewers that fall
//! behind skip ahead to the newest frames instead of slowing the producer.
//!
//! Each relay owns exactly one liveness task. On every tick it checks how long
//! it has been since the last real frame; past the death threshold it injects
//! the offline placeholder without touching the last-update time, so the
//! placeholder repeats every tick until real frames resume.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use growbot_core::errors::ProtocolError;
use growbot_core::ids::RobotId;

use crate::config::DEFAULT_PLACEHOLDER;
use crate::metrics::{
    RELAYS_ACTIVE, RELAY_DECODE_ERRORS_TOTAL, RELAY_FRAMES_TOTAL, RELAY_PLACEHOLDER_FRAMES_TOTAL,
};

/// Live sequence of JPEG frames for one viewer. Ends only when dropped.
pub type FrameSource = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub tick: Duration,
    /// Silence longer than this switches the relay to the placeholder.
    pub death_threshold: Duration,
    /// Frames buffered per viewer before it starts skipping.
    pub subscriber_buffer: usize,
    pub placeholder: Bytes,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            death_threshold: Duration::from_secs(5),
            subscriber_buffer: 16,
            placeholder: Bytes::from_static(DEFAULT_PLACEHOLDER),
        }
    }
}

#[derive(Default)]
struct RelayState {
    current: Option<Bytes>,
    /// Time of the last real frame. `None` until the producer sends one,
    /// which counts as dead.
    last_update: Option<Instant>,
}

pub struct Relay {
    robot: RobotId,
    frames: broadcast::Sender<Bytes>,
    state: Mutex<RelayState>,
    cancel: CancellationToken,
}

impl Relay {
    fn new(robot: RobotId, buffer: usize, cancel: CancellationToken) -> Self {
        let (frames, _) = broadcast::channel(buffer.max(1));
        Self {
            robot,
            frames,
            state: Mutex::new(RelayState::default()),
            cancel,
        }
    }

    pub fn robot(&self) -> RobotId {
        self.robot
    }

    /// Store a real frame and push it to every viewer. Returns the number of
    /// viewers it was queued for.
    pub fn publish(&self, frame: Bytes) -> usize {
        let mut state = self.state.lock();
        state.current = Some(frame.clone());
        state.last_update = Some(Instant::now());
        self.frames.send(frame).unwrap_or(0)
    }

    /// Push the placeholder as a frame. The last-update time is left alone.
    fn inject_placeholder(&self, frame: Bytes) -> usize {
        let mut state = self.state.lock();
        state.current = Some(frame.clone());
        self.frames.send(frame).unwrap_or(0)
    }

    /// Current frame first (if any), then every later update.
    pub fn subscribe(&self) -> FrameSource {
        // Holding the state lock orders the snapshot against `publish`, so a
        // frame is never both replayed and received live, nor missed.
        let (current, rx) = {
            let state = self.state.lock();
            (state.current.clone(), self.frames.subscribe())
        };
        let robot = self.robot;
        let live = BroadcastStream::new(rx).filter_map(move |item| {
            futures::future::ready(match item {
                Ok(frame) => Some(frame),
                Err(lagged) => {
                    debug!(robot_id = %robot, error = %lagged, "viewer lagged, skipping frames");
                    None
                }
            })
        });
        match current {
            Some(frame) => Box::pin(futures::stream::once(futures::future::ready(frame)).chain(live)),
            None => Box::pin(live),
        }
    }

    pub fn current_frame(&self) -> Option<Bytes> {
        self.state.lock().current.clone()
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.state.lock().last_update
    }

    pub fn is_dead(&self, now: Instant, threshold: Duration) -> bool {
        match self.state.lock().last_update {
            Some(at) => now.saturating_duration_since(at) > threshold,
            None => true,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames.receiver_count()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Table of relays, one per robot, created on first use and kept for the
/// life of the process.
pub struct MediaRelay {
    relays: Mutex<HashMap<RobotId, Arc<Relay>>>,
    config: RelayConfig,
    shutdown: CancellationToken,
}

impl MediaRelay {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        Self {
            relays: Mutex::new(HashMap::new()),
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Existing relay for `robot`, or a new one with its liveness task.
    /// Must be called from within a tokio runtime.
    pub fn get_or_create(&self, robot: RobotId) -> Arc<Relay> {
        let mut relays = self.relays.lock();
        if let Some(relay) = relays.get(&robot) {
            return relay.clone();
        }

        let relay = Arc::new(Relay::new(
            robot,
            self.config.subscriber_buffer,
            self.shutdown.child_token(),
        ));
        // Spawned under the table lock: a relay is visible only once its
        // single liveness task exists.
        tokio::spawn(liveness(
            Arc::downgrade(&relay),
            relay.cancel.clone(),
            self.config.tick,
            self.config.death_threshold,
            self.config.placeholder.clone(),
        ));
        relays.insert(robot, relay.clone());
        metrics::gauge!(RELAYS_ACTIVE).set(relays.len() as f64);
        info!(robot_id = %robot, "relay created");
        relay
    }

    pub fn get(&self, robot: RobotId) -> Option<Arc<Relay>> {
        self.relays.lock().get(&robot).cloned()
    }

    /// Decode one base64 frame from a producer and publish it. Undecodable
    /// frames are dropped and leave the relay untouched.
    pub fn update(&self, robot: RobotId, encoded: &str) -> Result<usize, ProtocolError> {
        let frame = match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!(RELAY_DECODE_ERRORS_TOTAL).increment(1);
                warn!(robot_id = %robot, error = %e, "dropping undecodable video frame");
                return Err(e.into());
            }
        };
        Ok(self.update_bytes(robot, Bytes::from(frame)))
    }

    pub fn update_bytes(&self, robot: RobotId, frame: Bytes) -> usize {
        metrics::counter!(RELAY_FRAMES_TOTAL).increment(1);
        self.get_or_create(robot).publish(frame)
    }

    pub fn subscribe(&self, robot: RobotId) -> FrameSource {
        self.get_or_create(robot).subscribe()
    }

    pub fn len(&self) -> usize {
        self.relays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn liveness(
    relay: Weak<Relay>,
    cancel: CancellationToken,
    tick: Duration,
    threshold: Duration,
    placeholder: Bytes,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(relay) = relay.upgrade() else { break };
        if relay.is_dead(Instant::now(), threshold) {
            let viewers = relay.inject_placeholder(placeholder.clone());
            metrics::counter!(RELAY_PLACEHOLDER_FRAMES_TOTAL).increment(1);
            debug!(robot_id = %relay.robot(), viewers, "relay silent, sent placeholder");
        }
    }
}
