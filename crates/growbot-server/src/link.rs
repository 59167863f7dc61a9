//! Robot links and the registry that keeps at most one per robot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

use growbot_core::ids::{LinkId, RobotId};

use crate::metrics::{ROBOT_LINKS_ACTIVE, ROBOT_LINKS_EVICTED_TOTAL};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkSendError {
    #[error("link closed")]
    Closed,
    #[error("send queue full")]
    Full,
}

/// The server's handle on one robot connection.
///
/// Outbound frames go through a bounded queue drained by the connection's
/// writer task, so sending never blocks on the socket.
pub struct RobotLink {
    id: LinkId,
    robot: RobotId,
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
    connected_at: Instant,
    dropped: AtomicU64,
}

impl RobotLink {
    pub fn new(robot: RobotId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id: LinkId::new(),
            robot,
            tx,
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        }
    }

    /// A link plus the receiving end of its outbound queue.
    pub fn channel(robot: RobotId, capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Self::new(robot, tx)), rx)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn robot(&self) -> RobotId {
        self.robot
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn send(&self, frame: String) -> Result<(), LinkSendError> {
        if self.closed.is_cancelled() {
            return Err(LinkSendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => LinkSendError::Full,
                mpsc::error::TrySendError::Closed(_) => LinkSendError::Closed,
            }
        })
    }

    /// Ask the connection to shut down. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Token cancelled on close; lets the writer task stop with the link.
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RobotLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotLink")
            .field("id", &self.id)
            .field("robot", &self.robot)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

/// Active link per robot. Process-local.
#[derive(Default)]
pub struct LinkRegistry {
    links: Mutex<HashMap<RobotId, Arc<RobotLink>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `link` for its robot. A previously registered link is closed
    /// (after the lock is released) and returned.
    pub fn register(&self, link: Arc<RobotLink>) -> Option<Arc<RobotLink>> {
        let robot = link.robot();
        let (previous, active) = {
            let mut links = self.links.lock();
            let previous = links.insert(robot, link.clone());
            (previous, links.len())
        };
        metrics::gauge!(ROBOT_LINKS_ACTIVE).set(active as f64);

        let previous = previous.filter(|old| old.id() != link.id())?;
        previous.close();
        metrics::counter!(ROBOT_LINKS_EVICTED_TOTAL).increment(1);
        info!(
            robot_id = %robot,
            evicted = %previous.id(),
            replacement = %link.id(),
            "robot reconnected, closed previous link"
        );
        Some(previous)
    }

    pub fn lookup(&self, robot: RobotId) -> Option<Arc<RobotLink>> {
        self.links.lock().get(&robot).cloned()
    }

    pub fn is_online(&self, robot: RobotId) -> bool {
        self.links.lock().contains_key(&robot)
    }

    /// Remove `link` if it is still the registered one. Returns whether it was.
    pub fn unregister(&self, link: &RobotLink) -> bool {
        let robot = link.robot();
        let (removed, active) = {
            let mut links = self.links.lock();
            let current = links.get(&robot).is_some_and(|l| l.id() == link.id());
            if current {
                links.remove(&robot);
            }
            (current, links.len())
        };
        if removed {
            metrics::gauge!(ROBOT_LINKS_ACTIVE).set(active as f64);
        } else {
            debug!(robot_id = %robot, link_id = %link.id(), "stale unregister ignored");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = LinkRegistry::new();
        let robot = RobotId::generate();
        assert!(registry.lookup(robot).is_none());

        let (link, _rx) = RobotLink::channel(robot, 4);
        assert!(registry.register(link.clone()).is_none());
        assert_eq!(registry.lookup(robot).unwrap().id(), link.id());
        assert!(registry.is_online(robot));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn replacement_closes_previous() {
        let registry = LinkRegistry::new();
        let robot = RobotId::generate();
        let (a, _rx_a) = RobotLink::channel(robot, 4);
        let (b, _rx_b) = RobotLink::channel(robot, 4);

        registry.register(a.clone());
        let evicted = registry.register(b.clone()).unwrap();

        assert_eq!(evicted.id(), a.id());
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert_eq!(registry.lookup(robot).unwrap().id(), b.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_unregister_keeps_newer_link() {
        let registry = LinkRegistry::new();
        let robot = RobotId::generate();
        let (a, _rx_a) = RobotLink::channel(robot, 4);
        let (b, _rx_b) = RobotLink::channel(robot, 4);

        registry.register(a.clone());
        registry.register(b.clone());

        assert!(!registry.unregister(&a));
        assert_eq!(registry.lookup(robot).unwrap().id(), b.id());

        assert!(registry.unregister(&b));
        assert!(registry.lookup(robot).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistering_same_link_does_not_close_it() {
        let registry = LinkRegistry::new();
        let robot = RobotId::generate();
        let (a, _rx) = RobotLink::channel(robot, 4);
        registry.register(a.clone());
        assert!(registry.register(a.clone()).is_none());
        assert!(!a.is_closed());
    }

    #[test]
    fn links_for_different_robots_are_independent() {
        let registry = LinkRegistry::new();
        let (a, _rx_a) = RobotLink::channel(RobotId::generate(), 4);
        let (b, _rx_b) = RobotLink::channel(RobotId::generate(), 4);
        registry.register(a.clone());
        registry.register(b.clone());
        assert!(!a.is_closed());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn send_queues_frames_until_full() {
        let (link, mut rx) = RobotLink::channel(RobotId::generate(), 1);
        link.send("one".into()).unwrap();
        assert_eq!(link.send("two".into()), Err(LinkSendError::Full));
        assert_eq!(link.dropped_count(), 1);
        assert_eq!(rx.try_recv().unwrap(), "one");
    }

    #[test]
    fn send_after_close_fails() {
        let (link, _rx) = RobotLink::channel(RobotId::generate(), 4);
        link.close();
        assert_eq!(link.send("x".into()), Err(LinkSendError::Closed));
    }

    #[test]
    fn send_after_receiver_dropped_fails() {
        let (link, rx) = RobotLink::channel(RobotId::generate(), 4);
        drop(rx);
        assert_eq!(link.send("x".into()), Err(LinkSendError::Closed));
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn closed_future_resolves_on_close() {
        let (link, _rx) = RobotLink::channel(RobotId::generate(), 4);
        let waiter = link.clone();
        let handle = tokio::spawn(async move { waiter.closed().await });
        link.close();
        handle.await.unwrap();
    }
}
