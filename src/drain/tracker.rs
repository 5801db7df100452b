//! Connection tracker.
//!
//! A single task owns the set of active connections. Everything else talks
//! to it through an unbounded inbox, so "is the set empty" and "add a member"
//! can never interleave, and drain versus kill is decided by whichever
//! command reaches the inbox first.

use crate::engine::{ConnHandle, ConnState, ConnStateHook, SharedHook};
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// How a tracker finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every tracked connection finished on its own.
    Drained,
    /// The drain deadline passed and the remaining connections were closed.
    Killed {
        /// Number of connections that were force-closed.
        connections: usize,
    },
}

enum Command {
    Track(ConnHandle),
    Untrack(ConnHandle),
    BeginDrain(oneshot::Sender<()>),
    Kill(oneshot::Sender<usize>),
}

/// Sending side of the tracker's inbox.
///
/// Every method is fire-and-forget: once the tracker has finished, commands
/// are silently discarded.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl TrackerHandle {
    /// Add a connection to the tracked set.
    pub fn track(&self, conn: ConnHandle) {
        let _ = self.tx.send(Command::Track(conn));
    }

    /// Remove a connection from the tracked set.
    pub fn untrack(&self, conn: ConnHandle) {
        let _ = self.tx.send(Command::Untrack(conn));
    }

    /// Ask to be told when the tracked set is empty.
    ///
    /// The returned receiver resolves once the set empties, immediately if it
    /// already is. It resolves with an error if the tracker was killed first
    /// or has already finished.
    pub fn begin_drain(&self) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.tx.send(Command::BeginDrain(done_tx));
        done_rx
    }

    /// Force-close every tracked connection and stop the tracker.
    ///
    /// Returns how many connections were closed, or `None` if the tracker
    /// had already finished.
    pub async fn kill(&self) -> Option<usize> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(Command::Kill(ack_tx)).ok()?;
        ack_rx.await.ok()
    }
}

/// The tracker actor.
pub struct ConnTracker {
    rx: mpsc::UnboundedReceiver<Command>,
    connections: HashSet<ConnHandle>,
    drain: Option<oneshot::Sender<()>>,
}

impl ConnTracker {
    /// Spawn a tracker on the current runtime.
    ///
    /// The task finishes when a drain completes or a kill is honoured. If
    /// every handle is dropped first it finishes as drained.
    pub fn spawn() -> (TrackerHandle, JoinHandle<DrainOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            rx,
            connections: HashSet::new(),
            drain: None,
        };
        (TrackerHandle { tx }, tokio::spawn(tracker.run()))
    }

    async fn run(mut self) -> DrainOutcome {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Track(conn) => {
                    trace!(conn = %conn, tracked = self.connections.len() + 1, "tracking");
                    self.connections.insert(conn);
                }
                Command::Untrack(conn) => {
                    self.connections.remove(&conn);
                    trace!(conn = %conn, tracked = self.connections.len(), "untracked");
                    if self.connections.is_empty() {
                        if let Some(done) = self.drain.take() {
                            debug!("all connections drained");
                            let _ = done.send(());
                            return DrainOutcome::Drained;
                        }
                    }
                }
                Command::BeginDrain(done) => {
                    if self.connections.is_empty() {
                        debug!("drain requested with no active connections");
                        let _ = done.send(());
                        return DrainOutcome::Drained;
                    }
                    if self.drain.is_some() {
                        warn!("drain already in progress, ignoring repeat request");
                        continue;
                    }
                    debug!(active = self.connections.len(), "draining");
                    self.drain = Some(done);
                }
                Command::Kill(ack) => {
                    let connections = self.connections.len();
                    for conn in self.connections.drain() {
                        conn.close();
                    }
                    debug!(connections, "force-closed remaining connections");
                    let _ = ack.send(connections);
                    return DrainOutcome::Killed { connections };
                }
            }
        }

        DrainOutcome::Drained
    }
}

/// State hook feeding the tracker, chained with an optional caller hook.
///
/// `Active` tracks, `Idle` and `Closed` untrack. Every event, whatever its
/// state, is then passed to the caller's hook unchanged and in order.
pub(crate) struct TrackingHook {
    tracker: TrackerHandle,
    user: Option<SharedHook>,
}

impl TrackingHook {
    pub(crate) fn new(tracker: TrackerHandle, user: Option<SharedHook>) -> Self {
        Self { tracker, user }
    }
}

impl ConnStateHook for TrackingHook {
    fn on_state(&self, conn: &ConnHandle, state: ConnState) {
        match state {
            ConnState::Active => self.tracker.track(conn.clone()),
            ConnState::Closed | ConnState::Idle => self.tracker.untrack(conn.clone()),
            ConnState::New | ConnState::Hijacked => {}
        }

        if let Some(user) = &self.user {
            user.on_state(conn, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    fn conn() -> ConnHandle {
        ConnHandle::new("127.0.0.1:5000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_drain_when_empty_completes_immediately() {
        let (tracker, task) = ConnTracker::spawn();

        let done = tracker.begin_drain();
        assert!(done.await.is_ok());
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_drain_waits_for_last_untrack() {
        let (tracker, task) = ConnTracker::spawn();
        let a = conn();
        let b = conn();

        tracker.track(a.clone());
        tracker.track(b.clone());
        let mut done = tracker.begin_drain();

        tracker.untrack(a);
        assert!(timeout(Duration::from_millis(50), &mut done).await.is_err());

        tracker.untrack(b);
        assert!(done.await.is_ok());
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_untrack_before_drain_does_not_finish() {
        let (tracker, task) = ConnTracker::spawn();
        let a = conn();

        tracker.track(a.clone());
        tracker.untrack(a);
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        tracker.begin_drain().await.unwrap();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let (tracker, task) = ConnTracker::spawn();
        let a = conn();

        tracker.track(a.clone());
        tracker.track(a.clone());
        let done = tracker.begin_drain();
        tracker.untrack(a);

        assert!(done.await.is_ok());
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_kill_closes_tracked_connections() {
        let (tracker, task) = ConnTracker::spawn();
        let a = conn();
        let b = conn();

        tracker.track(a.clone());
        tracker.track(b.clone());
        let done = tracker.begin_drain();

        assert_eq!(tracker.kill().await, Some(2));
        assert!(a.is_closed());
        assert!(b.is_closed());

        // The outstanding drain is abandoned, never signalled.
        assert!(done.await.is_err());
        assert_eq!(task.await.unwrap(), DrainOutcome::Killed { connections: 2 });
    }

    #[tokio::test]
    async fn test_kill_after_drain_is_noop() {
        let (tracker, task) = ConnTracker::spawn();
        tracker.begin_drain().await.unwrap();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);

        assert_eq!(tracker.kill().await, None);
    }

    #[tokio::test]
    async fn test_untracked_connection_is_not_killed() {
        let (tracker, _task) = ConnTracker::spawn();
        let gone = conn();
        let stuck = conn();

        tracker.track(gone.clone());
        tracker.track(stuck.clone());
        tracker.untrack(gone.clone());

        assert_eq!(tracker.kill().await, Some(1));
        assert!(!gone.is_closed());
        assert!(stuck.is_closed());
    }

    #[tokio::test]
    async fn test_tracking_hook_forwards_every_event() {
        let (tracker, task) = ConnTracker::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let user: SharedHook = Arc::new(move |_: &ConnHandle, state: ConnState| {
            sink.lock().unwrap().push(state);
        });
        let hook = TrackingHook::new(tracker.clone(), Some(user));

        let a = conn();
        for state in [
            ConnState::New,
            ConnState::Active,
            ConnState::Idle,
            ConnState::Active,
            ConnState::Closed,
        ] {
            hook.on_state(&a, state);
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnState::New,
                ConnState::Active,
                ConnState::Idle,
                ConnState::Active,
                ConnState::Closed,
            ]
        );

        tracker.begin_drain().await.unwrap();
        assert_eq!(task.await.unwrap(), DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn test_hijacked_connection_stays_tracked() {
        let (tracker, _task) = ConnTracker::spawn();
        let hook = TrackingHook::new(tracker.clone(), None);

        let a = conn();
        hook.on_state(&a, ConnState::New);
        hook.on_state(&a, ConnState::Active);
        hook.on_state(&a, ConnState::Hijacked);

        assert_eq!(tracker.kill().await, Some(1));
    }
}
