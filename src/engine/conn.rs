//! Connection identity, lifecycle states, and the state-change hook.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Counter for connection ids, unique within the process.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a client connection as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// Accepted, no request read yet.
    New,
    /// A request is being processed.
    Active,
    /// The last response was fully written; waiting for another request.
    Idle,
    /// The connection is gone.
    Closed,
    /// The connection was upgraded and handed off; the engine no longer owns it.
    Hijacked,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::New => "new",
            ConnState::Active => "active",
            ConnState::Idle => "idle",
            ConnState::Closed => "closed",
            ConnState::Hijacked => "hijacked",
        };
        f.write_str(s)
    }
}

/// Opaque handle to one accepted connection.
///
/// Equality and hashing use the connection id only, so a handle can be used
/// as a set key. Cloning is cheap; every clone refers to the same connection.
#[derive(Clone)]
pub struct ConnHandle {
    id: u64,
    peer: SocketAddr,
    kill: CancellationToken,
}

impl ConnHandle {
    /// Create a handle for a freshly accepted connection.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: CONN_COUNTER.fetch_add(1, Ordering::Relaxed),
            peer,
            kill: CancellationToken::new(),
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Forcibly terminate the connection.
    ///
    /// Best-effort and idempotent: closing a connection that already ended
    /// on its own is a no-op.
    pub fn close(&self) {
        self.kill.cancel();
    }

    /// Whether `close` has been called on any clone of this handle.
    pub fn is_closed(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Resolves once the connection has been force-closed.
    pub(crate) async fn killed(&self) {
        self.kill.cancelled().await
    }
}

impl PartialEq for ConnHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnHandle {}

impl Hash for ConnHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{:08x}@{}", self.id, self.peer)
    }
}

/// Something that wants to hear about connection lifecycle transitions.
///
/// Called synchronously from the connection's own task, so implementations
/// must not block.
pub trait ConnStateHook: Send + Sync + 'static {
    fn on_state(&self, conn: &ConnHandle, state: ConnState);
}

impl<F> ConnStateHook for F
where
    F: Fn(&ConnHandle, ConnState) + Send + Sync + 'static,
{
    fn on_state(&self, conn: &ConnHandle, state: ConnState) {
        self(conn, state)
    }
}

/// Hook that discards every event.
#[cfg(test)]
pub(crate) struct NoopHook;

#[cfg(test)]
impl ConnStateHook for NoopHook {
    fn on_state(&self, _conn: &ConnHandle, _state: ConnState) {}
}

/// Shared, type-erased hook.
pub type SharedHook = Arc<dyn ConnStateHook>;
