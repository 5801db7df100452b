//! HTTP engine.
//!
//! Accepts connections from a [`Listener`], drives each one with hyper's
//! HTTP/1.1 connection builder on its own task, and reports every lifecycle
//! transition to a [`ConnStateHook`].

use crate::engine::body::{IdleGuard, TrackedBody};
use crate::engine::conn::{ConnHandle, ConnState, SharedHook};
use crate::engine::handler::Handler;
use crate::engine::io::ConnIo;
use crate::engine::listener::{Accepted, Listener};
use crate::engine::tls::TlsOptions;
use crate::error::ServeError;
use hyper::StatusCode;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace, warn};

/// First delay after a transient accept error.
const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound for the accept backoff.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// The HTTP engine.
///
/// Cloning is cheap and clones share the keep-alive switch.
#[derive(Clone)]
pub struct HttpServer {
    /// Address to bind when the server creates its own listener.
    pub addr: Option<String>,
    /// Request handler.
    pub handler: Handler,
    /// TLS options used by the TLS entry points.
    pub tls: Option<TlsOptions>,
    keep_alive: Arc<watch::Sender<bool>>,
}

impl HttpServer {
    /// Create an engine serving `handler`, with keep-alive enabled.
    pub fn new(handler: Handler) -> Self {
        Self {
            addr: None,
            handler,
            tls: None,
            keep_alive: Arc::new(watch::Sender::new(true)),
        }
    }

    /// Set the address used by `listen_and_serve`.
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Set TLS options used by `listen_and_serve_tls`.
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Enable or disable HTTP keep-alive.
    ///
    /// Disabling it closes idle connections and makes busy ones close after
    /// their current response. The setting sticks until changed again.
    pub fn set_keep_alives_enabled(&self, enabled: bool) {
        let previous = self.keep_alive.send_replace(enabled);
        if previous != enabled {
            debug!(enabled, "keep-alive toggled");
        }
    }

    /// Whether keep-alive is currently enabled.
    pub fn keep_alives_enabled(&self) -> bool {
        *self.keep_alive.borrow()
    }

    /// Run the accept loop until the listener is closed or fails.
    ///
    /// Returns [`ServeError::ListenerClosed`] once the listener's closer has
    /// fired. Connections accepted before that keep running on their own
    /// tasks after this returns.
    pub async fn serve(&self, listener: Listener, hook: SharedHook) -> Result<(), ServeError> {
        let mut backoff: Option<Duration> = None;

        loop {
            match listener.accept().await {
                Ok(Accepted::Stream(stream, peer)) => {
                    backoff = None;
                    let tls = listener.tls().cloned();
                    self.spawn_connection(stream, peer, tls, Arc::clone(&hook));
                }
                Ok(Accepted::Closed) => {
                    debug!("accept loop stopped: listener closed");
                    return Err(ServeError::ListenerClosed);
                }
                Err(e) if is_transient(&e) => {
                    let delay = backoff
                        .map_or(MIN_ACCEPT_BACKOFF, |d| (d * 2).min(MAX_ACCEPT_BACKOFF));
                    backoff = Some(delay);
                    warn!(error = %e, retry_in_ms = delay.as_millis(), "transient accept error");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ServeError::Accept(e)),
            }
        }
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        tls: Option<TlsAcceptor>,
        hook: SharedHook,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let conn = ConnHandle::new(peer);
        let io = match ConnIo::arm(stream, &conn) {
            Ok(io) => io,
            Err(e) => {
                warn!(error = %e, %peer, "failed to arm kill switch, dropping connection");
                return;
            }
        };
        hook.on_state(&conn, ConnState::New);
        trace!(conn = %conn, "connection accepted");

        let handler = Arc::clone(&self.handler);
        let keep_alive = self.keep_alive.subscribe();

        tokio::spawn(async move {
            // Reports Closed however this task ends, a panicking handler included.
            let closed = ClosedGuard::new(conn.clone(), Arc::clone(&hook));
            let hijacked = Arc::clone(&closed.hijacked);

            match tls {
                None => drive_connection(io, &conn, handler, hook, hijacked, keep_alive).await,
                Some(acceptor) => {
                    let handshake = tokio::select! {
                        result = acceptor.accept(io) => Some(result),
                        _ = conn.killed() => None,
                    };
                    match handshake {
                        Some(Ok(tls_stream)) => {
                            drive_connection(tls_stream, &conn, handler, hook, hijacked, keep_alive)
                                .await
                        }
                        Some(Err(e)) => {
                            debug!(conn = %conn, error = %e, "TLS handshake failed");
                        }
                        None => {}
                    }
                }
            }

            trace!(conn = %conn, hijacked = closed.is_hijacked(), "connection finished");
        });
    }
}

/// Reports `Closed` for a connection when its task ends, unless the
/// connection was hijacked.
struct ClosedGuard {
    conn: ConnHandle,
    hook: SharedHook,
    hijacked: Arc<AtomicBool>,
}

impl ClosedGuard {
    fn new(conn: ConnHandle, hook: SharedHook) -> Self {
        Self {
            conn,
            hook,
            hijacked: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_hijacked(&self) -> bool {
        self.hijacked.load(Ordering::Acquire)
    }
}

impl Drop for ClosedGuard {
    fn drop(&mut self) {
        if !self.is_hijacked() {
            self.hook.on_state(&self.conn, ConnState::Closed);
        }
    }
}

/// Serve HTTP/1.1 on one connection until it ends, is killed, or is upgraded.
///
/// Sets `hijacked` when a response upgrades the connection.
async fn drive_connection<I>(
    io: I,
    conn: &ConnHandle,
    handler: Handler,
    hook: SharedHook,
    hijacked: Arc<AtomicBool>,
    mut keep_alive: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = {
        let conn = conn.clone();
        let hijacked = Arc::clone(&hijacked);
        service_fn(move |req| {
            let conn = conn.clone();
            let hook = Arc::clone(&hook);
            let handler = Arc::clone(&handler);
            let hijacked = Arc::clone(&hijacked);
            async move {
                hook.on_state(&conn, ConnState::Active);
                let response = handler(req).await;

                if response.status() == StatusCode::SWITCHING_PROTOCOLS {
                    hijacked.store(true, Ordering::Release);
                    hook.on_state(&conn, ConnState::Hijacked);
                    return Ok::<_, Infallible>(response.map(TrackedBody::untracked));
                }

                let guard = IdleGuard::new(conn, hook);
                Ok::<_, Infallible>(response.map(|body| TrackedBody::new(body, guard)))
            }
        })
    };

    let enabled = *keep_alive.borrow_and_update();
    let connection = http1::Builder::new()
        .keep_alive(enabled)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(connection);

    // Once keep-alive is off there is nothing left to watch for.
    let mut watching = enabled;

    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!(conn = %conn, error = %e, "connection error");
                }
                break;
            }
            _ = conn.killed() => {
                debug!(conn = %conn, "connection force-closed");
                break;
            }
            changed = keep_alive.changed(), if watching => {
                let disabled = changed.is_err() || !*keep_alive.borrow_and_update();
                if disabled {
                    connection.as_mut().graceful_shutdown();
                    watching = false;
                }
            }
        }
    }
}

/// Accept errors worth retrying rather than failing the serve loop.
fn is_transient(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | ConnectionRefused | Interrupted | WouldBlock
    ) {
        return true;
    }

    // EMFILE / ENFILE: out of descriptors, may recover once connections close.
    matches!(e.raw_os_error(), Some(23) | Some(24))
}
