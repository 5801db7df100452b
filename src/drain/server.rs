//! Graceful server.
//!
//! Wraps an [`HttpServer`] so that a shutdown request stops new connections,
//! lets in-flight ones finish, and force-closes whatever is still running
//! once the drain timeout has passed.

use crate::drain::tracker::{ConnTracker, DrainOutcome, TrackingHook};
use crate::drain::trigger::{ShutdownReason, ShutdownSources, ShutdownTrigger};
use crate::engine::{ConnStateHook, HttpServer, Listener, SharedHook};
use crate::error::ServeError;
use crate::util::ShutdownSignal;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Address bound by [`GracefulServer::listen_and_serve`] when none is set.
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:80";

/// Address bound by [`GracefulServer::listen_and_serve_tls`] when none is set.
pub const DEFAULT_HTTPS_ADDR: &str = "0.0.0.0:443";

/// What happened during one serve call.
#[derive(Debug)]
pub struct ServeReport {
    /// What the accept loop returned. [`ServeError::ListenerClosed`] is the
    /// normal result of a shutdown.
    pub result: Result<(), ServeError>,
    /// What stopped the accept loop.
    pub reason: ShutdownReason,
    /// How the drain phase ended.
    pub drain: DrainOutcome,
    /// Time spent draining, measured from the end of the accept loop.
    pub drain_time: Duration,
}

/// An HTTP server with graceful shutdown.
///
/// # Example
///
/// ```no_run
/// use rustdrain::{GracefulServer, HttpServer, handler_fn, text_response};
/// use hyper::StatusCode;
/// use std::time::Duration;
///
/// # async fn demo() {
/// let engine = HttpServer::new(handler_fn(|_req| async {
///     text_response(StatusCode::OK, "hello")
/// }))
/// .with_addr("127.0.0.1:8080");
///
/// let server = GracefulServer::new(engine).with_timeout(Duration::from_secs(5));
/// if let Err(e) = server.listen_and_serve().await {
///     if !e.is_listener_closed() {
///         eprintln!("server failed: {e}");
///     }
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct GracefulServer {
    /// How long to let connections finish once draining starts before
    /// closing them. Zero waits forever.
    pub timeout: Duration,
    /// Caller's connection state observer, called after internal tracking.
    pub conn_state: Option<SharedHook>,
    /// Shutdown notification channel.
    pub shutdown: Option<ShutdownSignal>,
    /// Shutdown cancellation token.
    pub cancel: Option<CancellationToken>,
    /// The wrapped engine.
    pub server: HttpServer,
}

impl GracefulServer {
    /// Wrap `server` with no timeout and the default signal source.
    pub fn new(server: HttpServer) -> Self {
        Self {
            timeout: Duration::ZERO,
            conn_state: None,
            shutdown: None,
            cancel: None,
            server,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_conn_state(mut self, hook: impl ConnStateHook) -> Self {
        let hook: SharedHook = Arc::new(hook);
        self.conn_state = Some(hook);
        self
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bind the engine's address (default [`DEFAULT_HTTP_ADDR`]) and serve.
    pub async fn listen_and_serve(&self) -> Result<(), ServeError> {
        let addr = self.server.addr.as_deref().unwrap_or(DEFAULT_HTTP_ADDR);
        let listener = bind(addr).await?;
        self.serve(listener).await
    }

    /// Load a certificate/key pair, bind the engine's address (default
    /// [`DEFAULT_HTTPS_ADDR`]) and serve TLS.
    ///
    /// Nothing is bound if the key material cannot be loaded.
    pub async fn listen_and_serve_tls(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServeError> {
        let options = self.server.tls.clone().unwrap_or_default();
        let acceptor = options.load_pem_files(cert_path.as_ref(), key_path.as_ref())?;

        let addr = self.server.addr.as_deref().unwrap_or(DEFAULT_HTTPS_ADDR);
        let listener = bind(addr).await?.with_tls(acceptor);
        self.serve(listener).await
    }

    /// Serve on an existing listener until shutdown, then drain.
    pub async fn serve(&self, listener: Listener) -> Result<(), ServeError> {
        self.serve_with_report(listener).await?.result
    }

    /// Like [`serve`](Self::serve), but also reports how shutdown went.
    ///
    /// The outer error is returned only when the shutdown watcher could not
    /// be started, in which case nothing was served.
    #[instrument(skip_all, fields(local_addr = ?listener.local_addr().ok()))]
    pub async fn serve_with_report(&self, listener: Listener) -> Result<ServeReport, ServeError> {
        let (tracker, tracker_task) = ConnTracker::spawn();
        let hook: SharedHook = Arc::new(TrackingHook::new(
            tracker.clone(),
            self.conn_state.clone(),
        ));

        let sources = ShutdownSources {
            notify: self.shutdown.as_ref().map(ShutdownSignal::subscribe),
            cancel: self.cancel.clone(),
        };
        let trigger = ShutdownTrigger::start(sources, self.server.clone(), listener.closer())
            .map_err(ServeError::Signal)?;

        let result = self.server.serve(listener, hook).await;

        // Covers the accept loop failing on its own: the watcher must not
        // outlive this call.
        let reason = trigger.stop().await;
        debug!(%reason, timeout_ms = self.timeout.as_millis(), "accept loop ended, draining");

        let started = Instant::now();
        let mut done = tracker.begin_drain();
        if self.timeout > Duration::ZERO {
            tokio::select! {
                _ = &mut done => {}
                _ = tokio::time::sleep(self.timeout) => {
                    tracker.kill().await;
                }
            }
        } else {
            let _ = done.await;
        }

        // The tracker has either signalled the drain or acknowledged the
        // kill by now, so its task is finishing.
        let drain = tracker_task.await.unwrap_or(DrainOutcome::Drained);
        let drain_time = started.elapsed();
        debug!(?drain, drain_ms = drain_time.as_millis(), "drain finished");

        Ok(ServeReport {
            result,
            reason,
            drain,
            drain_time,
        })
    }
}

async fn bind(addr: &str) -> Result<Listener, ServeError> {
    Listener::bind(addr).await.map_err(|source| ServeError::Bind {
        addr: addr.to_string(),
        source,
    })
}
