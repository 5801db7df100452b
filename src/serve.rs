//! One-call entry points.
//!
//! Each builds a [`GracefulServer`] with the given timeout and the default
//! process signal source.

use crate::drain::GracefulServer;
use crate::engine::{Handler, HttpServer, Listener};
use crate::error::ServeError;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Bind `server.addr` and serve with graceful shutdown.
pub async fn listen_and_serve(server: HttpServer, timeout: Duration) -> Result<(), ServeError> {
    GracefulServer::new(server)
        .with_timeout(timeout)
        .listen_and_serve()
        .await
}

/// Load the key pair, bind `server.addr` and serve TLS with graceful shutdown.
pub async fn listen_and_serve_tls(
    server: HttpServer,
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<(), ServeError> {
    GracefulServer::new(server)
        .with_timeout(timeout)
        .listen_and_serve_tls(cert_path, key_path)
        .await
}

/// Serve on an existing listener with graceful shutdown.
pub async fn serve(
    server: HttpServer,
    listener: Listener,
    timeout: Duration,
) -> Result<(), ServeError> {
    GracefulServer::new(server)
        .with_timeout(timeout)
        .serve(listener)
        .await
}

/// Serve `handler` on `addr` until SIGINT/SIGTERM, then drain.
///
/// Any failure other than the listener being closed by the shutdown itself
/// is logged and terminates the process.
#[instrument(skip(handler))]
pub async fn run(addr: &str, timeout: Duration, handler: Handler) {
    let server = HttpServer::new(handler).with_addr(addr);

    match listen_and_serve(server, timeout).await {
        Ok(()) => {}
        Err(e) if e.is_listener_closed() => info!("server shut down"),
        Err(e) => {
            error!(error = %e, "server failed");
            std::process::exit(1);
        }
    }
}
