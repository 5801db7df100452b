//! Errors returned by the serve entry points.

use crate::engine::TlsError;
use std::io;
use thiserror::Error;

/// Why a serve call returned.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listening socket could not be bound. The drain machinery never started.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The certificate/key pair could not be loaded. No socket was bound.
    #[error("failed to load TLS certificate: {0}")]
    Tls(#[from] TlsError),

    /// The accept loop hit a non-transient transport error.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The listener was closed by a shutdown trigger. This is the normal
    /// outcome of a graceful shutdown.
    #[error("accept on closed listener")]
    ListenerClosed,

    /// The default process signal handlers could not be installed.
    #[error("failed to register shutdown signal handler: {0}")]
    Signal(#[source] io::Error),
}

impl ServeError {
    /// Whether this is the expected result of an intentional shutdown.
    pub fn is_listener_closed(&self) -> bool {
        matches!(self, ServeError::ListenerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_closed_is_expected() {
        assert!(ServeError::ListenerClosed.is_listener_closed());

        let accept = ServeError::Accept(io::Error::other("boom"));
        assert!(!accept.is_listener_closed());

        let bind = ServeError::Bind {
            addr: "127.0.0.1:80".to_string(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(!bind.is_listener_closed());
        assert!(bind.to_string().starts_with("failed to bind 127.0.0.1:80"));
    }
}
