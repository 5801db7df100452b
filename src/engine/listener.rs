//! Closable listener.
//!
//! A tokio `TcpListener` cannot be closed from another task while it is
//! being accepted on, so the engine owns the listener and races every
//! `accept` against a close token. Closing makes the accept loop return and
//! drop the socket, after which the OS refuses new connections.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of a single accept.
pub(crate) enum Accepted {
    Stream(TcpStream, SocketAddr),
    Closed,
}

/// A bound listening socket, optionally wrapped in TLS.
pub struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    closer: ListenerCloser,
}

impl Listener {
    /// Bind a plain TCP listener.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Self::from_tcp(inner))
    }

    /// Wrap an already-bound tokio listener.
    pub fn from_tcp(inner: TcpListener) -> Self {
        Self {
            inner,
            tls: None,
            closer: ListenerCloser::new(),
        }
    }

    /// Terminate TLS on every accepted connection.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Handle that can close this listener from any task.
    pub fn closer(&self) -> ListenerCloser {
        self.closer.clone()
    }

    pub(crate) fn tls(&self) -> Option<&TlsAcceptor> {
        self.tls.as_ref()
    }

    pub(crate) async fn accept(&self) -> io::Result<Accepted> {
        if self.closer.is_closed() {
            return Ok(Accepted::Closed);
        }

        tokio::select! {
            biased;

            _ = self.closer.token.cancelled() => Ok(Accepted::Closed),
            result = self.inner.accept() => {
                let (stream, addr) = result?;
                Ok(Accepted::Stream(stream, addr))
            }
        }
    }
}

/// Single-shot close switch shared between the listener and its owner.
#[derive(Clone, Debug)]
pub struct ListenerCloser {
    closed: Arc<AtomicBool>,
    token: CancellationToken,
}

impl ListenerCloser {
    fn new() -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
        }
    }

    /// Close the listener.
    ///
    /// Returns `true` for the call that actually closed it; every later call
    /// is a no-op returning `false`.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("closing listener");
        self.token.cancel();
        true
    }

    /// Whether the listener has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
        assert!(listener.tls().is_none());
    }

    #[tokio::test]
    async fn test_close_only_once() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let closer = listener.closer();

        assert!(!closer.is_closed());
        assert!(closer.close());
        assert!(!closer.close());
        assert!(!listener.closer().close());
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn test_accept_after_close() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        listener.closer().close();

        let accepted = listener.accept().await.unwrap();
        assert!(matches!(accepted, Accepted::Closed));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_accept() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let closer = listener.closer();

        let pending = tokio::spawn(async move { listener.accept().await });
        tokio::task::yield_now().await;
        closer.close();

        let accepted = pending.await.unwrap().unwrap();
        assert!(matches!(accepted, Accepted::Closed));
    }

    #[tokio::test]
    async fn test_accept_connection() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await });
        let accepted = listener.accept().await.unwrap();
        assert!(matches!(accepted, Accepted::Stream(..)));
        assert!(client.await.unwrap().is_ok());
    }
}
