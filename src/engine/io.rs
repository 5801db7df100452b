//! Accepted socket with an out-of-band kill switch.
//!
//! hyper gives the IO away when a connection is upgraded, so force-closing
//! has to act on the socket rather than on the connection future. Each
//! accepted socket keeps a duplicate descriptor in a small watcher task that
//! shuts the socket down when the connection's kill switch fires. The
//! watcher exits as soon as the IO is dropped.

use crate::engine::conn::ConnHandle;
use pin_project_lite::pin_project;
use std::io::{self, IoSlice};
use std::net::Shutdown;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

pin_project! {
    /// TCP stream that is shut down when its connection is killed, whoever
    /// owns it at that point.
    pub(crate) struct ConnIo {
        #[pin]
        inner: TcpStream,
        _released: DropGuard,
    }
}

impl ConnIo {
    /// Wrap `stream` and arm `conn`'s kill switch against it.
    pub(crate) fn arm(stream: TcpStream, conn: &ConnHandle) -> io::Result<Self> {
        let std_stream = stream.into_std()?;
        let socket = std_stream.try_clone()?;
        let inner = TcpStream::from_std(std_stream)?;

        let released = CancellationToken::new();
        let dropped = released.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = conn.killed() => {
                    // Shutting down the duplicate ends the connection for
                    // every descriptor, including one held after an upgrade.
                    if let Err(e) = socket.shutdown(Shutdown::Both) {
                        trace!(conn = %conn, error = %e, "socket already closed");
                    }
                }
                _ = dropped.cancelled() => {}
            }
        });

        Ok(Self {
            inner,
            _released: released.drop_guard(),
        })
    }
}

impl AsyncRead for ConnIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl AsyncWrite for ConnIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_passthrough() {
        let (mut client, server) = pair().await;
        let conn = ConnHandle::new(client.local_addr().unwrap());
        let mut io = ConnIo::arm(server, &conn).unwrap();

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        io.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_kill_reaches_idle_holder() {
        let (mut client, server) = pair().await;
        let conn = ConnHandle::new(client.local_addr().unwrap());

        // Held but never polled, like an upgraded connection parked by its
        // new owner.
        let _held = ConnIo::arm(server, &conn).unwrap();
        conn.close();

        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("socket still open after kill");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_drop_without_kill() {
        let (mut client, server) = pair().await;
        let conn = ConnHandle::new(client.local_addr().unwrap());

        drop(ConnIo::arm(server, &conn).unwrap());

        let mut buf = [0u8; 16];
        let read = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("socket still open after drop");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(!conn.is_closed());
    }
}
