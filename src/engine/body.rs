//! Response body wrapper that reports `Idle` once the body is gone.
//!
//! hyper drops a response body after its last frame has been written, so
//! the drop point is the earliest moment the connection is idle again.

use crate::engine::conn::{ConnHandle, ConnState, SharedHook};
use hyper::body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Reports `Idle` for a connection when dropped.
pub(crate) struct IdleGuard {
    conn: ConnHandle,
    hook: SharedHook,
}

impl IdleGuard {
    pub(crate) fn new(conn: ConnHandle, hook: SharedHook) -> Self {
        Self { conn, hook }
    }
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        self.hook.on_state(&self.conn, ConnState::Idle);
    }
}

pin_project! {
    /// Body passthrough optionally carrying an [`IdleGuard`].
    pub(crate) struct TrackedBody<B> {
        #[pin]
        inner: B,
        _guard: Option<IdleGuard>,
    }
}

impl<B> TrackedBody<B> {
    pub(crate) fn new(inner: B, guard: IdleGuard) -> Self {
        Self {
            inner,
            _guard: Some(guard),
        }
    }

    /// Passthrough that reports nothing, for bodies of hijacked connections.
    pub(crate) fn untracked(inner: B) -> Self {
        Self {
            inner,
            _guard: None,
        }
    }
}

impl<B: Body> Body for TrackedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.project().inner.poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handler::full;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_idle_reported_after_body_consumed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: SharedHook = Arc::new(move |_: &ConnHandle, state: ConnState| {
            sink.lock().unwrap().push(state);
        });

        let conn = ConnHandle::new("127.0.0.1:1".parse().unwrap());
        let body = TrackedBody::new(full("hello"), IdleGuard::new(conn, hook));
        assert_eq!(body.size_hint().exact(), Some(5));
        assert!(seen.lock().unwrap().is_empty());

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(*seen.lock().unwrap(), vec![ConnState::Idle]);
    }
}
