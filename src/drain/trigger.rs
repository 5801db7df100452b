//! Shutdown trigger.
//!
//! Waits for the first shutdown notification, then turns keep-alive off and
//! closes the listener, exactly once. The watcher also exits when the serve
//! loop ends for some other reason, so it never outlives its serve call.

use crate::engine::{HttpServer, ListenerCloser};
use crate::util::ShutdownListener;
use std::fmt;
use std::future::pending;
use std::io;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What made the trigger fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown notification channel fired.
    Notified,
    /// The cancellation token was cancelled.
    Cancelled,
    /// A process signal arrived.
    Signal(&'static str),
    /// The serve loop ended first.
    Stopped,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Notified => f.write_str("shutdown notification"),
            ShutdownReason::Cancelled => f.write_str("cancellation token"),
            ShutdownReason::Signal(name) => write!(f, "signal {name}"),
            ShutdownReason::Stopped => f.write_str("serve loop ended"),
        }
    }
}

/// Where shutdown requests come from.
///
/// With neither a channel nor a token configured, the trigger listens for
/// SIGINT and SIGTERM (Ctrl+C on Windows) for the duration of one serve call.
#[derive(Debug, Default)]
pub struct ShutdownSources {
    pub notify: Option<ShutdownListener>,
    pub cancel: Option<CancellationToken>,
}

impl ShutdownSources {
    fn is_empty(&self) -> bool {
        self.notify.is_none() && self.cancel.is_none()
    }
}

/// Process signal registrations. Dropping this deregisters them.
struct ProcessSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ProcessSignals {
    #[cfg(unix)]
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    fn register() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(windows)]
    async fn recv(&mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "Ctrl+C"
    }
}

/// A running shutdown watcher.
pub(crate) struct ShutdownTrigger {
    stop: oneshot::Sender<()>,
    task: JoinHandle<ShutdownReason>,
}

impl ShutdownTrigger {
    /// Start watching `sources` for a shutdown request.
    ///
    /// Fails only when the default process signal handlers cannot be
    /// installed.
    pub(crate) fn start(
        sources: ShutdownSources,
        engine: HttpServer,
        closer: ListenerCloser,
    ) -> io::Result<Self> {
        let signals = if sources.is_empty() {
            Some(ProcessSignals::register()?)
        } else {
            None
        };

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(watch(sources, signals, stopped, engine, closer));

        Ok(Self { stop, task })
    }

    /// Tell the watcher to stop waiting and wait for it to exit.
    ///
    /// Returns the reason the trigger fired; [`ShutdownReason::Stopped`]
    /// if nothing external fired before this call.
    pub(crate) async fn stop(self) -> ShutdownReason {
        let _ = self.stop.send(());
        self.task.await.unwrap_or(ShutdownReason::Stopped)
    }
}

async fn watch(
    sources: ShutdownSources,
    mut signals: Option<ProcessSignals>,
    stopped: oneshot::Receiver<()>,
    engine: HttpServer,
    closer: ListenerCloser,
) -> ShutdownReason {
    let ShutdownSources { mut notify, cancel } = sources;

    let reason = tokio::select! {
        _ = stopped => ShutdownReason::Stopped,
        _ = notified(&mut notify) => ShutdownReason::Notified,
        _ = cancelled(&cancel) => ShutdownReason::Cancelled,
        name = signalled(&mut signals) => ShutdownReason::Signal(name),
    };

    drop(signals);

    engine.set_keep_alives_enabled(false);
    let closed = closer.close();
    debug!(%reason, closed, "shutdown triggered");

    reason
}

async fn notified(listener: &mut Option<ShutdownListener>) {
    match listener {
        Some(listener) => listener.recv().await,
        None => pending().await,
    }
}

async fn cancelled(token: &Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => pending().await,
    }
}

async fn signalled(signals: &mut Option<ProcessSignals>) -> &'static str {
    match signals {
        Some(signals) => signals.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Listener, handler_fn, text_response};
    use hyper::StatusCode;
    use crate::util::ShutdownSignal;
    use std::time::Duration;
    use tokio::time::timeout;

    fn engine() -> HttpServer {
        HttpServer::new(handler_fn(|_req| async { text_response(StatusCode::OK, "ok") }))
    }

    async fn bound() -> (Listener, ListenerCloser) {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let closer = listener.closer();
        (listener, closer)
    }

    #[tokio::test]
    async fn test_notification_closes_listener() {
        let (_listener, closer) = bound().await;
        let engine = engine();
        let signal = ShutdownSignal::new();
        let sources = ShutdownSources {
            notify: Some(signal.subscribe()),
            cancel: None,
        };

        let trigger = ShutdownTrigger::start(sources, engine.clone(), closer.clone()).unwrap();
        signal.shutdown();

        timeout(Duration::from_secs(1), async {
            while !closer.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("notification never closed the listener");
        assert!(!engine.keep_alives_enabled());

        assert_eq!(trigger.stop().await, ShutdownReason::Notified);
    }

    #[tokio::test]
    async fn test_cancel_token_fires() {
        let (_listener, closer) = bound().await;
        let token = CancellationToken::new();
        let sources = ShutdownSources {
            notify: None,
            cancel: Some(token.clone()),
        };

        let trigger = ShutdownTrigger::start(sources, engine(), closer.clone()).unwrap();
        token.cancel();

        // Give the watcher a chance to run before asking it to stop.
        timeout(Duration::from_secs(1), async {
            while !closer.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(trigger.stop().await, ShutdownReason::Cancelled);
    }

    #[tokio::test]
    async fn test_stop_without_shutdown() {
        let (_listener, closer) = bound().await;
        let engine = engine();
        let sources = ShutdownSources {
            notify: None,
            cancel: Some(CancellationToken::new()),
        };

        let trigger = ShutdownTrigger::start(sources, engine.clone(), closer.clone()).unwrap();
        assert_eq!(trigger.stop().await, ShutdownReason::Stopped);
        assert!(closer.is_closed());
        assert!(!engine.keep_alives_enabled());
    }

    #[tokio::test]
    async fn test_default_signals_registered_and_released() {
        let (_listener, closer) = bound().await;
        let trigger = ShutdownTrigger::start(ShutdownSources::default(), engine(), closer).unwrap();
        assert_eq!(trigger.stop().await, ShutdownReason::Stopped);
    }

    #[tokio::test]
    async fn test_both_sources_close_once() {
        let (_listener, closer) = bound().await;
        let signal = ShutdownSignal::new();
        let token = CancellationToken::new();
        let sources = ShutdownSources {
            notify: Some(signal.subscribe()),
            cancel: Some(token.clone()),
        };

        let trigger = ShutdownTrigger::start(sources, engine(), closer.clone()).unwrap();
        signal.shutdown();
        token.cancel();

        timeout(Duration::from_secs(1), async {
            while !closer.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let reason = trigger.stop().await;
        assert!(matches!(reason, ShutdownReason::Notified | ShutdownReason::Cancelled));
        // The watcher already closed it; nobody else gets to.
        assert!(!closer.close());
    }
}
