//! rustdrain - graceful shutdown for HTTP servers
//!
//! This crate wraps a hyper-based HTTP/1.1 engine with:
//! - Connection tracking driven by connection state transitions
//! - Shutdown on a notification channel, a cancellation token, or SIGINT/SIGTERM
//! - Draining in-flight connections with an optional forced-close deadline
//! - Plain TCP and TLS listeners

pub mod config;
pub mod drain;
pub mod engine;
pub mod error;
pub mod serve;
pub mod util;

pub use config::Config;
pub use drain::{DrainOutcome, GracefulServer, ServeReport, ShutdownReason};
pub use engine::{
    ConnHandle, ConnState, ConnStateHook, Handler, HttpServer, Listener, handler_fn,
    text_response,
};
pub use error::ServeError;
pub use util::ShutdownSignal;
