//! The HTTP engine the drain machinery wraps.
//!
//! This module accepts sockets, runs hyper on each connection, and reports
//! connection lifecycle transitions. It knows nothing about shutdown beyond
//! a closable listener and a keep-alive switch.

mod body;
mod conn;
mod handler;
mod io;
mod listener;
mod server;
mod tls;

pub use conn::{ConnHandle, ConnState, ConnStateHook, SharedHook};
pub use handler::{Handler, ResponseBody, full, handler_fn, text_response};
pub use listener::{Listener, ListenerCloser};
pub use server::HttpServer;
pub use tls::{DEFAULT_ALPN, TlsError, TlsOptions};
