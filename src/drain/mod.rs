//! Connection draining.
//!
//! [`GracefulServer`] runs the engine with a [`ConnTracker`] fed by its
//! state hook and a shutdown trigger watching for the first shutdown
//! request. When the accept loop returns it asks the tracker to drain and
//! races that against the configured timeout.

mod server;
mod tracker;
mod trigger;

pub use server::{DEFAULT_HTTP_ADDR, DEFAULT_HTTPS_ADDR, GracefulServer, ServeReport};
pub use tracker::{ConnTracker, DrainOutcome, TrackerHandle};
pub use trigger::{ShutdownReason, ShutdownSources};
