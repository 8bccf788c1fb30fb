//! HTTP and WebSocket surface
//!
//! Serves the embedded viewer, the service listing and the log streaming upgrade.

pub mod handlers;
