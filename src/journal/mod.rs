//! Live journal streaming
//!
//! Translates a client's service selection into `journalctl` arguments, supervises the
//! tailing process and bridges its output onto a WebSocket.

use std::time::Duration;

pub mod query;
pub mod session;
pub mod tail;

pub const JOURNALCTL: &str = "journalctl";

/// Fixed per-process settings for every streaming session.
#[derive(Debug, Clone)]
pub struct JournalSettings {
    pub program: String,
    pub user_scope: bool,
    pub container_mode: bool,
    pub write_timeout: Duration,
    pub stop_timeout: Duration,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            program: JOURNALCTL.to_string(),
            user_scope: false,
            container_mode: false,
            write_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_millis(1000),
        }
    }
}
