use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use thiserror::Error;

use crate::{auth::Credentials, journal::JournalSettings};

#[derive(Debug, Clone, Parser)]
#[command(name = "journalctl-proxy", version, about = "Browse systemd services and stream their journal over WebSocket")]
pub struct Config {
    /// Server port number
    #[arg(short = 'p', long, env = "JOURNAL_PROXY_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, env = "JOURNAL_PROXY_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Username for basic auth
    #[arg(long = "auth-user", alias = "au", env = "JOURNAL_PROXY_AUTH_USER")]
    pub auth_user: Option<String>,

    /// Password for basic auth
    #[arg(long = "auth-password", alias = "ap", env = "JOURNAL_PROXY_AUTH_PASSWORD")]
    pub auth_password: Option<String>,

    /// Add container names for Docker scopes (with journald logging driver)
    #[arg(long, env = "JOURNAL_PROXY_DOCKER")]
    pub docker: bool,

    /// Show user unit logs instead of system units
    #[arg(short = 'u', long, env = "JOURNAL_PROXY_USER")]
    pub user: bool,

    /// Seconds a single WebSocket write may stall before the stream is dropped
    #[arg(long, env = "JOURNAL_PROXY_WRITE_TIMEOUT_SECS", default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Milliseconds journalctl gets to exit after SIGTERM before it is killed
    #[arg(long, env = "JOURNAL_PROXY_STOP_TIMEOUT_MS", default_value_t = 1000)]
    pub stop_timeout_ms: u64,

    /// tracing filter directive
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let _ = self.bind_socket()?;
        if self.write_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("write timeout"));
        }
        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("stop timeout"));
        }
        Ok(())
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    /// Basic auth is active as soon as either half of the pair is non-empty.
    pub fn credentials(&self) -> Option<Credentials> {
        let username = self.auth_user.clone().unwrap_or_default();
        let password = self.auth_password.clone().unwrap_or_default();
        if username.is_empty() && password.is_empty() {
            return None;
        }
        Some(Credentials { username, password })
    }

    pub fn journal_settings(&self) -> JournalSettings {
        JournalSettings {
            user_scope: self.user,
            container_mode: self.docker,
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            ..JournalSettings::default()
        }
    }
}
