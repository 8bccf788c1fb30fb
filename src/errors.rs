use std::{io, process::ExitStatus};

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::BASIC_AUTH_CHALLENGE;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("upgrade required")]
    UpgradeRequired,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized { code, message } => (StatusCode::UNAUTHORIZED, code, message),
            Self::UpgradeRequired => (
                StatusCode::UPGRADE_REQUIRED,
                "upgrade_required",
                "websocket upgrade required",
            ),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
                details: json!({}),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_AUTH_CHALLENGE),
            );
        }
        response
    }
}

/// Failure while asking systemd or the container runtime for its units.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
    #[error("unparseable output from {program}: {message}")]
    Parse { program: String, message: String },
}

/// Failure of the log-tailing subprocess.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited abnormally with {status}")]
    AbnormalExit { program: String, status: ExitStatus },
    #[error("failed to reap {program}: {source}")]
    Reap {
        program: String,
        #[source]
        source: io::Error,
    },
}
