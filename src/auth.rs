use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Basic, Authorization},
    TypedHeader,
};

use crate::{errors::AppError, AppState};

pub const BASIC_AUTH_REALM: &str = "journalctl proxy";
pub const BASIC_AUTH_CHALLENGE: &str = "Basic realm=\"journalctl proxy\"";

/// The single shared credential pair accepted by the basic-auth gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username && self.password == password
    }
}

pub async fn require_basic_auth(
    State(state): State<AppState>,
    auth_header: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(credentials) = state.credentials.as_deref() else {
        return Ok(next.run(request).await);
    };

    let Some(TypedHeader(auth)) = auth_header else {
        return Err(AppError::unauthorized(
            "missing_credentials",
            "missing authorization header",
        ));
    };

    if !credentials.matches(auth.username(), auth.password()) {
        return Err(AppError::unauthorized(
            "invalid_credentials",
            "invalid username or password",
        ));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_halves() {
        let credentials = Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };

        assert!(credentials.matches("admin", "secret"));
        assert!(!credentials.matches("admin", "Secret"));
        assert!(!credentials.matches("", "secret"));
    }

    #[test]
    fn challenge_names_realm() {
        assert!(BASIC_AUTH_CHALLENGE.contains(BASIC_AUTH_REALM));
    }
}
