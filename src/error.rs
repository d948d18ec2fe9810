use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Errors raised by the user store. These never leave the service layer;
/// services translate them into [`AuthError`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                StoreError::DuplicateEmail
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Whether an identity resolution failure was caused by the artifact the
/// client presented or by the provider itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionFault {
    Rejected,
    Provider,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("email already registered")]
    SignupConflict,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredential,

    #[error("account has no password; sign in with Google")]
    NoLocalCredential,

    #[error("{0}")]
    Unauthorized(String),

    #[error("identity resolution failed: {message}")]
    IdentityResolution {
        fault: ResolutionFault,
        message: String,
    },

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(&'static str),

    #[error("stored credential is corrupt")]
    CorruptCredential,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn rejected(message: impl Into<String>) -> Self {
        AuthError::IdentityResolution {
            fault: ResolutionFault::Rejected,
            message: message.into(),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        AuthError::IdentityResolution {
            fault: ResolutionFault::Provider,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuthError::SignupConflict => StatusCode::CONFLICT,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidCredential
            | AuthError::NoLocalCredential
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::IdentityResolution { fault, .. } => match fault {
                ResolutionFault::Rejected => StatusCode::UNAUTHORIZED,
                ResolutionFault::Provider => StatusCode::BAD_GATEWAY,
            },
            AuthError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AuthError::CorruptCredential | AuthError::Hashing(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthError::SignupConflict,
            StoreError::Backend(msg) => AuthError::Internal(msg),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                tracing::warn!(error = %self, "upstream failure");
                self.to_string()
            }
            s if s.is_server_error() => {
                tracing::error!(error = %self, "request failed");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        assert_eq!(
            AuthError::Validation("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(AuthError::SignupConflict.status(), StatusCode::CONFLICT);
        assert_eq!(AuthError::UserNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(AuthError::InvalidCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::NoLocalCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::rejected("state").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::provider("down").status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AuthError::UpstreamTimeout("store").status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AuthError::CorruptCredential.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_email_becomes_signup_conflict() {
        let err: AuthError = StoreError::DuplicateEmail.into();
        assert!(matches!(err, AuthError::SignupConflict));
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response = AuthError::Internal("connection refused to 10.0.0.5".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Internal server error"));
        assert!(!text.contains("10.0.0.5"));
    }
}
