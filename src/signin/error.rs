//! Error types for signin request operations.
//!
//! Unknown ids, wrong secrets, expired requests and requests consumed by a
//! concurrent caller all surface as `InvalidToken` so that a client cannot
//! tell whether a given id exists.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::broker::BrokerError;
use crate::token::TokenError;

/// Errors that can occur during signin request operations.
#[derive(Debug, Clone)]
pub enum SigninError {
    /// The presented token has the wrong shape. No lookup was made.
    Malformed,

    /// No live request matches the presented id and secret.
    InvalidToken,

    /// The request already holds a different public key.
    AlreadyAuthenticated,

    /// The request exists but no key has been captured for it yet.
    Pending,

    /// The offered public key exceeds the accepted size.
    KeyTooLarge(usize),

    /// A fresh token could not be minted.
    Token(TokenError),

    /// The notification broker is gone.
    Notifier(BrokerError),

    /// Store error occurred.
    Database(String),
}

impl fmt::Display for SigninError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "Malformed signin token"),
            Self::InvalidToken => write!(f, "Invalid signin token"),
            Self::AlreadyAuthenticated => {
                write!(f, "This signin request has already been authenticated")
            }
            Self::Pending => write!(f, "Signin request has not been confirmed over SSH yet"),
            Self::KeyTooLarge(len) => write!(f, "Public key is too large ({} bytes)", len),
            Self::Token(err) => write!(f, "{}", err),
            Self::Notifier(err) => write!(f, "{}", err),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for SigninError {}

/// Result type for signin request operations.
pub type SigninResult<T> = Result<T, SigninError>;

impl From<surrealdb::Error> for SigninError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<TokenError> for SigninError {
    fn from(err: TokenError) -> Self {
        Self::Token(err)
    }
}

impl From<BrokerError> for SigninError {
    fn from(err: BrokerError) -> Self {
        Self::Notifier(err)
    }
}

impl SigninError {
    /// True for failures caused by the client's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed
                | Self::InvalidToken
                | Self::AlreadyAuthenticated
                | Self::Pending
                | Self::KeyTooLarge(_)
        )
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Pending => StatusCode::CONFLICT,
            _ if self.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SigninError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "signin request failed");
            return (status, "There was an error signing you in").into_response();
        }

        let body = match self {
            // Collapse every authentication failure into one response body.
            Self::Malformed | Self::InvalidToken | Self::AlreadyAuthenticated => {
                "Invalid signin token".to_string()
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_failures_share_a_status() {
        assert_eq!(SigninError::Malformed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(SigninError::InvalidToken.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            SigninError::AlreadyAuthenticated.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_infra_failures_are_server_errors() {
        let err = SigninError::Token(TokenError::EntropySource("closed".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_client_error());

        let err = SigninError::Database("down".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_pending_is_conflict() {
        assert_eq!(SigninError::Pending.status(), StatusCode::CONFLICT);
    }
}
