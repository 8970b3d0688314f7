use std::fmt;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::auth::cookie::clear_session_cookie;
use crate::token::TokenError;

/// Errors that can occur while resolving or mutating a browser session.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// No session cookie was presented.
    NotSignedIn,
    /// Malformed token, unknown id, wrong secret or expired session.
    InvalidSession,
    /// The submitted CSRF token does not belong to the session.
    InvalidCsrf,
    /// A fresh token could not be minted.
    Token(TokenError),
    /// Store error occurred.
    Database(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSignedIn => write!(f, "Not signed in"),
            Self::InvalidSession => write!(f, "Invalid session token"),
            Self::InvalidCsrf => write!(f, "Invalid CSRF token"),
            Self::Token(err) => write!(f, "{}", err),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

impl From<surrealdb::Error> for SessionError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        Self::Token(err)
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            Self::NotSignedIn => (StatusCode::UNAUTHORIZED, self.to_string()).into_response(),
            // A stale cookie is dropped so the browser stops presenting it.
            Self::InvalidSession => (
                StatusCode::UNAUTHORIZED,
                [(header::SET_COOKIE, clear_session_cookie())],
                self.to_string(),
            )
                .into_response(),
            Self::InvalidCsrf => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            Self::Token(_) | Self::Database(_) => {
                tracing::error!(error = %self, "session operation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}
