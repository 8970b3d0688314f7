// Session cookie formatting and parsing

use chrono::{Duration, Utc};
use http::{HeaderMap, header};

use crate::auth::session::SESSION_TTL_SECS;

pub const SESSION_COOKIE: &str = "session";

/// `Set-Cookie` value carrying a session token, valid for the full session TTL.
pub fn session_cookie(token: &str) -> String {
    let expires = Utc::now() + Duration::seconds(SESSION_TTL_SECS);
    format!(
        "{}={}; Path=/; Expires={}; HttpOnly",
        SESSION_COOKIE,
        token,
        expires.format("%a, %d %b %Y %H:%M:%S GMT")
    )
}

/// `Set-Cookie` value that makes the browser drop its session cookie.
pub fn clear_session_cookie() -> String {
    format!("{}=; Path=/; Max-Age=0; HttpOnly", SESSION_COOKIE)
}

/// Extract the session token from the request's `Cookie` headers.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}
