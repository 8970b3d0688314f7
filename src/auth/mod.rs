//! Sessions and users.
//!
//! Once a signin request has been consumed, the captured public key is
//! resolved to a [`User`] and a [`Session`] is issued. The browser carries the
//! session token in the `session` cookie and echoes the session's CSRF token
//! in the `csrf_token` form field of every mutating request.

pub mod cookie;
mod error;
mod session;
mod user_store;

pub use cookie::{SESSION_COOKIE, clear_session_cookie, session_cookie, session_token_from_headers};
pub use error::{SessionError, SessionResult};
pub use session::{SESSION_TTL_SECS, Session, SessionManager};
pub use user_store::{User, UserStore};
