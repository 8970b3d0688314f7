//! Persisted row shapes.
//!
//! Timestamps are Unix seconds. Public keys are stored base64-encoded in SSH
//! wire format. Rows that carry secrets deliberately do not derive `Debug`.

use serde::{Deserialize, Serialize};
use surrealdb::RecordId;

/// A pending signin attempt (table: `signin_request`).
#[derive(Clone, Serialize, Deserialize)]
pub struct SigninRequestRecord {
    pub id: RecordId,
    /// Public half of the signin token.
    pub signin_id: String,
    /// Secret half of the signin token.
    pub signin_secret: String,
    /// Captured public key, set once by the SSH capture path.
    #[serde(default)]
    pub pubkey: Option<String>,
    pub created_at: i64,
}

/// A browser session (table: `user_session`).
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: RecordId,
    pub user_id: String,
    pub session_id: String,
    pub session_secret: String,
    /// Bound to the session for its whole life; never rotated.
    pub csrf_token: String,
    pub last_active: i64,
}

/// A user, created on the first signin with an unseen key (table: `user`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: RecordId,
    pub user_id: String,
    pub pubkey: String,
    pub created_at: i64,
}
