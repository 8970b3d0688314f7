//! Browser sessions issued after a completed signin.
//!
//! Session tokens follow the same split-token discipline as signin tokens:
//! the 8 character id finds the row and the 40 character secret is compared
//! in constant time. Every failure to resolve a presented token collapses to
//! [`SessionError::InvalidSession`].

use tracing::{debug, info};

use crate::auth::{SessionError, SessionResult};
use crate::db::{Db, SessionRecord};
use crate::token::{CSRF_TOKEN_LEN, TokenShape, constant_time_eq, generate};
use crate::types::{SessionId, UserId};
use crate::utils::unix_now;

/// Sessions idle for longer than this are invalid and swept.
pub const SESSION_TTL_SECS: i64 = 20 * 24 * 60 * 60;

/// A resolved session. Holds secrets, so it is not `Debug`.
#[derive(Clone)]
pub struct Session {
    user_id: UserId,
    id: SessionId,
    secret: String,
    csrf_token: String,
    last_active: i64,
}

impl Session {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Value stored in the `session` cookie: `id || secret`.
    pub fn token(&self) -> String {
        format!("{}{}", self.id, self.secret)
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn last_active(&self) -> i64 {
        self.last_active
    }

    fn from_record(record: SessionRecord) -> Self {
        Self {
            user_id: UserId::new(record.user_id),
            id: SessionId::new(record.session_id),
            secret: record.session_secret,
            csrf_token: record.csrf_token,
            last_active: record.last_active,
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    db: Db,
}

impl SessionManager {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Issue a new session for `user_id`.
    pub async fn create(&self, user_id: &UserId) -> SessionResult<Session> {
        self.create_at(user_id, unix_now()).await
    }

    pub(crate) async fn create_at(&self, user_id: &UserId, now: i64) -> SessionResult<Session> {
        let (id, secret) = TokenShape::SESSION.generate()?;
        let csrf_token = generate(CSRF_TOKEN_LEN)?;

        let query = r#"
            CREATE user_session CONTENT {
                user_id: $user_id,
                session_id: $session_id,
                session_secret: $session_secret,
                csrf_token: $csrf_token,
                last_active: $last_active
            }
        "#;

        self.db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .bind(("session_id", id.clone()))
            .bind(("session_secret", secret.clone()))
            .bind(("csrf_token", csrf_token.clone()))
            .bind(("last_active", now))
            .await?
            .check()?;

        info!(user_id = %user_id, session_id = %id, "session created");

        Ok(Session {
            user_id: user_id.clone(),
            id: SessionId::new(id),
            secret,
            csrf_token,
            last_active: now,
        })
    }

    /// Resolve a presented session token.
    pub async fn validate(&self, token: &str) -> SessionResult<Session> {
        let (id, secret) = TokenShape::SESSION
            .split(token)
            .ok_or(SessionError::InvalidSession)?;

        let query = r#"
            SELECT * FROM user_session
            WHERE session_id = $session_id
              AND last_active >= $cutoff
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("session_id", id.to_string()))
            .bind(("cutoff", unix_now() - SESSION_TTL_SECS))
            .await?;

        let rows: Vec<SessionRecord> = res.take(0)?;
        rows.into_iter()
            .find(|row| constant_time_eq(secret, &row.session_secret))
            .map(Session::from_record)
            .ok_or_else(|| {
                debug!(session_id = %id, "presented session token did not resolve");
                SessionError::InvalidSession
            })
    }

    /// Record activity on the session. Tokens are left unchanged.
    pub async fn touch(&self, session: &mut Session) -> SessionResult<()> {
        let now = unix_now();

        let query = r#"
            UPDATE user_session SET last_active = $now
            WHERE session_id = $session_id
              AND session_secret = $session_secret
        "#;

        self.db
            .query(query)
            .bind(("now", now))
            .bind(("session_id", session.id.to_string()))
            .bind(("session_secret", session.secret.clone()))
            .await?
            .check()?;

        session.last_active = now;
        Ok(())
    }

    /// Delete the session row.
    pub async fn revoke(&self, session: &Session) -> SessionResult<()> {
        let query = r#"
            DELETE user_session
            WHERE session_id = $session_id
              AND session_secret = $session_secret
        "#;

        self.db
            .query(query)
            .bind(("session_id", session.id.to_string()))
            .bind(("session_secret", session.secret.clone()))
            .await?
            .check()?;

        info!(session_id = %session.id, "session revoked");
        Ok(())
    }

    /// Reject a mutating request whose CSRF token is not the session's.
    pub fn check_csrf(&self, session: &Session, provided: &str) -> SessionResult<()> {
        if constant_time_eq(provided, &session.csrf_token) {
            Ok(())
        } else {
            Err(SessionError::InvalidCsrf)
        }
    }

    /// Remove sessions last active before `now - SESSION_TTL_SECS`.
    pub async fn delete_inactive(&self, now: i64) -> SessionResult<usize> {
        let query = r#"
            DELETE user_session
            WHERE last_active < $cutoff
            RETURN BEFORE
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("cutoff", now - SESSION_TTL_SECS))
            .await?;

        let deleted: Vec<SessionRecord> = res.take(0)?;
        Ok(deleted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    const DAY: i64 = 24 * 60 * 60;

    async fn setup_manager() -> SessionManager {
        SessionManager::new(test_db().await)
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let sessions = setup_manager().await;
        let user = UserId::new("user-1");

        let session = sessions.create(&user).await.unwrap();
        assert_eq!(session.token().len(), 48);
        assert_eq!(session.csrf_token().len(), CSRF_TOKEN_LEN);

        let found = sessions.validate(&session.token()).await.unwrap();
        assert_eq!(found.user_id(), &user);
        assert_eq!(found.id(), session.id());
        assert_eq!(found.csrf_token(), session.csrf_token());
    }

    #[tokio::test]
    async fn test_validate_failures_collapse() {
        let sessions = setup_manager().await;
        let session = sessions.create(&UserId::new("user-1")).await.unwrap();

        let wrong_secret = format!("{}{}", session.id(), "y".repeat(40));
        let unknown = "y".repeat(48);

        for token in ["short", unknown.as_str(), wrong_secret.as_str()] {
            let err = sessions.validate(token).await.err().unwrap();
            assert!(matches!(err, SessionError::InvalidSession), "token {}", token);
        }
    }

    #[tokio::test]
    async fn test_expired_session_is_invalid() {
        let sessions = setup_manager().await;
        let session = sessions
            .create_at(&UserId::new("user-1"), unix_now() - 21 * DAY)
            .await
            .unwrap();

        let err = sessions.validate(&session.token()).await.err().unwrap();
        assert!(matches!(err, SessionError::InvalidSession));
    }

    #[tokio::test]
    async fn test_touch_extends_activity_only() {
        let sessions = setup_manager().await;
        let mut session = sessions
            .create_at(&UserId::new("user-1"), unix_now() - DAY)
            .await
            .unwrap();
        let before = session.last_active();
        let token = session.token();
        let csrf = session.csrf_token().to_string();

        sessions.touch(&mut session).await.unwrap();

        let found = sessions.validate(&token).await.unwrap();
        assert!(found.last_active() > before);
        assert_eq!(found.token(), token);
        assert_eq!(found.csrf_token(), csrf);
        assert_eq!(session.last_active(), found.last_active());
    }

    #[tokio::test]
    async fn test_revoke() {
        let sessions = setup_manager().await;
        let session = sessions.create(&UserId::new("user-1")).await.unwrap();

        sessions.revoke(&session).await.unwrap();
        assert!(sessions.validate(&session.token()).await.is_err());
    }

    #[tokio::test]
    async fn test_check_csrf() {
        let sessions = setup_manager().await;
        let session = sessions.create(&UserId::new("user-1")).await.unwrap();

        assert!(sessions.check_csrf(&session, session.csrf_token()).is_ok());
        let err = sessions.check_csrf(&session, "forged").unwrap_err();
        assert!(matches!(err, SessionError::InvalidCsrf));
    }

    #[tokio::test]
    async fn test_delete_inactive() {
        let sessions = setup_manager().await;
        let now = unix_now();
        let stale = sessions
            .create_at(&UserId::new("user-1"), now - 21 * DAY)
            .await
            .unwrap();
        let fresh = sessions
            .create_at(&UserId::new("user-1"), now - DAY)
            .await
            .unwrap();

        assert_eq!(sessions.delete_inactive(now).await.unwrap(), 1);
        assert!(sessions.validate(&fresh.token()).await.is_ok());
        assert!(sessions.validate(&stale.token()).await.is_err());
    }
}
