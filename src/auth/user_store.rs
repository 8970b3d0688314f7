//! User storage and management.
//!
//! Users are keyed by public key. The unique index on `user.pubkey` is what
//! guarantees a single user per key when two signins for an unseen key race.

use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Db;
use crate::db::schema::UserRecord;
use crate::types::{Fingerprint, UserId};
use crate::utils::{decode_pubkey, encode_pubkey, fingerprint, unix_now};

/// A user as seen by handlers.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub pubkey: Vec<u8>,
    pub created_at: i64,
}

impl User {
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint(&self.pubkey)
    }

    fn from_record(record: UserRecord) -> Result<Self> {
        let pubkey = decode_pubkey(&record.pubkey)
            .with_context(|| format!("corrupt public key for user {}", record.user_id))?;
        Ok(Self {
            id: UserId::new(record.user_id),
            pubkey,
            created_at: record.created_at,
        })
    }
}

/// User store for database operations.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    /// Create a new user store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Find the user owning `pubkey`, creating one on first sight.
    pub async fn resolve_or_create(&self, pubkey: &[u8]) -> Result<User> {
        if let Some(user) = self.get_user_by_pubkey(pubkey).await? {
            return Ok(user);
        }

        let query = r#"
            CREATE user CONTENT {
                user_id: $user_id,
                pubkey: $pubkey,
                created_at: $created_at
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", Uuid::new_v4().to_string()))
            .bind(("pubkey", encode_pubkey(pubkey)))
            .bind(("created_at", unix_now()))
            .await?;

        let created: Result<Vec<UserRecord>, surrealdb::Error> = res.take(0);
        match created {
            Ok(users) => {
                let record = users
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Failed to create user"))?;
                let user = User::from_record(record)?;
                info!(user_id = %user.id, fingerprint = %user.fingerprint(), "user created");
                Ok(user)
            }
            Err(err) => {
                // Lost the race on the unique pubkey index; the winner's row is ours.
                debug!(error = %err, "user insert conflicted, re-reading");
                self.get_user_by_pubkey(pubkey)
                    .await?
                    .ok_or_else(|| anyhow::Error::new(err).context("creating user"))
            }
        }
    }

    /// Get a user by public key.
    pub async fn get_user_by_pubkey(&self, pubkey: &[u8]) -> Result<Option<User>> {
        let query = "SELECT * FROM user WHERE pubkey = $pubkey LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("pubkey", encode_pubkey(pubkey)))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        users.into_iter().next().map(User::from_record).transpose()
    }

    /// Get a user by id.
    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let query = "SELECT * FROM user WHERE user_id = $user_id LIMIT 1";

        let mut res = self
            .db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        users.into_iter().next().map(User::from_record).transpose()
    }

    /// Delete a user together with every session they hold.
    pub async fn delete_user(&self, user_id: &UserId) -> Result<()> {
        let query = r#"
            BEGIN TRANSACTION;
            DELETE user WHERE user_id = $user_id;
            DELETE user_session WHERE user_id = $user_id;
            COMMIT TRANSACTION;
        "#;

        self.db
            .query(query)
            .bind(("user_id", user_id.to_string()))
            .await?
            .check()
            .context("deleting user")?;

        info!(user_id = %user_id, "user deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionManager;
    use crate::db::test_db;

    const KEY_A: &[u8] = b"\x00\x00\x00\x0bssh-ed25519 user-a";
    const KEY_B: &[u8] = b"\x00\x00\x00\x0bssh-ed25519 user-b";

    #[tokio::test]
    async fn test_resolve_or_create_creates_new() {
        let store = UserStore::new(test_db().await);

        let user = store.resolve_or_create(KEY_A).await.unwrap();
        assert_eq!(user.pubkey, KEY_A);
        assert!(Uuid::parse_str(user.id.as_str()).is_ok());
        assert!(user.fingerprint().as_str().starts_with("SHA256:"));
    }

    #[tokio::test]
    async fn test_resolve_or_create_returns_existing() {
        let store = UserStore::new(test_db().await);

        let first = store.resolve_or_create(KEY_A).await.unwrap();
        let second = store.resolve_or_create(KEY_A).await.unwrap();
        let other = store.resolve_or_create(KEY_B).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_yields_one_user() {
        let store = UserStore::new(test_db().await);

        let (a, b) = tokio::join!(store.resolve_or_create(KEY_A), store.resolve_or_create(KEY_A));
        assert_eq!(a.unwrap().id, b.unwrap().id);
    }

    #[tokio::test]
    async fn test_get_user() {
        let store = UserStore::new(test_db().await);
        let user = store.resolve_or_create(KEY_A).await.unwrap();

        let found = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(found.pubkey, KEY_A);
        assert!(store.get_user(&UserId::new("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_user_removes_sessions() {
        let db = test_db().await;
        let store = UserStore::new(db.clone());
        let sessions = SessionManager::new(db);

        let user = store.resolve_or_create(KEY_A).await.unwrap();
        let session = sessions.create(&user.id).await.unwrap();

        store.delete_user(&user.id).await.unwrap();

        assert!(store.get_user(&user.id).await.unwrap().is_none());
        assert!(sessions.validate(&session.token()).await.is_err());
    }
}
