//! Pending signin requests.
//!
//! A request is created when a browser asks to sign in, receives a public key
//! exactly once from the SSH capture path, and is removed either by
//! [`SigninRequestStore::consume`] or by the sweeper once it is older than
//! [`SIGNIN_TTL_SECS`].

use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::db::{Db, SigninRequestRecord};
use crate::signin::{SigninError, SigninResult};
use crate::token::{TokenShape, constant_time_eq};
use crate::types::SigninId;
use crate::utils::{decode_pubkey, encode_pubkey, unix_now};

/// Requests older than this are treated as gone, whether or not a key was captured.
pub const SIGNIN_TTL_SECS: i64 = 10 * 60;

/// Largest public key blob accepted from an SSH client.
pub const MAX_PUBKEY_LEN: usize = 10_000;

/// A live signin request as seen by callers of the store.
#[derive(Clone)]
pub struct SigninRequest {
    id: SigninId,
    secret: String,
    pubkey: Option<Vec<u8>>,
}

impl SigninRequest {
    pub fn id(&self) -> &SigninId {
        &self.id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The full opaque token handed to the browser: `id || secret`.
    pub fn token(&self) -> String {
        format!("{}{}", self.id, self.secret)
    }

    pub fn pubkey(&self) -> Option<&[u8]> {
        self.pubkey.as_deref()
    }

    /// A request is authenticated once a public key has been captured for it.
    pub fn is_authenticated(&self) -> bool {
        self.pubkey.is_some()
    }

    fn from_record(record: SigninRequestRecord) -> SigninResult<Self> {
        let pubkey = record
            .pubkey
            .as_deref()
            .map(decode_pubkey)
            .transpose()
            .map_err(|e| SigninError::Database(format!("corrupt stored public key: {}", e)))?;

        Ok(Self {
            id: SigninId::new(record.signin_id),
            secret: record.signin_secret,
            pubkey,
        })
    }
}

/// Outcome of a successful [`SigninRequestStore::record_pubkey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// The key was written and waiters were notified.
    Stored,
    /// The request already held this exact key; nothing changed.
    Unchanged,
}

/// Store for pending signin requests.
#[derive(Clone)]
pub struct SigninRequestStore {
    db: Db,
    broker: Broker,
}

impl SigninRequestStore {
    /// Create a new signin request store.
    pub fn new(db: Db, broker: Broker) -> Self {
        Self { db, broker }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Mint a fresh request with no key captured yet.
    pub async fn create(&self) -> SigninResult<SigninRequest> {
        let (id, secret) = TokenShape::SIGNIN.generate()?;
        let request = self.insert(&id, &secret, None, unix_now()).await?;
        info!(signin_id = %request.id, "signin request created");
        Ok(request)
    }

    /// Mint a request that already carries `pubkey`.
    ///
    /// Used when the user starts over SSH: the capture server hands back a URL
    /// containing the new token and the browser only has to finalize it.
    pub async fn create_authenticated(&self, pubkey: &[u8]) -> SigninResult<SigninRequest> {
        check_key_size(pubkey)?;
        let (id, secret) = TokenShape::SIGNIN.generate()?;
        let request = self.insert(&id, &secret, Some(pubkey), unix_now()).await?;
        info!(signin_id = %request.id, "authenticated signin request created over SSH");
        Ok(request)
    }

    pub(crate) async fn insert(
        &self,
        id: &str,
        secret: &str,
        pubkey: Option<&[u8]>,
        created_at: i64,
    ) -> SigninResult<SigninRequest> {
        let query = r#"
            CREATE signin_request CONTENT {
                signin_id: $signin_id,
                signin_secret: $signin_secret,
                pubkey: $pubkey,
                created_at: $created_at
            }
        "#;

        self.db
            .query(query)
            .bind(("signin_id", id.to_string()))
            .bind(("signin_secret", secret.to_string()))
            .bind(("pubkey", pubkey.map(encode_pubkey)))
            .bind(("created_at", created_at))
            .await?
            .check()?;

        Ok(SigninRequest {
            id: SigninId::new(id),
            secret: secret.to_string(),
            pubkey: pubkey.map(<[u8]>::to_vec),
        })
    }

    /// Find the live request for `id` whose secret equals `provided_secret`.
    ///
    /// Unknown ids, wrong secrets and expired requests all yield `None`.
    pub async fn lookup(
        &self,
        id: &str,
        provided_secret: &str,
    ) -> SigninResult<Option<SigninRequest>> {
        let cutoff = unix_now() - SIGNIN_TTL_SECS;

        let query = r#"
            SELECT * FROM signin_request
            WHERE signin_id = $signin_id
              AND created_at >= $cutoff
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("signin_id", id.to_string()))
            .bind(("cutoff", cutoff))
            .await?;

        let rows: Vec<SigninRequestRecord> = res.take(0)?;
        let matching = rows
            .into_iter()
            .find(|row| constant_time_eq(provided_secret, &row.signin_secret));

        match matching {
            Some(record) => Ok(Some(SigninRequest::from_record(record)?)),
            None => {
                debug!(signin_id = %id, "no live signin request for presented token");
                Ok(None)
            }
        }
    }

    /// Resolve a full `id || secret` token.
    pub async fn lookup_token(&self, token: &str) -> SigninResult<Option<SigninRequest>> {
        let (id, secret) = TokenShape::SIGNIN
            .split(token)
            .ok_or(SigninError::Malformed)?;
        self.lookup(id, secret).await
    }

    /// Attach a captured public key to a pending request and wake its waiters.
    ///
    /// Submitting the same key again is a no-op. A different key after the
    /// first one fails with `AlreadyAuthenticated`. A request that has been
    /// swept or consumed, before or during the call, is left untouched and
    /// reported as `InvalidToken`; nothing is published in that case.
    pub async fn record_pubkey(
        &self,
        id: &str,
        secret: &str,
        pubkey: &[u8],
    ) -> SigninResult<Recorded> {
        check_key_size(pubkey)?;

        let request = self
            .lookup(id, secret)
            .await?
            .ok_or(SigninError::InvalidToken)?;
        if let Some(existing) = request.pubkey() {
            return compare_existing(existing, pubkey);
        }

        let query = r#"
            UPDATE signin_request SET pubkey = $pubkey
            WHERE signin_id = $signin_id
              AND signin_secret = $signin_secret
              AND pubkey = NONE
            RETURN AFTER
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("pubkey", encode_pubkey(pubkey)))
            .bind(("signin_id", id.to_string()))
            .bind(("signin_secret", secret.to_string()))
            .await?;

        let updated: Vec<SigninRequestRecord> = res.take(0)?;
        if updated.is_empty() {
            // Someone else got there between our read and the update.
            return match self.lookup(id, secret).await? {
                Some(current) => match current.pubkey() {
                    Some(existing) => compare_existing(existing, pubkey),
                    None => Err(SigninError::InvalidToken),
                },
                None => Err(SigninError::InvalidToken),
            };
        }

        info!(signin_id = %id, "public key captured for signin request");

        if let Err(err) = self.broker.publish(request.token()) {
            warn!(signin_id = %id, error = %err, "could not notify signin waiters");
        }

        Ok(Recorded::Stored)
    }

    /// Delete an authenticated request and hand back its captured key.
    ///
    /// Only one caller can ever observe the deletion of a given row, so the
    /// key is returned at most once per request. Requests without a key are
    /// left in place and reported as `Pending`.
    pub async fn consume(&self, id: &str, secret: &str) -> SigninResult<Vec<u8>> {
        let request = self
            .lookup(id, secret)
            .await?
            .ok_or(SigninError::InvalidToken)?;
        if !request.is_authenticated() {
            return Err(SigninError::Pending);
        }

        let query = r#"
            DELETE signin_request
            WHERE signin_id = $signin_id
              AND signin_secret = $signin_secret
              AND pubkey != NONE
            RETURN BEFORE
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("signin_id", id.to_string()))
            .bind(("signin_secret", secret.to_string()))
            .await?;

        let deleted: Vec<SigninRequestRecord> = res.take(0)?;
        let record = deleted.into_iter().next().ok_or(SigninError::InvalidToken)?;
        let consumed = SigninRequest::from_record(record)?;

        info!(signin_id = %id, "signin request consumed");

        consumed.pubkey.ok_or(SigninError::InvalidToken)
    }

    /// Remove every request created before `now - SIGNIN_TTL_SECS`.
    pub async fn delete_expired(&self, now: i64) -> SigninResult<usize> {
        let query = r#"
            DELETE signin_request
            WHERE created_at < $cutoff
            RETURN BEFORE
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("cutoff", now - SIGNIN_TTL_SECS))
            .await?;

        let deleted: Vec<SigninRequestRecord> = res.take(0)?;
        Ok(deleted.len())
    }
}

fn check_key_size(pubkey: &[u8]) -> SigninResult<()> {
    if pubkey.len() > MAX_PUBKEY_LEN {
        return Err(SigninError::KeyTooLarge(pubkey.len()));
    }
    Ok(())
}

fn compare_existing(existing: &[u8], offered: &[u8]) -> SigninResult<Recorded> {
    use subtle::ConstantTimeEq;

    if bool::from(existing.ct_eq(offered)) {
        Ok(Recorded::Unchanged)
    } else {
        Err(SigninError::AlreadyAuthenticated)
    }
}
