//! Waiting for a signin request to be confirmed over SSH.
//!
//! The browser holds an event stream open per signin token. The waiter
//! registers with the broker before it reads the store, so a key captured in
//! between is either already visible in the row or arrives as an event.

use futures_util::Stream;
use futures_util::stream;
use tracing::debug;

use crate::broker::Subscription;
use crate::signin::{SigninError, SigninRequestStore, SigninResult};
use crate::token::{TokenShape, constant_time_eq};

/// What happens to the stream after the first confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaiterMode {
    /// Emit one confirmation, then end the stream.
    #[default]
    Once,
    /// Keep the stream open after the first confirmation.
    KeepListening,
}

/// A confirmation that the watched signin request has a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authenticated;

#[derive(Clone)]
pub struct ConfirmationWaiter {
    store: SigninRequestStore,
    mode: WaiterMode,
}

impl ConfirmationWaiter {
    pub fn new(store: SigninRequestStore, mode: WaiterMode) -> Self {
        Self { store, mode }
    }

    /// Start watching `token`.
    ///
    /// Fails with `Malformed` for tokens of the wrong shape and `InvalidToken`
    /// when no live request matches. Both checks happen before any event is
    /// produced.
    pub async fn wait(&self, token: &str) -> SigninResult<AuthenticationEvents> {
        let (id, secret) = TokenShape::SIGNIN
            .split(token)
            .ok_or(SigninError::Malformed)?;

        let subscription = self.store.broker().subscribe().await?;

        let request = self
            .store
            .lookup(id, secret)
            .await?
            .ok_or(SigninError::InvalidToken)?;

        debug!(
            signin_id = %request.id(),
            subscriber = %subscription.id(),
            authenticated = request.is_authenticated(),
            "waiting for signin confirmation"
        );

        Ok(AuthenticationEvents {
            token: token.to_string(),
            subscription: Some(subscription),
            immediate: request.is_authenticated(),
            mode: self.mode,
        })
    }
}

/// Confirmations for one signin token.
///
/// Dropping this value removes its broker mailbox.
pub struct AuthenticationEvents {
    token: String,
    subscription: Option<Subscription>,
    immediate: bool,
    mode: WaiterMode,
}

impl AuthenticationEvents {
    /// Next confirmation, or `None` once the stream is finished.
    pub async fn next(&mut self) -> Option<Authenticated> {
        if self.immediate {
            self.immediate = false;
            self.after_emit();
            return Some(Authenticated);
        }

        loop {
            let event = self.subscription.as_mut()?.recv().await;
            match event {
                Some(published) if constant_time_eq(&published, &self.token) => {
                    self.after_emit();
                    return Some(Authenticated);
                }
                Some(_) => continue,
                None => {
                    self.subscription = None;
                    return None;
                }
            }
        }
    }

    fn after_emit(&mut self) {
        if self.mode == WaiterMode::Once {
            // dropping the subscription unsubscribes
            self.subscription = None;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Authenticated> + Send {
        stream::unfold(self, |mut events| async move {
            let item = events.next().await?;
            Some((item, events))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::db::test_db;
    use futures_util::StreamExt;
    use std::time::Duration;

    const KEY: &[u8] = b"\x00\x00\x00\x0bssh-ed25519 waiter";

    async fn setup(mode: WaiterMode) -> (SigninRequestStore, ConfirmationWaiter) {
        let store = SigninRequestStore::new(test_db().await, Broker::spawn());
        let waiter = ConfirmationWaiter::new(store.clone(), mode);
        (store, waiter)
    }

    async fn assert_silent(events: &mut AuthenticationEvents) {
        let pending = tokio::time::timeout(Duration::from_millis(100), events.next()).await;
        assert!(pending.is_err(), "expected no confirmation");
    }

    #[tokio::test]
    async fn test_malformed_token_rejected_before_subscribing() {
        let (store, waiter) = setup(WaiterMode::Once).await;

        let err = waiter.wait("abc").await.err().unwrap();
        assert!(matches!(err, SigninError::Malformed));
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (store, waiter) = setup(WaiterMode::Once).await;

        let err = waiter.wait("ybndrfg8ejkm").await.err().unwrap();
        assert!(matches!(err, SigninError::InvalidToken));
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_already_authenticated_emits_immediately() {
        let (store, waiter) = setup(WaiterMode::Once).await;
        let request = store.create_authenticated(KEY).await.unwrap();

        let mut events = waiter.wait(&request.token()).await.unwrap();
        assert_eq!(events.next().await, Some(Authenticated));
        assert_eq!(events.next().await, None);
    }

    #[tokio::test]
    async fn test_pending_request_waits_for_key() {
        let (store, waiter) = setup(WaiterMode::Once).await;
        let request = store.create().await.unwrap();

        let mut events = waiter.wait(&request.token()).await.unwrap();
        assert_silent(&mut events).await;

        store
            .record_pubkey(request.id().as_str(), request.secret(), KEY)
            .await
            .unwrap();

        assert_eq!(events.next().await, Some(Authenticated));
        assert_eq!(events.next().await, None);
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_tokens_are_ignored() {
        let (store, waiter) = setup(WaiterMode::Once).await;
        let watched = store.create().await.unwrap();
        let other = store.create().await.unwrap();

        let mut events = waiter.wait(&watched.token()).await.unwrap();
        store
            .record_pubkey(other.id().as_str(), other.secret(), KEY)
            .await
            .unwrap();
        assert_silent(&mut events).await;
    }

    #[tokio::test]
    async fn test_keep_listening_stays_open() {
        let (store, waiter) = setup(WaiterMode::KeepListening).await;
        let request = store.create_authenticated(KEY).await.unwrap();

        let mut events = waiter.wait(&request.token()).await.unwrap();
        assert_eq!(events.next().await, Some(Authenticated));
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 1);

        store.broker().publish(request.token()).unwrap();
        assert_eq!(events.next().await, Some(Authenticated));
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let (store, waiter) = setup(WaiterMode::Once).await;
        let request = store.create().await.unwrap();

        let events = waiter.wait(&request.token()).await.unwrap();
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 1);

        let stream = events.into_stream();
        drop(stream);
        assert_eq!(store.broker().subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_yields_single_confirmation() {
        let (store, waiter) = setup(WaiterMode::Once).await;
        let request = store.create_authenticated(KEY).await.unwrap();

        let events = waiter.wait(&request.token()).await.unwrap();
        let collected: Vec<_> = events.into_stream().collect().await;
        assert_eq!(collected, vec![Authenticated]);
    }
}
