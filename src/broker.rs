//! In-process publish/subscribe hub for authentication events.
//!
//! One spawned task owns the subscriber map. Every subscribe, unsubscribe and
//! publish travels through the same command queue and is applied in arrival
//! order, so a publish is seen by exactly the mailboxes registered before it.
//!
//! Mailboxes hold a single event and publish awaits each delivery in turn. A
//! consumer that stops reading while keeping its mailbox open therefore stalls
//! fan-out for everyone. This is a known availability risk with no recovery
//! path here; waiters either keep draining or drop their mailbox.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Number of undelivered events a mailbox may hold.
const MAILBOX_CAPACITY: usize = 1;

/// Opaque handle identifying one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors returned by the broker handle.
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// The owning task has stopped.
    Closed,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Notification broker is no longer running"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[derive(Debug)]
enum Command {
    Subscribe {
        reply: oneshot::Sender<(SubscriberId, mpsc::Receiver<String>)>,
    },
    Unsubscribe(SubscriberId),
    Publish(String),
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the broker task.
#[derive(Debug, Clone)]
pub struct Broker {
    commands: mpsc::UnboundedSender<Command>,
}

impl Broker {
    /// Spawn the owning task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime. The task exits once every
    /// handle (including those held by live subscriptions) has been dropped.
    pub fn spawn() -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(receiver));
        Self { commands }
    }

    /// Register a new mailbox.
    pub async fn subscribe(&self) -> Result<Subscription, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe { reply })
            .map_err(|_| BrokerError::Closed)?;
        let (id, events) = response.await.map_err(|_| BrokerError::Closed)?;

        Ok(Subscription {
            id,
            events,
            broker: self.clone(),
        })
    }

    /// Remove a mailbox. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        // A stopped broker has no mailboxes left to remove.
        let _ = self.commands.send(Command::Unsubscribe(id));
    }

    /// Deliver `event` to every mailbox registered before this call.
    pub fn publish(&self, event: impl Into<String>) -> Result<(), BrokerError> {
        self.commands
            .send(Command::Publish(event.into()))
            .map_err(|_| BrokerError::Closed)
    }

    /// Number of currently registered mailboxes.
    pub async fn subscriber_count(&self) -> Result<usize, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Count { reply })
            .map_err(|_| BrokerError::Closed)?;
        response.await.map_err(|_| BrokerError::Closed)
    }
}

/// A registered mailbox. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    events: mpsc::Receiver<String>,
    broker: Broker,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the mailbox has been removed from the broker and
    /// every buffered event has been read.
    pub async fn recv(&mut self) -> Option<String> {
        self.events.recv().await
    }

    /// Remove this mailbox from the broker. Safe to call more than once.
    pub fn unsubscribe(&self) {
        self.broker.unsubscribe(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut next_id = 0u64;
    let mut mailboxes: HashMap<SubscriberId, mpsc::Sender<String>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Subscribe { reply } => {
                let id = SubscriberId(next_id);
                next_id += 1;
                let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
                // The caller may have given up waiting for its handle.
                if reply.send((id, receiver)).is_ok() {
                    mailboxes.insert(id, sender);
                    trace!(subscriber = %id, "mailbox registered");
                }
            }
            Command::Unsubscribe(id) => {
                if mailboxes.remove(&id).is_some() {
                    trace!(subscriber = %id, "mailbox removed");
                }
            }
            Command::Publish(event) => {
                let mut closed = Vec::new();
                for (id, mailbox) in &mailboxes {
                    if mailbox.send(event.clone()).await.is_err() {
                        closed.push(*id);
                    }
                }
                for id in closed {
                    mailboxes.remove(&id);
                }
                trace!(subscribers = mailboxes.len(), "event published");
            }
            Command::Count { reply } => {
                let _ = reply.send(mailboxes.len());
            }
        }
    }

    debug!("notification broker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscriber_receives_event_once() {
        let broker = Broker::spawn();
        let mut sub = broker.subscribe().await.unwrap();

        broker.publish("ybndrfg8ejkm").unwrap();
        broker.publish("marker").unwrap();

        assert_eq!(sub.recv().await.as_deref(), Some("ybndrfg8ejkm"));
        assert_eq!(sub.recv().await.as_deref(), Some("marker"));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_event() {
        let broker = Broker::spawn();
        broker.publish("early").unwrap();

        let mut sub = broker.subscribe().await.unwrap();
        broker.publish("late").unwrap();

        assert_eq!(sub.recv().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let broker = Broker::spawn();
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();
        assert_ne!(a.id(), b.id());

        broker.publish("event").unwrap();

        assert_eq!(a.recv().await.as_deref(), Some("event"));
        assert_eq!(b.recv().await.as_deref(), Some("event"));
    }

    #[tokio::test]
    async fn test_unsubscribed_mailbox_never_receives() {
        let broker = Broker::spawn();
        let mut sub = broker.subscribe().await.unwrap();

        sub.unsubscribe();
        broker.publish("event").unwrap();

        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broker = Broker::spawn();
        let sub = broker.subscribe().await.unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        broker.unsubscribe(SubscriberId::from_raw(999));
        broker.unsubscribe(SubscriberId::from_raw(999));
        drop(sub);

        assert_eq!(broker.subscriber_count().await.unwrap(), 0);

        let mut fresh = broker.subscribe().await.unwrap();
        broker.publish("still works").unwrap();
        assert_eq!(fresh.recv().await.as_deref(), Some("still works"));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broker = Broker::spawn();
        let sub = broker.subscribe().await.unwrap();
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);

        drop(sub);
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_completes() {
        let broker = Broker::spawn();
        broker.publish("nobody listening").unwrap();

        let mut sub = broker.subscribe().await.unwrap();
        broker.publish("next").unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some("next"));
    }
}
