//! Topic-keyed publish/subscribe fan-out of player events.
//!
//! Every subscriber owns a bounded channel. Publishing waits for room in each
//! matching subscriber's buffer, so a subscriber that stops reading holds up
//! publishers on its topic until it reads again or unsubscribes.
//!
//! Subscriber contract: keep reading, and when done call
//! [`EventBus::unsubscribe`], which closes the channel (waking any blocked
//! publisher) and drains whatever was buffered. Dropping a [`Subscription`]
//! closes it as well; the registry entry is pruned on the next publish.

use std::sync::atomic::{AtomicU64, Ordering};

use rankwatch_db::PlayerId;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    GotOnline,
    GotOffline,
    PlayerAdded,
    PlayerUpdated,
    UsernameChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameChange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    GotOnline(PlayerId),
    GotOffline(PlayerId),
    PlayerAdded(PlayerId),
    PlayerUpdated(PlayerId),
    UsernameChanged(UsernameChange),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::GotOnline(_) => Topic::GotOnline,
            Event::GotOffline(_) => Topic::GotOffline,
            Event::PlayerAdded(_) => Topic::PlayerAdded,
            Event::PlayerUpdated(_) => Topic::PlayerUpdated,
            Event::UsernameChanged(_) => Topic::UsernameChanged,
        }
    }

    /// Player id carried by presence and identity events.
    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Event::GotOnline(id)
            | Event::GotOffline(id)
            | Event::PlayerAdded(id)
            | Event::PlayerUpdated(id) => Some(*id),
            Event::UsernameChanged(_) => None,
        }
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    tx: mpsc::Sender<Event>,
}

/// Receiving end of one subscription.
pub struct Subscription {
    id: u64,
    topic: Topic,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .write()
            .await
            .push(Subscriber { id, topic, tx });
        debug!(id, ?topic, "subscribed");
        Subscription { id, topic, rx }
    }

    /// Remove a subscription and drain its buffer. Safe to call while
    /// publishes are in flight. Returns the number of drained events.
    pub async fn unsubscribe(&self, mut subscription: Subscription) -> usize {
        self.subscribers
            .write()
            .await
            .retain(|s| s.id != subscription.id);

        subscription.rx.close();
        let mut drained = 0;
        while subscription.rx.try_recv().is_ok() {
            drained += 1;
        }

        debug!(id = subscription.id, drained, "unsubscribed");
        drained
    }

    /// Deliver `event` to every subscriber of its topic, waiting for buffer
    /// space where needed. Returns how many subscribers received it.
    pub async fn publish(&self, event: Event) -> usize {
        let topic = event.topic();
        let targets: Vec<(u64, mpsc::Sender<Event>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| (s.id, s.tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.send(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .write()
                .await
                .retain(|s| !closed.contains(&s.id));
        }

        trace!(?topic, delivered, "published event");
        delivered
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let bus = EventBus::new(4);
        let mut first = bus.subscribe(Topic::GotOnline).await;
        let mut second = bus.subscribe(Topic::GotOnline).await;

        assert_eq!(bus.publish(Event::GotOnline(7)).await, 2);

        assert_eq!(first.recv().await, Some(Event::GotOnline(7)));
        assert_eq!(second.recv().await, Some(Event::GotOnline(7)));
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new(4);
        let mut online = bus.subscribe(Topic::GotOnline).await;
        let mut renames = bus.subscribe(Topic::UsernameChanged).await;

        bus.publish(Event::GotOffline(1)).await;
        bus.publish(Event::UsernameChanged(UsernameChange {
            from: "alice".to_string(),
            to: "alice2".to_string(),
        }))
        .await;

        assert!(online.try_recv().is_none());
        let event = renames.recv().await.unwrap();
        assert_eq!(event.topic(), Topic::UsernameChanged);
        assert_eq!(event.player_id(), None);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(Event::PlayerAdded(1)).await, 0);
    }

    #[tokio::test]
    async fn test_full_subscriber_blocks_publisher() {
        let bus = EventBus::new(1);
        let mut sub = bus.subscribe(Topic::PlayerUpdated).await;

        bus.publish(Event::PlayerUpdated(1)).await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), bus.publish(Event::PlayerUpdated(2)))
                .await;
        assert!(blocked.is_err());

        assert_eq!(sub.recv().await, Some(Event::PlayerUpdated(1)));
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_blocked_publisher() {
        let bus = Arc::new(EventBus::new(1));
        let sub = bus.subscribe(Topic::GotOffline).await;

        bus.publish(Event::GotOffline(1)).await;
        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::GotOffline(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let drained = bus.unsubscribe(sub).await;
        assert!(drained >= 1);

        let delivered = tokio::time::timeout(Duration::from_secs(1), publisher)
            .await
            .expect("publisher should be released")
            .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(bus.subscriber_count(Topic::GotOffline).await, 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = EventBus::new(1);
        let sub = bus.subscribe(Topic::GotOnline).await;
        drop(sub);

        assert_eq!(bus.publish(Event::GotOnline(3)).await, 0);
        assert_eq!(bus.subscriber_count(Topic::GotOnline).await, 0);
    }
}
