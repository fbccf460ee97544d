//! Process-wide publish/subscribe for live message events.
//!
//! Delivery is best-effort and at-most-once to whoever is subscribed at the
//! moment of publishing; nothing is buffered for late subscribers. Each
//! subscriber sees a channel's events in publish order. A subscriber whose
//! queue fills up is cut off: it drains what was queued and then its stream
//! ends, so one stalled socket cannot grow memory without bound.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

pub type Payload = Arc<str>;

/// Payloads queued per subscriber before it counts as lagging.
pub const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    MessageCreated,
    MessageUpdated,
}

impl EventCategory {
    fn suffix(self) -> &'static str {
        match self {
            EventCategory::MessageCreated => "messages",
            EventCategory::MessageUpdated => "messages:update",
        }
    }
}

/// Address of a stream of events: `chat:<conversation or channel id>:<category>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(chat_id: &str, category: EventCategory) -> ChannelKey {
        ChannelKey(format!("chat:{chat_id}:{}", category.suffix()))
    }

    pub fn messages(chat_id: &str) -> ChannelKey {
        ChannelKey::new(chat_id, EventCategory::MessageCreated)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Subscriber {
    id: u64,
    sender: Sender<Payload>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    closed: bool,
    channels: HashMap<ChannelKey, Vec<Subscriber>>,
}

impl Registry {
    fn remove(&mut self, key: &ChannelKey, id: u64) {
        let Some(subscribers) = self.channels.get_mut(key) else {
            return;
        };
        subscribers.retain(|s| s.id != id);
        if subscribers.is_empty() {
            self.channels.remove(key);
        }
    }
}

/// Handle to the subscriber registry. Clones share the same registry.
#[derive(Clone, Default)]
pub struct FanoutBus {
    registry: Arc<Mutex<Registry>>,
}

impl FanoutBus {
    pub fn new() -> FanoutBus {
        FanoutBus::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener on `key`. The listener is removed when the
    /// returned [`Subscription`] is dropped.
    pub fn subscribe(&self, key: ChannelKey) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        // after shutdown the sender is dropped here, so the stream ends at once
        if !registry.closed {
            registry.channels.entry(key.clone()).or_default().push(Subscriber { id, sender });
            tracing::debug!(%key, subscriber = id, "subscribed");
        }

        Subscription {
            key,
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `payload` to every current subscriber of `key` and returns
    /// how many received it. Zero subscribers is not an error. Subscribers
    /// that are gone or whose queue is full are unregistered.
    pub fn publish(&self, key: &ChannelKey, payload: impl Into<Payload>) -> usize {
        let payload = payload.into();
        let mut registry = self.lock();
        let Some(subscribers) = registry.channels.get_mut(key) else {
            return 0;
        };

        subscribers.retain(|s| match s.sender.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(%key, subscriber = s.id, "subscriber lagging, dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        let delivered = subscribers.len();
        if delivered == 0 {
            registry.channels.remove(key);
        }
        delivered
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.lock().channels.get(key).map_or(0, Vec::len)
    }

    /// Drops every subscription and refuses new ones. Open streams end.
    pub fn shutdown(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        let channels = std::mem::take(&mut registry.channels);
        tracing::info!(channels = channels.len(), "fan-out bus shut down");
    }
}

/// A live listener on one channel key. Yields payloads published after it
/// was created, in publish order.
pub struct Subscription {
    key: ChannelKey,
    id: u64,
    receiver: Receiver<Payload>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Next payload, or `None` once the bus has shut down or dropped this
    /// subscriber for lagging.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Payload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Payload>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key, self.id);
            tracing::debug!(key = %self.key, subscriber = self.id, "unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_chat_and_category() {
        assert_eq!(ChannelKey::messages("c1").as_str(), "chat:c1:messages");
        assert_eq!(
            ChannelKey::new("c1", EventCategory::MessageUpdated).as_str(),
            "chat:c1:messages:update"
        );
        assert_ne!(ChannelKey::messages("c1"), ChannelKey::messages("c2"));
    }

    #[tokio::test]
    async fn delivers_in_publish_order_to_every_subscriber() {
        let bus = FanoutBus::new();
        let key = ChannelKey::messages("c1");
        let mut first = bus.subscribe(key.clone());
        let mut second = bus.subscribe(key.clone());

        assert_eq!(bus.publish(&key, "one"), 2);
        assert_eq!(bus.publish(&key, "two"), 2);

        for sub in [&mut first, &mut second] {
            assert_eq!(&*sub.recv().await.unwrap(), "one");
            assert_eq!(&*sub.recv().await.unwrap(), "two");
        }
    }

    #[tokio::test]
    async fn other_chats_and_categories_do_not_cross_deliver() {
        let bus = FanoutBus::new();
        let mut created = bus.subscribe(ChannelKey::messages("c1"));
        let mut updated = bus.subscribe(ChannelKey::new("c1", EventCategory::MessageUpdated));
        let mut elsewhere = bus.subscribe(ChannelKey::messages("c2"));

        bus.publish(&ChannelKey::messages("c1"), "hello");

        assert_eq!(&*created.recv().await.unwrap(), "hello");
        assert!(updated.receiver.try_recv().is_err());
        assert!(elsewhere.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscribers_get_no_backlog() {
        let bus = FanoutBus::new();
        let key = ChannelKey::messages("c1");
        assert_eq!(bus.publish(&key, "early"), 0);

        let mut late = bus.subscribe(key.clone());
        bus.publish(&key, "late");
        assert_eq!(&*late.recv().await.unwrap(), "late");
    }

    #[test]
    fn dropping_a_subscription_unregisters_it() {
        let bus = FanoutBus::new();
        let key = ChannelKey::messages("c1");
        let sub = bus.subscribe(key.clone());
        let other = bus.subscribe(key.clone());
        assert_eq!(bus.subscriber_count(&key), 2);

        drop(sub);
        assert_eq!(bus.subscriber_count(&key), 1);
        drop(other);
        assert_eq!(bus.subscriber_count(&key), 0);
        assert!(bus.lock().channels.is_empty());
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams_and_refuses_new_ones() {
        let bus = FanoutBus::new();
        let key = ChannelKey::messages("c1");
        let mut sub = bus.subscribe(key.clone());

        bus.shutdown();
        assert_eq!(sub.recv().await, None);

        let mut after = bus.subscribe(key.clone());
        assert_eq!(bus.publish(&key, "ignored"), 0);
        assert_eq!(after.recv().await, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped_after_its_backlog() {
        let bus = FanoutBus::new();
        let key = ChannelKey::messages("c1");
        let mut stalled = bus.subscribe(key.clone());
        let mut reading = bus.subscribe(key.clone());

        for n in 0..SUBSCRIBER_BUFFER {
            assert_eq!(bus.publish(&key, n.to_string()), 2);
            assert_eq!(&*reading.recv().await.unwrap(), n.to_string());
        }
        assert_eq!(bus.publish(&key, "overflow"), 1);
        assert_eq!(bus.subscriber_count(&key), 1);
        assert_eq!(&*reading.recv().await.unwrap(), "overflow");

        for n in 0..SUBSCRIBER_BUFFER {
            assert_eq!(&*stalled.recv().await.unwrap(), n.to_string());
        }
        assert_eq!(stalled.recv().await, None);
    }
}
