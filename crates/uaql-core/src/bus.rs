// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Topic-keyed publish/subscribe bus.
//!
//! Subscription-bearing traffic (one monitored item shared by many consumers)
//! goes through the subscription multiplexer. Everything else that just needs
//! "publish on a name, deliver to whoever listens" goes through [`PubSubBus`].
//!
//! ```text
//!   publish("value", msg) ──►┌──────────────┐
//!                            │  PubSubBus   │──► subscriber A ("value")
//!   publish("alarm", msg) ──►│  topic map   │──► subscriber B ("value")
//!                            └──────────────┘──► subscriber C ("alarm")
//! ```
//!
//! Each topic is a `tokio::sync::broadcast` channel created lazily on first
//! subscribe. Publishing to a topic nobody listens on is not an error.
//!
//! # Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use uaql_core::bus::PubSubBus;
//!
//! let bus: PubSubBus<String> = PubSubBus::new(64);
//! let mut sub = bus.subscribe("greetings").unwrap();
//! bus.publish("greetings", "hello".to_string());
//! assert_eq!(sub.recv().await.unwrap(), "hello");
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::error::BusError;

// =============================================================================
// BusStats
// =============================================================================

/// Snapshot of bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to at least one subscriber.
    pub messages_published: u64,
    /// Messages published to topics without subscribers.
    pub messages_unrouted: u64,
    /// Messages lost by lagging subscribers.
    pub messages_dropped: u64,
    /// Number of live topics.
    pub topic_count: usize,
}

#[derive(Debug, Default)]
struct AtomicBusStats {
    messages_published: AtomicU64,
    messages_unrouted: AtomicU64,
    messages_dropped: AtomicU64,
}

// =============================================================================
// PubSubBus
// =============================================================================

/// A publish/subscribe bus keyed by topic name.
pub struct PubSubBus<T> {
    topics: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
    stats: Arc<AtomicBusStats>,
}

impl<T: Clone + Send + 'static> PubSubBus<T> {
    /// Creates a bus whose topics buffer up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            stats: Arc::new(AtomicBusStats::default()),
        }
    }

    /// Publishes a message on `topic`.
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, topic: &str, message: T) -> usize {
        let sender = self.topics.read().get(topic).cloned();

        let delivered = match sender {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        };

        if delivered > 0 {
            self.stats.messages_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.messages_unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(topic, "Published to topic without subscribers");
        }
        delivered
    }

    /// Subscribes to `topic`, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> Result<TopicSubscriber<T>, BusError> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic);
        }

        let mut topics = self.topics.write();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        Ok(TopicSubscriber {
            topic: topic.to_string(),
            receiver: sender.subscribe(),
            stats: self.stats.clone(),
        })
    }

    /// Returns the number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Returns the names of all topics.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops topics that no longer have subscribers. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|_, sender| sender.receiver_count() > 0);
        before - topics.len()
    }

    /// Returns current statistics.
    pub fn stats(&self) -> BusStats {
        BusStats {
            messages_published: self.stats.messages_published.load(Ordering::Relaxed),
            messages_unrouted: self.stats.messages_unrouted.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            topic_count: self.topics.read().len(),
        }
    }
}

impl<T> std::fmt::Debug for PubSubBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubBus")
            .field("capacity", &self.capacity)
            .field("topics", &self.topics.read().len())
            .finish()
    }
}

// =============================================================================
// TopicSubscriber
// =============================================================================

/// Receiving end of one topic subscription.
pub struct TopicSubscriber<T> {
    topic: String,
    receiver: broadcast::Receiver<T>,
    stats: Arc<AtomicBusStats>,
}

impl<T: Clone> TopicSubscriber<T> {
    /// Receives the next message, skipping over lag.
    pub async fn recv(&mut self) -> Result<T, BusError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BusError::closed(&self.topic))
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
                    tracing::warn!(topic = %self.topic, count, "Bus subscriber lagged, messages dropped");
                }
            }
        }
    }

    /// Returns a message if one is ready.
    pub fn try_recv(&mut self) -> Result<Option<T>, BusError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::closed(&self.topic)),
            Err(broadcast::error::TryRecvError::Lagged(count)) => {
                self.stats.messages_dropped.fetch_add(count, Ordering::Relaxed);
                Err(BusError::lagged(&self.topic, count))
            }
        }
    }

    /// Topic this subscriber listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers_of_topic() {
        let bus: PubSubBus<u32> = PubSubBus::new(16);
        let mut a = bus.subscribe("value").unwrap();
        let mut b = bus.subscribe("value").unwrap();
        let mut other = bus.subscribe("postUpvoted").unwrap();

        assert_eq!(bus.publish("value", 7), 2);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
        assert_eq!(other.try_recv().unwrap(), None);
    }

    #[test]
    fn test_publish_without_subscribers_is_counted() {
        let bus: PubSubBus<u32> = PubSubBus::new(16);
        assert_eq!(bus.publish("nobody", 1), 0);

        let stats = bus.stats();
        assert_eq!(stats.messages_published, 0);
        assert_eq!(stats.messages_unrouted, 1);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let bus: PubSubBus<u32> = PubSubBus::new(16);
        assert_eq!(bus.subscribe("").err(), Some(BusError::InvalidTopic));
    }

    #[test]
    fn test_prune_removes_idle_topics() {
        let bus: PubSubBus<u32> = PubSubBus::new(16);
        let keep = bus.subscribe("keep").unwrap();
        drop(bus.subscribe("drop").unwrap());

        assert_eq!(bus.topics(), vec!["drop".to_string(), "keep".to_string()]);
        assert_eq!(bus.prune(), 1);
        assert_eq!(bus.topics(), vec!["keep".to_string()]);
        assert_eq!(bus.subscriber_count(keep.topic()), 1);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let bus: PubSubBus<u32> = PubSubBus::new(2);
        let mut sub = bus.subscribe("value").unwrap();
        for i in 0..5 {
            bus.publish("value", i);
        }

        assert_eq!(sub.recv().await.unwrap(), 3);
        assert_eq!(sub.recv().await.unwrap(), 4);
        assert_eq!(bus.stats().messages_dropped, 3);
    }
}
