//! In-process subscription fan-out.
//!
//! Protocol adapters register subscribers here; every successful produce
//! passes the new record through [`SubscriptionRegistry::on_new_record`],
//! which matches it against the topic's subscribers and enqueues a delivery
//! on each one's channel.
//!
//! The registry never runs subscriber code. A subscriber is a value pair of
//! a cursor and an unbounded sender; the task draining the receiving end
//! (typically a session's writer task) is the subscriber's delivery
//! executor. Dispatch is a non-blocking enqueue under the registry lock, so
//! producers are never blocked by slow consumers, and the lock serializes
//! cursor advancement, which is what makes per-subscriber delivery strictly
//! ordered by offset.
//!
//! Subscription state is ephemeral. There is no persistent cursor: a
//! subscriber that disconnects loses its position, and session teardown
//! sweeps all of its registrations via [`SubscriptionRegistry::unsubscribe_all`].

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::model::{Offset, Record};

/// A batch of records pushed to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub records: Vec<Record>,
}

/// The sending half a subscriber hands to the registry.
pub type DeliverySender = mpsc::UnboundedSender<Delivery>;

struct SubscriberEntry {
    next_offset_needed: Offset,
    sink: DeliverySender,
}

/// Concurrency-safe registry of per-topic subscribers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<HashMap<String, HashMap<String, SubscriberEntry>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or repositions) a subscriber on a topic.
    ///
    /// A second subscribe for the same `(topic, subscriber_id)` replaces the
    /// existing entry; that is how clients move their cursor.
    pub fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        start_offset: Offset,
        sink: DeliverySender,
    ) {
        tracing::debug!(
            "subscriber {subscriber_id} subscribing to topic {topic} from offset {start_offset}"
        );
        let mut inner = self.inner.lock().unwrap();
        inner.entry(topic.to_string()).or_default().insert(
            subscriber_id.to_string(),
            SubscriberEntry {
                next_offset_needed: start_offset,
                sink,
            },
        );
    }

    /// Removes one subscription. Returns whether it existed.
    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(subscribers) = inner.get_mut(topic) else {
            return false;
        };
        let removed = subscribers.remove(subscriber_id).is_some();
        if subscribers.is_empty() {
            inner.remove(topic);
        }
        if removed {
            tracing::debug!("subscriber {subscriber_id} unsubscribed from topic {topic}");
        }
        removed
    }

    /// Removes a subscriber from every topic. Called on session teardown.
    pub fn unsubscribe_all(&self, subscriber_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|topic, subscribers| {
            if subscribers.remove(subscriber_id).is_some() {
                tracing::debug!("swept subscriber {subscriber_id} from topic {topic}");
            }
            !subscribers.is_empty()
        });
    }

    /// Fans a freshly committed record out to matching subscribers.
    ///
    /// Every subscriber of the record's topic whose cursor is at or before
    /// the record's offset gets a one-element batch enqueued and its cursor
    /// advanced past the record. A closed delivery channel is logged and
    /// skipped; the cursor still advances (delivery is best effort) and the
    /// dead entry is removed when its session sweeps.
    pub fn on_new_record(&self, record: &Record) {
        let mut inner = self.inner.lock().unwrap();
        let Some(subscribers) = inner.get_mut(&record.topic) else {
            return;
        };
        for (subscriber_id, entry) in subscribers.iter_mut() {
            if record.offset < entry.next_offset_needed {
                continue;
            }
            let delivery = Delivery {
                topic: record.topic.clone(),
                records: vec![record.clone()],
            };
            if entry.sink.send(delivery).is_err() {
                tracing::debug!(
                    "delivery channel for subscriber {subscriber_id} on topic {} is closed",
                    record.topic
                );
            }
            entry.next_offset_needed = record.offset + 1;
        }
    }

    /// Number of subscriptions currently registered on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn record(topic: &str, offset: Offset, payload: &str) -> Record {
        Record::new(offset, topic, Bytes::from(payload.to_string()))
    }

    #[tokio::test]
    async fn should_deliver_new_records_to_a_subscriber() {
        // given
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 0, tx);

        // when
        registry.on_new_record(&record("orders", 0, "m1"));
        registry.on_new_record(&record("orders", 1, "m2"));

        // then - batches arrive in offset order
        let first = rx.recv().await.unwrap();
        assert_eq!(first.topic, "orders");
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].offset, 0);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.records[0].offset, 1);
    }

    #[tokio::test]
    async fn should_skip_records_before_the_start_offset() {
        // given - a subscriber that only wants offset 2 onwards
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 2, tx);

        // when
        registry.on_new_record(&record("orders", 0, "m1"));
        registry.on_new_record(&record("orders", 1, "m2"));
        registry.on_new_record(&record("orders", 2, "m3"));

        // then - only offset 2 is delivered
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.records[0].offset, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_not_deliver_to_other_topics() {
        // given
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 0, tx);

        // when
        registry.on_new_record(&record("billing", 0, "m1"));

        // then
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_stop_delivering_after_unsubscribe() {
        // given
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 0, tx);

        // when
        assert!(registry.unsubscribe("orders", "client-1"));
        registry.on_new_record(&record("orders", 0, "m1"));

        // then
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscriber_count("orders"), 0);
    }

    #[tokio::test]
    async fn should_sweep_a_subscriber_from_every_topic() {
        // given - one session subscribed to two topics
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 0, tx.clone());
        registry.subscribe("billing", "client-1", 0, tx);

        // when
        registry.unsubscribe_all("client-1");
        registry.on_new_record(&record("orders", 0, "m1"));
        registry.on_new_record(&record("billing", 0, "m2"));

        // then
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscriber_count("orders"), 0);
        assert_eq!(registry.subscriber_count("billing"), 0);
    }

    #[tokio::test]
    async fn should_reposition_the_cursor_on_resubscribe() {
        // given
        let registry = SubscriptionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-1", 0, tx.clone());

        // when - the client re-subscribes further ahead
        registry.subscribe("orders", "client-1", 5, tx);
        registry.on_new_record(&record("orders", 3, "m"));
        registry.on_new_record(&record("orders", 5, "m"));

        // then - only the record at or past the new cursor arrives
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.records[0].offset, 5);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.subscriber_count("orders"), 1);
    }

    #[tokio::test]
    async fn should_survive_a_closed_delivery_channel() {
        // given - the receiving side is already gone
        let registry = SubscriptionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        registry.subscribe("orders", "client-1", 0, tx);

        // when - fan-out must not fail the producer
        registry.on_new_record(&record("orders", 0, "m1"));

        // then - the entry survives until its session sweeps it
        assert_eq!(registry.subscriber_count("orders"), 1);
    }

    #[tokio::test]
    async fn should_fan_out_to_multiple_subscribers() {
        // given
        let registry = SubscriptionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.subscribe("orders", "client-a", 0, tx_a);
        registry.subscribe("orders", "client-b", 0, tx_b);

        // when
        registry.on_new_record(&record("orders", 0, "m1"));

        // then
        assert_eq!(rx_a.recv().await.unwrap().records[0].offset, 0);
        assert_eq!(rx_b.recv().await.unwrap().records[0].offset, 0);
    }
}
