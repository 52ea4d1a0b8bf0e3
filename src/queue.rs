//! The produce/consume facade composing topic storage and subscription
//! fan-out.
//!
//! This module provides [`EventQueue`], the operation surface the protocol
//! adapters talk to. It owns the [`TopicRegistry`](crate::TopicRegistry) and
//! the [`SubscriptionRegistry`](crate::SubscriptionRegistry): every
//! successful produce commits to the topic's log first and is then handed to
//! the subscription registry for push delivery.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::model::{Offset, Record};
use crate::registry::TopicRegistry;
use crate::subscription::SubscriptionRegistry;

/// The queue's single-object API.
///
/// `EventQueue` is designed to be wrapped in an [`Arc`] and shared across
/// the worker pool; all methods take `&self` and the internal locking (one
/// lock per topic, one per registry) is handled here.
///
/// # Example
///
/// ```ignore
/// use bytes::Bytes;
/// use eventlog::EventQueue;
///
/// let queue = EventQueue::open("./data")?;
/// let offset = queue.produce("orders", Bytes::from("order-1")).await?;
/// let records = queue.consume("orders", offset, 10).await?;
/// ```
pub struct EventQueue {
    registry: TopicRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl EventQueue {
    /// Opens the queue over a data directory, recovering every topic found
    /// there.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let registry = TopicRegistry::open(data_dir)?;
        Ok(Self {
            registry,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
        })
    }

    /// Appends a payload to a topic, creating the topic if needed, and
    /// returns the assigned offset.
    ///
    /// The topic name must be a non-empty single path component and the
    /// payload must be non-empty. Subscribers are notified only after the
    /// append has fully committed; a subscriber that cannot accept the
    /// record never affects the producer or other subscribers.
    pub async fn produce(&self, topic: &str, payload: Bytes) -> Result<Offset> {
        validate_topic_name(topic)?;
        if payload.is_empty() {
            return Err(Error::InvalidInput("payload cannot be empty".to_string()));
        }

        let log = self.registry.get_or_create(topic).await?;
        let offset = log.lock().await.append(&payload)?;

        let record = Record {
            offset,
            topic: topic.to_string(),
            payload,
        };
        self.subscriptions.on_new_record(&record);
        Ok(offset)
    }

    /// Reads up to `max_records` records from a topic starting at
    /// `start_offset`.
    ///
    /// A missing topic yields an empty result rather than an error. A
    /// corrupt or partially readable log yields the readable prefix.
    pub async fn consume(
        &self,
        topic: &str,
        start_offset: Offset,
        max_records: u32,
    ) -> Result<Vec<Record>> {
        validate_topic_name(topic)?;
        let Some(log) = self.registry.get(topic).await else {
            return Ok(Vec::new());
        };
        let records = log.lock().await.read(start_offset, max_records);
        Ok(records)
    }

    /// Creates a topic explicitly. Idempotent: creating an existing topic is
    /// a success and leaves it untouched.
    pub async fn create_topic(&self, topic: &str) -> Result<bool> {
        validate_topic_name(topic)?;
        self.registry.get_or_create(topic).await?;
        Ok(true)
    }

    /// Lists the names of all known topics.
    pub async fn list_topics(&self) -> Vec<String> {
        self.registry.list().await
    }

    /// Returns the offset the next produce to this topic would be assigned,
    /// or 0 when the topic does not exist.
    pub async fn next_offset(&self, topic: &str) -> Offset {
        match self.registry.get(topic).await {
            Some(log) => log.lock().await.next_offset(),
            None => 0,
        }
    }

    /// The subscription registry, for adapters that register push
    /// subscribers.
    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        self.subscriptions.clone()
    }
}

/// Topic names become directory names, so they must be a single legal path
/// component.
fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("topic name cannot be empty".to_string()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidInput(format!(
            "topic name must be a single path component: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn open_queue(dir: &tempfile::TempDir) -> EventQueue {
        EventQueue::open(dir.path()).unwrap()
    }

    #[tokio::test]
    async fn should_produce_and_consume_in_order() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);

        // when
        let first = queue.produce("orders", Bytes::from("x")).await.unwrap();
        let second = queue.produce("orders", Bytes::from("y")).await.unwrap();
        let records = queue.consume("orders", 0, 10).await.unwrap();

        // then
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, Bytes::from("x"));
        assert_eq!(records[1].payload, Bytes::from("y"));
        assert_eq!(queue.next_offset("orders").await, 2);
    }

    #[tokio::test]
    async fn should_reject_empty_topic_and_payload() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);

        // when/then
        assert!(matches!(
            queue.produce("", Bytes::from("x")).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            queue.produce("orders", Bytes::new()).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn should_reject_topic_names_that_escape_the_data_directory() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);

        // when/then
        for name in ["..", ".", "a/b", "a\\b"] {
            assert!(
                matches!(queue.create_topic(name).await, Err(Error::InvalidInput(_))),
                "name {name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn should_return_empty_for_a_missing_topic() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);

        // when/then
        assert!(queue.consume("missing", 0, 10).await.unwrap().is_empty());
        assert_eq!(queue.next_offset("missing").await, 0);
    }

    #[tokio::test]
    async fn should_create_topics_idempotently() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);

        // when
        assert!(queue.create_topic("orders").await.unwrap());
        assert!(queue.create_topic("orders").await.unwrap());

        // then - exactly one topic exists
        assert_eq!(queue.list_topics().await, vec!["orders".to_string()]);
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().unwrap().is_dir())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn should_notify_subscribers_after_commit() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.subscriptions().subscribe("orders", "client-1", 0, tx);

        // when
        queue.produce("orders", Bytes::from("m1")).await.unwrap();
        queue.produce("orders", Bytes::from("m2")).await.unwrap();

        // then - deliveries arrive in produce order with committed offsets
        let first = rx.recv().await.unwrap();
        assert_eq!(first.records[0].offset, 0);
        assert_eq!(first.records[0].payload, Bytes::from("m1"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.records[0].offset, 1);
    }

    #[tokio::test]
    async fn should_not_notify_swept_subscribers() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue.subscriptions().subscribe("orders", "client-1", 0, tx);

        // when
        queue.subscriptions().unsubscribe_all("client-1");
        queue.produce("orders", Bytes::from("m1")).await.unwrap();

        // then
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_consume_exactly_the_produced_record() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let queue = open_queue(&dir);
        let offset = queue.produce("orders", Bytes::from("solo")).await.unwrap();

        // when
        let records = queue.consume("orders", offset, 1).await.unwrap();

        // then
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, offset);
        assert_eq!(records[0].topic, "orders");
        assert_eq!(records[0].payload, Bytes::from("solo"));
    }
}
