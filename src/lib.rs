//! Eventlog - a persistent, topic-partitioned event queue server.
//!
//! Eventlog accepts ordered writes to named topics, persists them durably on
//! local storage, serves reads by offset, and pushes newly appended records
//! to in-process subscribers that protocol adapters expose over the network.
//!
//! # Architecture
//!
//! Each topic is an independent append-only log on disk: a data file of
//! records, an offset-to-byte-position index, and a small metadata file
//! carrying the next offset. The three are flushed in order on every append
//! and reconciled against each other when a topic is opened, so a crash at
//! any point leaves a recoverable log.
//!
//! # Key Concepts
//!
//! - **EventQueue**: The facade adapters talk to: `produce`, `consume`,
//!   `create_topic`, `list_topics`, `next_offset`.
//! - **Offsets**: Each record is assigned a per-topic offset at append time.
//!   Offsets start at 0 and are contiguous within a topic.
//! - **Subscriptions**: A subscriber registers a delivery channel and a
//!   start offset; every produce fans the new record out to matching
//!   subscribers without blocking the producer.
//!
//! # Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use eventlog::EventQueue;
//!
//! let queue = EventQueue::open("./eventlog-data")?;
//!
//! let offset = queue.produce("orders", Bytes::from("order-123")).await?;
//! for record in queue.consume("orders", 0, 100).await? {
//!     println!("offset={}, payload={:?}", record.offset, record.payload);
//! }
//! ```

pub mod codec;
mod error;
mod model;
mod queue;
mod registry;
#[cfg(feature = "server")]
pub mod server;
mod subscription;
mod topic;

pub use error::{Error, Result};
pub use model::{Offset, Record};
pub use queue::EventQueue;
pub use registry::TopicRegistry;
pub use subscription::{Delivery, DeliverySender, SubscriptionRegistry};
pub use topic::TopicLog;
