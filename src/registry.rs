//! Process-wide mapping from topic names to their logs.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::topic::TopicLog;

/// Owns every open [`TopicLog`], keyed by name.
///
/// The registry guarantees at most one log instance per topic. Lookups and
/// creations are serialized through the registry lock; each log carries its
/// own mutex, which is what callers hold across appends and reads.
///
/// Names are opaque: the registry performs no normalization. The facade
/// validates that a name is a legal single path component before it gets
/// here.
pub struct TopicRegistry {
    base_dir: PathBuf,
    topics: RwLock<HashMap<String, Arc<Mutex<TopicLog>>>>,
}

impl TopicRegistry {
    /// Opens the registry over a data directory, loading every topic found
    /// in it.
    ///
    /// Each subdirectory is treated as a topic and recovered by
    /// [`TopicLog::open`]. Files and unreadable entries are ignored; a topic
    /// that fails recovery is logged and skipped so one damaged topic does
    /// not take the whole process down.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;

        let mut topics = HashMap::new();
        for entry in fs::read_dir(&base_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!("ignoring non-UTF-8 directory entry in {}", base_dir.display());
                continue;
            };
            match TopicLog::open(&name, entry.path(), false) {
                Ok(log) => {
                    tracing::info!("loaded topic {name} (next offset {})", log.next_offset());
                    topics.insert(name, Arc::new(Mutex::new(log)));
                }
                Err(e) => {
                    tracing::error!("failed to load topic {name}: {e}");
                }
            }
        }
        tracing::info!(
            "topic registry ready: {} topics under {}",
            topics.len(),
            base_dir.display()
        );

        Ok(Self {
            base_dir,
            topics: RwLock::new(topics),
        })
    }

    /// Returns the topic's log if it exists.
    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<TopicLog>>> {
        self.topics.read().await.get(name).cloned()
    }

    /// Returns the topic's log, creating it (directory and files included)
    /// when absent.
    ///
    /// On construction failure the error propagates and the registry is left
    /// unchanged.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Mutex<TopicLog>>> {
        if let Some(log) = self.get(name).await {
            return Ok(log);
        }

        let mut topics = self.topics.write().await;
        // Another task may have created it while we waited for the lock.
        if let Some(log) = topics.get(name) {
            return Ok(log.clone());
        }

        tracing::info!("creating topic {name}");
        let log = TopicLog::open(name, self.base_dir.join(name), true)?;
        let log = Arc::new(Mutex::new(log));
        topics.insert(name.to_string(), log.clone());
        Ok(log)
    }

    /// Snapshots the registered topic names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_create_topic_on_demand() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let registry = TopicRegistry::open(dir.path()).unwrap();

        // when
        let log = registry.get_or_create("orders").await.unwrap();

        // then
        assert_eq!(log.lock().await.next_offset(), 0);
        assert!(dir.path().join("orders").is_dir());
        assert_eq!(registry.list().await, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn should_return_the_same_instance_for_a_name() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let registry = TopicRegistry::open(dir.path()).unwrap();

        // when
        let first = registry.get_or_create("orders").await.unwrap();
        let second = registry.get_or_create("orders").await.unwrap();

        // then
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn should_not_find_unknown_topics() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let registry = TopicRegistry::open(dir.path()).unwrap();

        // when/then
        assert!(registry.get("missing").await.is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn should_load_existing_topics_at_startup() {
        // given - a registry that wrote some topics, then went away
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = TopicRegistry::open(dir.path()).unwrap();
            let log = registry.get_or_create("orders").await.unwrap();
            log.lock().await.append(b"order-1").unwrap();
            registry.get_or_create("billing").await.unwrap();
        }

        // when
        let registry = TopicRegistry::open(dir.path()).unwrap();

        // then
        assert_eq!(
            registry.list().await,
            vec!["billing".to_string(), "orders".to_string()]
        );
        let orders = registry.get("orders").await.unwrap();
        assert_eq!(orders.lock().await.next_offset(), 1);
    }

    #[tokio::test]
    async fn should_ignore_stray_files_in_the_data_directory() {
        // given
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("not-a-topic.txt"), b"junk").unwrap();

        // when
        let registry = TopicRegistry::open(dir.path()).unwrap();

        // then
        assert!(registry.list().await.is_empty());
    }
}
