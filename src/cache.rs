/* This file is part of agora
 *
 * Copyright (C) 2023-2026 agora developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Per-topic view over the record store. A [`Cache`] holds no
//! records itself; it answers aggregate queries for one topic.
//! Whether a topic is tracked at all is decided by the persisted
//! [`TopicIndex`], not by filesystem presence.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use smol::lock::RwLock;

use crate::{
    record::RecordStorePtr,
    settings::SettingsPtr,
    util::{
        file::{load_lines, save_lines},
        time::Timestamp,
    },
    Result,
};

/// Atomic pointer to a [`TopicIndex`] instance.
pub type TopicIndexPtr = Arc<TopicIndex>;

/// The persisted set of subscribed topics, one per line. This index
/// is authoritative for "do we track this topic".
pub struct TopicIndex {
    path: PathBuf,
    topics: RwLock<HashSet<String>>,
}

impl TopicIndex {
    pub fn new(path: &Path) -> Result<TopicIndexPtr> {
        let topics: HashSet<String> = load_lines(path)?.into_iter().collect();
        debug!(target: "cache", "Loaded {} subscribed topics", topics.len());
        Ok(Arc::new(Self { path: path.to_path_buf(), topics: RwLock::new(topics) }))
    }

    /// Register a topic and persist the index.
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut topics = self.topics.write().await;
        topics.insert(topic.to_string());
        self.save(&topics)
    }

    /// Drop a topic and persist the index.
    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut topics = self.topics.write().await;
        topics.remove(topic);
        self.save(&topics)
    }

    /// Whether a topic is tracked.
    pub async fn exists(&self, topic: &str) -> bool {
        self.topics.read().await.contains(topic)
    }

    /// Snapshot of all tracked topics.
    pub async fn topics(&self) -> Vec<String> {
        self.topics.read().await.iter().cloned().collect()
    }

    fn save(&self, topics: &HashSet<String>) -> Result<()> {
        let mut lines: Vec<String> = topics.iter().cloned().collect();
        lines.sort();
        save_lines(&self.path, &lines)
    }
}

/// Query facade over the record store scoped to one topic.
#[derive(Clone)]
pub struct Cache {
    pub topic: String,
    store: RecordStorePtr,
    settings: SettingsPtr,
}

impl Cache {
    pub fn new(topic: &str, store: RecordStorePtr, settings: SettingsPtr) -> Self {
        Self { topic: topic.to_string(), store, settings }
    }

    /// Stamp of the newest non-deleted record, 0 if none.
    pub async fn stamp(&self) -> i64 {
        match self.store.list(&self.topic).await {
            Ok(heads) => heads.last().map(|h| h.stamp).unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Number of live records.
    pub async fn len(&self) -> usize {
        self.store.list(&self.topic).await.map(|h| h.len()).unwrap_or(0)
    }

    /// Whether any live record exists.
    pub async fn has_record(&self) -> bool {
        self.len().await > 0
    }

    /// Live records stamped within the trailing velocity window.
    pub async fn velocity(&self) -> usize {
        let cutoff = Timestamp::current_time().0 - self.settings.velocity_window;
        match self.store.list(&self.topic).await {
            Ok(heads) => heads.iter().filter(|h| h.stamp >= cutoff).count(),
            Err(_) => 0,
        }
    }

    /// Sum of serialized record lengths, in bytes.
    pub async fn size(&self) -> u64 {
        self.store.topic_size(&self.topic).await.unwrap_or(0)
    }

    /// Register this topic in the index.
    pub async fn subscribe(&self, index: &TopicIndex) -> Result<()> {
        index.subscribe(&self.topic).await
    }

    /// Whether this topic is tracked by the index.
    pub async fn exists(&self, index: &TopicIndex) -> bool {
        index.exists(&self.topic).await
    }

    /// Evict every record of the topic and drop its membership.
    pub async fn remove(&self, index: &TopicIndex) -> Result<()> {
        self.store.remove_topic(&self.topic).await?;
        index.unsubscribe(&self.topic).await
    }
}
