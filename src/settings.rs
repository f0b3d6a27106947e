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

use std::{path::PathBuf, sync::Arc};

/// Atomic pointer to engine settings
pub type SettingsPtr = Arc<Settings>;

/// Replication engine settings. The scope of this is one node
/// instance configured by the library user.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base directory holding the record store and the persisted
    /// index files
    pub base_dir: PathBuf,
    /// Recency window (in seconds); heads with a stamp outside
    /// `[now - recent_range, now + recent_range]` are dropped from
    /// the recent index
    pub recent_range: i64,
    /// Dedup TTL (in seconds) for the anti-entropy controller;
    /// an update digest seen within this window is not re-broadcast
    pub update_ttl: i64,
    /// Maximum serialized record size (in bytes); larger records
    /// are tombstoned on arrival
    pub record_limit: usize,
    /// Maximum number of suggested tags kept per topic
    pub tag_size: usize,
    /// Number of peers sampled per gossip round
    pub sample_size: usize,
    /// Single peer request timeout (in seconds)
    pub talk_timeout: u64,
    /// Wall-clock budget for a whole gossip round (in seconds);
    /// once exceeded no further peer requests are issued
    pub getall_timeout: u64,
    /// Trailing window (in seconds) for the per-topic velocity query
    pub velocity_window: i64,
    /// Tombstoned records older than this (in seconds) are eligible
    /// for deletion
    pub removed_ttl: i64,
}

impl Settings {
    /// Record store root.
    pub fn store_dir(&self) -> PathBuf {
        self.base_dir.join("store")
    }

    /// Persisted recency index.
    pub fn recent_path(&self) -> PathBuf {
        self.base_dir.join("recent.txt")
    }

    /// Persisted suggested-tag table.
    pub fn tags_path(&self) -> PathBuf {
        self.base_dir.join("tags.txt")
    }

    /// Persisted subscribed-topic index.
    pub fn topics_path(&self) -> PathBuf {
        self.base_dir.join("topics.txt")
    }

    /// Spam patterns, one regex per line.
    pub fn spam_path(&self) -> PathBuf {
        self.base_dir.join("spam.txt")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("agora"),
            recent_range: 3600 * 24 * 30,
            update_ttl: 3600,
            record_limit: 250 * 1024,
            tag_size: 20,
            sample_size: 8,
            talk_timeout: 20,
            getall_timeout: 120,
            velocity_window: 3600 * 24 * 7,
            removed_ttl: 3600 * 24 * 90,
        }
    }
}
