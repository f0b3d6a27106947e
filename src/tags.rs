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

//! Community tag aggregation. Tags are harvested from gossip traffic
//! per topic, weighted by recurrence, and pruned against the recent
//! index so abandoned topics do not accumulate stale suggestions.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::debug;
use smol::lock::RwLock;

use crate::{
    record::FIELD_DELIM,
    settings::SettingsPtr,
    util::file::{load_lines, save_lines},
    Result,
};

/// Atomic pointer to a [`SuggestedTagTable`] instance.
pub type SuggestedTagTablePtr = Arc<SuggestedTagTable>;

/// A tag name with its recurrence weight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub weight: u32,
}

/// Weighted per-topic tag index.
pub struct SuggestedTagTable {
    path: PathBuf,
    tag_size: usize,
    table: RwLock<HashMap<String, Vec<Tag>>>,
}

impl SuggestedTagTable {
    pub fn new(path: &Path, settings: SettingsPtr) -> Result<SuggestedTagTablePtr> {
        let mut table: HashMap<String, Vec<Tag>> = HashMap::new();

        // Persisted order encodes rank; weights restart at one.
        for line in load_lines(path)? {
            let Some((topic, names)) = line.split_once(FIELD_DELIM) else {
                debug!(target: "tags", "Skipping malformed tag line");
                continue
            };
            let tags: Vec<Tag> = names
                .split_whitespace()
                .map(|n| Tag { name: n.to_string(), weight: 1 })
                .collect();
            if !tags.is_empty() {
                table.insert(topic.to_string(), tags);
            }
        }

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            tag_size: settings.tag_size,
            table: RwLock::new(table),
        }))
    }

    /// Structural delimiters may not appear inside a tag name.
    fn valid_tag(name: &str) -> bool {
        !name.is_empty() && !name.contains(['<', '>', ':']) && !name.contains(char::is_whitespace)
    }

    /// Append-if-absent for names arriving from the querying user
    /// path. Existing weights are untouched.
    pub async fn add_user(&self, topic: &str, names: &[String]) {
        let mut table = self.table.write().await;
        let tags = table.entry(topic.to_string()).or_default();

        for name in names {
            if !Self::valid_tag(name) {
                debug!(target: "tags", "Rejecting tag {:?}", name);
                continue
            }
            if !tags.iter().any(|t| &t.name == name) {
                tags.push(Tag { name: name.clone(), weight: 0 });
            }
        }
    }

    /// Weighted insertion for names harvested from gossip traffic;
    /// recurrence increments the weight.
    pub async fn add_gossip(&self, topic: &str, names: &[String]) {
        let mut table = self.table.write().await;
        let tags = table.entry(topic.to_string()).or_default();

        for name in names {
            if !Self::valid_tag(name) {
                debug!(target: "tags", "Rejecting tag {:?}", name);
                continue
            }
            match tags.iter_mut().find(|t| &t.name == name) {
                Some(tag) => tag.weight += 1,
                None => tags.push(Tag { name: name.clone(), weight: 1 }),
            }
        }
    }

    /// Current tags of a topic, in rank order.
    pub async fn get(&self, topic: &str) -> Vec<Tag> {
        self.table.read().await.get(topic).cloned().unwrap_or_default()
    }

    /// Drop every topic not present in the recent index snapshot and
    /// cap the rest to the configured tag count, keeping the highest
    /// weights (ties in current order).
    pub async fn prune(&self, recent_topics: &HashSet<String>) {
        let mut table = self.table.write().await;

        table.retain(|topic, _| recent_topics.contains(topic));

        for tags in table.values_mut() {
            tags.sort_by(|a, b| b.weight.cmp(&a.weight));
            tags.truncate(self.tag_size);
        }
    }

    /// Persist the table, one `topic<>tag1 tag2 ...` line per topic.
    pub async fn sync(&self) -> Result<()> {
        let table = self.table.read().await;

        let mut lines: Vec<String> = table
            .iter()
            .filter(|(_, tags)| !tags.is_empty())
            .map(|(topic, tags)| {
                let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
                format!("{}{}{}", topic, FIELD_DELIM, names.join(" "))
            })
            .collect();
        lines.sort();

        save_lines(&self.path, &lines)
    }
}
