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

//! Global bounded index of the newest [`RecordHead`] per
//! `(topic, entry)`, fed by gossip responses and consumed to build
//! candidate fetch lists.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use rand::{rngs::OsRng, seq::SliceRandom};
use smol::lock::RwLock;

use crate::{
    cache::Cache,
    peers::PeerSet,
    record::{Record, RecordHead, RecordStorePtr},
    settings::SettingsPtr,
    system::timeout::timeout,
    tags::SuggestedTagTable,
    util::{
        file::{load_lines, save_lines},
        time::Timestamp,
    },
    Result,
};

/// Atomic pointer to a [`RecentList`] instance.
pub type RecentListPtr = Arc<RecentList>;

/// The recency index: heads ordered ascending by stamp, deduplicated
/// by `(topic, id)` with the newest stamp winning, bounded to the
/// configured window on every [`RecentList::sync`].
pub struct RecentList {
    path: PathBuf,
    settings: SettingsPtr,
    heads: RwLock<Vec<RecordHead>>,
}

impl RecentList {
    /// Load the persisted index. Malformed lines are dropped, never
    /// aborting the load.
    pub fn new(path: &Path, settings: SettingsPtr) -> Result<RecentListPtr> {
        let mut heads = vec![];
        for line in load_lines(path)? {
            match RecordHead::parse(&line) {
                Ok(head) => heads.push(head),
                Err(e) => debug!(target: "recent", "Skipping recency line: {}", e),
            }
        }
        heads.sort_by_key(|h| h.stamp);
        debug!(target: "recent", "Loaded {} recent heads", heads.len());

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            settings,
            heads: RwLock::new(heads),
        }))
    }

    /// Upsert a head. A stamp not newer than the one already indexed
    /// for the same `(topic, id)` is a no-op. The index is re-sorted
    /// on every structural change. Returns whether anything changed.
    pub async fn append(&self, head: &RecordHead) -> bool {
        let mut heads = self.heads.write().await;

        match heads.iter().position(|h| h.topic == head.topic && h.id == head.id) {
            Some(i) => {
                if heads[i].stamp >= head.stamp {
                    return false
                }
                heads[i] = head.clone();
            }
            None => heads.push(head.clone()),
        }

        heads.sort_by_key(|h| h.stamp);
        true
    }

    /// Drop a head from the index.
    pub async fn remove(&self, head: &RecordHead) {
        self.heads.write().await.retain(|h| h != head);
    }

    /// Snapshot of the index, ascending by stamp.
    pub async fn heads(&self) -> Vec<RecordHead> {
        self.heads.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.heads.read().await.len()
    }

    /// Newest indexed stamp for a topic, 0 if none.
    pub async fn newest(&self, topic: &str) -> i64 {
        let heads = self.heads.read().await;
        heads.iter().rev().find(|h| h.topic == topic).map(|h| h.stamp).unwrap_or(0)
    }

    /// Topics currently represented in the index, deduplicated, in
    /// first-appearance order.
    pub async fn topics(&self) -> Vec<String> {
        let heads = self.heads.read().await;
        let mut seen = HashSet::new();
        let mut topics = vec![];
        for head in heads.iter() {
            if seen.insert(head.topic.clone()) {
                topics.push(head.topic.clone());
            }
        }
        topics
    }

    /// Trim the index to the recency window and persist it, one line
    /// per head in ascending stamp order.
    pub async fn sync(&self) -> Result<()> {
        let mut heads = self.heads.write().await;

        let now = Timestamp::current_time().0;
        let range = self.settings.recent_range;
        heads.retain(|h| h.stamp >= now - range && h.stamp <= now + range);
        heads.sort_by_key(|h| h.stamp);

        let lines: Vec<String> = heads.iter().map(|h| h.recency_line()).collect();
        save_lines(&self.path, &lines)
    }

    /// One anti-entropy pull round. Samples a bounded set of peers
    /// and requests their recent heads; every returned line feeds the
    /// index, the tag table and the peer-set's source table. A
    /// failing peer is dropped and the round continues; the whole
    /// round stops issuing requests once its wall-clock budget is
    /// spent.
    pub async fn getall(&self, peers: &dyn PeerSet, tags: &SuggestedTagTable) -> Result<()> {
        let sample = peers.sample(&[], self.settings.sample_size).await;
        debug!(target: "recent", "Getall round over {} peers", sample.len());

        let start = Timestamp::current_time().0 - self.settings.recent_range;
        let request = format!("/Recent/{}-", start);
        let talk_timeout = Duration::from_secs(self.settings.talk_timeout);
        let deadline = Instant::now() + Duration::from_secs(self.settings.getall_timeout);

        let mut requests = FuturesUnordered::new();
        for peer in sample {
            let request = request.clone();
            requests.push(async move {
                let response = timeout(talk_timeout, peers.talk(&peer, &request)).await;
                (peer, response)
            });
        }

        while !requests.is_empty() {
            let budget = deadline.saturating_duration_since(Instant::now());
            if budget.is_zero() {
                warn!(target: "recent", "Getall budget exhausted, abandoning remaining peers");
                break
            }

            // Pending peer requests are cancelled along with the
            // stream when the budget runs out.
            let Ok(Some((peer, response))) = timeout(budget, requests.next()).await else {
                warn!(target: "recent", "Getall budget exhausted, abandoning remaining peers");
                break
            };

            let lines = match response.and_then(|r| r) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(target: "recent", "Peer {} failed: {}, dropping", peer, e);
                    peers.drop_peer(&peer).await;
                    continue
                }
            };

            for line in lines {
                let record = match Record::parse_recent(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(target: "recent", "Skipping recency line: {}", e);
                        continue
                    }
                };

                self.append(&record.head).await;

                if let Some(tag_field) = record.get("tag") {
                    let mut names: Vec<String> =
                        tag_field.split_whitespace().map(|s| s.to_string()).collect();
                    names.shuffle(&mut OsRng);
                    names.truncate(self.settings.tag_size);
                    tags.add_gossip(&record.head.topic, &names).await;
                }

                peers.add_source(&record.head.topic, &peer).await;
            }
        }

        // Three independent persistence steps; each is individually
        // consistent and idempotent.
        self.sync().await?;
        if let Err(e) = peers.persist().await {
            warn!(target: "recent", "Peer-set persist failed: {}", e);
        }

        let topics: HashSet<String> = self.topics().await.into_iter().collect();
        tags.prune(&topics).await;
        tags.sync().await?;

        Ok(())
    }

    /// Topics currently in the index, each wrapped as a [`Cache`],
    /// sorted descending by recent stamp (max of the topic's own
    /// newest record stamp and its newest indexed head stamp).
    pub async fn make_recent_cachelist(&self, store: &RecordStorePtr) -> Vec<Cache> {
        let mut ranked = vec![];
        for topic in self.topics().await {
            let cache = Cache::new(&topic, store.clone(), self.settings.clone());
            let recent_stamp = std::cmp::max(cache.stamp().await, self.newest(&topic).await);
            ranked.push((recent_stamp, cache));
        }

        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, cache)| cache).collect()
    }
}
