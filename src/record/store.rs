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

//! Filesystem-based record store. Live records sit under
//! `{shard}/record/{stamp}_{id}`, tombstoned ones under
//! `{shard}/removed/{stamp}_{id}`. A tombstone keeps the identity
//! known, so a record evicted as spam is never fetched again.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, warn};
use smol::{fs, lock::Mutex, stream::StreamExt};

use super::{topic_shard, Record, RecordHead};
use crate::{spam::SpamRule, util::time::Timestamp, Error, Result};

const RECORD_DIR: &str = "record";
const REMOVED_DIR: &str = "removed";

/// Atomic pointer to a [`RecordStore`] instance.
pub type RecordStorePtr = Arc<RecordStore>;

/// Admission verdict for an incoming record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Oversize,
    Spam,
}

impl Admission {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// The record store shared across all topics.
pub struct RecordStore {
    base: PathBuf,
    /// Coarse lock serializing reads and writes; moves between the
    /// active and removed locations stay atomic with respect to
    /// concurrent existence checks.
    lock: Mutex<()>,
}

impl RecordStore {
    pub async fn new(base: &Path) -> Result<RecordStorePtr> {
        fs::create_dir_all(base).await?;
        Ok(Arc::new(Self { base: base.to_path_buf(), lock: Mutex::new(()) }))
    }

    fn live_dir(&self, topic: &str) -> PathBuf {
        self.base.join(topic_shard(topic)).join(RECORD_DIR)
    }

    fn removed_dir(&self, topic: &str) -> PathBuf {
        self.base.join(topic_shard(topic)).join(REMOVED_DIR)
    }

    fn live_path(&self, head: &RecordHead) -> PathBuf {
        self.live_dir(&head.topic).join(head.idstr())
    }

    fn removed_path(&self, head: &RecordHead) -> PathBuf {
        self.removed_dir(&head.topic).join(head.idstr())
    }

    /// Persist a record in its topic shard.
    pub async fn save(&self, record: &Record) -> Result<()> {
        let _guard = self.lock.lock().await;

        let path = self.live_path(&record.head);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, format!("{}\n", record.serialize())).await?;

        debug!(target: "record::store", "Saved record {}", record.head.idstr());
        Ok(())
    }

    /// Load a record body from disk.
    pub async fn load(&self, head: &RecordHead) -> Result<Record> {
        let _guard = self.lock.lock().await;

        let line = fs::read_to_string(self.live_path(head))
            .await
            .map_err(|_| Error::RecordNotFound(head.idstr()))?;

        let mut record = Record::new(head.clone());
        record.load_body(line.trim_end_matches('\n'))?;
        Ok(record)
    }

    /// Whether a live (non-tombstoned) copy exists.
    pub async fn has_live(&self, head: &RecordHead) -> bool {
        let _guard = self.lock.lock().await;
        fs::metadata(self.live_path(head)).await.is_ok()
    }

    /// Whether this head is known at all, live or tombstoned.
    /// Tombstones count: an evicted record must not be re-fetched.
    pub async fn exists(&self, head: &RecordHead) -> bool {
        let _guard = self.lock.lock().await;
        fs::metadata(self.live_path(head)).await.is_ok() ||
            fs::metadata(self.removed_path(head)).await.is_ok()
    }

    /// Move a record to the tombstone location. If no live copy
    /// exists the serialized record is written there directly, so the
    /// identity is known either way.
    pub async fn tombstone(&self, record: &Record) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.tombstone_unlocked(record).await
    }

    async fn tombstone_unlocked(&self, record: &Record) -> Result<()> {
        let live = self.live_path(&record.head);
        let removed = self.removed_path(&record.head);

        if let Some(parent) = removed.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::metadata(&live).await.is_ok() {
            fs::rename(&live, &removed).await?;
        } else {
            fs::write(&removed, format!("{}\n", record.serialize())).await?;
        }

        debug!(target: "record::store", "Tombstoned record {}", record.head.idstr());
        Ok(())
    }

    /// Admit or reject an incoming record. Oversized or spam-matching
    /// records are tombstoned immediately rather than merely refused.
    pub async fn admit(
        &self,
        record: &Record,
        size_limit: usize,
        spam: &dyn SpamRule,
    ) -> Result<Admission> {
        if record.size() > size_limit {
            warn!(
                target: "record::store",
                "Record {} over size limit ({} > {}), tombstoning",
                record.head.idstr(), record.size(), size_limit,
            );
            self.tombstone(record).await?;
            return Ok(Admission::Oversize)
        }

        if spam.is_spam(record) {
            warn!(target: "record::store", "Record {} matches spam rules, tombstoning",
                  record.head.idstr());
            self.tombstone(record).await?;
            return Ok(Admission::Spam)
        }

        self.save(record).await?;
        Ok(Admission::Accepted)
    }

    /// Live record heads of a topic, ascending by stamp. A topic with
    /// no shard directory yet is simply empty.
    pub async fn list(&self, topic: &str) -> Result<Vec<RecordHead>> {
        let _guard = self.lock.lock().await;
        scan_dir(&self.live_dir(topic), topic).await
    }

    /// Tombstoned record heads of a topic, ascending by stamp.
    pub async fn list_removed(&self, topic: &str) -> Result<Vec<RecordHead>> {
        let _guard = self.lock.lock().await;
        scan_dir(&self.removed_dir(topic), topic).await
    }

    /// Total serialized size of a topic's live records, in bytes.
    pub async fn topic_size(&self, topic: &str) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let dir = self.live_dir(topic);
        if fs::metadata(&dir).await.is_err() {
            return Ok(0)
        }

        let mut total = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next().await {
            let Ok(entry) = entry else { continue };
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }

        Ok(total)
    }

    /// Evict every live record of a topic to the tombstone location.
    pub async fn remove_topic(&self, topic: &str) -> Result<()> {
        let _guard = self.lock.lock().await;

        let heads = scan_dir(&self.live_dir(topic), topic).await?;
        for head in heads {
            let live = self.live_path(&head);
            let removed = self.removed_path(&head);
            if let Some(parent) = removed.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(&live, &removed).await?;
        }

        Ok(())
    }

    /// Delete tombstones older than `ttl` seconds. A tombstone at
    /// least as new as the topic's newest live stamp is kept even
    /// past the TTL: it may be the only known head for the topic.
    /// Returns the number of tombstones deleted.
    pub async fn prune_removed(&self, topic: &str, ttl: i64) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let newest_live =
            scan_dir(&self.live_dir(topic), topic).await?.last().map(|h| h.stamp).unwrap_or(0);
        let now = Timestamp::current_time().0;

        let mut deleted = 0;
        for head in scan_dir(&self.removed_dir(topic), topic).await? {
            if now - head.stamp <= ttl {
                continue
            }
            if newest_live == 0 || head.stamp >= newest_live {
                continue
            }

            fs::remove_file(self.removed_path(&head)).await?;
            deleted += 1;
        }

        Ok(deleted)
    }
}

/// Collect the record heads named by a shard directory's files,
/// ascending by stamp. Files that do not parse as `{stamp}_{id}` are
/// skipped.
async fn scan_dir(dir: &Path, topic: &str) -> Result<Vec<RecordHead>> {
    if fs::metadata(dir).await.is_err() {
        return Ok(vec![])
    }

    let mut heads = vec![];
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next().await {
        let Ok(entry) = entry else { continue };

        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        match RecordHead::from_idstr(topic, name) {
            Ok(head) => heads.push(head),
            Err(_) => {
                debug!(target: "record::store", "Skipping stray file {:?}", entry.path());
            }
        }
    }

    heads.sort_by(|a, b| (a.stamp, &a.id).cmp(&(b.stamp, &b.id)));
    Ok(heads)
}
