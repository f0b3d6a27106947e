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

//! Anti-entropy controller. Given "topic X changed" notifications it
//! decides between fetching and broadcast-only, deduplicates repeated
//! notifications within a time window, and re-announces to other
//! peers. The dedup window is the loop-suppression mechanism that
//! keeps gossip from amplifying indefinitely.

use std::{collections::HashMap, sync::Arc, time::Duration};

use log::{debug, warn};
use smol::lock::Mutex;
use url::Url;

use crate::{
    cache::{Cache, TopicIndexPtr},
    peers::PeerSet,
    record::{Admission, Record, RecordHead, RecordStorePtr},
    recent::RecentListPtr,
    settings::SettingsPtr,
    spam::SpamRule,
    system::timeout::timeout,
    util::time::Timestamp,
    Error, Result,
};

/// Atomic pointer to an [`UpdateQue`] instance.
pub type UpdateQuePtr = Arc<UpdateQue>;

/// How a fetched record ended up locally. A record rejected as spam
/// or oversize is still *known*; only a failed fetch leaves the head
/// unknown.
enum FetchOutcome {
    Retained,
    Known,
}

/// The anti-entropy controller. All mutable state is owned here and
/// the controller is passed by handle to its call sites.
pub struct UpdateQue {
    settings: SettingsPtr,
    store: RecordStorePtr,
    index: TopicIndexPtr,
    recent: RecentListPtr,
    spam: Arc<dyn SpamRule>,
    /// Content digest -> first-seen time of updates already
    /// broadcast; entries expire after the configured TTL. Process
    /// local, never persisted.
    updated: Mutex<HashMap<blake3::Hash, i64>>,
}

impl UpdateQue {
    pub fn new(
        settings: SettingsPtr,
        store: RecordStorePtr,
        index: TopicIndexPtr,
        recent: RecentListPtr,
        spam: Arc<dyn SpamRule>,
    ) -> UpdateQuePtr {
        Arc::new(Self {
            settings,
            store,
            index,
            recent,
            spam,
            updated: Mutex::new(HashMap::new()),
        })
    }

    /// Process one update notification. Failure is never fatal to the
    /// controller: an unreachable or lying peer only means this one
    /// update is not applied, and the dedup suppression still holds
    /// for subsequent notifications.
    pub async fn process(
        &self,
        head: &RecordHead,
        source: Option<&Url>,
        peers: &dyn PeerSet,
    ) -> Result<()> {
        let digest = blake3::hash(head.recency_line().as_bytes());

        // Sweep-then-insert must be atomic with respect to other
        // callers checking the same digest.
        {
            let mut updated = self.updated.lock().await;
            let now = Timestamp::current_time().0;
            let ttl = self.settings.update_ttl;
            updated.retain(|_, seen| now - *seen < ttl);

            if updated.contains_key(&digest) {
                debug!(target: "update", "Update {} already broadcast, suppressing",
                       head.idstr());
                return Ok(())
            }
            updated.insert(digest, now);
        }

        // Without a local cache or a known source there is nothing to
        // fetch; the head is only re-announced.
        let source = match source {
            Some(source) if self.index.exists(&head.topic).await => source,
            _ => {
                debug!(target: "update", "No cache or source for {}, announce only",
                       head.topic);
                peers.announce(head, None).await;
                return Ok(())
            }
        };

        let cache = Cache::new(&head.topic, self.store.clone(), self.settings.clone());
        let outcome = if cache.has_record().await {
            self.fetch_one(head, source, peers).await
        } else {
            // An empty cache catches up on the whole topic at once
            self.fetch_range(head, source, peers).await
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "update", "Fetching {} from {} failed: {}, dropping peer",
                      head.idstr(), source, e);
                peers.drop_peer(source).await;
                return Err(e)
            }
        };

        match outcome {
            FetchOutcome::Retained => {
                peers.announce(head, Some(source)).await;
                peers.mark_good(source).await;
                self.recent.append(head).await;
                self.recent.sync().await?;
            }
            FetchOutcome::Known => {
                debug!(target: "update", "Record {} known but not retained", head.idstr());
            }
        }

        Ok(())
    }

    async fn talk(&self, source: &Url, peers: &dyn PeerSet, request: &str) -> Result<Vec<String>> {
        timeout(Duration::from_secs(self.settings.talk_timeout), peers.talk(source, request))
            .await
            .and_then(|r| r)
            .map_err(|e| Error::FetchFailed(e.to_string()))
    }

    /// Fetch exactly one record by `(topic, stamp, id)`.
    async fn fetch_one(
        &self,
        head: &RecordHead,
        source: &Url,
        peers: &dyn PeerSet,
    ) -> Result<FetchOutcome> {
        let request = format!("/get/{}/{}/{}", head.topic, head.stamp, head.id);
        let lines = self.talk(source, peers, &request).await?;

        let Some(line) = lines.first() else {
            return Err(Error::FetchFailed("requested record absent".to_string()))
        };

        let mut record = Record::new(head.clone());
        record.load_body(line).map_err(|e| Error::FetchFailed(e.to_string()))?;
        record.validate(0, None).map_err(|e| Error::FetchFailed(e.to_string()))?;

        self.admit(&record).await
    }

    /// Bulk catch-up: fetch the topic's full range and require the
    /// target record to exist locally afterwards.
    async fn fetch_range(
        &self,
        head: &RecordHead,
        source: &Url,
        peers: &dyn PeerSet,
    ) -> Result<FetchOutcome> {
        let request = format!("/get/{}/-", head.topic);
        let lines = self.talk(source, peers, &request).await?;

        let mut target = None;
        for line in lines {
            let record = match Record::from_line(&head.topic, &line) {
                Ok(record) => record,
                Err(e) => {
                    debug!(target: "update", "Skipping record line: {}", e);
                    continue
                }
            };

            if let Err(e) = record.validate(0, None) {
                debug!(target: "update", "Rejecting record {}: {}", record.head.idstr(), e);
                continue
            }

            let outcome = self.admit(&record).await?;
            if record.head == *head {
                target = Some(outcome);
            }
        }

        if let Some(outcome) = target {
            return Ok(outcome)
        }

        // The response may not have repeated a record we already hold
        if self.store.has_live(head).await {
            return Ok(FetchOutcome::Retained)
        }
        if self.store.exists(head).await {
            return Ok(FetchOutcome::Known)
        }

        Err(Error::FetchFailed("record absent after range fetch".to_string()))
    }

    async fn admit(&self, record: &Record) -> Result<FetchOutcome> {
        match self.store.admit(record, self.settings.record_limit, &*self.spam).await? {
            Admission::Accepted => Ok(FetchOutcome::Retained),
            Admission::Oversize | Admission::Spam => Ok(FetchOutcome::Known),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::TopicIndex,
        record::RecordStore,
        recent::RecentList,
        settings::Settings,
        spam::SpamFilter,
    };
    use async_trait::async_trait;
    use std::path::Path;
    use tempdir::TempDir;

    struct Harness {
        store: RecordStorePtr,
        index: TopicIndexPtr,
        recent: RecentListPtr,
        que: UpdateQuePtr,
    }

    async fn harness(base: &Path, spam_patterns: &[&str]) -> Harness {
        let settings = Arc::new(Settings { record_limit: 1024, ..Default::default() });
        let store = RecordStore::new(&base.join("store")).await.unwrap();
        let index = TopicIndex::new(&base.join("topics.txt")).unwrap();
        let recent = RecentList::new(&base.join("recent.txt"), settings.clone()).unwrap();
        let spam = Arc::new(SpamFilter::new(spam_patterns.iter().copied()).unwrap());
        let que =
            UpdateQue::new(settings, store.clone(), index.clone(), recent.clone(), spam);
        Harness { store, index, recent, que }
    }

    #[derive(Default)]
    struct CountingPeers {
        responses: HashMap<String, Result<Vec<String>>>,
        announced: Mutex<Vec<(RecordHead, Option<Url>)>>,
        dropped: Mutex<Vec<Url>>,
        good: Mutex<Vec<Url>>,
    }

    impl CountingPeers {
        fn respond(mut self, request: &str, lines: Vec<String>) -> Self {
            self.responses.insert(request.to_string(), Ok(lines));
            self
        }

        fn fail(mut self, request: &str) -> Self {
            self.responses
                .insert(request.to_string(), Err(Error::FetchFailed("down".to_string())));
            self
        }
    }

    #[async_trait]
    impl PeerSet for CountingPeers {
        async fn sample(&self, _exclude: &[Url], _n: usize) -> Vec<Url> {
            vec![]
        }

        async fn talk(&self, _peer: &Url, request: &str) -> Result<Vec<String>> {
            self.responses
                .get(request)
                .cloned()
                .unwrap_or_else(|| Err(Error::FetchFailed("unexpected request".to_string())))
        }

        async fn drop_peer(&self, peer: &Url) {
            self.dropped.lock().await.push(peer.clone());
        }

        async fn announce(&self, head: &RecordHead, exclude: Option<&Url>) {
            self.announced.lock().await.push((head.clone(), exclude.cloned()));
        }

        async fn mark_good(&self, peer: &Url) {
            self.good.lock().await.push(peer.clone());
        }

        async fn add_source(&self, _topic: &str, _peer: &Url) {}

        async fn persist(&self) -> Result<()> {
            Ok(())
        }
    }

    fn build(topic: &str, stamp: i64, body: &str) -> Record {
        Record::build(topic, stamp, vec![("body".to_string(), body.to_string())], None).unwrap()
    }

    fn peer() -> Url {
        Url::parse("tcp://peer.example:8000").unwrap()
    }

    #[test]
    fn duplicate_updates_announce_once() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;
            let peers = CountingPeers::default();

            // Unknown topic: broadcast-only path
            let head = build("thread_new", 100, "x").head;
            h.que.process(&head, None, &peers).await.unwrap();
            h.que.process(&head, None, &peers).await.unwrap();

            assert_eq!(peers.announced.lock().await.len(), 1);
        });
    }

    #[test]
    fn known_topic_without_source_announces_only() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;
            let peers = CountingPeers::default();

            h.index.subscribe("thread_a").await.unwrap();
            let head = build("thread_a", 100, "x").head;
            h.que.process(&head, None, &peers).await.unwrap();

            let announced = peers.announced.lock().await;
            assert_eq!(announced.len(), 1);
            assert_eq!(announced[0].1, None);
            // Nothing was fetched
            assert!(!h.store.exists(&head).await);
        });
    }

    #[test]
    fn empty_cache_catches_up_over_full_range() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;

            let older = build("thread_a", 100, "older");
            let target = build("thread_a", 200, "target");
            let peers = CountingPeers::default().respond(
                "/get/thread_a/-",
                vec![older.serialize(), target.serialize()],
            );

            h.index.subscribe("thread_a").await.unwrap();
            let src = peer();
            h.que.process(&target.head, Some(&src), &peers).await.unwrap();

            // Bulk catch-up stored both records
            assert!(h.store.has_live(&older.head).await);
            assert!(h.store.has_live(&target.head).await);

            // Re-announced excluding the source, marked good, indexed
            let announced = peers.announced.lock().await;
            assert_eq!(announced.len(), 1);
            assert_eq!(announced[0].1.as_ref(), Some(&src));
            assert_eq!(peers.good.lock().await.clone(), vec![src]);
            assert_eq!(h.recent.newest("thread_a").await, 200);
        });
    }

    #[test]
    fn populated_cache_fetches_single_record() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;

            // Seed the cache so the single-record path is taken
            let seeded = build("thread_a", 100, "seeded");
            h.store.save(&seeded).await.unwrap();
            h.index.subscribe("thread_a").await.unwrap();

            let target = build("thread_a", 200, "target");
            let request =
                format!("/get/thread_a/{}/{}", target.head.stamp, target.head.id);
            let peers = CountingPeers::default().respond(&request, vec![target.serialize()]);

            h.que.process(&target.head, Some(&peer()), &peers).await.unwrap();
            assert!(h.store.has_live(&target.head).await);
            assert_eq!(h.recent.newest("thread_a").await, 200);
        });
    }

    #[test]
    fn fetch_failure_propagates_and_drops_peer() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;

            h.index.subscribe("thread_a").await.unwrap();
            let target = build("thread_a", 200, "target");
            let peers = CountingPeers::default().fail("/get/thread_a/-");

            let src = peer();
            let res = h.que.process(&target.head, Some(&src), &peers).await;
            assert!(matches!(res, Err(Error::FetchFailed(_))));

            // Peer dropped, head left unindexed, nothing announced
            assert_eq!(peers.dropped.lock().await.clone(), vec![src]);
            assert_eq!(h.recent.newest("thread_a").await, 0);
            assert!(peers.announced.lock().await.is_empty());
        });
    }

    #[test]
    fn absent_target_after_range_fetch_is_a_failure() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;

            h.index.subscribe("thread_a").await.unwrap();
            let other = build("thread_a", 100, "other");
            let target = build("thread_a", 200, "target");
            let peers = CountingPeers::default()
                .respond("/get/thread_a/-", vec![other.serialize()]);

            let res = h.que.process(&target.head, Some(&peer()), &peers).await;
            assert!(matches!(res, Err(Error::FetchFailed(_))));

            // The response's other record was still admitted
            assert!(h.store.has_live(&other.head).await);
        });
    }

    #[test]
    fn spam_rejection_is_success_without_retention() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &["buy now"]).await;

            h.index.subscribe("thread_a").await.unwrap();
            let spam = build("thread_a", 200, "buy now cheap");
            let peers = CountingPeers::default()
                .respond("/get/thread_a/-", vec![spam.serialize()]);

            h.que.process(&spam.head, Some(&peer()), &peers).await.unwrap();

            // Tombstoned: known but not retained, never re-announced
            assert!(!h.store.has_live(&spam.head).await);
            assert!(h.store.exists(&spam.head).await);
            assert!(peers.announced.lock().await.is_empty());
            assert_eq!(h.recent.newest("thread_a").await, 0);
        });
    }

    #[test]
    fn corrupt_single_fetch_is_a_failure() {
        smol::block_on(async {
            let tmp = TempDir::new("update").unwrap();
            let h = harness(tmp.path(), &[]).await;

            let seeded = build("thread_a", 100, "seeded");
            h.store.save(&seeded).await.unwrap();
            h.index.subscribe("thread_a").await.unwrap();

            let target = build("thread_a", 200, "target");
            let request =
                format!("/get/thread_a/{}/{}", target.head.stamp, target.head.id);
            // Peer substitutes a different body under the same stamp/id
            let forged = format!("{}<>{}<>body:forged", target.head.stamp, target.head.id);
            let peers = CountingPeers::default().respond(&request, vec![forged]);

            let res = h.que.process(&target.head, Some(&peer()), &peers).await;
            assert!(matches!(res, Err(Error::FetchFailed(_))));
            assert!(!h.store.exists(&target.head).await);
        });
    }
}
