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

//! End-to-end gossip rounds between two nodes. Node A's stores are
//! exposed to node B through a `PeerSet` bridge answering the wire
//! requests the engine issues.

use std::{collections::HashMap, path::Path, sync::Arc};

use async_trait::async_trait;
use smol::lock::Mutex;
use tempdir::TempDir;
use url::Url;

use agora::{
    cache::{Cache, TopicIndex, TopicIndexPtr},
    peers::PeerSet,
    recent::{RecentList, RecentListPtr},
    record::{Record, RecordHead, RecordStore, RecordStorePtr},
    settings::{Settings, SettingsPtr},
    spam::SpamFilter,
    tags::SuggestedTagTable,
    update::{UpdateQue, UpdateQuePtr},
    util::time::Timestamp,
    Error, Result,
};

fn init_logger() {
    let cfg = simplelog::ConfigBuilder::new().build();
    let _ = simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        cfg,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
}

/// One node's replication engine state.
struct Node {
    settings: SettingsPtr,
    store: RecordStorePtr,
    index: TopicIndexPtr,
    recent: RecentListPtr,
    tags: Arc<SuggestedTagTable>,
    que: UpdateQuePtr,
}

impl Node {
    async fn new(base: &Path, settings: Settings) -> Node {
        let settings = Arc::new(Settings { base_dir: base.to_path_buf(), ..settings });
        let store = RecordStore::new(&settings.store_dir()).await.unwrap();
        let index = TopicIndex::new(&settings.topics_path()).unwrap();
        let recent = RecentList::new(&settings.recent_path(), settings.clone()).unwrap();
        let tags = SuggestedTagTable::new(&settings.tags_path(), settings.clone()).unwrap();
        let spam = Arc::new(SpamFilter::new(Vec::<String>::new()).unwrap());
        let que = UpdateQue::new(
            settings.clone(),
            store.clone(),
            index.clone(),
            recent.clone(),
            spam,
        );
        Node { settings, store, index, recent, tags, que }
    }

    /// One full gossip round: pull recency info, then react to every
    /// indexed head.
    async fn gossip_round(&self, peers: &dyn PeerSet, source: &Url) {
        self.recent.getall(peers, &self.tags).await.unwrap();
        for head in self.recent.heads().await {
            // A failed fetch only skips this one update
            let _ = self.que.process(&head, Some(source), peers).await;
        }
    }
}

/// Bridges node A's record store into the `PeerSet` contract so
/// another node can gossip with it in-process.
struct NodeBridge {
    url: Url,
    topics: Vec<String>,
    store: RecordStorePtr,
    /// Scripted recency lines served instead of the store's heads
    recent_lines: Option<Vec<String>>,
    /// Scripted responses consulted before the store
    overrides: HashMap<String, Vec<String>>,
    announced: Mutex<Vec<RecordHead>>,
    dropped: Mutex<Vec<Url>>,
}

impl NodeBridge {
    fn new(store: RecordStorePtr, topics: &[&str]) -> Self {
        Self {
            url: Url::parse("tcp://node-a.example:8000").unwrap(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            store,
            recent_lines: None,
            overrides: HashMap::new(),
            announced: Mutex::new(vec![]),
            dropped: Mutex::new(vec![]),
        }
    }

    fn with_recent(mut self, lines: Vec<String>) -> Self {
        self.recent_lines = Some(lines);
        self
    }

    fn with_override(mut self, request: &str, lines: Vec<String>) -> Self {
        self.overrides.insert(request.to_string(), lines);
        self
    }
}

#[async_trait]
impl PeerSet for NodeBridge {
    async fn sample(&self, exclude: &[Url], _n: usize) -> Vec<Url> {
        if exclude.contains(&self.url) {
            return vec![]
        }
        vec![self.url.clone()]
    }

    async fn talk(&self, _peer: &Url, request: &str) -> Result<Vec<String>> {
        if let Some(lines) = self.overrides.get(request) {
            return Ok(lines.clone())
        }

        if request.starts_with("/Recent/") {
            if let Some(lines) = &self.recent_lines {
                return Ok(lines.clone())
            }
            let mut lines = vec![];
            for topic in &self.topics {
                for head in self.store.list(topic).await? {
                    lines.push(head.recency_line());
                }
            }
            return Ok(lines)
        }

        if let Some(rest) = request.strip_prefix("/get/") {
            let parts: Vec<&str> = rest.split('/').collect();
            match parts.as_slice() {
                [topic, "-"] => {
                    let mut lines = vec![];
                    for head in self.store.list(topic).await? {
                        lines.push(self.store.load(&head).await?.serialize());
                    }
                    return Ok(lines)
                }
                [topic, stamp, id] => {
                    let head = RecordHead::new(
                        topic,
                        stamp.parse().map_err(Error::from)?,
                        id,
                    );
                    return match self.store.load(&head).await {
                        Ok(record) => Ok(vec![record.serialize()]),
                        Err(_) => Ok(vec![]),
                    }
                }
                _ => {}
            }
        }

        Err(Error::FetchFailed(format!("unhandled request {}", request)))
    }

    async fn drop_peer(&self, peer: &Url) {
        self.dropped.lock().await.push(peer.clone());
    }

    async fn announce(&self, head: &RecordHead, _exclude: Option<&Url>) {
        self.announced.lock().await.push(head.clone());
    }

    async fn mark_good(&self, _peer: &Url) {}

    async fn add_source(&self, _topic: &str, _peer: &Url) {}

    async fn persist(&self) -> Result<()> {
        Ok(())
    }
}

fn body_fields(body: &str) -> Vec<(String, String)> {
    vec![("body".to_string(), body.to_string())]
}

#[test]
fn record_replicates_between_nodes() {
    init_logger();
    smol::block_on(async {
        let tmp = TempDir::new("gossip").unwrap();

        // Node A authors a record in thread_1
        let node_a = Node::new(&tmp.path().join("a"), Settings::default()).await;
        let stamp = Timestamp::current_time().0 - 1000;
        let record = Record::build("thread_1", stamp, body_fields("hi"), None).unwrap();
        node_a.store.save(&record).await.unwrap();
        node_a.index.subscribe("thread_1").await.unwrap();
        node_a.recent.append(&record.head).await;

        // Node B subscribes to the topic and gossips with A
        let node_b = Node::new(&tmp.path().join("b"), Settings::default()).await;
        node_b.index.subscribe("thread_1").await.unwrap();

        let bridge = NodeBridge::new(node_a.store.clone(), &["thread_1"]);
        node_b.gossip_round(&bridge, &bridge.url.clone()).await;

        // B now holds the record
        let cache = Cache::new("thread_1", node_b.store.clone(), node_b.settings.clone());
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.stamp().await, stamp);

        // And re-announced the head it fetched
        assert_eq!(bridge.announced.lock().await.clone(), vec![record.head.clone()]);

        // A second round changes nothing: the update is deduplicated
        node_b.gossip_round(&bridge, &bridge.url.clone()).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(bridge.announced.lock().await.len(), 1);
    });
}

#[test]
fn corrupt_record_never_reaches_a_cache() {
    init_logger();
    smol::block_on(async {
        let tmp = TempDir::new("gossip").unwrap();

        let node_a = Node::new(&tmp.path().join("a"), Settings::default()).await;
        let node_b = Node::new(&tmp.path().join("b"), Settings::default()).await;
        node_b.index.subscribe("thread_1").await.unwrap();

        // A claims a head whose body digest does not match its id
        let stamp = Timestamp::current_time().0 - 1000;
        let genuine = Record::build("thread_1", stamp, body_fields("hi"), None).unwrap();
        let forged_line =
            format!("{}<>{}<>body:forged", genuine.head.stamp, genuine.head.id);

        let bridge = NodeBridge::new(node_a.store.clone(), &[])
            .with_recent(vec![genuine.head.recency_line()])
            .with_override("/get/thread_1/-", vec![forged_line]);

        node_b.gossip_round(&bridge, &bridge.url.clone()).await;

        // The head was indexed from gossip, but no record was stored
        let cache = Cache::new("thread_1", node_b.store.clone(), node_b.settings.clone());
        assert_eq!(cache.len().await, 0);
        assert!(!node_b.store.exists(&genuine.head).await);

        // The lying peer was dropped over the failed fetch
        assert_eq!(bridge.dropped.lock().await.clone(), vec![bridge.url.clone()]);
    });
}

#[test]
fn oversized_record_is_tombstoned() {
    init_logger();
    smol::block_on(async {
        let tmp = TempDir::new("gossip").unwrap();

        let node_a = Node::new(&tmp.path().join("a"), Settings::default()).await;
        let stamp = Timestamp::current_time().0 - 1000;
        let record =
            Record::build("thread_1", stamp, body_fields(&"x".repeat(2048)), None).unwrap();
        node_a.store.save(&record).await.unwrap();

        // B admits at most 1 KiB per record
        let node_b = Node::new(
            &tmp.path().join("b"),
            Settings { record_limit: 1024, ..Default::default() },
        )
        .await;
        node_b.index.subscribe("thread_1").await.unwrap();

        let bridge = NodeBridge::new(node_a.store.clone(), &["thread_1"]);
        node_b.gossip_round(&bridge, &bridge.url.clone()).await;

        // Tombstoned, not retained: the cache stays empty but the
        // identity is known and will not be fetched again
        let cache = Cache::new("thread_1", node_b.store.clone(), node_b.settings.clone());
        assert!(!cache.has_record().await);
        assert!(node_b.store.exists(&record.head).await);
        assert!(!node_b.store.has_live(&record.head).await);
    });
}
