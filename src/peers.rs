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

use async_trait::async_trait;
use url::Url;

use crate::{record::RecordHead, Result};

/// The peer-set contract consumed by the replication engine. Peer
/// discovery, connection management and the wire transport live
/// behind this trait; the engine only issues textual requests and
/// reacts to line-oriented responses.
///
/// Request shapes used by the engine:
/// - `"/Recent/{startStampOrEmpty}-"` returns recency lines
/// - `"/get/{topic}/{stamp}/{id}"` returns zero or one record line
/// - `"/get/{topic}/-"` returns every record line of the topic
#[async_trait]
pub trait PeerSet: Send + Sync {
    /// Up to `n` known peers, excluding any given.
    async fn sample(&self, exclude: &[Url], n: usize) -> Vec<Url>;

    /// Send a textual request to a peer and collect the
    /// newline-delimited response lines.
    async fn talk(&self, peer: &Url, request: &str) -> Result<Vec<String>>;

    /// Forget a peer across all tracking tables.
    async fn drop_peer(&self, peer: &Url);

    /// Re-announce a record head to other peers, optionally excluding
    /// the peer it came from.
    async fn announce(&self, head: &RecordHead, exclude: Option<&Url>);

    /// Mark a peer as a good neighbour (join candidate set).
    async fn mark_good(&self, peer: &Url);

    /// Record a peer as a known source for a topic in the reverse
    /// lookup table.
    async fn add_source(&self, topic: &str, peer: &Url);

    /// Persist peer-set state.
    async fn persist(&self) -> Result<()>;
}
