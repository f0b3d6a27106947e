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

//! Record replication and retention engine for a peer-to-peer
//! bulletin board. Independent hosts replicate append-only,
//! topic-partitioned logs ("threads") via pull/push gossip.

/// Error library
pub mod error;
pub use error::{Error, Result};

/// Engine configuration
pub mod settings;

/// Utilities (time, file helpers)
pub mod util;

/// Async runtime utilities
pub mod system;

/// Deterministic-keypair signature scheme
pub mod crypto;

/// Record data model and on-disk store
pub mod record;

/// Per-topic cache facade and subscribed-topic index
pub mod cache;

/// Global recency index driving gossip
pub mod recent;

/// Anti-entropy update controller
pub mod update;

/// Community tag aggregation
pub mod tags;

/// Peer-set contract consumed by the engine
pub mod peers;

/// Pluggable spam matching
pub mod spam;
