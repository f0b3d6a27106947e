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

//! The entry data model: a [`RecordHead`] is the identity-only
//! projection used for indexing and gossip, a [`Record`] owns the
//! ordered field body, its canonical serialization and the
//! authenticity checks.

use crate::{crypto, Error, Result};

/// On-disk record store
pub mod store;
pub use store::{Admission, RecordStore, RecordStorePtr};

/// Field delimiter on the wire
pub const FIELD_DELIM: &str = "<>";

/// Reserved prefix identifying thread-topic identifiers
pub const TOPIC_PREFIX: &str = "thread_";

/// Lowercase hex digest used for record IDs, shard names and dedup keys.
pub fn digest_hex(data: &str) -> String {
    blake3::hash(data.as_bytes()).to_hex().to_string()
}

/// Deterministic shard directory name for a topic.
pub fn topic_shard(topic: &str) -> String {
    digest_hex(topic)
}

fn is_hex_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Lightweight record identity. `(topic, stamp, id)` is globally
/// unique; `idstr()` is the on-disk filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordHead {
    /// Topic ("thread") this record belongs to
    pub topic: String,
    /// Unix-second stamp assigned at authorship
    pub stamp: i64,
    /// Hex digest of the record body
    pub id: String,
}

impl RecordHead {
    pub fn new(topic: &str, stamp: i64, id: &str) -> Self {
        Self { topic: topic.to_string(), stamp, id: id.to_string() }
    }

    /// Parse a recency line `stamp<>id<>topic`. Trailing fields are
    /// tolerated (see [`Record::parse_recent`]).
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.trim_end_matches('\n').split(FIELD_DELIM);

        let stamp = parts
            .next()
            .ok_or(Error::ParseFailed("recency line missing stamp"))?
            .parse::<i64>()
            .map_err(|_| Error::ParseFailed("recency line bad stamp"))?;

        let id = parts.next().ok_or(Error::ParseFailed("recency line missing id"))?;
        if !is_hex_id(id) {
            return Err(Error::ParseFailed("recency line bad id"))
        }

        let topic = parts.next().ok_or(Error::ParseFailed("recency line missing topic"))?;
        if !topic.starts_with(TOPIC_PREFIX) {
            return Err(Error::ParseFailed("topic missing reserved prefix"))
        }

        Ok(Self::new(topic, stamp, id))
    }

    /// The recency wire line for this head.
    pub fn recency_line(&self) -> String {
        format!("{}{}{}{}{}", self.stamp, FIELD_DELIM, self.id, FIELD_DELIM, self.topic)
    }

    /// On-disk filename
    pub fn idstr(&self) -> String {
        format!("{}_{}", self.stamp, self.id)
    }

    /// Rebuild a head from an on-disk filename.
    pub fn from_idstr(topic: &str, name: &str) -> Result<Self> {
        let (stamp, id) = name.split_once('_').ok_or(Error::ParseFailed("bad idstr"))?;
        let stamp = stamp.parse::<i64>().map_err(|_| Error::ParseFailed("bad idstr stamp"))?;
        if !is_hex_id(id) {
            return Err(Error::ParseFailed("bad idstr id"))
        }
        Ok(Self::new(topic, stamp, id))
    }

    /// Shard directory this head maps to.
    pub fn shard(&self) -> String {
        topic_shard(&self.topic)
    }
}

/// A full entry: head plus an ordered field body. Field insertion
/// order is canonical; serialization and signatures cover exactly
/// that order.
#[derive(Clone, Debug)]
pub struct Record {
    pub head: RecordHead,
    fields: Vec<(String, String)>,
    loaded: bool,
}

impl Record {
    /// An unloaded record carrying only its identity.
    pub fn new(head: RecordHead) -> Self {
        Self { head, fields: vec![], loaded: false }
    }

    /// Whether the body has been parsed from a line or disk.
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Field lookup by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Parse a full record line `stamp<>id<>key:value<>...` received
    /// for `topic`. Values get `<br>` translated to newline and any
    /// remaining `<`/`>` entity-escaped. Duplicate keys are a hard
    /// parse error.
    pub fn from_line(topic: &str, line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.trim_end_matches('\n').split(FIELD_DELIM).collect();
        if parts.len() < 3 {
            return Err(Error::ParseFailed("record line too short"))
        }

        let stamp =
            parts[0].parse::<i64>().map_err(|_| Error::ParseFailed("record line bad stamp"))?;

        let id = parts[1];
        if !is_hex_id(id) {
            return Err(Error::ParseFailed("record line bad id"))
        }

        let fields = parse_fields(&parts[2..])?;

        Ok(Self { head: RecordHead::new(topic, stamp, id), fields, loaded: true })
    }

    /// Parse a record body line into this record. The line's stamp
    /// and id must match the already-known head; a mismatch means the
    /// line was substituted in transit or on disk.
    pub fn load_body(&mut self, line: &str) -> Result<()> {
        let parsed = Self::from_line(&self.head.topic, line)?;

        if parsed.head.stamp != self.head.stamp || parsed.head.id != self.head.id {
            return Err(Error::ParseFailed("record line stamp/id mismatch"))
        }

        self.fields = parsed.fields;
        self.loaded = true;
        Ok(())
    }

    /// Parse an extended recency line `stamp<>id<>topic<>key:value...`
    /// into a transient record. Used on gossip responses where peers
    /// attach metadata such as `tag` to the head.
    pub fn parse_recent(line: &str) -> Result<Self> {
        let head = RecordHead::parse(line)?;

        let parts: Vec<&str> = line.trim_end_matches('\n').split(FIELD_DELIM).collect();
        let fields = parse_fields(&parts[3..])?;

        Ok(Self { head, fields, loaded: false })
    }

    /// Author a new record. Fields keep caller-supplied order. With a
    /// passphrase the canonical serialization is signed: `pubkey`,
    /// `sign` and `target` are appended as the final fields, `target`
    /// naming exactly the signed field names in order. Returns the
    /// computed id.
    pub fn build(
        topic: &str,
        stamp: i64,
        fields: Vec<(String, String)>,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        if !topic.starts_with(TOPIC_PREFIX) {
            return Err(Error::ParseFailed("topic missing reserved prefix"))
        }

        let mut clean: Vec<(String, String)> = vec![];
        for (key, value) in fields {
            if key.is_empty() || key.contains([':', '<', '>', '\n']) {
                return Err(Error::ParseFailed("bad field key"))
            }
            if matches!(key.as_str(), "pubkey" | "sign" | "target") {
                return Err(Error::ParseFailed("reserved field key"))
            }
            if clean.iter().any(|(k, _)| k == &key) {
                return Err(Error::ParseFailed("duplicate field key"))
            }
            clean.push((key, sanitize_value(&value)));
        }

        if let Some(passphrase) = passphrase {
            let key = crypto::derive_key(passphrase)?;

            let target: Vec<&str> = clean.iter().map(|(k, _)| k.as_str()).collect();
            let payload: Vec<&str> = clean.iter().map(|(_, v)| v.as_str()).collect();
            let message = digest_hex(&payload.join(FIELD_DELIM));
            let signature = crypto::sign(message.as_bytes(), &key);

            let target = target.join(",");
            clean.push(("pubkey".to_string(), key.public_string()));
            clean.push(("sign".to_string(), signature));
            clean.push(("target".to_string(), target));
        }

        let body = serialize_fields(&clean);
        let id = digest_hex(&body);

        Ok(Self { head: RecordHead::new(topic, stamp, &id), fields: clean, loaded: true })
    }

    /// Canonical full-line serialization `stamp<>id<>key:value<>...`
    pub fn serialize(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.head.stamp,
            FIELD_DELIM,
            self.head.id,
            FIELD_DELIM,
            serialize_fields(&self.fields)
        )
    }

    /// Serialized length in bytes.
    pub fn size(&self) -> usize {
        self.serialize().len()
    }

    /// True only if `pubkey`, `sign` and `target` are all present,
    /// every name in `target` exists as a field, and the signature
    /// verifies over the target-field digest.
    pub fn check_authenticity(&self) -> bool {
        let (Some(pubkey), Some(sign), Some(target)) =
            (self.get("pubkey"), self.get("sign"), self.get("target"))
        else {
            return false
        };

        let mut payload = vec![];
        for name in target.split(',') {
            let Some(value) = self.get(name) else { return false };
            payload.push(value);
        }

        let message = digest_hex(&payload.join(FIELD_DELIM));
        crypto::verify(message.as_bytes(), sign, pubkey)
    }

    /// Check the stamp lies in `[begin, end]` (`end = None` means no
    /// upper bound) and the body digest matches the claimed id.
    pub fn validate(&self, begin: i64, end: Option<i64>) -> Result<()> {
        if self.head.stamp < begin {
            return Err(Error::OutOfRange)
        }
        if let Some(end) = end {
            if self.head.stamp > end {
                return Err(Error::OutOfRange)
            }
        }

        if digest_hex(&serialize_fields(&self.fields)) != self.head.id {
            return Err(Error::DigestMismatch)
        }

        Ok(())
    }
}

fn parse_fields(parts: &[&str]) -> Result<Vec<(String, String)>> {
    let mut fields: Vec<(String, String)> = vec![];

    for part in parts {
        let (key, value) = part.split_once(':').ok_or(Error::ParseFailed("field missing colon"))?;
        if key.is_empty() {
            return Err(Error::ParseFailed("empty field key"))
        }
        if fields.iter().any(|(k, _)| k == key) {
            return Err(Error::ParseFailed("duplicate field key"))
        }
        fields.push((key.to_string(), unescape_value(value)));
    }

    Ok(fields)
}

fn serialize_fields(fields: &[(String, String)]) -> String {
    let parts: Vec<String> =
        fields.iter().map(|(k, v)| format!("{}:{}", k, escape_value(v))).collect();
    parts.join(FIELD_DELIM)
}

fn escape_value(value: &str) -> String {
    value.replace('\n', "<br>")
}

fn unescape_value(value: &str) -> String {
    value.replace("<br>", "\n").replace('<', "&lt;").replace('>', "&gt;")
}

/// Values in authored records must never carry raw angle brackets,
/// or the serialization would not survive its own parse.
fn sanitize_value(value: &str) -> String {
    value.replace('<', "&lt;").replace('>', "&gt;")
}
