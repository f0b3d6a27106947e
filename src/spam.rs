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

use std::path::Path;

use regex::RegexSet;

use crate::{record::Record, util::file::load_lines, Result};

/// Pluggable spam predicate consulted on record admission.
pub trait SpamRule: Send + Sync {
    fn is_spam(&self, record: &Record) -> bool;
}

/// Regex-based spam matcher. Patterns are matched against the
/// record's serialized body.
pub struct SpamFilter {
    set: RegexSet,
}

impl SpamFilter {
    /// Build a filter from regex patterns. An empty pattern list
    /// matches nothing.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self { set: RegexSet::new(patterns)? })
    }

    /// Load patterns one-per-line from a file. A missing file yields
    /// an empty filter.
    pub fn from_file(path: &Path) -> Result<Self> {
        let lines = load_lines(path)?;
        Self::new(lines)
    }
}

impl SpamRule for SpamFilter {
    fn is_spam(&self, record: &Record) -> bool {
        self.set.is_match(&record.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(body: &str) -> Record {
        Record::build("thread_t", 1, vec![("body".to_string(), body.to_string())], None).unwrap()
    }

    #[test]
    fn filter_matches_patterns() {
        let filter = SpamFilter::new(["buy now", "(?i)casino"]).unwrap();
        assert!(!filter.is_spam(&record("BUY NOW limited offer")));
        assert!(filter.is_spam(&record("buy now limited offer")));
        assert!(filter.is_spam(&record("Best CASINO in town")));
        assert!(!filter.is_spam(&record("ordinary message")));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = SpamFilter::new(Vec::<String>::new()).unwrap();
        assert!(!filter.is_spam(&record("anything at all")));
    }
}
