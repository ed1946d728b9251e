//! Cache entry model.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::clock::Timestamp;
use super::keys::{CacheKey, TagSet};

/// Why a page was not cacheable, keyed by the rule that objected.
///
/// An empty explanation means "caching is permitted".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Explanation(BTreeMap<String, String>);

impl Explanation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reason. A rule adding a second reason replaces its first.
    pub fn add(&mut self, rule: impl Into<String>, reason: impl Into<String>) {
        self.0.insert(rule.into(), reason.into());
    }

    pub fn get(&self, rule: &str) -> Option<&str> {
        self.0.get(rule).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// Rendered page body.
    Page(Bytes),
    /// Negative entry: the reasons the page was not cached.
    Explanation(Explanation),
}

impl EntryContent {
    /// The explanation payload of a negative entry.
    pub fn explanation(&self) -> Option<&Explanation> {
        match self {
            Self::Explanation(explanation) if !explanation.is_empty() => Some(explanation),
            _ => None,
        }
    }
}

/// An entry handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub content: EntryContent,
    pub tags: TagSet,
}

/// An entry as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: CacheEntry,
    /// Absolute expiry; `0` means already expired.
    pub expires_at: Timestamp,
}

impl StoredEntry {
    pub fn explanation(&self) -> Option<&Explanation> {
        self.entry.content.explanation()
    }

    /// A real page that has not expired yet.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.explanation().is_none() && self.expires_at >= now
    }
}
