//! Cache key and tag definitions.
//!
//! A `CacheKey` identifies one cached page; a `Tag` is an invalidation label shared by any number
//! of entries.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Reserved tag carried by every negative (explanation) entry.
pub const EXPLANATION_TAG: &str = "explanation";

/// Canonical identity of a cached page: the normalized absolute request URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Normalize a request URI into a cache key.
    ///
    /// URIs that parse are re-serialized by `url` (scheme and host lowercased, default port and
    /// fragment dropped). Anything else is used verbatim after trimming.
    pub fn from_uri(uri: &str) -> Self {
        let trimmed = uri.trim();
        match Url::parse(trimmed) {
            Ok(mut url) => {
                url.set_fragment(None);
                Self(url.as_str().to_string())
            }
            Err(_) => Self(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalidation label attached to cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// `pageId:<id>`
    pub fn page(page_id: u64) -> Self {
        Self(format!("pageId:{page_id}"))
    }

    /// `domain:<host>`, with dots replaced so the tag stays a valid storage tag key.
    pub fn domain(host: &str) -> Self {
        Self(format!("domain:{}", host.replace('.', "_")))
    }

    pub fn explanation() -> Self {
        Self(EXPLANATION_TAG.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Order-insensitive, deduplicated set of tags.
pub type TagSet = BTreeSet<Tag>;
