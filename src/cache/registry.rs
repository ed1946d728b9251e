//! Bidirectional tag index.
//!
//! Tracks which cache keys carry which tags so that invalidating one tag can find every entry it
//! affects, and so that stale tag memberships are dropped when an entry is replaced or evicted.
//! The index holds no lock of its own; the store mutates it under the same guard as its entries.

use std::collections::{HashMap, HashSet};

use super::keys::{CacheKey, Tag, TagSet};

/// Tag ↔ key mappings for the in-memory store.
#[derive(Default)]
pub(crate) struct TagRegistry {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, TagSet>,
}

impl TagRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `key` now carries exactly `tags`.
    ///
    /// Tags from a previous registration of the same key are dropped first.
    pub(crate) fn register(&mut self, key: CacheKey, tags: TagSet) {
        self.unregister(&key);
        for tag in &tags {
            self.tag_to_keys
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.key_to_tags.insert(key, tags);
    }

    /// Forget a key. Returns the tags it carried.
    pub(crate) fn unregister(&mut self, key: &CacheKey) -> Option<TagSet> {
        let tags = self.key_to_tags.remove(key)?;
        for tag in &tags {
            if let Some(keys) = self.tag_to_keys.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_to_keys.remove(tag);
                }
            }
        }
        Some(tags)
    }

    pub(crate) fn keys_for_tag(&self, tag: &Tag) -> HashSet<CacheKey> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub(crate) fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    #[cfg(test)]
    pub(crate) fn tags_for_key(&self, key: &CacheKey) -> TagSet {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> CacheKey {
        CacheKey::from_uri(&format!("https://example.com{path}"))
    }

    fn tags(values: &[&str]) -> TagSet {
        values.iter().copied().map(Tag::from).collect()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = TagRegistry::new();
        registry.register(key("/a"), tags(&["pageId:1", "domain:example_com"]));

        let keys = registry.keys_for_tag(&Tag::from("pageId:1"));
        assert!(keys.contains(&key("/a")));
        assert_eq!(registry.tags_for_key(&key("/a")).len(), 2);
    }

    #[test]
    fn shared_tag_maps_to_every_key() {
        let mut registry = TagRegistry::new();
        registry.register(key("/a"), tags(&["domain:example_com", "pageId:1"]));
        registry.register(key("/b"), tags(&["domain:example_com", "pageId:2"]));

        let keys = registry.keys_for_tag(&Tag::from("domain:example_com"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn re_registering_replaces_tags() {
        let mut registry = TagRegistry::new();
        registry.register(key("/a"), tags(&["pageId:1", "explanation"]));
        registry.register(key("/a"), tags(&["pageId:1"]));

        assert!(registry.keys_for_tag(&Tag::explanation()).is_empty());
        assert_eq!(registry.tag_count(), 1);
    }

    #[test]
    fn unregister_cleans_up_both_directions() {
        let mut registry = TagRegistry::new();
        registry.register(key("/a"), tags(&["pageId:1"]));

        let removed = registry.unregister(&key("/a")).expect("registered key");
        assert_eq!(removed, tags(&["pageId:1"]));
        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.tag_count(), 0);
        assert!(registry.unregister(&key("/a")).is_none());
    }
}
