//! Cache store contract and the in-memory reference store.
//!
//! The admission engine only needs `get`, `set` and `flush_by_tag`. Production deployments plug
//! their own storage engine in behind [`CacheStore`]; [`InMemoryStore`] is a bounded LRU with a
//! tag index, enough for tests, scenario replay and single-process use.

use std::fmt;
use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tracing::{error, info};

use super::clock::{Clock, Timestamp};
use super::config::CacheConfig;
use super::entry::{CacheEntry, StoredEntry};
use super::keys::{CacheKey, Tag};
use super::lock;
use super::metrics::{METRIC_EVICT_TOTAL, METRIC_FLUSH_TOTAL};
use super::registry::TagRegistry;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("refusing to store untagged entry `{key}`")]
    Untagged { key: CacheKey },
}

/// Tag-indexed storage for cached pages.
///
/// Implementations provide atomic per-key `set` and a consistent `get`; the engine adds no
/// locking of its own on top.
pub trait CacheStore: Send + Sync {
    /// The entry for `key`, expired or not.
    fn get(&self, key: &CacheKey) -> Option<StoredEntry>;

    /// Store `entry`, replacing any previous entry for its key. A TTL of zero or less stores the
    /// entry as already expired.
    fn set(&self, entry: CacheEntry, ttl_seconds: i64) -> Result<(), StoreError>;

    /// Remove every entry carrying `tag`. Returns how many were removed.
    fn flush_by_tag(&self, tag: &Tag) -> usize;
}

/// A store that may have failed to come up.
#[derive(Clone)]
pub enum StoreHandle {
    Available(Arc<dyn CacheStore>),
    Unavailable { reason: String },
}

impl StoreHandle {
    /// Acquire a store, degrading to [`StoreHandle::Unavailable`] on failure.
    pub fn acquire<F>(acquire: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn CacheStore>, StoreError>,
    {
        match acquire() {
            Ok(store) => Self::Available(store),
            Err(err) => {
                error!(error = %err, "Problems getting the cache store, static caching disabled");
                Self::Unavailable {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn store(&self) -> Option<&dyn CacheStore> {
        match self {
            Self::Available(store) => Some(store.as_ref()),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(_) => f.write_str("StoreHandle::Available"),
            Self::Unavailable { reason } => f
                .debug_struct("StoreHandle::Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

impl From<Arc<dyn CacheStore>> for StoreHandle {
    fn from(store: Arc<dyn CacheStore>) -> Self {
        Self::Available(store)
    }
}

/// Entries and their tag index, always mutated together.
struct Shelf {
    entries: LruCache<CacheKey, StoredEntry>,
    tags: TagRegistry,
}

impl Shelf {
    fn remove(&mut self, key: &CacheKey) -> bool {
        self.tags.unregister(key);
        self.entries.pop(key).is_some()
    }
}

/// Bounded in-memory store with a tag index.
pub struct InMemoryStore {
    shelf: RwLock<Shelf>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shelf: RwLock::new(Shelf {
                entries: LruCache::new(config.capacity_non_zero()),
                tags: TagRegistry::new(),
            }),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        lock::read(&self.shelf, "store.len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct tags carried by stored entries.
    pub fn tag_count(&self) -> usize {
        lock::read(&self.shelf, "store.tag_count").tags.tag_count()
    }

    /// Snapshot of all entries, ordered by key.
    pub fn entries(&self) -> Vec<StoredEntry> {
        let mut entries: Vec<StoredEntry> = lock::read(&self.shelf, "store.entries")
            .entries
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| a.entry.key.cmp(&b.entry.key));
        entries
    }

    /// Drop entries whose expiry has passed. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut shelf = lock::write(&self.shelf, "store.purge_expired");
        let expired: Vec<CacheKey> = shelf
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at < now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            shelf.remove(key);
        }
        expired.len()
    }

    fn expires_at(&self, ttl_seconds: i64) -> Timestamp {
        if ttl_seconds > 0 {
            self.clock.now().saturating_add(ttl_seconds)
        } else {
            0
        }
    }
}

impl CacheStore for InMemoryStore {
    fn get(&self, key: &CacheKey) -> Option<StoredEntry> {
        lock::write(&self.shelf, "store.get")
            .entries
            .get(key)
            .cloned()
    }

    fn set(&self, entry: CacheEntry, ttl_seconds: i64) -> Result<(), StoreError> {
        if entry.tags.is_empty() {
            return Err(StoreError::Untagged { key: entry.key });
        }

        let key = entry.key.clone();
        let tags = entry.tags.clone();
        let stored = StoredEntry {
            entry,
            expires_at: self.expires_at(ttl_seconds),
        };

        let mut shelf = lock::write(&self.shelf, "store.set");
        if let Some((evicted_key, _)) = shelf.entries.push(key.clone(), stored) {
            if evicted_key != key {
                counter!(METRIC_EVICT_TOTAL).increment(1);
                shelf.tags.unregister(&evicted_key);
            }
        }
        shelf.tags.register(key, tags);
        Ok(())
    }

    fn flush_by_tag(&self, tag: &Tag) -> usize {
        let removed = {
            let mut shelf = lock::write(&self.shelf, "store.flush_by_tag");
            let keys = shelf.tags.keys_for_tag(tag);
            keys.iter().filter(|key| shelf.remove(key)).count()
        };

        counter!(METRIC_FLUSH_TOTAL).increment(removed as u64);
        info!(tag = %tag, removed, "Flushed cache entries by tag");
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Barrier;
    use std::thread;

    use bytes::Bytes;

    use super::*;
    use crate::cache::clock::FixedClock;
    use crate::cache::entry::{EntryContent, Explanation};
    use crate::cache::keys::TagSet;

    const NOW: Timestamp = 1_000;

    fn store_with_capacity(capacity: usize) -> (Arc<FixedClock>, InMemoryStore) {
        let clock = Arc::new(FixedClock::new(NOW));
        let config = CacheConfig {
            capacity,
            ..Default::default()
        };
        let store = InMemoryStore::new(&config, clock.clone());
        (clock, store)
    }

    fn indexed_tags(store: &InMemoryStore, key: &CacheKey) -> TagSet {
        lock::read(&store.shelf, "test.indexed_tags")
            .tags
            .tags_for_key(key)
    }

    fn indexed_keys(store: &InMemoryStore, tag: &Tag) -> usize {
        lock::read(&store.shelf, "test.indexed_keys")
            .tags
            .keys_for_tag(tag)
            .len()
    }

    fn page(path: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry {
            key: CacheKey::from_uri(&format!("https://example.com{path}")),
            content: EntryContent::Page(Bytes::from(format!("<html>{path}</html>"))),
            tags: tags.iter().copied().map(Tag::from).collect(),
        }
    }

    #[test]
    fn set_then_get() {
        let (_, store) = store_with_capacity(10);
        let entry = page("/a", &["pageId:1"]);
        let key = entry.key.clone();

        store.set(entry.clone(), 60).expect("stored");

        let stored = store.get(&key).expect("cached entry");
        assert_eq!(stored.entry, entry);
        assert_eq!(stored.expires_at, NOW + 60);
        assert!(stored.is_valid_at(NOW));
    }

    #[test]
    fn zero_ttl_is_already_expired() {
        let (_, store) = store_with_capacity(10);
        let mut explanation = Explanation::new();
        explanation.add("NoNoCache", "no_cache set");
        let entry = CacheEntry {
            content: EntryContent::Explanation(explanation),
            ..page("/a", &["pageId:1", "explanation"])
        };
        let key = entry.key.clone();

        store.set(entry, 0).expect("stored");

        assert_eq!(store.get(&key).expect("cached entry").expires_at, 0);
    }

    #[test]
    fn untagged_entries_are_rejected() {
        let (_, store) = store_with_capacity(10);
        let err = store.set(page("/a", &[]), 60).expect_err("untagged");
        assert!(matches!(err, StoreError::Untagged { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn flush_by_tag_removes_every_sharing_entry() {
        let (_, store) = store_with_capacity(10);
        store
            .set(page("/a", &["pageId:1", "domain:example_com"]), 60)
            .expect("stored");
        store
            .set(page("/b", &["pageId:2", "domain:example_com"]), 60)
            .expect("stored");
        store.set(page("/c", &["pageId:3"]), 60).expect("stored");

        assert_eq!(store.flush_by_tag(&Tag::from("domain:example_com")), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(
            lock::read(&store.shelf, "test.key_count").tags.key_count(),
            1
        );
        assert_eq!(store.flush_by_tag(&Tag::from("domain:example_com")), 0);
    }

    #[test]
    fn overwrite_drops_previous_tags() {
        let (_, store) = store_with_capacity(10);
        store
            .set(page("/a", &["pageId:1", "explanation"]), 0)
            .expect("stored");
        store.set(page("/a", &["pageId:1"]), 60).expect("stored");

        assert_eq!(store.flush_by_tag(&Tag::explanation()), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn lru_eviction_unregisters_tags() {
        let (_, store) = store_with_capacity(1);
        store.set(page("/a", &["pageId:1"]), 60).expect("stored");
        store.set(page("/b", &["pageId:2"]), 60).expect("stored");

        assert_eq!(store.len(), 1);
        assert_eq!(indexed_keys(&store, &Tag::page(1)), 0);
        assert_eq!(
            indexed_tags(&store, &CacheKey::from_uri("https://example.com/b")),
            TagSet::from([Tag::page(2)])
        );
    }

    #[test]
    fn purge_expired_drops_only_stale_entries() {
        let (clock, store) = store_with_capacity(10);
        store.set(page("/short", &["pageId:1"]), 10).expect("stored");
        store.set(page("/long", &["pageId:2"]), 100).expect("stored");

        clock.advance(50);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(indexed_keys(&store, &Tag::page(1)), 0);
        assert_eq!(store.tag_count(), 1);
    }

    #[test]
    fn entries_snapshot_is_sorted() {
        let (_, store) = store_with_capacity(10);
        store.set(page("/b", &["pageId:2"]), 60).expect("stored");
        store.set(page("/a", &["pageId:1"]), 60).expect("stored");

        let keys: Vec<String> = store
            .entries()
            .into_iter()
            .map(|stored| stored.entry.key.to_string())
            .collect();
        assert_eq!(keys, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn acquire_failure_yields_unavailable_handle() {
        let handle = StoreHandle::acquire(|| Err(StoreError::Unavailable("backend down".into())));
        assert!(!handle.is_available());
        assert!(handle.store().is_none());
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let (_, store) = store_with_capacity(10);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .shelf
                .write()
                .expect("shelf lock should be acquired");
            panic!("poison shelf lock");
        }));

        store.set(page("/a", &["pageId:1"]), 60).expect("stored");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_overwrites_keep_index_in_step_with_entries() {
        const WRITERS: usize = 8;
        let (_, store) = store_with_capacity(10);
        let store = Arc::new(store);
        let key = CacheKey::from_uri("https://example.com/a");

        for round in 0..300 {
            let barrier = Arc::new(Barrier::new(WRITERS));
            let writers: Vec<_> = (0..WRITERS)
                .map(|writer| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let record = format!("record:{writer}");
                        barrier.wait();
                        store
                            .set(page("/a", &["pageId:1", record.as_str()]), 60)
                            .expect("stored");
                    })
                })
                .collect();
            for writer in writers {
                writer.join().expect("writer thread");
            }

            let stored = store.get(&key).expect("cached entry");
            assert_eq!(
                stored.entry.tags,
                indexed_tags(&store, &key),
                "round {round}: index disagrees with stored entry"
            );

            let record = stored
                .entry
                .tags
                .iter()
                .find(|tag| tag.as_str().starts_with("record:"))
                .cloned()
                .expect("record tag");
            assert_eq!(store.flush_by_tag(&record), 1, "round {round}");
            assert!(store.get(&key).is_none(), "round {round}");
            assert_eq!(store.tag_count(), 0, "round {round}");
        }
    }

    #[test]
    fn flush_racing_overwrite_never_orphans_the_entry() {
        let (_, store) = store_with_capacity(10);
        let store = Arc::new(store);
        let key = CacheKey::from_uri("https://example.com/a");

        for round in 0..300 {
            store.set(page("/a", &["pageId:1"]), 60).expect("stored");
            let barrier = Arc::new(Barrier::new(2));

            let flusher = {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.flush_by_tag(&Tag::page(1));
                })
            };
            let writer = {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.set(page("/a", &["pageId:1"]), 60).expect("stored");
                })
            };
            flusher.join().expect("flusher thread");
            writer.join().expect("writer thread");

            // Whichever ran last, a surviving entry must still be reachable through its tag.
            if store.get(&key).is_some() {
                assert_eq!(indexed_tags(&store, &key), TagSet::from([Tag::page(1)]));
                assert_eq!(store.flush_by_tag(&Tag::page(1)), 1, "round {round}");
            } else {
                assert_eq!(indexed_keys(&store, &Tag::page(1)), 0, "round {round}");
            }
        }
    }
}
