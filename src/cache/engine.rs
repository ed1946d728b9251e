//! Cache admission engine.
//!
//! Decides, for one rendered response, whether to store the page, store a short-lived negative
//! entry explaining why it was not cached, or do nothing. Caching is best-effort: no path through
//! [`AdmissionEngine::process`] fails the request that produced the page.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, error, instrument};

use super::clock::Clock;
use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryContent, Explanation};
use super::hooks::{ContentContext, HookChain, PostProcessContext, TagDistribution};
use super::keys::{CacheKey, Tag};
use super::metrics::METRIC_ADMISSION_TOTAL;
use super::request::RequestContext;
use super::rules::{self, RuleChain, RuleContext};
use super::signature::GenerationSignature;
use super::store::{CacheStore, StoreHandle};
use super::tags::build_tags;
use super::timeout::TimeoutCalculator;

pub const PROCESS_CONTENT_POINT: &str = "process_content";
pub const DISTRIBUTE_TAGS_POINT: &str = "distribute_tags";
pub const POST_PROCESS_POINT: &str = "post_process";

/// Extension points consulted during admission.
#[derive(Debug)]
pub struct AdmissionHooks {
    pub cache_rules: RuleChain,
    pub process_content: HookChain<ContentContext>,
    pub distribute_tags: HookChain<TagDistribution>,
    pub post_process: HookChain<PostProcessContext>,
}

impl AdmissionHooks {
    /// Empty chains: every page is cacheable and nothing is transformed.
    pub fn new() -> Self {
        Self {
            cache_rules: RuleChain::new(rules::CACHE_RULE_POINT),
            process_content: HookChain::new(PROCESS_CONTENT_POINT),
            distribute_tags: HookChain::new(DISTRIBUTE_TAGS_POINT),
            post_process: HookChain::new(POST_PROCESS_POINT),
        }
    }

    /// Built-in rules and content processors selected by `config`.
    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let mut hooks = Self::new();
        hooks.cache_rules = rules::default_rules(config);
        if config.show_generation_signature {
            hooks
                .process_content
                .push(GenerationSignature::new(clock));
        }
        hooks
    }
}

impl Default for AdmissionHooks {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The store never came up.
    Unavailable,
    /// A rule vetoed processing; nothing was read or written.
    Skipped,
    /// A valid page is already cached; the negative result was dropped.
    RaceAvoided { key: CacheKey },
    /// The page was stored.
    Cached { key: CacheKey, ttl_seconds: i64 },
    /// A negative entry was stored.
    Explained {
        key: CacheKey,
        explanation: Explanation,
    },
    /// The store rejected the write.
    WriteFailed { key: CacheKey },
}

impl Admission {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Skipped => "skipped",
            Self::RaceAvoided { .. } => "race_avoided",
            Self::Cached { .. } => "cached",
            Self::Explained { .. } => "explained",
            Self::WriteFailed { .. } => "write_failed",
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::Unavailable | Self::Skipped => None,
            Self::RaceAvoided { key }
            | Self::Cached { key, .. }
            | Self::Explained { key, .. }
            | Self::WriteFailed { key } => Some(key),
        }
    }
}

/// Orchestrates rules, tags, timeout and the final store write.
pub struct AdmissionEngine {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    timeout: TimeoutCalculator,
    hooks: AdmissionHooks,
}

impl AdmissionEngine {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>, hooks: AdmissionHooks) -> Self {
        Self {
            store,
            timeout: TimeoutCalculator::new(Arc::clone(&clock)),
            clock,
            hooks,
        }
    }

    pub fn hooks_mut(&mut self) -> &mut AdmissionHooks {
        &mut self.hooks
    }

    /// Run admission for one rendered response.
    #[instrument(skip_all, fields(uri = %request.uri, page_id = request.page_id()))]
    pub fn process(&self, request: &RequestContext, content: Bytes) -> Admission {
        let admission = match self.store.store() {
            Some(store) => self.admit(store, request, content),
            None => Admission::Unavailable,
        };

        counter!(METRIC_ADMISSION_TOTAL, "outcome" => admission.outcome()).increment(1);
        debug!(outcome = admission.outcome(), "Admission decided");
        admission
    }

    fn admit(&self, store: &dyn CacheStore, request: &RequestContext, content: Bytes) -> Admission {
        let verdict = self
            .hooks
            .cache_rules
            .dispatch(RuleContext::new(request.clone()));

        if verdict.skip_processing {
            self.post_process(request, false);
            return Admission::Skipped;
        }

        let key = CacheKey::from_uri(&request.uri);
        let explanation = verdict.explanation;

        // A negative result must not replace a page another request already cached.
        if !explanation.is_empty() && self.has_valid_entry(store, &key) {
            debug!(key = %key, "Valid entry already cached, negative result dropped");
            return Admission::RaceAvoided { key };
        }

        let mut tags = build_tags(&request.tags, request.page_id(), &request.uri);

        let (content, ttl_seconds, is_static_cached) = if explanation.is_empty() {
            let expires_at = self.timeout.compute_timeout(request.page.as_ref());
            let processed = self.hooks.process_content.dispatch(ContentContext {
                key: key.clone(),
                page: request.page.clone(),
                content,
                time_out_seconds: self.timeout.seconds_until(expires_at),
            });
            self.hooks.distribute_tags.dispatch(TagDistribution {
                key: key.clone(),
                tags: tags.clone(),
            });
            (
                EntryContent::Page(processed.content),
                processed.time_out_seconds.max(0),
                true,
            )
        } else {
            tags.insert(Tag::explanation());
            (EntryContent::Explanation(explanation.clone()), 0, false)
        };

        let entry = CacheEntry {
            key: key.clone(),
            content,
            tags,
        };
        if let Err(err) = store.set(entry, ttl_seconds) {
            error!(key = %key, error = %err, "Problems writing the cache entry");
            self.post_process(request, false);
            return Admission::WriteFailed { key };
        }

        self.post_process(request, is_static_cached);
        if is_static_cached {
            Admission::Cached { key, ttl_seconds }
        } else {
            Admission::Explained { key, explanation }
        }
    }

    fn has_valid_entry(&self, store: &dyn CacheStore, key: &CacheKey) -> bool {
        store
            .get(key)
            .is_some_and(|entry| entry.is_valid_at(self.clock.now()))
    }

    fn post_process(&self, request: &RequestContext, is_static_cached: bool) {
        self.hooks.post_process.dispatch(PostProcessContext {
            uri: request.uri.clone(),
            page_id: request.page_id(),
            is_static_cached,
        });
    }
}
