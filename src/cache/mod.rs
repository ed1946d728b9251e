//! Static page cache admission.
//!
//! Sits between "a response was rendered" and "a cache store call is made":
//!
//! - **Rules** decide whether a page may be cached, should be negatively cached with an
//!   explanation, or must be skipped outright
//! - **Tags** label each entry (`pageId:<id>`, `domain:<host>`, renderer-supplied tags) so that a
//!   content change can flush exactly the entries it affects
//! - **Timeout** derives the expiry from the page lifetime and its hard end-time
//! - **Engine** ties them together and guards valid pages against concurrent negative results
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity = 1000
//! exclude_authenticated = false
//! show_generation_signature = false
//! ```

pub mod clock;
mod config;
mod engine;
mod entry;
pub mod hooks;
mod keys;
mod lock;
pub mod metrics;
mod registry;
mod request;
pub mod rules;
mod signature;
mod store;
pub mod tags;
mod timeout;

pub use clock::{Clock, FixedClock, SystemClock, Timestamp};
pub use config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_MAX_PATH_SEGMENT_LENGTH};
pub use engine::{Admission, AdmissionEngine, AdmissionHooks};
pub use entry::{CacheEntry, EntryContent, Explanation, StoredEntry};
pub use hooks::{ContentContext, Hook, HookChain, HookError, PostProcessContext, TagDistribution};
pub use keys::{CacheKey, EXPLANATION_TAG, Tag, TagSet};
pub use request::{PageMetadata, RequestContext};
pub use rules::{RuleChain, RuleContext};
pub use signature::{GenerationSignature, format_timestamp};
pub use store::{CacheStore, InMemoryStore, StoreError, StoreHandle};
pub use tags::build_tags;
pub use timeout::TimeoutCalculator;
