//! Ordered hook chains for the admission extension points.
//!
//! Each extension point is an explicit list of callbacks. A callback takes the point's context by
//! value and hands back a (possibly modified) context for the next one. When a callback returns an
//! error or panics, the failure is logged and the context it was given moves on unchanged.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use tracing::error;

use super::keys::{CacheKey, TagSet};
use super::metrics::METRIC_HOOK_FAILURE_TOTAL;
use super::request::PageMetadata;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A callback registered at an extension point.
pub trait Hook<C>: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    fn call(&self, context: C) -> Result<C, HookError>;
}

struct FnHook<F> {
    name: String,
    f: F,
}

impl<C, F> Hook<C> for FnHook<F>
where
    F: Fn(C) -> Result<C, HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, context: C) -> Result<C, HookError> {
        (self.f)(context)
    }
}

/// Callbacks for one extension point, run in registration order.
pub struct HookChain<C> {
    point: &'static str,
    hooks: Vec<Arc<dyn Hook<C>>>,
}

impl<C: Clone> HookChain<C> {
    pub fn new(point: &'static str) -> Self {
        Self {
            point,
            hooks: Vec::new(),
        }
    }

    pub fn push(&mut self, hook: impl Hook<C> + 'static) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Register a closure under `name`.
    pub fn push_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(C) -> Result<C, HookError> + Send + Sync + 'static,
        C: 'static,
    {
        self.push(FnHook {
            name: name.into(),
            f,
        })
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|hook| hook.name()).collect()
    }

    /// Run every hook in order and return the final context.
    pub fn dispatch(&self, context: C) -> C {
        self.hooks.iter().fold(context, |context, hook| {
            let given = context.clone();
            let failure = match catch_unwind(AssertUnwindSafe(|| hook.call(context))) {
                Ok(Ok(next)) => return next,
                Ok(Err(err)) => err.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };

            error!(
                point = self.point,
                hook = hook.name(),
                error = %failure,
                "Problems calling hook, context passed through unchanged"
            );
            counter!(
                METRIC_HOOK_FAILURE_TOTAL,
                "point" => self.point,
                "hook" => hook.name().to_string()
            )
            .increment(1);
            given
        })
    }
}

impl<C> fmt::Debug for HookChain<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("point", &self.point)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Context for the content-transform point, run only for cacheable pages.
#[derive(Debug, Clone)]
pub struct ContentContext {
    pub key: CacheKey,
    pub page: Option<PageMetadata>,
    pub content: Bytes,
    /// Seconds the entry will live. Hooks may shorten or extend it.
    pub time_out_seconds: i64,
}

/// Context for the tag-distribution point: `key` now carries `tags`.
#[derive(Debug, Clone)]
pub struct TagDistribution {
    pub key: CacheKey,
    pub tags: TagSet,
}

/// Context for the post-process point, fired at the end of every admission unless the store is
/// unavailable or the race-avoidance rule cut it short.
#[derive(Debug, Clone)]
pub struct PostProcessContext {
    pub uri: String,
    pub page_id: Option<u64>,
    pub is_static_cached: bool,
}
