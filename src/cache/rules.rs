//! Admission rules.
//!
//! Rules see every request before any caching decision. A rule can object softly by adding an
//! explanation (a negative entry is still written so the verdict itself is cached for an instant),
//! or hard by setting `skip_processing` (nothing is read or written at all).

use url::Url;

use super::config::CacheConfig;
use super::entry::Explanation;
use super::hooks::{Hook, HookChain, HookError};
use super::request::RequestContext;

pub const CACHE_RULE_POINT: &str = "cache_rule";

/// State passed through the rule chain.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub request: RequestContext,
    pub explanation: Explanation,
    pub skip_processing: bool,
}

impl RuleContext {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            explanation: Explanation::new(),
            skip_processing: false,
        }
    }

    pub fn explain(&mut self, rule: &str, reason: impl Into<String>) {
        self.explanation.add(rule, reason);
    }
}

pub type RuleChain = HookChain<RuleContext>;

/// The built-in rules selected by `config`, in evaluation order.
pub fn default_rules(config: &CacheConfig) -> RuleChain {
    let mut chain = RuleChain::new(CACHE_RULE_POINT);
    chain
        .push(EnableCaching {
            enabled: config.enabled,
        })
        .push(ValidRequestMethod)
        .push(ValidUri {
            max_segment_length: config.max_path_segment_length,
        })
        .push(NoNoCache);
    if config.exclude_authenticated {
        chain.push(NoAuthenticatedSession);
    }
    chain
}

/// Hard veto when static caching is switched off.
#[derive(Debug, Clone, Copy)]
pub struct EnableCaching {
    pub enabled: bool,
}

impl Hook<RuleContext> for EnableCaching {
    fn name(&self) -> &str {
        "EnableCaching"
    }

    fn call(&self, mut context: RuleContext) -> Result<RuleContext, HookError> {
        if !self.enabled {
            context.skip_processing = true;
        }
        Ok(context)
    }
}

/// Only GET responses are cached.
#[derive(Debug, Clone, Copy)]
pub struct ValidRequestMethod;

impl Hook<RuleContext> for ValidRequestMethod {
    fn name(&self) -> &str {
        "ValidRequestMethod"
    }

    fn call(&self, mut context: RuleContext) -> Result<RuleContext, HookError> {
        if !context.request.method.eq_ignore_ascii_case("GET") {
            let reason = format!(
                "The request method {} is not cacheable",
                context.request.method
            );
            context.explain(self.name(), reason);
        }
        Ok(context)
    }
}

/// Rejects URIs that cannot map to a static file path.
#[derive(Debug, Clone, Copy)]
pub struct ValidUri {
    pub max_segment_length: usize,
}

impl ValidUri {
    fn problem(&self, uri: &str) -> Option<String> {
        let Ok(url) = Url::parse(uri.trim()) else {
            return Some("The URI could not be parsed".to_string());
        };
        if url.query().is_some() {
            return Some("The URI has a query string".to_string());
        }
        if uri.contains("/../") || uri.ends_with("/..") {
            return Some("The URI contains a parent directory segment".to_string());
        }

        let path = url.path();
        if path.contains("index.php") {
            return Some("The URI contains index.php".to_string());
        }

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let inner = &segments[..segments.len().saturating_sub(1)];
        if inner.iter().any(|segment| segment.is_empty()) {
            return Some("The URI contains an empty path segment".to_string());
        }
        if let Some(segment) = segments
            .iter()
            .find(|segment| segment.len() > self.max_segment_length)
        {
            return Some(format!(
                "The path segment of {} characters is longer than {}",
                segment.len(),
                self.max_segment_length
            ));
        }
        None
    }
}

impl Hook<RuleContext> for ValidUri {
    fn name(&self) -> &str {
        "ValidUri"
    }

    fn call(&self, mut context: RuleContext) -> Result<RuleContext, HookError> {
        if let Some(reason) = self.problem(&context.request.uri) {
            context.explain(self.name(), reason);
        }
        Ok(context)
    }
}

/// Honours a page's own `no_cache` flag.
#[derive(Debug, Clone, Copy)]
pub struct NoNoCache;

impl Hook<RuleContext> for NoNoCache {
    fn name(&self) -> &str {
        "NoNoCache"
    }

    fn call(&self, mut context: RuleContext) -> Result<RuleContext, HookError> {
        if context.request.page.as_ref().is_some_and(|page| page.no_cache) {
            context.explain(self.name(), "The page has caching disabled");
        }
        Ok(context)
    }
}

/// Keeps pages seen by authenticated sessions out of the cache.
#[derive(Debug, Clone, Copy)]
pub struct NoAuthenticatedSession;

impl Hook<RuleContext> for NoAuthenticatedSession {
    fn name(&self) -> &str {
        "NoAuthenticatedSession"
    }

    fn call(&self, mut context: RuleContext) -> Result<RuleContext, HookError> {
        if context.request.authenticated {
            context.explain(self.name(), "The request belongs to an authenticated session");
        }
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::request::PageMetadata;

    fn evaluate(config: &CacheConfig, request: RequestContext) -> RuleContext {
        default_rules(config).dispatch(RuleContext::new(request))
    }

    fn page_request(uri: &str) -> RequestContext {
        RequestContext::get(uri).with_page(PageMetadata::new(1, 3600))
    }

    #[test]
    fn plain_get_passes_every_rule() {
        let context = evaluate(&CacheConfig::default(), page_request("https://example.com/a/b/"));
        assert!(context.explanation.is_empty());
        assert!(!context.skip_processing);
    }

    #[test]
    fn disabled_caching_skips_processing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let context = evaluate(&config, page_request("https://example.com/"));
        assert!(context.skip_processing);
    }

    #[test]
    fn post_requests_are_explained() {
        let request = page_request("https://example.com/form").with_method("POST");
        let context = evaluate(&CacheConfig::default(), request);

        assert!(!context.skip_processing);
        assert!(context.explanation.get("ValidRequestMethod").is_some());
    }

    #[test]
    fn lowercase_get_is_accepted() {
        let request = page_request("https://example.com/").with_method("get");
        let context = evaluate(&CacheConfig::default(), request);
        assert!(context.explanation.is_empty());
    }

    #[test]
    fn uri_problems() {
        let rule = ValidUri {
            max_segment_length: 8,
        };

        assert!(rule.problem("https://example.com/a/b/").is_none());
        assert!(rule.problem("https://example.com/").is_none());
        assert!(rule.problem("https://example.com/list?page=2").is_some());
        assert!(rule.problem("https://example.com/index.php").is_some());
        assert!(rule.problem("https://example.com/a//b").is_some());
        assert!(rule.problem("https://example.com/a/../b").is_some());
        assert!(rule.problem("https://example.com/averyverylongsegment").is_some());
        assert!(rule.problem("not a uri").is_some());
    }

    #[test]
    fn no_cache_page_is_explained() {
        let mut page = PageMetadata::new(1, 3600);
        page.no_cache = true;
        let request = RequestContext::get("https://example.com/").with_page(page);

        let context = evaluate(&CacheConfig::default(), request);
        assert_eq!(
            context.explanation.get("NoNoCache"),
            Some("The page has caching disabled")
        );
    }

    #[test]
    fn authenticated_sessions_only_excluded_when_configured() {
        let request = page_request("https://example.com/").authenticated();

        let default = evaluate(&CacheConfig::default(), request.clone());
        assert!(default.explanation.is_empty());

        let config = CacheConfig {
            exclude_authenticated: true,
            ..Default::default()
        };
        let excluded = evaluate(&config, request);
        assert!(excluded.explanation.get("NoAuthenticatedSession").is_some());
    }

    #[test]
    fn explanations_accumulate_across_rules() {
        let mut page = PageMetadata::new(1, 3600);
        page.no_cache = true;
        let request = RequestContext::get("https://example.com/?x=1")
            .with_page(page)
            .with_method("PUT");

        let context = evaluate(&CacheConfig::default(), request);
        assert_eq!(context.explanation.len(), 3);
    }
}
