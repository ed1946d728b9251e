//! Request-side inputs to the admission engine.

use serde::{Deserialize, Serialize};

use super::clock::Timestamp;
use super::keys::Tag;

/// Page metadata supplied by the rendering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub page_id: u64,
    /// Hard end-time of the page; `0` when unset.
    #[serde(default)]
    pub end_time: Timestamp,
    /// Configured cache lifetime in seconds.
    pub lifetime_seconds: i64,
    /// The page asked not to be cached.
    #[serde(default)]
    pub no_cache: bool,
}

impl PageMetadata {
    pub fn new(page_id: u64, lifetime_seconds: i64) -> Self {
        Self {
            page_id,
            end_time: 0,
            lifetime_seconds,
            no_cache: false,
        }
    }

    pub fn with_end_time(mut self, end_time: Timestamp) -> Self {
        self.end_time = end_time;
        self
    }
}

/// Everything the engine knows about one rendered request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Absolute request URI.
    pub uri: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// `None` when the renderer produced no usable page record.
    #[serde(default)]
    pub page: Option<PageMetadata>,
    /// Tags recorded while rendering the page.
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub authenticated: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestContext {
    /// A GET request for `uri` with no page metadata.
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: default_method(),
            page: None,
            tags: Vec::new(),
            authenticated: false,
        }
    }

    pub fn with_page(mut self, page: PageMetadata) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    pub fn page_id(&self) -> Option<u64> {
        self.page.as_ref().map(|page| page.page_id)
    }
}
