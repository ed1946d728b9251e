//! Invalidation tag derivation.
//!
//! Tags come from two places: the rendering pipeline, which knows which records a page was built
//! from, and the request itself (page identity and domain). Rendering code running inside
//! [`with_collector`] can call [`record`] instead of threading tags through every call.

use std::cell::RefCell;
use std::future::Future;

use url::Url;

use super::keys::{Tag, TagSet};

tokio::task_local! {
    static COLLECTED: RefCell<TagSet>;
}

/// Build the tag set for a page.
///
/// Base tags are copied as-is, then `pageId:<id>` and `domain:<host>` are added. A URI without a
/// parsable host simply gets no domain tag.
pub fn build_tags<'a, I>(base_tags: I, page_id: Option<u64>, uri: &str) -> TagSet
where
    I: IntoIterator<Item = &'a Tag>,
{
    let mut tags: TagSet = base_tags.into_iter().cloned().collect();
    if let Some(page_id) = page_id {
        tags.insert(Tag::page(page_id));
    }
    if let Some(host) = host_of(uri) {
        tags.insert(Tag::domain(&host));
    }
    tags
}

/// Host component of an absolute URI.
pub fn host_of(uri: &str) -> Option<String> {
    let url = Url::parse(uri.trim()).ok()?;
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Record a tag for the page currently being rendered.
///
/// Outside of [`with_collector`] this does nothing.
pub fn record(tag: impl Into<Tag>) {
    let tag = tag.into();
    let _ = COLLECTED.try_with(|tags| {
        tags.borrow_mut().insert(tag);
    });
}

/// Run a render future with a fresh tag collector and return its output with every tag recorded
/// along the way.
pub async fn with_collector<F, R>(render: F) -> (R, TagSet)
where
    F: Future<Output = R>,
{
    COLLECTED
        .scope(RefCell::new(TagSet::new()), async move {
            let output = render.await;
            let tags = COLLECTED
                .try_with(|tags| tags.take())
                .unwrap_or_default();
            (output, tags)
        })
        .await
}
