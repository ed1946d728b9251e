//! Expiry computation for cacheable pages.

use std::sync::Arc;

use tracing::warn;

use super::clock::{Clock, Timestamp};
use super::request::PageMetadata;

/// Turns page metadata into an absolute expiry time.
#[derive(Clone)]
pub struct TimeoutCalculator {
    clock: Arc<dyn Clock>,
}

impl TimeoutCalculator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Absolute expiry for a page.
    ///
    /// The lifetime-derived expiry (`now + lifetime`) is capped by the page's end-time when one
    /// is set. Missing metadata or a negative lifetime yields `0`.
    pub fn compute_timeout(&self, page: Option<&PageMetadata>) -> Timestamp {
        let page = match page {
            Some(page) if page.lifetime_seconds >= 0 => page,
            Some(page) => {
                warn!(
                    page_id = page.page_id,
                    lifetime_seconds = page.lifetime_seconds,
                    "Page metadata has a negative cache lifetime, timeout forced to 0"
                );
                return 0;
            }
            None => {
                warn!("Request carries no valid page record, timeout forced to 0");
                return 0;
            }
        };

        let mut expiry = self.clock.now().saturating_add(page.lifetime_seconds);
        if page.end_time > 0 && page.end_time < expiry {
            expiry = page.end_time;
        }
        expiry.max(0)
    }

    /// Seconds from now until `expiry`, never negative.
    pub fn seconds_until(&self, expiry: Timestamp) -> i64 {
        expiry.saturating_sub(self.clock.now()).max(0)
    }
}
