//! Exhaustive search over paginated list endpoints
//!
//! Backends list records a page at a time. [`PageWalker`] fetches pages in
//! order until a matching item appears or the listing is exhausted, pausing
//! between requests so vendor rate limits are respected.

use crate::error::Result;
use crate::timeout::pause;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay inserted between consecutive page requests
pub const PAGE_DELAY: Duration = Duration::from_millis(500);

/// Default page size for list calls
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// One page of a listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total item count across all pages, when the backend reports it
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: Option<u64>) -> Self {
        Self { items, total }
    }
}

/// Walks pages until a match is found
#[derive(Debug, Clone, Copy)]
pub struct PageWalker {
    page_size: u32,
    delay: Duration,
}

impl PageWalker {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            delay: PAGE_DELAY,
        }
    }

    /// Override the inter-page delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch pages (zero-based index) until `matches` accepts an item
    ///
    /// Stops with `Ok(None)` on an empty page, a short page, or once the
    /// reported total has been seen.
    pub async fn find<T, F, Fut, M>(
        &self,
        ctx: &CancellationToken,
        mut fetch: F,
        mut matches: M,
    ) -> Result<Option<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
        M: FnMut(&T) -> bool,
    {
        let mut index = 0u32;
        let mut seen = 0u64;

        loop {
            if index > 0 {
                pause(ctx, self.delay).await?;
            }

            let page = fetch(index).await?;
            let count = page.items.len();
            seen += count as u64;

            tracing::debug!("page {} returned {} item(s)", index, count);

            if let Some(found) = page.items.into_iter().find(|item| matches(item)) {
                return Ok(Some(found));
            }

            let exhausted = count == 0
                || count < self.page_size as usize
                || page.total.is_some_and(|total| seen >= total);
            if exhausted {
                return Ok(None);
            }

            index += 1;
        }
    }
}
