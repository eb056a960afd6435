//! LRU page cache for rendered pages

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;

use super::types::{PageIndex, RenderedPage};

/// What the cache knows about a page
#[derive(Clone, Debug)]
pub enum Slot {
    Absent,
    /// A render is in flight
    Pending,
    Rendered(Arc<RenderedPage>),
}

/// Rendered pages keyed by page index, plus the set of pages being rendered.
///
/// Holds at most one entry per page: a re-render at another scale replaces
/// the old entry. A page is never pending and rendered at the same time.
pub struct PageCache {
    pages: LruCache<PageIndex, Arc<RenderedPage>>,
    pending: HashSet<PageIndex>,
}

impl PageCache {
    /// Create a new cache with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            pending: HashSet::new(),
        }
    }

    /// Get a cached page, promoting it in the LRU order
    #[must_use]
    pub fn get(&mut self, page: PageIndex) -> Option<Arc<RenderedPage>> {
        self.pages.get(&page).cloned()
    }

    /// Get a cached page without promoting it
    #[must_use]
    pub fn peek(&self, page: PageIndex) -> Option<Arc<RenderedPage>> {
        self.pages.peek(&page).cloned()
    }

    /// Check if a page is cached, at any scale
    #[must_use]
    pub fn contains(&self, page: PageIndex) -> bool {
        self.pages.contains(&page)
    }

    /// Check if a page is cached at exactly `scale`
    #[must_use]
    pub fn contains_at(&self, page: PageIndex, scale: f32) -> bool {
        self.pages
            .peek(&page)
            .is_some_and(|rendered| rendered.is_at_scale(scale))
    }

    /// Insert a page, replacing whatever was cached for it
    pub fn put(&mut self, rendered: RenderedPage) -> Arc<RenderedPage> {
        let page = rendered.page;
        let arc = Arc::new(rendered);
        self.pending.remove(&page);
        if let Some((evicted, _)) = self.pages.push(page, arc.clone()) {
            if evicted != page {
                debug!("Evicted page {evicted} from cache");
            }
        }
        arc
    }

    #[must_use]
    pub fn slot(&self, page: PageIndex) -> Slot {
        if self.pending.contains(&page) {
            Slot::Pending
        } else if let Some(rendered) = self.pages.peek(&page) {
            Slot::Rendered(rendered.clone())
        } else {
            Slot::Absent
        }
    }

    /// Mark a page as being rendered, dropping any stale entry for it.
    ///
    /// Returns false if the page was already pending.
    pub fn mark_pending(&mut self, page: PageIndex) -> bool {
        if !self.pending.insert(page) {
            return false;
        }
        self.pages.pop(&page);
        true
    }

    #[must_use]
    pub fn is_pending(&self, page: PageIndex) -> bool {
        self.pending.contains(&page)
    }

    /// Revert a pending page to absent (failed or cancelled render)
    pub fn clear_pending(&mut self, page: PageIndex) {
        self.pending.remove(&page);
    }

    /// Drop every entry and pending mark
    pub fn clear(&mut self) {
        self.pages.clear();
        self.pending.clear();
    }

    /// Number of cached pages
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Check if cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Cache capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pages.cap().get()
    }

    /// Cached page indices, most recently used first
    pub fn pages(&self) -> impl Iterator<Item = PageIndex> + '_ {
        self.pages.iter().map(|(page, _)| *page)
    }
}
