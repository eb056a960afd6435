//! Which pages should be resident around the current page

use super::types::PageIndex;

/// Pages within `radius` of `current`, excluding `current` itself.
///
/// Nearest pages come first; at equal distance the page ahead precedes the
/// page behind, so reading forward is served first.
#[must_use]
pub fn window(current: PageIndex, page_count: usize, radius: usize) -> Vec<PageIndex> {
    let current = current.get();
    let mut pages = Vec::with_capacity(radius * 2);

    for offset in 1..=radius {
        if let Some(ahead) = current.checked_add(offset).filter(|p| *p <= page_count) {
            pages.extend(PageIndex::new(ahead));
        }
        if current > offset {
            pages.extend(PageIndex::new(current - offset));
        }
    }

    pages
}

/// The set of pages a reader wants resident: the current page and its window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefetchWindow {
    pub current: PageIndex,
    pub pages: Vec<PageIndex>,
}

impl PrefetchWindow {
    #[must_use]
    pub fn around(current: PageIndex, page_count: usize, radius: usize) -> Self {
        Self {
            current,
            pages: window(current, page_count, radius),
        }
    }

    #[must_use]
    pub fn contains(&self, page: PageIndex) -> bool {
        page == self.current || self.pages.contains(&page)
    }
}
