//! Core types for page rendering

use std::fmt;

/// 1-based page number within a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(usize);

impl PageIndex {
    /// The first page of every document
    pub const FIRST: Self = Self(1);

    /// Create a page index, rejecting 0
    #[must_use]
    pub const fn new(page: usize) -> Option<Self> {
        if page == 0 { None } else { Some(Self(page)) }
    }

    /// 1-based page number
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// 0-based page number, as PDF engines count
    #[must_use]
    pub const fn zero_based(self) -> usize {
        self.0 - 1
    }

    /// Whether this page exists in a document of `page_count` pages
    #[must_use]
    pub const fn within(self, page_count: usize) -> bool {
        self.0 <= page_count
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    #[must_use]
    pub fn previous(self) -> Option<Self> {
        Self::new(self.0 - 1)
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw rasterized page.
///
/// RGB pixel data, 3 bytes per pixel, rows packed without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Bitmap {
    /// Size of the pixel buffer in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A page rasterized at a given scale
#[derive(Clone, Debug)]
pub struct RenderedPage {
    pub page: PageIndex,
    pub scale: f32,
    pub bitmap: Bitmap,
}

impl RenderedPage {
    /// Whether this page was rendered at `scale`
    #[must_use]
    pub fn is_at_scale(&self, scale: f32) -> bool {
        same_scale(self.scale, scale)
    }
}

pub(crate) fn same_scale(a: f32, b: f32) -> bool {
    (a - b).abs() <= f32::EPSILON
}

/// Direction of the page-turn effect handed to the presenter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionDirection {
    Forward,
    Backward,
    /// First page of a document, or the same page re-rendered
    None,
}

impl TransitionDirection {
    #[must_use]
    pub fn between(from: PageIndex, to: PageIndex) -> Self {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Self::Forward,
            std::cmp::Ordering::Less => Self::Backward,
            std::cmp::Ordering::Equal => Self::None,
        }
    }
}

/// Lifecycle phase of a reader session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderPhase {
    Idle,
    Loading,
    Ready,
    Transitioning,
    Error,
}

impl ReaderPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReaderPhase::Idle => "idle",
            ReaderPhase::Loading => "loading",
            ReaderPhase::Ready => "ready",
            ReaderPhase::Transitioning => "transitioning",
            ReaderPhase::Error => "error",
        }
    }
}

impl fmt::Display for ReaderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
