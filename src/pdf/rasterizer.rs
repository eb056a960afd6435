//! Boundary to the PDF engine that turns pages into bitmaps

use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{DocumentLoadError, PageRenderError};
use super::types::{Bitmap, PageIndex};

/// Where a document is read from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSource {
    path: PathBuf,
}

impl DocumentSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// A PDF engine able to open documents and rasterize their pages.
///
/// The engine itself is shared across render workers. Each worker opens its
/// own `Document` handle on its own thread, so handles need not be `Send`.
pub trait Rasterizer: Send + Sync + 'static {
    type Document;

    fn open(&self, source: &DocumentSource) -> Result<Self::Document, DocumentLoadError>;

    fn page_count(&self, doc: &Self::Document) -> usize;

    fn render(
        &self,
        doc: &Self::Document,
        page: PageIndex,
        scale: f32,
    ) -> Result<Bitmap, PageRenderError>;
}
