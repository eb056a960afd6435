//! Error types for document loading and page rendering

use std::path::PathBuf;
use std::time::Duration;

use super::types::{PageIndex, ReaderPhase};

/// The document could not be opened, or its first page could not be shown
#[derive(Debug, thiserror::Error)]
pub enum DocumentLoadError {
    #[error("document not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot open {}: {detail}", path.display())]
    Unreadable { path: PathBuf, detail: String },

    #[error("{} has no pages", path.display())]
    Empty { path: PathBuf },

    #[error("first page failed to render: {0}")]
    FirstPage(#[source] PageRenderError),
}

impl DocumentLoadError {
    pub fn unreadable(path: impl Into<PathBuf>, detail: impl ToString) -> Self {
        Self::Unreadable {
            path: path.into(),
            detail: detail.to_string(),
        }
    }
}

/// A single page failed to rasterize.
///
/// Never escalates past the scheduler: the page stays absent from the cache
/// and a later request retries it.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PageRenderError {
    #[error("page {page}: {detail}")]
    Rasterize { page: PageIndex, detail: String },

    #[error("page {page}: no render within {after:?}")]
    TimedOut { page: PageIndex, after: Duration },

    #[error("page {page}: render cancelled")]
    Cancelled { page: PageIndex },

    #[error("page {page}: no render worker available")]
    WorkerUnavailable { page: PageIndex },
}

impl PageRenderError {
    pub fn rasterize(page: PageIndex, detail: impl ToString) -> Self {
        Self::Rasterize {
            page,
            detail: detail.to_string(),
        }
    }

    #[must_use]
    pub fn page(&self) -> PageIndex {
        match self {
            Self::Rasterize { page, .. }
            | Self::TimedOut { page, .. }
            | Self::Cancelled { page }
            | Self::WorkerUnavailable { page } => *page,
        }
    }
}

/// Errors surfaced by a reader session
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error(transparent)]
    Load(#[from] DocumentLoadError),

    #[error("reader is {phase}, cannot {action}")]
    InvalidPhase {
        phase: ReaderPhase,
        action: &'static str,
    },
}
