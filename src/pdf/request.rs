//! Render request and response types

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::error::PageRenderError;
use super::types::{PageIndex, RenderedPage};

/// Unique identifier for render requests
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cooperative cancellation flag shared between the scheduler and a worker.
///
/// Workers check it before rasterizing; a render already running is not
/// interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One page to rasterize
#[derive(Clone, Debug)]
pub struct RenderJob {
    pub id: RequestId,
    pub page: PageIndex,
    pub scale: f32,
    pub cancel: CancelToken,
}

/// Request sent to render workers
#[derive(Debug)]
pub enum WorkerRequest {
    Render(RenderJob),

    /// Shutdown the worker
    Shutdown,
}

/// Response from render workers
#[derive(Debug)]
pub enum WorkerResponse {
    /// A worker picked the job up and is about to rasterize it
    Started { id: RequestId },

    Rendered { id: RequestId, page: RenderedPage },

    Failed {
        id: RequestId,
        error: PageRenderError,
    },

    /// The job was cancelled before the worker picked it up
    Cancelled { id: RequestId, page: PageIndex },
}

impl WorkerResponse {
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Started { id }
            | Self::Rendered { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let worker_copy = token.clone();
        assert!(!worker_copy.is_cancelled());
        token.cancel();
        assert!(worker_copy.is_cancelled());
    }
}
