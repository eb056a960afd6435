//! PDF page rendering, caching and reader navigation

mod cache;
mod error;
#[cfg(feature = "pdf")]
mod mupdf_backend;
mod prefetch;
mod presenter;
mod rasterizer;
mod request;
mod scheduler;
mod session;
mod state;
mod types;
mod worker;

pub use cache::{PageCache, Slot};
pub use error::{DocumentLoadError, PageRenderError, ReaderError};
#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfRasterizer;
pub use prefetch::{PrefetchWindow, window};
pub use presenter::{NullPresenter, PngPresenter, ViewportPresenter, save_png};
pub use rasterizer::{DocumentSource, Rasterizer};
pub use request::{CancelToken, RenderJob, RequestId, WorkerRequest, WorkerResponse};
pub use scheduler::{
    DEFAULT_BATCH_YIELD, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_CONCURRENT_RENDERS,
    DEFAULT_QUEUE_BOUND, DEFAULT_RENDER_TIMEOUT, MIN_SCALE, RenderScheduler, SchedulerConfig,
    SchedulerEvent,
};
pub use session::{Navigation, ReaderEvent, ReaderSession};
pub use state::{Command, Effect, NavigationRejected, ReaderState};
pub use types::*;
pub use worker::render_worker;
