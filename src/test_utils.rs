//! Deterministic stand-ins for the PDF engine and the presenter.
//!
//! Enabled for unit tests and, through the `test-utils` feature, for the
//! integration tests under `tests/`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::pdf::{
    Bitmap, DocumentLoadError, DocumentSource, PageIndex, PageRenderError, Rasterizer,
    RenderedPage, TransitionDirection, ViewportPresenter,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Controls {
    closed: Mutex<bool>,
    opened: Condvar,
    failing: Mutex<HashSet<usize>>,
    calls: Mutex<HashMap<usize, usize>>,
    order: Mutex<Vec<usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Shared view of a [`FakeRasterizer`]'s gate, faults and call counters
#[derive(Clone)]
pub struct FakeHandle {
    controls: Arc<Controls>,
}

impl FakeHandle {
    /// Let every blocked and future render proceed
    pub fn open(&self) {
        *lock(&self.controls.closed) = false;
        self.controls.opened.notify_all();
    }

    /// Block future renders until [`FakeHandle::open`]
    pub fn close(&self) {
        *lock(&self.controls.closed) = true;
    }

    pub fn fail(&self, page: usize) {
        lock(&self.controls.failing).insert(page);
    }

    pub fn heal(&self, page: usize) {
        lock(&self.controls.failing).remove(&page);
    }

    #[must_use]
    pub fn calls_for(&self, page: usize) -> usize {
        lock(&self.controls.calls).get(&page).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_calls(&self) -> usize {
        lock(&self.controls.calls).values().sum()
    }

    /// Pages in the order their renders started
    #[must_use]
    pub fn order(&self) -> Vec<usize> {
        lock(&self.controls.order).clone()
    }

    /// Renders running right now
    #[must_use]
    pub fn active(&self) -> usize {
        self.controls.active.load(Ordering::SeqCst)
    }

    /// Most renders ever running at once
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.controls.peak.load(Ordering::SeqCst)
    }
}

pub struct FakeDocument {
    page_count: usize,
}

/// Rasterizer producing tiny solid bitmaps whose bytes equal the page number
pub struct FakeRasterizer {
    page_count: usize,
    fail_open: bool,
    delay: Duration,
    controls: Arc<Controls>,
}

impl FakeRasterizer {
    #[must_use]
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            fail_open: false,
            delay: Duration::ZERO,
            controls: Arc::default(),
        }
    }

    /// Renders block until the gate is opened
    #[must_use]
    pub fn gated(self) -> Self {
        *lock(&self.controls.closed) = true;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn failing_on(self, pages: &[usize]) -> Self {
        lock(&self.controls.failing).extend(pages.iter().copied());
        self
    }

    #[must_use]
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    #[must_use]
    pub fn counters(&self) -> FakeHandle {
        FakeHandle {
            controls: self.controls.clone(),
        }
    }

    #[must_use]
    pub fn gate(&self) -> FakeHandle {
        self.counters()
    }

    fn wait_for_gate(&self) {
        let mut closed = lock(&self.controls.closed);
        while *closed {
            closed = self
                .controls
                .opened
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Rasterizer for FakeRasterizer {
    type Document = FakeDocument;

    fn open(&self, source: &DocumentSource) -> Result<FakeDocument, DocumentLoadError> {
        if self.fail_open {
            return Err(DocumentLoadError::unreadable(
                source.path(),
                "simulated open failure",
            ));
        }
        Ok(FakeDocument {
            page_count: self.page_count,
        })
    }

    fn page_count(&self, doc: &FakeDocument) -> usize {
        doc.page_count
    }

    fn render(
        &self,
        doc: &FakeDocument,
        page: PageIndex,
        scale: f32,
    ) -> Result<Bitmap, PageRenderError> {
        let controls = &self.controls;
        let running = controls.active.fetch_add(1, Ordering::SeqCst) + 1;
        controls.peak.fetch_max(running, Ordering::SeqCst);
        *lock(&controls.calls).entry(page.get()).or_insert(0) += 1;
        lock(&controls.order).push(page.get());

        self.wait_for_gate();
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let result = if !page.within(doc.page_count) {
            Err(PageRenderError::rasterize(page, "page out of range"))
        } else if lock(&controls.failing).contains(&page.get()) {
            Err(PageRenderError::rasterize(page, "simulated render failure"))
        } else {
            let side = ((4.0 * scale).round() as u32).max(1);
            Ok(Bitmap {
                pixels: vec![page.get() as u8; (side * side * 3) as usize],
                width: side,
                height: side,
            })
        };

        controls.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// One frame handed to a presenter
#[derive(Clone, Debug, PartialEq)]
pub struct PresentedFrame {
    pub page: PageIndex,
    pub scale: f32,
    pub direction: TransitionDirection,
}

/// Presenter remembering every frame it was given
#[derive(Default)]
pub struct RecordingPresenter {
    pub frames: Vec<PresentedFrame>,
}

impl RecordingPresenter {
    #[must_use]
    pub fn pages(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.page.get()).collect()
    }
}

impl ViewportPresenter for RecordingPresenter {
    fn present(&mut self, page: &RenderedPage, direction: TransitionDirection) {
        self.frames.push(PresentedFrame {
            page: page.page,
            scale: page.scale,
            direction,
        });
    }
}
