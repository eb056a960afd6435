//! Render scheduler - single-flight, bounded-concurrency page rendering
//!
//! The scheduler lives on one thread and owns the page cache, the render
//! queue and the bookkeeping for in-flight jobs. Worker threads only
//! rasterize; every cache and queue mutation happens here, when responses
//! are pumped.
//!
//! Queued pages are drained in batches of at most `max_concurrent_renders`.
//! A batch is committed to the cache once every job in it has finished, and
//! the next batch is dispatched only after a short yield.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use super::cache::PageCache;
use super::error::PageRenderError;
use super::rasterizer::{DocumentSource, Rasterizer};
use super::request::{CancelToken, RenderJob, RequestId, WorkerRequest, WorkerResponse};
use super::types::{PageIndex, RenderedPage, same_scale};
use super::worker::render_worker;

pub const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 3;
pub const DEFAULT_QUEUE_BOUND: usize = 10;
pub const DEFAULT_CACHE_CAPACITY: usize = 32;
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_YIELD: Duration = Duration::from_millis(10);
pub const MIN_SCALE: f32 = 0.1;

/// Tuning for a [`RenderScheduler`]
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Rendering resolution
    pub scale: f32,
    /// Worker threads, and therefore the cap on outstanding rasterizer calls
    pub max_concurrent_renders: usize,
    /// Queued pages beyond this are dropped
    pub queue_bound: usize,
    pub cache_capacity: usize,
    /// A job not answered within this is failed and its page released
    pub render_timeout: Duration,
    /// Pause between two batches
    pub batch_yield: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scale: 1.5,
            max_concurrent_renders: DEFAULT_MAX_CONCURRENT_RENDERS,
            queue_bound: DEFAULT_QUEUE_BOUND,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            batch_yield: DEFAULT_BATCH_YIELD,
        }
    }
}

/// Something that happened to a page while pumping
#[derive(Clone, Debug, PartialEq)]
pub enum SchedulerEvent {
    PageRendered(PageIndex),
    PageFailed {
        page: PageIndex,
        error: PageRenderError,
    },
    PageCancelled(PageIndex),
}

impl SchedulerEvent {
    #[must_use]
    pub fn page(&self) -> PageIndex {
        match self {
            Self::PageRendered(page) | Self::PageCancelled(page) => *page,
            Self::PageFailed { page, .. } => *page,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    page: PageIndex,
    scale: f32,
    cancel: CancelToken,
    /// Counted from dispatch until a worker starts the job, then from the start
    deadline: Instant,
    started: bool,
}

#[derive(Debug)]
enum Outcome {
    Rendered(RenderedPage),
    Failed(PageRenderError),
    Cancelled,
}

#[derive(Debug, Default)]
struct Batch {
    outstanding: HashMap<RequestId, InFlight>,
    finished: Vec<(PageIndex, Outcome)>,
}

impl Batch {
    fn earliest_deadline(&self) -> Option<Instant> {
        self.outstanding.values().map(|job| job.deadline).min()
    }

    /// Whether this batch will produce `page` at `scale`
    fn renders_at(&self, page: PageIndex, scale: f32) -> bool {
        self.outstanding
            .values()
            .any(|job| job.page == page && same_scale(job.scale, scale))
            || self.finished.iter().any(|(p, outcome)| {
                *p == page && matches!(outcome, Outcome::Rendered(r) if r.is_at_scale(scale))
            })
    }

    fn finish(&mut self, id: RequestId, outcome: impl FnOnce(PageIndex) -> Outcome) -> bool {
        match self.outstanding.remove(&id) {
            Some(job) => {
                self.finished.push((job.page, outcome(job.page)));
                true
            }
            None => false,
        }
    }
}

/// Deduplicates, queues and executes page renders against a worker pool
pub struct RenderScheduler {
    config: SchedulerConfig,
    scale: f32,
    cache: PageCache,
    queue: VecDeque<PageIndex>,
    batch: Option<Batch>,
    next_batch_at: Option<Instant>,
    request_tx: Sender<WorkerRequest>,
    response_rx: Receiver<WorkerResponse>,
    next_request_id: u64,
    num_workers: usize,
}

impl RenderScheduler {
    /// Spawn the worker pool for `source` and return an idle scheduler
    pub fn start<R: Rasterizer>(
        rasterizer: Arc<R>,
        source: DocumentSource,
        config: SchedulerConfig,
    ) -> Self {
        let num_workers = config.max_concurrent_renders.max(1);

        // flume gives an MPMC request queue: every worker clones the same
        // receiver and pulls from it.
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        for i in 0..num_workers {
            let rasterizer = rasterizer.clone();
            let source = source.clone();
            let rx = request_rx.clone();
            let tx = response_tx.clone();

            let spawned = std::thread::Builder::new()
                .name(format!("render-worker-{i}"))
                .spawn(move || render_worker(rasterizer, source, rx, tx));
            if let Err(e) = spawned {
                warn!("Failed to spawn render worker {i}: {e}");
            }
        }

        debug!("Started {num_workers} render workers for {source}");

        Self {
            scale: config.scale.max(MIN_SCALE),
            cache: PageCache::new(config.cache_capacity),
            config: SchedulerConfig {
                max_concurrent_renders: num_workers,
                ..config
            },
            queue: VecDeque::new(),
            batch: None,
            next_batch_at: None,
            request_tx,
            response_rx,
            next_request_id: 1,
            num_workers,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Change the rendering resolution.
    ///
    /// Cached pages at the old scale stay until they are re-rendered.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.max(MIN_SCALE);
    }

    #[must_use]
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PageCache {
        &mut self.cache
    }

    /// Whether `page` is cached at the current scale
    #[must_use]
    pub fn is_cached(&self, page: PageIndex) -> bool {
        self.cache.contains_at(page, self.scale)
    }

    #[must_use]
    pub fn is_queued(&self, page: PageIndex) -> bool {
        self.queue.contains(&page)
    }

    /// No queued pages and no batch in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.batch.is_none()
    }

    /// Jobs dispatched and not yet answered
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.batch.as_ref().map_or(0, |b| b.outstanding.len())
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a job in flight will cache `page` at the current scale.
    ///
    /// A page still rendering at a previous scale does not count.
    #[must_use]
    pub fn is_rendering(&self, page: PageIndex) -> bool {
        self.batch
            .as_ref()
            .is_some_and(|batch| batch.renders_at(page, self.scale))
    }

    fn needs_render(&self, page: PageIndex) -> bool {
        !self.is_cached(page) && !self.is_rendering(page) && !self.is_queued(page)
    }

    /// Queue pages for rendering, in order.
    ///
    /// Pages already cached or rendering at the current scale, or already
    /// queued, are skipped. A page still rendering at an older scale is
    /// queued and dispatched once that job has been committed. Pages beyond
    /// the queue bound are dropped. Returns how many pages were queued.
    pub fn request(&mut self, pages: &[PageIndex]) -> usize {
        let mut queued = 0;

        for &page in pages {
            if !self.needs_render(page) {
                continue;
            }
            if self.queue.len() >= self.config.queue_bound {
                debug!("Render queue full, dropping page {page}");
                continue;
            }
            self.queue.push_back(page);
            queued += 1;
        }

        if queued > 0 {
            self.dispatch(Instant::now());
        }
        queued
    }

    /// Queue a page ahead of everything else, ignoring the queue bound.
    ///
    /// Returns false if the page is already cached or being rendered.
    pub fn request_priority(&mut self, page: PageIndex) -> bool {
        if self.is_cached(page) || self.is_rendering(page) {
            return false;
        }

        self.queue.retain(|p| *p != page);
        self.queue.push_front(page);
        self.dispatch(Instant::now());
        true
    }

    /// Drop queued pages and cancel in-flight jobs that `keep` rejects
    pub fn retain(&mut self, keep: impl Fn(PageIndex) -> bool) {
        let before = self.queue.len();
        self.queue.retain(|page| keep(*page));
        let dropped = before - self.queue.len();
        if dropped > 0 {
            debug!("Dropped {dropped} stale pages from render queue");
        }

        if let Some(batch) = &self.batch {
            for job in batch.outstanding.values() {
                if !keep(job.page) {
                    job.cancel.cancel();
                }
            }
        }
    }

    /// Process whatever has happened without blocking
    pub fn pump(&mut self) -> Vec<SchedulerEvent> {
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_response(response);
        }
        self.advance(Instant::now())
    }

    /// Block until something happens, the scheduler is idle, or `deadline`
    pub fn wait(&mut self, deadline: Instant) -> Vec<SchedulerEvent> {
        loop {
            let events = self.pump();
            if !events.is_empty() || self.is_idle() {
                return events;
            }

            let now = Instant::now();
            if now >= deadline {
                return events;
            }

            let wake = self.next_wake().map_or(deadline, |at| at.min(deadline));
            match self.response_rx.recv_deadline(wake) {
                Ok(response) => self.handle_response(response),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.fail_outstanding(),
            }
        }
    }

    /// Render `page` with priority and block until it is cached.
    ///
    /// Returns the render error if it fails, or `TimedOut` if `timeout`
    /// passes first. The render itself keeps going after a timeout here.
    pub fn wait_for(
        &mut self,
        page: PageIndex,
        timeout: Duration,
    ) -> Result<Arc<RenderedPage>, PageRenderError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(rendered) = self.cache.get(page).filter(|r| r.is_at_scale(self.scale)) {
                return Ok(rendered);
            }
            if !self.is_rendering(page) && !self.is_queued(page) {
                self.request_priority(page);
            } else if self.is_queued(page) {
                self.promote(page);
            }

            for event in self.wait(deadline) {
                match event {
                    SchedulerEvent::PageFailed { page: p, error } if p == page => {
                        return Err(error);
                    }
                    SchedulerEvent::PageCancelled(p) if p == page => {
                        return Err(PageRenderError::Cancelled { page });
                    }
                    _ => {}
                }
            }

            if Instant::now() >= deadline && !self.is_cached(page) {
                return Err(PageRenderError::TimedOut {
                    page,
                    after: timeout,
                });
            }
        }
    }

    /// Drain until idle or `timeout`. Returns whether the scheduler is idle.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            self.wait(deadline);
        }
        true
    }

    /// Forget all work and all cached pages
    pub fn clear(&mut self) {
        if let Some(batch) = self.batch.take() {
            for job in batch.outstanding.values() {
                job.cancel.cancel();
            }
        }
        self.queue.clear();
        self.cache.clear();
        self.next_batch_at = None;
    }

    /// Shutdown all workers
    pub fn shutdown(&self) {
        for _ in 0..self.num_workers {
            let _ = self.request_tx.send(WorkerRequest::Shutdown);
        }
    }

    fn promote(&mut self, page: PageIndex) {
        if self.queue.front() != Some(&page) {
            self.queue.retain(|p| *p != page);
            self.queue.push_front(page);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        match &self.batch {
            Some(batch) if batch.outstanding.is_empty() => Some(Instant::now()),
            Some(batch) => batch.earliest_deadline(),
            None if !self.queue.is_empty() => self.next_batch_at,
            None => None,
        }
    }

    fn handle_response(&mut self, response: WorkerResponse) {
        let id = response.id();
        let timeout = self.config.render_timeout;
        let Some(batch) = self.batch.as_mut() else {
            debug!("Discarding response for request {id:?} outside any batch");
            return;
        };

        let accepted = match response {
            WorkerResponse::Started { id } => match batch.outstanding.get_mut(&id) {
                Some(job) => {
                    job.started = true;
                    job.deadline = Instant::now() + timeout;
                    true
                }
                None => false,
            },
            WorkerResponse::Rendered { id, page } => batch.finish(id, |_| Outcome::Rendered(page)),
            WorkerResponse::Failed { id, error } => batch.finish(id, |_| Outcome::Failed(error)),
            WorkerResponse::Cancelled { id, .. } => batch.finish(id, |_| Outcome::Cancelled),
        };

        if !accepted {
            debug!("Discarding late response for request {id:?}");
        }
    }

    fn fail_outstanding(&mut self) {
        if let Some(batch) = self.batch.as_mut() {
            let ids: Vec<RequestId> = batch.outstanding.keys().copied().collect();
            for id in ids {
                batch.finish(id, |page| {
                    Outcome::Failed(PageRenderError::WorkerUnavailable { page })
                });
            }
        }
    }

    fn advance(&mut self, now: Instant) -> Vec<SchedulerEvent> {
        self.expire_overdue(now);
        let events = self.commit_batch(now);
        self.dispatch(now);
        events
    }

    fn expire_overdue(&mut self, now: Instant) {
        let timeout = self.config.render_timeout;
        let Some(batch) = self.batch.as_mut() else {
            return;
        };

        let overdue: Vec<RequestId> = batch
            .outstanding
            .iter()
            .filter(|(_, job)| job.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            let Some(job) = batch.outstanding.get(&id) else {
                continue;
            };
            job.cancel.cancel();
            let started = job.started;
            batch.finish(id, |page| {
                Outcome::Failed(if started {
                    PageRenderError::TimedOut {
                        page,
                        after: timeout,
                    }
                } else {
                    // Every worker is still stuck on an earlier job.
                    PageRenderError::WorkerUnavailable { page }
                })
            });
        }
    }

    fn commit_batch(&mut self, now: Instant) -> Vec<SchedulerEvent> {
        if self.batch.as_ref().is_none_or(|b| !b.outstanding.is_empty()) {
            return Vec::new();
        }
        let Some(batch) = self.batch.take() else {
            return Vec::new();
        };

        let mut events = Vec::with_capacity(batch.finished.len());
        for (page, outcome) in batch.finished {
            match outcome {
                Outcome::Rendered(rendered) => {
                    self.cache.put(rendered);
                    events.push(SchedulerEvent::PageRendered(page));
                }
                Outcome::Failed(error) => {
                    warn!("Render failed: {error}");
                    self.cache.clear_pending(page);
                    events.push(SchedulerEvent::PageFailed { page, error });
                }
                Outcome::Cancelled => {
                    debug!("Render of page {page} cancelled");
                    self.cache.clear_pending(page);
                    events.push(SchedulerEvent::PageCancelled(page));
                }
            }
        }

        self.next_batch_at = Some(now + self.config.batch_yield);
        events
    }

    fn dispatch(&mut self, now: Instant) {
        if self.batch.is_some() || self.queue.is_empty() {
            return;
        }
        if self.next_batch_at.is_some_and(|at| now < at) {
            return;
        }

        let mut batch = Batch::default();
        let deadline = now + self.config.render_timeout;

        while batch.outstanding.len() < self.config.max_concurrent_renders {
            let Some(page) = self.queue.pop_front() else {
                break;
            };
            if self.is_cached(page) || !self.cache.mark_pending(page) {
                continue;
            }

            let id = self.next_id();
            let cancel = CancelToken::new();
            batch.outstanding.insert(
                id,
                InFlight {
                    page,
                    scale: self.scale,
                    cancel: cancel.clone(),
                    deadline,
                    started: false,
                },
            );

            let job = RenderJob {
                id,
                page,
                scale: self.scale,
                cancel,
            };
            if self.request_tx.send(WorkerRequest::Render(job)).is_err() {
                batch.finish(id, |page| {
                    Outcome::Failed(PageRenderError::WorkerUnavailable { page })
                });
            }
        }

        if batch.outstanding.is_empty() && batch.finished.is_empty() {
            return;
        }

        debug!(
            "Dispatched render batch of {} pages, {} still queued",
            batch.outstanding.len() + batch.finished.len(),
            self.queue.len()
        );
        self.batch = Some(batch);
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeRasterizer;

    const SETTLE: Duration = Duration::from_secs(5);

    fn page(n: usize) -> PageIndex {
        PageIndex::new(n).unwrap()
    }

    fn pages(ns: &[usize]) -> Vec<PageIndex> {
        ns.iter().map(|n| page(*n)).collect()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            scale: 1.0,
            max_concurrent_renders: 2,
            queue_bound: 4,
            cache_capacity: 16,
            render_timeout: Duration::from_secs(5),
            batch_yield: Duration::from_millis(1),
        }
    }

    fn start(rasterizer: FakeRasterizer, config: SchedulerConfig) -> RenderScheduler {
        RenderScheduler::start(
            Arc::new(rasterizer),
            DocumentSource::new("fake.pdf"),
            config,
        )
    }

    #[test]
    fn request_skips_duplicates_in_one_call() {
        let rasterizer = FakeRasterizer::new(10).gated();
        let counters = rasterizer.counters();
        let gate = rasterizer.gate();
        let mut scheduler = start(rasterizer, config());

        assert_eq!(scheduler.request(&pages(&[3, 3])), 1);
        assert_eq!(scheduler.request(&pages(&[3])), 0);
        assert!(scheduler.cache().is_pending(page(3)));

        gate.open();
        assert!(scheduler.settle(SETTLE));
        assert_eq!(counters.calls_for(3), 1);
        assert!(scheduler.is_cached(page(3)));
    }

    #[test]
    fn queue_bound_drops_excess() {
        let rasterizer = FakeRasterizer::new(20).gated();
        let gate = rasterizer.gate();
        let mut scheduler = start(rasterizer, config());

        let queued = scheduler.request(&pages(&[1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(queued, 4);
        assert_eq!(scheduler.in_flight(), 2);
        assert_eq!(scheduler.queued(), 2);

        gate.open();
        assert!(scheduler.settle(SETTLE));
        assert!(scheduler.is_cached(page(4)));
        assert!(!scheduler.is_cached(page(5)));
        assert!(!scheduler.is_cached(page(8)));
    }

    #[test]
    fn zero_queue_bound_still_serves_priority() {
        let mut scheduler = start(
            FakeRasterizer::new(5),
            SchedulerConfig {
                queue_bound: 0,
                ..config()
            },
        );

        assert_eq!(scheduler.request(&pages(&[2])), 0);
        assert!(scheduler.request_priority(page(3)));
        assert!(scheduler.settle(SETTLE));
        assert!(scheduler.is_cached(page(3)));
        assert!(!scheduler.is_cached(page(2)));
    }

    #[test]
    fn priority_jumps_the_queue() {
        let rasterizer = FakeRasterizer::new(20).gated();
        let counters = rasterizer.counters();
        let gate = rasterizer.gate();
        let mut scheduler = start(
            rasterizer,
            SchedulerConfig {
                max_concurrent_renders: 1,
                ..config()
            },
        );

        scheduler.request(&pages(&[1, 2, 3]));
        assert!(scheduler.request_priority(page(9)));

        gate.open();
        assert!(scheduler.settle(SETTLE));
        assert_eq!(counters.order(), vec![1, 9, 2, 3]);
    }

    #[test]
    fn batch_commits_only_when_complete() {
        let rasterizer = FakeRasterizer::new(10).gated();
        let gate = rasterizer.gate();
        let mut scheduler = start(rasterizer, config());

        scheduler.request(&pages(&[1, 2]));
        assert!(scheduler.pump().is_empty());
        assert!(!scheduler.cache().contains(page(1)));

        gate.open();
        let deadline = Instant::now() + SETTLE;
        let mut events = Vec::new();
        while events.is_empty() && Instant::now() < deadline {
            events = scheduler.wait(deadline);
        }

        // Both pages land in the cache together.
        let mut rendered: Vec<usize> = events
            .iter()
            .filter(|e| matches!(e, SchedulerEvent::PageRendered(_)))
            .map(|e| e.page().get())
            .collect();
        rendered.sort_unstable();
        assert_eq!(rendered, vec![1, 2]);
        assert!(scheduler.cache().contains(page(1)));
    }

    #[test]
    fn overdue_render_is_failed_and_released() {
        let rasterizer = FakeRasterizer::new(5).gated();
        let gate = rasterizer.gate();
        let mut scheduler = start(
            rasterizer,
            SchedulerConfig {
                render_timeout: Duration::from_millis(30),
                ..config()
            },
        );

        let result = scheduler.wait_for(page(2), SETTLE);
        assert!(matches!(result, Err(PageRenderError::TimedOut { .. })));
        assert!(!scheduler.cache().is_pending(page(2)));
        assert!(scheduler.is_idle());

        // The late answer from the stuck worker is discarded.
        gate.open();
        std::thread::sleep(Duration::from_millis(20));
        assert!(scheduler.pump().is_empty());
        assert!(!scheduler.cache().contains(page(2)));
    }

    #[test]
    fn retain_drops_stale_queue_entries() {
        let rasterizer = FakeRasterizer::new(20).gated();
        let counters = rasterizer.counters();
        let gate = rasterizer.gate();
        let mut scheduler = start(rasterizer, config());

        scheduler.request(&pages(&[1, 2, 3, 4]));
        scheduler.retain(|p| p.get() != 4);
        assert_eq!(scheduler.queued(), 1);

        gate.open();
        assert!(scheduler.settle(SETTLE));
        assert_eq!(counters.calls_for(4), 0);
        assert!(scheduler.is_cached(page(3)));
    }

    #[test]
    fn new_scale_rerenders() {
        let rasterizer = FakeRasterizer::new(5);
        let counters = rasterizer.counters();
        let mut scheduler = start(rasterizer, config());

        scheduler.wait_for(page(1), SETTLE).unwrap();
        scheduler.set_scale(2.0);
        assert!(!scheduler.is_cached(page(1)));

        let rendered = scheduler.wait_for(page(1), SETTLE).unwrap();
        assert_eq!(rendered.scale, 2.0);
        assert_eq!(counters.calls_for(1), 2);
        assert_eq!(scheduler.cache().len(), 1);
    }

    #[test]
    fn scale_is_clamped() {
        let mut scheduler = start(FakeRasterizer::new(1), config());
        scheduler.set_scale(0.0);
        assert_eq!(scheduler.scale(), MIN_SCALE);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut scheduler = start(FakeRasterizer::new(5), config());
        scheduler.request(&pages(&[1, 2, 3]));
        assert!(scheduler.settle(SETTLE));
        assert_eq!(scheduler.cache().len(), 3);

        scheduler.clear();
        assert!(scheduler.cache().is_empty());
        assert!(scheduler.is_idle());
    }
}
