//! Reader session - one opened book
//!
//! Owns the document handle, the render scheduler (and through it the page
//! cache), the reader state machine and the presenter. Everything here runs
//! on the caller's thread; only rasterization happens on worker threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::error::{DocumentLoadError, PageRenderError, ReaderError};
use super::prefetch::PrefetchWindow;
use super::presenter::ViewportPresenter;
use super::rasterizer::{DocumentSource, Rasterizer};
use super::scheduler::{RenderScheduler, SchedulerEvent};
use super::state::{Command, Effect, NavigationRejected, ReaderState};
use super::types::{PageIndex, ReaderPhase, TransitionDirection};
use crate::settings::Settings;

/// Result of a navigation request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// The page is on screen
    Completed(PageIndex),
    /// The page is being rendered; `poll` finishes the transition
    Pending(PageIndex),
    Rejected(NavigationRejected),
    /// The target page failed to render; the reader stayed where it was
    Failed(PageIndex),
}

/// What a `poll` observed
#[derive(Clone, Debug, PartialEq)]
pub enum ReaderEvent {
    PageRendered(PageIndex),
    PageFailed {
        page: PageIndex,
        error: PageRenderError,
    },
    Navigated {
        page: PageIndex,
        direction: TransitionDirection,
    },
    NavigationFailed(PageIndex),
}

pub struct ReaderSession<R: Rasterizer, P: ViewportPresenter> {
    rasterizer: Arc<R>,
    source: DocumentSource,
    settings: Settings,
    presenter: P,
    state: ReaderState,
    document: Option<R::Document>,
    scheduler: Option<RenderScheduler>,
    load_error: Option<DocumentLoadError>,
    target_error: Option<PageRenderError>,
    events: Vec<ReaderEvent>,
}

impl<R: Rasterizer, P: ViewportPresenter> ReaderSession<R, P> {
    /// Create an idle session; nothing is opened until [`Self::open`]
    pub fn new(
        rasterizer: Arc<R>,
        source: DocumentSource,
        settings: Settings,
        presenter: P,
    ) -> Self {
        Self {
            rasterizer,
            source,
            settings: settings.normalized(),
            presenter,
            state: ReaderState::new(),
            document: None,
            scheduler: None,
            load_error: None,
            target_error: None,
            events: Vec::new(),
        }
    }

    /// Open the document and show its first page.
    ///
    /// Blocks until page 1 is rendered. On failure the session is in
    /// `Error` and only [`Self::open`] again (or [`Self::reload`]) helps.
    pub fn open(&mut self) -> Result<(), ReaderError> {
        match self.state.phase {
            ReaderPhase::Idle | ReaderPhase::Error => {}
            phase => {
                return Err(ReaderError::InvalidPhase {
                    phase,
                    action: "open",
                });
            }
        }

        info!("Opening {}", self.source);
        self.load_error = None;
        self.apply_command(Command::Open);

        if self.state.phase == ReaderPhase::Loading {
            if let Some(first) = self.state.target {
                let timeout = self.settings.render_timeout();
                match self.scheduler_mut().map(|s| s.wait_for(first, timeout)) {
                    Some(Ok(_)) => self.apply_command(Command::TargetReady),
                    Some(Err(e)) => {
                        self.load_error = Some(DocumentLoadError::FirstPage(e));
                        self.apply_command(Command::TargetFailed);
                    }
                    None => self.apply_command(Command::TargetFailed),
                }
            }
        }

        match self.state.phase {
            ReaderPhase::Ready => {
                info!(
                    "Opened {} with {} pages",
                    self.source, self.state.page_count
                );
                Ok(())
            }
            phase => Err(match self.load_error.take() {
                Some(e) => ReaderError::Load(e),
                None => ReaderError::InvalidPhase {
                    phase,
                    action: "open",
                },
            }),
        }
    }

    /// Tear down and open the same document again
    pub fn reload(&mut self) -> Result<(), ReaderError> {
        self.close();
        self.open()
    }

    /// Release the document, the workers and every cached page
    pub fn close(&mut self) {
        self.apply_command(Command::Close);
        self.scheduler = None;
        self.document = None;
        self.target_error = None;
        self.events.clear();
        debug!("Closed {}", self.source);
    }

    /// Start a transition to `page`
    pub fn goto_page(&mut self, page: usize) -> Navigation {
        match self.state.check_navigation(page) {
            Ok(_) => {
                self.target_error = None;
                self.apply_command(Command::GoToPage(page));
                self.navigation_status()
            }
            Err(reason) => {
                debug!("Navigation to page {page} rejected: {reason:?}");
                Navigation::Rejected(reason)
            }
        }
    }

    pub fn next_page(&mut self) -> Navigation {
        self.goto_page(self.state.next_page())
    }

    pub fn previous_page(&mut self) -> Navigation {
        self.goto_page(self.state.previous_page())
    }

    /// Re-render at a new scale; the current page is presented again
    pub fn set_scale(&mut self, scale: f32) -> Navigation {
        if self.state.phase != ReaderPhase::Ready {
            return Navigation::Rejected(if self.state.phase == ReaderPhase::Transitioning {
                NavigationRejected::Busy
            } else {
                NavigationRejected::NotReady(self.state.phase)
            });
        }

        self.settings.scale = scale;
        self.settings = self.settings.clone().normalized();
        let scale = self.settings.scale;
        if let Some(scheduler) = self.scheduler_mut() {
            scheduler.set_scale(scale);
        }
        info!("Rendering at scale {scale}");
        self.target_error = None;
        self.apply_command(Command::Rescale);
        self.navigation_status()
    }

    /// Process finished renders without blocking
    pub fn poll(&mut self) -> Vec<ReaderEvent> {
        let events = match self.scheduler_mut() {
            Some(scheduler) => scheduler.pump(),
            None => Vec::new(),
        };
        self.handle_scheduler_events(events);
        std::mem::take(&mut self.events)
    }

    /// Block until the pending transition settles or `timeout` passes
    pub fn wait_transition(&mut self, timeout: Duration) -> Navigation {
        let deadline = Instant::now() + timeout;
        while self.state.phase == ReaderPhase::Transitioning {
            let Some(scheduler) = self.scheduler_mut() else {
                break;
            };
            let events = scheduler.wait(deadline);
            self.handle_scheduler_events(events);
            if Instant::now() >= deadline {
                break;
            }
        }
        self.navigation_status()
    }

    /// Block until transitions and prefetching are done, or `timeout`.
    ///
    /// Returns whether everything settled.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.scheduler.as_ref().is_none_or(RenderScheduler::is_idle);
            if idle && self.state.phase != ReaderPhase::Transitioning {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let Some(scheduler) = self.scheduler_mut() else {
                return self.state.phase != ReaderPhase::Transitioning;
            };
            let events = scheduler.wait(deadline);
            self.handle_scheduler_events(events);
        }
    }

    #[must_use]
    pub fn phase(&self) -> ReaderPhase {
        self.state.phase
    }

    #[must_use]
    pub fn current_page(&self) -> PageIndex {
        self.state.current_page
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.state.page_count
    }

    #[must_use]
    pub fn scale(&self) -> f32 {
        self.settings.scale
    }

    /// The document handle opened on this thread, while a book is open
    #[must_use]
    pub fn document(&self) -> Option<&R::Document> {
        self.document.as_ref()
    }

    #[must_use]
    pub fn source(&self) -> &DocumentSource {
        &self.source
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether `page` is cached at the current scale
    #[must_use]
    pub fn is_cached(&self, page: PageIndex) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.is_cached(page))
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.scheduler.as_ref().map_or(0, |s| s.cache().len())
    }

    #[must_use]
    pub fn scheduler(&self) -> Option<&RenderScheduler> {
        self.scheduler.as_ref()
    }

    #[must_use]
    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    fn scheduler_mut(&mut self) -> Option<&mut RenderScheduler> {
        self.scheduler.as_mut()
    }

    fn navigation_status(&self) -> Navigation {
        match (self.state.phase, self.state.target, &self.target_error) {
            (ReaderPhase::Transitioning, Some(target), _) => Navigation::Pending(target),
            (_, _, Some(error)) => Navigation::Failed(error.page()),
            _ => Navigation::Completed(self.state.current_page),
        }
    }

    fn apply_command(&mut self, cmd: Command) {
        let effects = self.state.apply(cmd);
        self.execute_effects(effects);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::InvalidateCache => {
                    if let Some(scheduler) = self.scheduler_mut() {
                        scheduler.clear();
                    }
                }

                Effect::LoadDocument => match self.load_document() {
                    Ok(page_count) => self.apply_command(Command::Loaded { page_count }),
                    Err(e) => {
                        self.load_error = Some(e);
                        self.apply_command(Command::LoadFailed);
                    }
                },

                Effect::RenderTarget(page) => self.render_target(page),

                Effect::Present { page, direction } => self.present(page, direction),

                Effect::Prefetch(page) => self.prefetch_around(page),

                Effect::ReportError => match &self.load_error {
                    Some(e) => error!("Cannot open {}: {e}", self.source),
                    None => error!("Cannot open {}", self.source),
                },
            }
        }
    }

    fn load_document(&mut self) -> Result<usize, DocumentLoadError> {
        let doc = self.rasterizer.open(&self.source)?;
        let page_count = self.rasterizer.page_count(&doc);
        if page_count == 0 {
            return Err(DocumentLoadError::Empty {
                path: self.source.path().to_path_buf(),
            });
        }

        self.document = Some(doc);
        self.scheduler = Some(RenderScheduler::start(
            self.rasterizer.clone(),
            self.source.clone(),
            self.settings.scheduler_config(),
        ));
        Ok(page_count)
    }

    fn render_target(&mut self, page: PageIndex) {
        let Some(cached) = self.scheduler.as_ref().map(|s| s.is_cached(page)) else {
            return;
        };

        if cached {
            // Loading waits for the first page explicitly in `open`.
            if self.state.phase == ReaderPhase::Transitioning {
                self.apply_command(Command::TargetReady);
            }
        } else if let Some(scheduler) = self.scheduler_mut() {
            scheduler.request_priority(page);
        }
    }

    fn present(&mut self, page: PageIndex, direction: TransitionDirection) {
        let rendered = self
            .scheduler
            .as_mut()
            .and_then(|s| s.cache_mut().get(page));

        match rendered {
            Some(rendered) => {
                self.presenter.present(&rendered, direction);
                self.events.push(ReaderEvent::Navigated { page, direction });
            }
            None => warn!("Page {page} vanished from cache before it was presented"),
        }
    }

    fn prefetch_around(&mut self, page: PageIndex) {
        let page_count = self.state.page_count;
        let radius = self.settings.prefetch_radius;
        let Some(scheduler) = self.scheduler_mut() else {
            return;
        };

        let window = PrefetchWindow::around(page, page_count, radius);
        scheduler.retain(|p| window.contains(p));
        let queued = scheduler.request(&window.pages);
        if queued > 0 {
            debug!("Prefetching {queued} pages around page {page}");
        }
    }

    fn handle_scheduler_events(&mut self, events: Vec<SchedulerEvent>) {
        let target = self.state.target;
        let mut target_failed = None;

        for event in events {
            match event {
                SchedulerEvent::PageRendered(page) => {
                    self.events.push(ReaderEvent::PageRendered(page));
                }
                SchedulerEvent::PageFailed { page, error } => {
                    if Some(page) == target {
                        target_failed = Some(error.clone());
                    }
                    self.events.push(ReaderEvent::PageFailed { page, error });
                }
                SchedulerEvent::PageCancelled(page) => {
                    if Some(page) == target {
                        target_failed = Some(PageRenderError::Cancelled { page });
                    }
                }
            }
        }

        if self.state.phase != ReaderPhase::Transitioning {
            return;
        }
        let Some(target) = target else {
            return;
        };

        if self.is_cached(target) {
            self.apply_command(Command::TargetReady);
        } else if let Some(error) = target_failed {
            warn!("Cannot show page {target}: {error}");
            self.target_error = Some(error);
            self.apply_command(Command::TargetFailed);
            self.events.push(ReaderEvent::NavigationFailed(target));
        } else if let Some(scheduler) = self.scheduler_mut() {
            // Rendered at a stale scale, or dropped: ask again.
            if !scheduler.is_rendering(target) && !scheduler.is_queued(target) {
                scheduler.request_priority(target);
            }
        }
    }

    /// Error behind the last failed navigation, if any
    #[must_use]
    pub fn last_navigation_error(&self) -> Option<&PageRenderError> {
        self.target_error.as_ref()
    }
}
