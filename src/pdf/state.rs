//! Reader state machine
//!
//! Pure: commands go in, effects come out. The session executes the
//! effects against the scheduler, the cache and the presenter.

use super::types::{PageIndex, ReaderPhase, TransitionDirection};

/// Why a navigation request was ignored.
///
/// Not an error: rejected navigation is a silent no-op for the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationRejected {
    OutOfRange { requested: usize, page_count: usize },
    SamePage,
    /// Another transition is in flight
    Busy,
    NotReady(ReaderPhase),
}

/// Current reader state for one document
#[derive(Clone, Debug)]
pub struct ReaderState {
    pub phase: ReaderPhase,
    pub current_page: PageIndex,
    pub page_count: usize,
    /// Page being brought on screen while Loading or Transitioning
    pub target: Option<PageIndex>,
}

impl Default for ReaderState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ReaderPhase::Idle,
            current_page: PageIndex::FIRST,
            page_count: 0,
            target: None,
        }
    }

    /// Whether `GoToPage(page)` would start a transition
    pub fn check_navigation(&self, page: usize) -> Result<PageIndex, NavigationRejected> {
        match self.phase {
            ReaderPhase::Ready => {}
            ReaderPhase::Transitioning => return Err(NavigationRejected::Busy),
            phase => return Err(NavigationRejected::NotReady(phase)),
        }

        let target = PageIndex::new(page)
            .filter(|p| p.within(self.page_count))
            .ok_or(NavigationRejected::OutOfRange {
                requested: page,
                page_count: self.page_count,
            })?;

        if target == self.current_page {
            return Err(NavigationRejected::SamePage);
        }
        Ok(target)
    }

    /// Target of `NextPage` from the current state
    #[must_use]
    pub fn next_page(&self) -> usize {
        self.current_page.get() + 1
    }

    /// Target of `PreviousPage` from the current state
    #[must_use]
    pub fn previous_page(&self) -> usize {
        self.current_page.get() - 1
    }

    /// Apply a command and return resulting effects
    #[must_use]
    pub fn apply(&mut self, cmd: Command) -> Vec<Effect> {
        match cmd {
            Command::Open => match self.phase {
                ReaderPhase::Idle | ReaderPhase::Error => {
                    *self = Self::new();
                    self.phase = ReaderPhase::Loading;
                    vec![Effect::InvalidateCache, Effect::LoadDocument]
                }
                _ => vec![],
            },

            Command::Loaded { page_count } => {
                if self.phase != ReaderPhase::Loading {
                    return vec![];
                }
                if page_count == 0 {
                    self.phase = ReaderPhase::Error;
                    return vec![Effect::ReportError];
                }
                self.page_count = page_count;
                self.current_page = PageIndex::FIRST;
                self.target = Some(PageIndex::FIRST);
                vec![Effect::RenderTarget(PageIndex::FIRST)]
            }

            Command::LoadFailed => {
                if self.phase == ReaderPhase::Loading {
                    self.phase = ReaderPhase::Error;
                    self.target = None;
                    vec![Effect::ReportError]
                } else {
                    vec![]
                }
            }

            Command::GoToPage(page) => match self.check_navigation(page) {
                Ok(target) => {
                    self.phase = ReaderPhase::Transitioning;
                    self.target = Some(target);
                    vec![Effect::RenderTarget(target)]
                }
                Err(_) => vec![],
            },

            Command::NextPage => self.apply(Command::GoToPage(self.next_page())),

            Command::PreviousPage => self.apply(Command::GoToPage(self.previous_page())),

            Command::Rescale => {
                if self.phase != ReaderPhase::Ready {
                    return vec![];
                }
                self.phase = ReaderPhase::Transitioning;
                self.target = Some(self.current_page);
                vec![Effect::RenderTarget(self.current_page)]
            }

            Command::TargetReady => {
                let Some(target) = self.target.take() else {
                    return vec![];
                };
                let direction = match self.phase {
                    ReaderPhase::Loading => TransitionDirection::None,
                    ReaderPhase::Transitioning => {
                        TransitionDirection::between(self.current_page, target)
                    }
                    _ => return vec![],
                };
                self.phase = ReaderPhase::Ready;
                self.current_page = target;
                vec![
                    Effect::Present {
                        page: target,
                        direction,
                    },
                    Effect::Prefetch(target),
                ]
            }

            Command::TargetFailed => match self.phase {
                ReaderPhase::Loading => {
                    self.phase = ReaderPhase::Error;
                    self.target = None;
                    vec![Effect::ReportError]
                }
                ReaderPhase::Transitioning => {
                    self.phase = ReaderPhase::Ready;
                    self.target = None;
                    vec![]
                }
                _ => vec![],
            },

            Command::Close => {
                *self = Self::new();
                vec![Effect::InvalidateCache]
            }
        }
    }
}

/// Commands that modify reader state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open (or reopen after an error) the document
    Open,
    /// The document opened with this many pages
    Loaded { page_count: usize },
    LoadFailed,
    GoToPage(usize),
    NextPage,
    PreviousPage,
    /// Re-render the current page at a new scale
    Rescale,
    /// The target page is in the cache
    TargetReady,
    /// The target page could not be rendered
    TargetFailed,
    Close,
}

/// Effects produced by state changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Drop every cached page and queued render
    InvalidateCache,
    /// Open the document and report `Loaded` or `LoadFailed`
    LoadDocument,
    /// Make sure the page gets rendered, ahead of any prefetch
    RenderTarget(PageIndex),
    /// Hand the cached page to the presenter
    Present {
        page: PageIndex,
        direction: TransitionDirection,
    },
    /// Request the prefetch window around the page
    Prefetch(PageIndex),
    ReportError,
}
