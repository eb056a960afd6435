use std::sync::Arc;
use std::time::Duration;

use flipbook::pdf::{
    DocumentLoadError, DocumentSource, Navigation, NavigationRejected, PageIndex, ReaderError,
    ReaderEvent, ReaderPhase, ReaderSession, TransitionDirection,
};
use flipbook::settings::Settings;
use flipbook::test_utils::{FakeRasterizer, RecordingPresenter};

const WAIT: Duration = Duration::from_secs(10);

type Session = ReaderSession<FakeRasterizer, RecordingPresenter>;

fn page(n: usize) -> PageIndex {
    PageIndex::new(n).unwrap()
}

fn settings() -> Settings {
    Settings {
        scale: 1.0,
        max_concurrent_renders: 2,
        prefetch_radius: 2,
        render_queue_bound: 10,
        cache_capacity: 16,
        render_timeout_ms: 5000,
        batch_yield_ms: 1,
        ..Settings::default()
    }
}

fn session(rasterizer: FakeRasterizer) -> Session {
    ReaderSession::new(
        Arc::new(rasterizer),
        DocumentSource::new("book.pdf"),
        settings(),
        RecordingPresenter::default(),
    )
}

fn opened(rasterizer: FakeRasterizer) -> Session {
    let mut session = session(rasterizer);
    session.open().unwrap();
    assert!(session.settle(WAIT));
    session
}

fn go(session: &mut Session, n: usize) -> Navigation {
    match session.goto_page(n) {
        Navigation::Pending(_) => session.wait_transition(WAIT),
        other => other,
    }
}

#[test]
fn open_presents_first_page_and_prefetches_ahead() {
    let session = opened(FakeRasterizer::new(10));

    assert_eq!(session.phase(), ReaderPhase::Ready);
    assert_eq!(session.current_page(), page(1));
    assert_eq!(session.page_count(), 10);
    assert_eq!(session.presenter().pages(), vec![1]);
    assert_eq!(
        session.presenter().frames[0].direction,
        TransitionDirection::None
    );
    assert!(session.is_cached(page(2)));
    assert!(session.is_cached(page(3)));
    assert!(!session.is_cached(page(4)));
}

#[test]
fn jump_to_last_page_prefetches_behind() {
    let mut session = opened(FakeRasterizer::new(10));

    assert_eq!(go(&mut session, 10), Navigation::Completed(page(10)));
    assert!(session.settle(WAIT));

    assert_eq!(session.current_page(), page(10));
    assert!(session.is_cached(page(8)));
    assert!(session.is_cached(page(9)));
    let last = session.presenter().frames.last().unwrap();
    assert_eq!(last.page, page(10));
    assert_eq!(last.direction, TransitionDirection::Forward);
}

#[test]
fn prefetched_page_is_shown_immediately() {
    let mut session = opened(FakeRasterizer::new(10));

    assert_eq!(session.next_page(), Navigation::Completed(page(2)));
    assert_eq!(session.presenter().pages(), vec![1, 2]);

    assert_eq!(session.previous_page(), Navigation::Completed(page(1)));
    let last = session.presenter().frames.last().unwrap();
    assert_eq!(last.direction, TransitionDirection::Backward);
}

#[test]
fn navigation_during_transition_is_rejected() {
    let rasterizer = FakeRasterizer::new(10);
    let gate = rasterizer.gate();
    let mut session = opened(rasterizer);

    gate.close();
    assert_eq!(session.goto_page(5), Navigation::Pending(page(5)));
    assert_eq!(session.phase(), ReaderPhase::Transitioning);

    assert_eq!(
        session.goto_page(7),
        Navigation::Rejected(NavigationRejected::Busy)
    );
    assert_eq!(
        session.set_scale(2.0),
        Navigation::Rejected(NavigationRejected::Busy)
    );
    assert_eq!(session.current_page(), page(1));
    assert_eq!(gate.calls_for(7), 0);

    gate.open();
    assert_eq!(session.wait_transition(WAIT), Navigation::Completed(page(5)));
    assert_eq!(session.current_page(), page(5));
    assert_eq!(session.presenter().pages(), vec![1, 5]);
}

#[test]
fn poll_completes_a_pending_transition() {
    let rasterizer = FakeRasterizer::new(10);
    let gate = rasterizer.gate();
    let mut session = opened(rasterizer);

    gate.close();
    assert_eq!(session.goto_page(6), Navigation::Pending(page(6)));
    assert!(session.poll().is_empty());

    gate.open();
    let mut events = Vec::new();
    for _ in 0..1000 {
        events.extend(session.poll());
        if session.phase() == ReaderPhase::Ready {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(session.current_page(), page(6));
    assert!(events.contains(&ReaderEvent::PageRendered(page(6))));
    assert!(events.contains(&ReaderEvent::Navigated {
        page: page(6),
        direction: TransitionDirection::Forward
    }));
}

#[test]
fn out_of_range_and_same_page_are_ignored() {
    let mut session = opened(FakeRasterizer::new(3));

    assert!(matches!(
        session.previous_page(),
        Navigation::Rejected(NavigationRejected::OutOfRange { requested: 0, .. })
    ));
    assert!(matches!(
        session.goto_page(4),
        Navigation::Rejected(NavigationRejected::OutOfRange { .. })
    ));
    assert_eq!(
        session.goto_page(1),
        Navigation::Rejected(NavigationRejected::SamePage)
    );
    assert_eq!(session.phase(), ReaderPhase::Ready);
    assert_eq!(session.presenter().pages(), vec![1]);
}

#[test]
fn failed_target_keeps_reader_on_current_page() {
    let rasterizer = FakeRasterizer::new(10).failing_on(&[6]);
    let handle = rasterizer.counters();
    let mut session = opened(rasterizer);

    assert_eq!(go(&mut session, 6), Navigation::Failed(page(6)));
    assert_eq!(session.phase(), ReaderPhase::Ready);
    assert_eq!(session.current_page(), page(1));
    assert!(session.last_navigation_error().is_some());
    assert!(!session.is_cached(page(6)));

    handle.heal(6);
    assert_eq!(go(&mut session, 6), Navigation::Completed(page(6)));
    assert!(session.last_navigation_error().is_none());
    assert_eq!(handle.calls_for(6), 2);
}

#[test]
fn rescale_presents_current_page_at_new_scale() {
    let mut session = opened(FakeRasterizer::new(5));

    let outcome = match session.set_scale(2.0) {
        Navigation::Pending(_) => session.wait_transition(WAIT),
        other => other,
    };
    assert_eq!(outcome, Navigation::Completed(page(1)));
    assert_eq!(session.scale(), 2.0);

    let last = session.presenter().frames.last().unwrap();
    assert_eq!(last.page, page(1));
    assert_eq!(last.scale, 2.0);
    assert_eq!(last.direction, TransitionDirection::None);
}

#[test]
fn unreadable_document_is_an_error_until_reopened() {
    let mut session = session(FakeRasterizer::new(10).failing_open());

    let err = session.open().unwrap_err();
    assert!(matches!(
        err,
        ReaderError::Load(DocumentLoadError::Unreadable { .. })
    ));
    assert_eq!(session.phase(), ReaderPhase::Error);
    assert_eq!(
        session.goto_page(2),
        Navigation::Rejected(NavigationRejected::NotReady(ReaderPhase::Error))
    );
    assert!(session.presenter().frames.is_empty());

    assert!(session.reload().is_err());
    assert_eq!(session.phase(), ReaderPhase::Error);
}

#[test]
fn empty_document_fails_to_open() {
    let mut session = session(FakeRasterizer::new(0));

    assert!(matches!(
        session.open(),
        Err(ReaderError::Load(DocumentLoadError::Empty { .. }))
    ));
    assert_eq!(session.phase(), ReaderPhase::Error);
}

#[test]
fn first_page_failure_fails_open() {
    let mut session = session(FakeRasterizer::new(4).failing_on(&[1]));

    assert!(matches!(
        session.open(),
        Err(ReaderError::Load(DocumentLoadError::FirstPage(_)))
    ));
    assert_eq!(session.phase(), ReaderPhase::Error);
}

#[test]
fn reload_starts_over_from_first_page() {
    let mut session = opened(FakeRasterizer::new(10));
    go(&mut session, 4);

    session.reload().unwrap();
    assert_eq!(session.current_page(), page(1));
    assert_eq!(session.presenter().pages(), vec![1, 4, 1]);
}

#[test]
fn close_releases_everything() {
    let mut session = opened(FakeRasterizer::new(10));

    session.close();
    assert_eq!(session.phase(), ReaderPhase::Idle);
    assert_eq!(session.cache_len(), 0);
    assert!(session.scheduler().is_none());
    assert!(session.document().is_none());
    assert!(matches!(
        session.goto_page(2),
        Navigation::Rejected(NavigationRejected::NotReady(ReaderPhase::Idle))
    ));
}
