//! Render worker - runs in separate thread(s)

use std::sync::Arc;

use flume::{Receiver, SendError, Sender};
use log::{debug, error};

use super::error::PageRenderError;
use super::rasterizer::{DocumentSource, Rasterizer};
use super::request::{RenderJob, WorkerRequest, WorkerResponse};
use super::types::RenderedPage;

/// Serve render requests until shutdown.
///
/// Opens its own document handle first. If that fails the worker keeps
/// answering, failing every job, so the scheduler never waits on it.
pub fn render_worker<R: Rasterizer>(
    rasterizer: Arc<R>,
    source: DocumentSource,
    requests: Receiver<WorkerRequest>,
    responses: Sender<WorkerResponse>,
) {
    let doc = match rasterizer.open(&source) {
        Ok(doc) => Some(doc),
        Err(e) => {
            error!("Render worker could not open {source}: {e}");
            None
        }
    };

    for request in requests {
        match request {
            WorkerRequest::Render(job) => {
                if handle_job(rasterizer.as_ref(), doc.as_ref(), job, &responses).is_err() {
                    break;
                }
            }

            WorkerRequest::Shutdown => break,
        }
    }

    debug!("Render worker for {source} stopped");
}

/// Answer one job. Jobs that reach the rasterizer are announced with
/// `Started` first.
fn handle_job<R: Rasterizer>(
    rasterizer: &R,
    doc: Option<&R::Document>,
    job: RenderJob,
    responses: &Sender<WorkerResponse>,
) -> Result<(), SendError<WorkerResponse>> {
    if job.cancel.is_cancelled() {
        return responses.send(WorkerResponse::Cancelled {
            id: job.id,
            page: job.page,
        });
    }

    let Some(doc) = doc else {
        return responses.send(WorkerResponse::Failed {
            id: job.id,
            error: PageRenderError::WorkerUnavailable { page: job.page },
        });
    };

    responses.send(WorkerResponse::Started { id: job.id })?;
    let response = match rasterizer.render(doc, job.page, job.scale) {
        Ok(bitmap) => WorkerResponse::Rendered {
            id: job.id,
            page: RenderedPage {
                page: job.page,
                scale: job.scale,
                bitmap,
            },
        },
        Err(error) => WorkerResponse::Failed { id: job.id, error },
    };
    responses.send(response)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::pdf::request::{CancelToken, RequestId};
    use crate::pdf::types::PageIndex;
    use crate::test_utils::FakeRasterizer;

    fn job(id: u64, page: usize) -> RenderJob {
        RenderJob {
            id: RequestId::new(id),
            page: PageIndex::new(page).unwrap(),
            scale: 1.0,
            cancel: CancelToken::new(),
        }
    }

    fn spawn(rasterizer: FakeRasterizer) -> (Sender<WorkerRequest>, Receiver<WorkerResponse>) {
        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        let rasterizer = Arc::new(rasterizer);
        thread::spawn(move || {
            render_worker(
                rasterizer,
                DocumentSource::new("fake.pdf"),
                request_rx,
                response_tx,
            );
        });
        (request_tx, response_rx)
    }

    #[test]
    fn renders_and_stops_on_shutdown() {
        let (tx, rx) = spawn(FakeRasterizer::new(5));
        tx.send(WorkerRequest::Render(job(1, 2))).unwrap();
        tx.send(WorkerRequest::Shutdown).unwrap();

        assert!(matches!(
            rx.recv().unwrap(),
            WorkerResponse::Started { id } if id == RequestId::new(1)
        ));
        match rx.recv().unwrap() {
            WorkerResponse::Rendered { id, page } => {
                assert_eq!(id, RequestId::new(1));
                assert_eq!(page.page.get(), 2);
            }
            other => panic!("unexpected response {other:?}"),
        }
        assert!(rx.recv().is_err());
    }

    #[test]
    fn cancelled_job_is_not_rendered() {
        let rasterizer = FakeRasterizer::new(5);
        let calls = rasterizer.counters();
        let (tx, rx) = spawn(rasterizer);

        let cancelled = job(7, 3);
        cancelled.cancel.cancel();
        tx.send(WorkerRequest::Render(cancelled)).unwrap();

        tx.send(WorkerRequest::Shutdown).unwrap();

        assert!(matches!(
            rx.recv().unwrap(),
            WorkerResponse::Cancelled { page, .. } if page.get() == 3
        ));
        assert!(rx.recv().is_err());
        assert_eq!(calls.total_calls(), 0);
    }

    #[test]
    fn failed_open_fails_every_job() {
        let (tx, rx) = spawn(FakeRasterizer::new(5).failing_open());
        tx.send(WorkerRequest::Render(job(1, 1))).unwrap();

        assert!(matches!(
            rx.recv().unwrap(),
            WorkerResponse::Failed {
                error: PageRenderError::WorkerUnavailable { .. },
                ..
            }
        ));
    }

    #[test]
    fn rasterizer_failure_is_reported() {
        let (tx, rx) = spawn(FakeRasterizer::new(5).failing_on(&[4]));
        tx.send(WorkerRequest::Render(job(9, 4))).unwrap();

        assert!(matches!(rx.recv().unwrap(), WorkerResponse::Started { .. }));
        match rx.recv().unwrap() {
            WorkerResponse::Failed { id, error } => {
                assert_eq!(id, RequestId::new(9));
                assert_eq!(error.page().get(), 4);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }
}
