//! Handle to a request running in the background.

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::http::error::HttpError;
use crate::http::protocol::Progress;
use crate::http::response::Response;

/// Result of a completed request.
pub type RequestResult = Result<Response, HttpError>;

/// A request spawned with [`HttpClient::send`](crate::http::HttpClient::send).
///
/// Carries exactly one terminal value: the response or the error. Poll it with
/// [`is_done`](Self::is_done) / [`try_take`](Self::try_take), await it with
/// [`wait`](Self::wait), or abort it with [`cancel`](Self::cancel).
#[derive(Debug)]
pub struct PendingRequest {
    id: Uuid,
    rx: oneshot::Receiver<RequestResult>,
    handle: JoinHandle<()>,
    progress: Progress,
    upload_progress: Progress,
    taken: bool,
}

impl PendingRequest {
    pub(crate) fn new(
        id: Uuid,
        rx: oneshot::Receiver<RequestResult>,
        handle: JoinHandle<()>,
        progress: Progress,
        upload_progress: Progress,
    ) -> Self {
        Self {
            id,
            rx,
            handle,
            progress,
            upload_progress,
            taken: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// True once the request finished, failed, or was cancelled.
    pub fn is_done(&self) -> bool {
        self.taken || self.handle.is_finished()
    }

    /// Take the result if it is ready. Returns `None` while running and after
    /// the result has been taken.
    pub fn try_take(&mut self) -> Option<RequestResult> {
        if self.taken {
            return None;
        }
        match self.rx.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.taken = true;
                Some(Err(HttpError::Cancelled))
            }
        }
    }

    /// Wait for the result.
    pub async fn wait(self) -> RequestResult {
        if self.taken {
            return Err(HttpError::Cancelled);
        }
        self.rx.await.unwrap_or(Err(HttpError::Cancelled))
    }

    /// Block the current thread until the result is ready.
    ///
    /// For callers outside the runtime; panics if called from async context.
    pub fn blocking_wait(self) -> RequestResult {
        if self.taken {
            return Err(HttpError::Cancelled);
        }
        self.rx.blocking_recv().unwrap_or(Err(HttpError::Cancelled))
    }

    /// Abort the in-flight request. Its connection is closed, not pooled.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            tracing::debug!(request_id = %self.id, "Request cancelled");
            self.handle.abort();
        }
    }

    pub fn progress(&self) -> f32 {
        self.progress.get()
    }

    pub fn upload_progress(&self) -> f32 {
        self.upload_progress.get()
    }
}
