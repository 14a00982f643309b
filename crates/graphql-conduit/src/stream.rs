//! The lazy result-sequence abstraction shared by all streaming transports.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::response::ExecutionResult;

type Canceller = Box<dyn FnOnce() + Send>;

/// An ordered, lazy sequence of [`ExecutionResult`]s with explicit
/// cancellation.
///
/// Every streaming transport (WebSocket subscriptions, SSE connections,
/// multipart incremental responses) is adapted into this one type, so
/// consumers never distinguish the origin. Elements arrive in the order the
/// server emitted them; the sequence ends when the server completes it, when
/// a decode error terminates it, or when [`cancel`](Self::cancel) is called.
///
/// # Example
///
/// ```ignore
/// let mut stream = executor.subscribe(request).await?;
/// while let Some(result) = stream.next().await {
///     println!("{:?}", result?.data);
/// }
/// ```
pub struct ExecutionStream {
    inner: Option<BoxStream<'static, Result<ExecutionResult>>>,
    canceller: Option<Canceller>,
}

impl ExecutionStream {
    /// Wrap a transport stream together with its teardown action.
    ///
    /// The teardown action runs at most once: on the first `cancel` call or
    /// on drop, and not at all after the sequence completed on its own.
    pub(crate) fn new<S>(inner: S, canceller: Canceller) -> Self
    where
        S: Stream<Item = Result<ExecutionResult>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(inner)),
            canceller: Some(canceller),
        }
    }

    /// Wrap a transport stream whose teardown is dropping it.
    pub(crate) fn from_stream<S>(inner: S) -> Self
    where
        S: Stream<Item = Result<ExecutionResult>> + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(inner)),
            canceller: None,
        }
    }

    /// Get the next result from the sequence.
    ///
    /// Returns `None` once the sequence has terminated or been cancelled.
    pub async fn next(&mut self) -> Option<Result<ExecutionResult>> {
        futures_util::StreamExt::next(&mut *self).await
    }

    /// Cancel the in-flight operation.
    ///
    /// Signals the underlying transport (aborts the HTTP connection,
    /// unsubscribes the socket operation, closes the SSE connection) and
    /// terminates the sequence: no further elements are delivered. Calling
    /// `cancel` again is a no-op; the teardown fires exactly once.
    pub fn cancel(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
        // Dropping the inner stream releases the transport resources
        // (response body, receiver) held by this side.
        self.inner = None;
    }

    /// Whether the sequence has been cancelled or has terminated.
    pub fn is_terminated(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for ExecutionStream {
    type Item = Result<ExecutionResult>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(None);
        };
        match inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                // Completed on its own: no teardown owed to the transport.
                self.canceller = None;
                self.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        if let Some(canceller) = self.canceller.take() {
            canceller();
        }
    }
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
