//! The executor: one callable routing every operation to its transport.

pub(crate) mod http;
pub(crate) mod legacy_ws;
pub(crate) mod sse;
pub(crate) mod ws;

use std::sync::Arc;

use crate::error::{Result, TransportError};
use crate::request::ExecutionRequest;
use crate::response::ExecutionResult;
use crate::retry;
use crate::stream::ExecutionStream;

use self::http::HttpExecutor;
use self::legacy_ws::LegacyWsTransport;
use self::sse::SseTransport;
use self::ws::WsTransport;

/// The outcome of executing an operation: a resolved result or a lazy
/// sequence of them.
#[derive(Debug)]
pub enum Execution {
    /// A single resolved result (plain JSON response).
    Single(ExecutionResult),
    /// An ordered result sequence (subscription, live query, or incremental
    /// response).
    Stream(ExecutionStream),
}

impl Execution {
    /// Unwrap a single result, failing on a streaming outcome.
    pub fn into_single(self) -> Result<ExecutionResult> {
        match self {
            Self::Single(result) => Ok(result),
            Self::Stream(_) => Err(TransportError::Config(
                "Operation produced a result stream; consume it with into_stream".into(),
            )),
        }
    }

    /// Unwrap a result stream; a single result becomes a one-element stream.
    pub fn into_stream(self) -> ExecutionStream {
        match self {
            Self::Single(result) => {
                ExecutionStream::from_stream(futures_util::stream::iter([Ok(result)]))
            }
            Self::Stream(stream) => stream,
        }
    }
}

/// The subscription transport chosen at build time. Exactly one is active
/// per executor; selection is never re-evaluated per request.
pub(crate) enum SubscriptionTransport {
    /// graphql-transport-ws.
    WebSocket(WsTransport),
    /// Legacy graphql-ws.
    LegacyWebSocket(LegacyWsTransport),
    /// SSE over the HTTP endpoint (GET + `text/event-stream`), with an
    /// optional dedicated endpoint.
    ServerSentEvents { endpoint: Option<String> },
    /// Dedicated GraphQL-SSE client.
    GraphQlSse(SseTransport),
}

pub(crate) struct ExecutorInner {
    pub(crate) http: HttpExecutor,
    pub(crate) subscriptions: SubscriptionTransport,
    pub(crate) retries: Option<usize>,
}

/// Executes GraphQL operations against a remote endpoint, routing each one
/// to the right transport.
///
/// Built once via [`ExecutorBuilder`](crate::ExecutorBuilder) and reused;
/// cheap to clone. Queries and mutations go over HTTP; subscriptions and
/// live queries go over the subscription transport fixed at build time.
///
/// # Example
///
/// ```ignore
/// let executor = Executor::builder("https://api.example/graphql").build()?;
///
/// let result = executor
///     .execute(&ExecutionRequest::new("{ ping }"))
///     .await?
///     .into_single()?;
///
/// let mut stream = executor
///     .subscribe(&ExecutionRequest::new("subscription { tick }"))
///     .await?;
/// while let Some(result) = stream.next().await {
///     println!("{:?}", result?.data);
/// }
/// ```
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl Executor {
    pub(crate) fn from_inner(inner: ExecutorInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Create a builder for configuring an executor.
    pub fn builder(endpoint: impl Into<String>) -> crate::builder::ExecutorBuilder {
        crate::builder::ExecutorBuilder::new(endpoint)
    }

    /// The HTTP endpoint operations are executed against.
    pub fn endpoint(&self) -> &str {
        self.inner.http.endpoint()
    }

    /// Execute an operation, routing it by its kind.
    ///
    /// The kind is recomputed from the document on every call: the same
    /// executor serves queries, mutations and subscriptions alike.
    /// Subscriptions and live queries come back as [`Execution::Stream`];
    /// everything else goes over HTTP, wrapped in the retry policy when one
    /// is configured.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<Execution> {
        if request.is_subscription() || request.is_live_query() {
            return Ok(Execution::Stream(self.subscribe_routed(request).await?));
        }

        match self.inner.retries {
            Some(retries) => {
                retry::execute_with_retry(retries, || self.inner.http.execute(request)).await
            }
            None => self.inner.http.execute(request).await,
        }
    }

    /// Subscribe to a subscription or live query operation.
    pub async fn subscribe(&self, request: &ExecutionRequest) -> Result<ExecutionStream> {
        if !request.is_subscription() && !request.is_live_query() {
            return Err(TransportError::Config(
                "Expected a subscription or live query operation".into(),
            ));
        }
        self.subscribe_routed(request).await
    }

    /// Execute from a synchronous caller.
    ///
    /// Drives the operation on a private runtime and refuses to run inside
    /// an async context rather than handing back a pending computation.
    /// Streaming outcomes are a usage error here; they need the async API.
    pub fn execute_blocking(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(TransportError::Config(
                "execute_blocking called inside an async runtime; use execute instead".into(),
            ));
        }
        match blocking_runtime().block_on(self.execute(request))? {
            Execution::Single(result) => Ok(result),
            Execution::Stream(_) => Err(TransportError::Config(
                "Streaming operations cannot be consumed synchronously".into(),
            )),
        }
    }

    async fn subscribe_routed(&self, request: &ExecutionRequest) -> Result<ExecutionStream> {
        match &self.inner.subscriptions {
            SubscriptionTransport::WebSocket(transport) => transport.subscribe(request).await,
            SubscriptionTransport::LegacyWebSocket(transport) => {
                transport.subscribe(request).await
            }
            SubscriptionTransport::ServerSentEvents { endpoint } => {
                self.inner
                    .http
                    .execute_sse(request, endpoint.as_deref())
                    .await
            }
            SubscriptionTransport::GraphQlSse(transport) => transport.subscribe(request).await,
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = match &self.inner.subscriptions {
            SubscriptionTransport::WebSocket(t) => format!("websocket({})", t.url()),
            SubscriptionTransport::LegacyWebSocket(t) => format!("legacy-websocket({})", t.url()),
            SubscriptionTransport::ServerSentEvents { endpoint } => format!(
                "sse({})",
                endpoint.as_deref().unwrap_or(self.inner.http.endpoint())
            ),
            SubscriptionTransport::GraphQlSse(t) => format!("graphql-sse({})", t.endpoint()),
        };
        f.debug_struct("Executor")
            .field("endpoint", &self.inner.http.endpoint())
            .field("subscriptions", &subscriptions)
            .finish()
    }
}

/// Private runtime backing `execute_blocking`.
fn blocking_runtime() -> &'static tokio::runtime::Runtime {
    use std::sync::OnceLock;
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to create blocking runtime")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_blocking_refuses_async_context() {
        let executor = Executor::builder("https://api.example/graphql")
            .build()
            .unwrap();
        let request = ExecutionRequest::new("{ ping }");

        assert!(matches!(
            executor.execute_blocking(&request),
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_queries() {
        let executor = Executor::builder("https://api.example/graphql")
            .build()
            .unwrap();
        let request = ExecutionRequest::new("{ ping }");

        assert!(matches!(
            executor.subscribe(&request).await,
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn test_into_single_rejects_stream() {
        let execution = Execution::Stream(ExecutionStream::from_stream(
            futures_util::stream::empty(),
        ));
        assert!(execution.into_single().is_err());
    }

    #[tokio::test]
    async fn test_into_stream_adapts_single() {
        let execution = Execution::Single(ExecutionResult::default());
        let mut stream = execution.into_stream();
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
