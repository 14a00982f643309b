//! Bounded retry over request/response style execution.

use std::future::Future;

use crate::error::{Result, TransportError};
use crate::executor::Execution;

/// Whether a failed attempt may be tried again.
///
/// Transport-level failures are; decode failures, cancellation and
/// configuration errors are not.
fn retry_eligible(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::Request(_)
            | TransportError::Connection(_)
            | TransportError::Timeout
            | TransportError::HttpStatus { .. }
    )
}

/// Run `attempt` up to `retries + 1` times, strictly sequentially.
///
/// A single result without errors returns immediately. A result carrying
/// GraphQL errors is retry-eligible (note: this includes mutations; the
/// caller opted into that by configuring retries). A streaming result is
/// returned as-is on first success: retrying a stream would corrupt already
/// delivered elements. After exhaustion the last obtained result is
/// returned, else the last error is re-raised, else a no-result error.
pub(crate) async fn execute_with_retry<F, Fut>(retries: usize, attempt: F) -> Result<Execution>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Execution>>,
{
    let mut last_result = None;
    let mut last_error = None;

    for n in 0..=retries {
        match attempt().await {
            Ok(Execution::Stream(stream)) => return Ok(Execution::Stream(stream)),
            Ok(Execution::Single(result)) => {
                if !result.has_errors() {
                    return Ok(Execution::Single(result));
                }
                last_result = Some(result);
            }
            Err(error) if retry_eligible(&error) => {
                tracing::debug!(
                    target: "graphql_conduit::retry",
                    "Attempt {} failed: {error}",
                    n + 1
                );
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    if let Some(result) = last_result {
        Ok(Execution::Single(result))
    } else if let Some(error) = last_error {
        Err(error)
    } else {
        Err(TransportError::NoResult)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{ExecutionResult, GraphQLError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn errored_result() -> ExecutionResult {
        ExecutionResult {
            data: None,
            errors: vec![GraphQLError {
                message: "transient".into(),
                locations: vec![],
                path: None,
                extensions: None,
            }],
            extensions: None,
        }
    }

    #[tokio::test]
    async fn test_always_erroring_result_is_attempted_n_plus_one_times() {
        let calls = AtomicUsize::new(0);
        let outcome = execute_with_retry(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(Execution::Single(errored_result())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // The last attempt's result comes back, errors and all.
        let Ok(Execution::Single(result)) = outcome else {
            panic!("expected the final result");
        };
        assert!(result.has_errors());
    }

    #[tokio::test]
    async fn test_success_short_circuits() {
        let calls = AtomicUsize::new(0);
        let outcome = execute_with_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(Execution::Single(ExecutionResult {
                    data: Some(serde_json::json!({"ok": true})),
                    ..Default::default()
                }))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_transport_errors_retry_then_reraise() {
        let calls = AtomicUsize::new(0);
        let outcome = execute_with_retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TransportError::HttpStatus {
                    status: 503,
                    message: None,
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            outcome,
            Err(TransportError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_config_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let outcome = execute_with_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Config("bad".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, Err(TransportError::Config(_))));
    }

    #[tokio::test]
    async fn test_stream_results_are_never_retried() {
        let calls = AtomicUsize::new(0);
        let outcome = execute_with_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(Execution::Stream(crate::stream::ExecutionStream::from_stream(
                    futures_util::stream::empty(),
                )))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, Ok(Execution::Stream(_))));
    }
}
