//! Content-type keyed decoding of HTTP responses.
//!
//! A completed response resolves to either a single [`ExecutionResult`] or a
//! lazy stream of them:
//!
//! - `text/event-stream`: SSE events, each payload one JSON result; ends on
//!   stream close or an explicit `complete` event.
//! - `multipart/mixed`: boundary-delimited parts; payloads carrying a
//!   `path` (or an `incremental` batch) merge into the prior result and the
//!   merged snapshot is emitted.
//! - anything else: the whole body as one JSON document.
//!
//! HTTP status is not interpreted here: a GraphQL error can ride on any
//! status, so the body is decoded regardless.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::executor::Execution;
use crate::response::{ExecutionPatch, ExecutionResult, GraphQLError, PathSegment};
use crate::stream::ExecutionStream;

/// Decode a completed response based on its `content-type` header.
pub(crate) async fn decode_response(response: reqwest::Response) -> Result<Execution> {
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("text/event-stream") {
        Ok(Execution::Stream(decode_event_stream(response)))
    } else if content_type.starts_with("multipart/mixed") {
        let boundary = boundary_param(&content_type).ok_or_else(|| {
            TransportError::Decode(format!(
                "multipart response without a boundary parameter: {content_type}"
            ))
        })?;
        Ok(Execution::Stream(decode_multipart(response, boundary)))
    } else {
        let bytes = response.bytes().await?;
        let result: ExecutionResult = serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::Json(format!("Malformed response body: {e}")))?;
        Ok(Execution::Single(result))
    }
}

/// Extract the `boundary` parameter from a `multipart/mixed` content type,
/// quoted or bare.
fn boundary_param(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            let value = value.trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn decode_event_stream(response: reqwest::Response) -> ExecutionStream {
    let stream = async_stream::stream! {
        let events = response.bytes_stream().eventsource();
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => match event.event.as_str() {
                    "complete" => break,
                    "next" | "message" => {
                        if event.data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ExecutionResult>(&event.data) {
                            Ok(result) => yield Ok(result),
                            Err(e) => {
                                yield Err(TransportError::Json(format!(
                                    "Malformed event payload: {e}"
                                )));
                                break;
                            }
                        }
                    }
                    other => {
                        tracing::warn!(
                            target: "graphql_conduit::decode",
                            "Ignoring unexpected SSE event '{other}'"
                        );
                    }
                },
                Err(e) => {
                    yield Err(TransportError::Sse(e.to_string()));
                    break;
                }
            }
        }
    };
    ExecutionStream::from_stream(stream)
}

/// One multipart part: either an initial result or a patch into it.
#[derive(Debug, Default, Deserialize)]
struct PartPayload {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
    #[serde(default)]
    extensions: Option<Value>,
    #[serde(default)]
    path: Option<Vec<PathSegment>>,
    #[serde(default, rename = "hasNext")]
    has_next: Option<bool>,
    #[serde(default)]
    incremental: Option<Vec<ExecutionPatch>>,
}

fn decode_multipart(response: reqwest::Response, boundary: String) -> ExecutionStream {
    let stream = async_stream::stream! {
        let parts = multipart_stream::parse(response.bytes_stream(), &boundary);
        futures_util::pin_mut!(parts);

        // Parts after the first merge into this accumulated result, so each
        // emitted element is a complete snapshot.
        let mut current: Option<ExecutionResult> = None;

        while let Some(part) = parts.next().await {
            let part = match part {
                Ok(part) => part,
                Err(e) => {
                    yield Err(TransportError::Decode(format!(
                        "Malformed multipart frame: {e}"
                    )));
                    break;
                }
            };

            let payload: PartPayload = match serde_json::from_slice(&part.body) {
                Ok(payload) => payload,
                Err(e) => {
                    yield Err(TransportError::Json(format!(
                        "Malformed multipart payload: {e}"
                    )));
                    break;
                }
            };

            if let Some(patches) = payload.incremental {
                let acc = current.get_or_insert_with(ExecutionResult::default);
                for patch in patches {
                    acc.apply_patch(patch);
                }
                yield Ok(acc.clone());
            } else if payload.path.is_some() {
                let acc = current.get_or_insert_with(ExecutionResult::default);
                acc.apply_patch(ExecutionPatch {
                    path: payload.path,
                    data: payload.data,
                    errors: payload.errors,
                    extensions: payload.extensions,
                    has_next: payload.has_next,
                });
                yield Ok(acc.clone());
            } else {
                let result = ExecutionResult {
                    data: payload.data,
                    errors: payload.errors,
                    extensions: payload.extensions,
                };
                current = Some(result.clone());
                yield Ok(result);
            }
        }
    };
    ExecutionStream::from_stream(stream)
}
