//! Dedicated GraphQL-SSE subscription client (distinct connections mode).
//!
//! Each subscribe opens its own event-source request carrying the operation,
//! reusing the executor's HTTP client so proxying and auth behave exactly as
//! they do for queries.

use std::collections::HashMap;

use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use super::ws::SubscribePayload;
use crate::builder::Authentication;
use crate::error::{Result, TransportError};
use crate::request::ExecutionRequest;
use crate::response::ExecutionResult;
use crate::stream::ExecutionStream;

pub(crate) struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    auth: Option<Authentication>,
}

impl SseTransport {
    pub(crate) fn new(
        client: reqwest::Client,
        endpoint: String,
        headers: HashMap<String, String>,
        auth: Option<Authentication>,
    ) -> Self {
        Self {
            client,
            endpoint,
            headers,
            auth,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open one event-source connection for this operation.
    pub(crate) async fn subscribe(&self, request: &ExecutionRequest) -> Result<ExecutionStream> {
        let endpoint = request
            .endpoint_override()
            .unwrap_or(self.endpoint.as_str());

        let mut builder = self
            .client
            .post(endpoint)
            .json(&SubscribePayload::from(request));

        // Insertion replaces, so request-level overrides win.
        let mut headers = http::HeaderMap::new();
        let merged = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(request.header_overrides().map(|(name, value)| (name.as_str(), value)));
        for (name, value) in merged {
            if let (Ok(name), Ok(value)) = (
                name.parse::<http::header::HeaderName>(),
                http::header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        if let Some(Authentication::Bearer(token)) = &self.auth
            && let Ok(value) = http::header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(http::header::AUTHORIZATION, value);
        }
        builder = builder.headers(headers);
        if let Some(Authentication::Basic { username, password }) = &self.auth {
            builder = builder.basic_auth(username, password.as_ref());
        }

        let mut events = builder
            .eventsource()
            .map_err(|e| TransportError::Sse(e.to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        events.close();
                        break;
                    }
                    event = events.next() => {
                        match event {
                            None => break,
                            Some(Ok(Event::Open)) => {}
                            Some(Ok(Event::Message(message))) => match message.event.as_str() {
                                "complete" => {
                                    events.close();
                                    break;
                                }
                                "next" | "message" => {
                                    let result = serde_json::from_str::<ExecutionResult>(&message.data)
                                        .map_err(|e| {
                                            TransportError::Json(format!(
                                                "Malformed event payload: {e}"
                                            ))
                                        });
                                    let failed = result.is_err();
                                    if tx.send(result).await.is_err() || failed {
                                        events.close();
                                        break;
                                    }
                                }
                                other => {
                                    tracing::warn!(
                                        target: "graphql_conduit::sse",
                                        "Ignoring unexpected SSE event '{other}'"
                                    );
                                }
                            },
                            Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                            Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, _))) => {
                                let _ = tx
                                    .send(Err(TransportError::HttpStatus {
                                        status: status.as_u16(),
                                        message: status.canonical_reason().map(str::to_string),
                                    }))
                                    .await;
                                events.close();
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = tx.send(Err(TransportError::Sse(e.to_string()))).await;
                                events.close();
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(ExecutionStream::new(
            ReceiverStream::new(rx),
            Box::new(move || {
                let _ = cancel_tx.send(());
            }),
        ))
    }
}
