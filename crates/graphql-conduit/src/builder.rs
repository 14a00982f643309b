//! Executor configuration and construction.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::executor::http::HttpExecutor;
use crate::executor::legacy_ws::LegacyWsTransport;
use crate::executor::sse::SseTransport;
use crate::executor::ws::{WsConfig, WsTransport};
use crate::executor::{Executor, ExecutorInner, SubscriptionTransport};

/// How subscriptions and live queries reach the server.
///
/// Fixed once per built executor; the default is the modern
/// graphql-transport-ws protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionProtocol {
    /// graphql-transport-ws over a WebSocket.
    #[default]
    WebSocket,
    /// Legacy graphql-ws (subscriptions-transport-ws) over a WebSocket.
    LegacyWebSocket,
    /// Server-sent events over the HTTP endpoint (GET + `text/event-stream`).
    Sse,
    /// Dedicated GraphQL-SSE client against its own endpoint.
    GraphQlSse,
}

/// Authentication credentials applied to every request.
#[derive(Clone, Debug)]
pub enum Authentication {
    /// HTTP Basic authentication.
    Basic {
        /// Username.
        username: String,
        /// Password (optional).
        password: Option<String>,
    },
    /// Bearer token authentication.
    Bearer(String),
}

/// Builder for configuring an [`Executor`].
///
/// # Example
///
/// ```ignore
/// let executor = Executor::builder("https://api.example.com/graphql")
///     .subscription_protocol(SubscriptionProtocol::WebSocket)
///     .bearer_auth("my-token")
///     .retries(2)
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub struct ExecutorBuilder {
    endpoint: String,
    subscriptions_endpoint: Option<String>,
    http_client: Option<reqwest::Client>,
    method: Option<reqwest::Method>,
    use_get_for_queries: bool,
    multipart: bool,
    subscription_protocol: SubscriptionProtocol,
    retries: Option<usize>,
    timeout: Option<Duration>,
    headers: HashMap<String, String>,
    auth: Option<Authentication>,
    connection_init_payload: Option<Value>,
    connection_timeout: Duration,
    keep_alive_interval: Option<Duration>,
}

impl ExecutorBuilder {
    /// Create a builder for the given endpoint URL.
    ///
    /// A `ws://`/`wss://` endpoint is accepted and rewritten to its
    /// `http://`/`https://` counterpart for the HTTP transport.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subscriptions_endpoint: None,
            http_client: None,
            method: None,
            use_get_for_queries: false,
            multipart: false,
            subscription_protocol: SubscriptionProtocol::default(),
            retries: None,
            timeout: None,
            headers: HashMap::new(),
            auth: None,
            connection_init_payload: None,
            connection_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(30)),
        }
    }

    /// Set a separate endpoint for subscriptions.
    ///
    /// If not set, it is derived from the HTTP endpoint: scheme-rewritten to
    /// `ws`/`wss` for the WebSocket protocols, suffixed `/stream` for the
    /// dedicated GraphQL-SSE client.
    pub fn subscriptions_endpoint(mut self, url: impl Into<String>) -> Self {
        self.subscriptions_endpoint = Some(url.into());
        self
    }

    /// Use a custom HTTP client.
    ///
    /// The same client backs queries, uploads and SSE connections, so
    /// proxying, TLS and cookie behavior stay consistent across transports.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Override the HTTP verb. Only `GET` and `POST` are meaningful; GET
    /// applies to queries alone (mutations always POST).
    pub fn method(mut self, method: reqwest::Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Use GET for query operations.
    pub fn use_get_for_queries(mut self, enabled: bool) -> Self {
        self.use_get_for_queries = enabled;
        self
    }

    /// Enable `multipart/form-data` encoding for requests carrying file
    /// uploads.
    pub fn multipart(mut self, enabled: bool) -> Self {
        self.multipart = enabled;
        self
    }

    /// Choose the subscription transport.
    pub fn subscription_protocol(mut self, protocol: SubscriptionProtocol) -> Self {
        self.subscription_protocol = protocol;
        self
    }

    /// Retry failed request/response operations up to `retries` additional
    /// times.
    ///
    /// Any errors-bearing result counts as a failed attempt, including
    /// mutations, which may not be idempotent. Enabling retries is the
    /// caller's acceptance of that risk. Subscriptions are never retried.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Abort HTTP requests that have not settled within `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header to all requests.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Set bearer token authentication.
    ///
    /// Applied to HTTP and SSE requests, and included in the WebSocket
    /// connection-init payload by default.
    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.headers
            .insert("Authorization".into(), format!("Bearer {}", token));
        self.auth = Some(Authentication::Bearer(token));
        self
    }

    /// Set HTTP Basic authentication.
    pub fn basic_auth(
        mut self,
        username: impl Into<String>,
        password: Option<impl Into<String>>,
    ) -> Self {
        self.auth = Some(Authentication::Basic {
            username: username.into(),
            password: password.map(Into::into),
        });
        self
    }

    /// Set the connection-init payload for WebSocket subscriptions.
    pub fn connection_init_payload(mut self, payload: impl Serialize) -> Self {
        self.connection_init_payload = serde_json::to_value(payload).ok();
        self
    }

    /// Set the connection timeout for subscription transports.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the keep-alive ping interval for WebSocket connections.
    ///
    /// `None` disables keep-alive pings.
    pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Build the executor. The subscription transport is selected here,
    /// once; requests only choose between it and the HTTP path.
    pub fn build(self) -> Result<Executor> {
        let http_endpoint = ws_to_http(&self.endpoint);

        let get_override = match &self.method {
            None => false,
            Some(method) if *method == reqwest::Method::GET => true,
            Some(method) if *method == reqwest::Method::POST => false,
            Some(method) => {
                return Err(TransportError::Config(format!(
                    "Unsupported HTTP verb override: {method}"
                )));
            }
        };

        let client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .cookie_store(true)
                .build()
                .map_err(|e| TransportError::Config(e.to_string()))?,
        };

        // Default: carry the bearer token in the connection-init payload so
        // socket servers can authenticate the session.
        let init_payload = if self.connection_init_payload.is_some() {
            self.connection_init_payload
        } else if let Some(Authentication::Bearer(ref token)) = self.auth {
            Some(serde_json::json!({
                "Authorization": format!("Bearer {}", token)
            }))
        } else {
            None
        };

        let subscriptions = match self.subscription_protocol {
            SubscriptionProtocol::WebSocket => {
                SubscriptionTransport::WebSocket(WsTransport::new(WsConfig {
                    url: http_to_ws(
                        self.subscriptions_endpoint.as_deref().unwrap_or(&http_endpoint),
                    ),
                    init_payload,
                    connection_timeout: self.connection_timeout,
                    keep_alive_interval: self.keep_alive_interval,
                    headers: self.headers.clone(),
                }))
            }
            SubscriptionProtocol::LegacyWebSocket => {
                SubscriptionTransport::LegacyWebSocket(LegacyWsTransport::new(WsConfig {
                    url: http_to_ws(
                        self.subscriptions_endpoint.as_deref().unwrap_or(&http_endpoint),
                    ),
                    init_payload,
                    connection_timeout: self.connection_timeout,
                    keep_alive_interval: self.keep_alive_interval,
                    headers: self.headers.clone(),
                }))
            }
            SubscriptionProtocol::Sse => SubscriptionTransport::ServerSentEvents {
                endpoint: self.subscriptions_endpoint.as_deref().map(ws_to_http),
            },
            SubscriptionProtocol::GraphQlSse => {
                let endpoint = match self.subscriptions_endpoint.as_deref() {
                    Some(url) => ws_to_http(url),
                    None => format!("{}/stream", http_endpoint.trim_end_matches('/')),
                };
                SubscriptionTransport::GraphQlSse(SseTransport::new(
                    client.clone(),
                    endpoint,
                    self.headers.clone(),
                    self.auth.clone(),
                ))
            }
        };

        let http = HttpExecutor::new(
            client,
            http_endpoint,
            self.headers,
            self.auth,
            get_override,
            self.use_get_for_queries,
            self.multipart,
            self.timeout,
            self.retries.is_some(),
            self.subscription_protocol == SubscriptionProtocol::Sse,
        );

        Ok(Executor::from_inner(ExecutorInner {
            http,
            subscriptions,
            retries: self.retries,
        }))
    }
}

/// Rewrite a WebSocket URL to its HTTP counterpart; other schemes pass
/// through unchanged.
fn ws_to_http(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else {
        url.to_string()
    }
}

/// Rewrite an HTTP URL to its WebSocket counterpart; other schemes pass
/// through unchanged.
fn http_to_ws(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_scheme_rewriting() {
        assert_eq!(ws_to_http("wss://host/path"), "https://host/path");
        assert_eq!(ws_to_http("ws://host/path"), "http://host/path");
        assert_eq!(
            ws_to_http("https://host/path"),
            "https://host/path"
        );

        assert_eq!(http_to_ws("https://host/path"), "wss://host/path");
        assert_eq!(http_to_ws("http://host/path"), "ws://host/path");
        assert_eq!(http_to_ws("wss://host/path"), "wss://host/path");
    }

    #[test]
    fn test_ws_endpoint_used_for_http() {
        let executor = Executor::builder("wss://api.example/graphql").build().unwrap();
        assert_eq!(executor.endpoint(), "https://api.example/graphql");
    }

    #[test]
    fn test_default_subscriptions_endpoint_derives_from_http() {
        let executor = Executor::builder("https://api.example/graphql")
            .build()
            .unwrap();
        assert!(format!("{:?}", executor).contains("websocket(wss://api.example/graphql)"));
    }

    #[test]
    fn test_graphql_sse_endpoint_defaults_to_stream_suffix() {
        let executor = Executor::builder("https://api.example/graphql")
            .subscription_protocol(SubscriptionProtocol::GraphQlSse)
            .build()
            .unwrap();
        assert!(
            format!("{:?}", executor).contains("graphql-sse(https://api.example/graphql/stream)")
        );
    }

    #[test]
    fn test_unsupported_verb_override_is_rejected() {
        let result = Executor::builder("https://api.example/graphql")
            .method(reqwest::Method::DELETE)
            .build();
        assert!(matches!(result, Err(TransportError::Config(_))));
    }

    #[test]
    fn test_explicit_subscriptions_endpoint_wins() {
        let executor = Executor::builder("https://api.example/graphql")
            .subscriptions_endpoint("wss://ws.example/graphql")
            .build()
            .unwrap();
        assert!(format!("{:?}", executor).contains("websocket(wss://ws.example/graphql)"));
    }
}
