//! HTTP transport executor.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::builder::Authentication;
use crate::decode::decode_response;
use crate::error::{Result, TransportError};
use crate::executor::Execution;
use crate::request::{ExecutionRequest, OperationType};
use crate::stream::ExecutionStream;
use crate::upload;

const ACCEPT_INCREMENTAL: &str = "multipart/mixed,application/json;q=0.9";
const ACCEPT_EVENT_STREAM: &str = "text/event-stream,application/json;q=0.9";

/// Executes request/response style operations over HTTP.
///
/// Also serves subscriptions when the executor was built with the
/// SSE-over-HTTP protocol: those go out as GET requests advertising
/// `text/event-stream` and come back as a decoded event stream.
pub(crate) struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    headers: HashMap<String, String>,
    auth: Option<Authentication>,
    get_override: bool,
    use_get_for_queries: bool,
    multipart: bool,
    timeout: Option<Duration>,
    /// When a retry policy is active, non-2xx statuses raise instead of
    /// decoding, so the retry loop observes them uniformly.
    fail_on_error_status: bool,
    /// Whether the executor was built with the SSE subscription protocol;
    /// GET requests then advertise `text/event-stream`.
    sse_protocol: bool,
}

impl HttpExecutor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: reqwest::Client,
        endpoint: String,
        headers: HashMap<String, String>,
        auth: Option<Authentication>,
        get_override: bool,
        use_get_for_queries: bool,
        multipart: bool,
        timeout: Option<Duration>,
        fail_on_error_status: bool,
        sse_protocol: bool,
    ) -> Self {
        Self {
            client,
            endpoint,
            headers,
            auth,
            get_override,
            use_get_for_queries,
            multipart,
            timeout,
            fail_on_error_status,
            sse_protocol,
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Execute a query or mutation.
    pub(crate) async fn execute(&self, request: &ExecutionRequest) -> Result<Execution> {
        let operation = request.operation_type();
        // Uploads can only ride a POST body.
        let method = if request.has_uploads() {
            reqwest::Method::POST
        } else {
            self.choose_method(operation)
        };
        let accept = if method == reqwest::Method::GET && self.sse_protocol {
            ACCEPT_EVENT_STREAM
        } else {
            ACCEPT_INCREMENTAL
        };
        let response = self.dispatch(request, method, accept, None).await?;
        decode_response(response).await
    }

    /// Execute a subscription or live query over SSE (GET, event-stream
    /// accept header), optionally against a dedicated endpoint.
    pub(crate) async fn execute_sse(
        &self,
        request: &ExecutionRequest,
        endpoint: Option<&str>,
    ) -> Result<ExecutionStream> {
        let response = self
            .dispatch(request, reqwest::Method::GET, ACCEPT_EVENT_STREAM, endpoint)
            .await?;
        match decode_response(response).await? {
            Execution::Stream(stream) => Ok(stream),
            // Servers may answer an event-stream request with a plain JSON
            // result (e.g. a validation error); surface it as a one-element
            // sequence.
            Execution::Single(result) => Ok(ExecutionStream::from_stream(
                futures_util::stream::iter([Ok(result)]),
            )),
        }
    }

    fn choose_method(&self, operation: OperationType) -> reqwest::Method {
        // GET is only ever used for queries; mutations and subscriptions
        // always POST regardless of configuration.
        if operation == OperationType::Query && (self.get_override || self.use_get_for_queries) {
            reqwest::Method::GET
        } else {
            reqwest::Method::POST
        }
    }

    async fn dispatch(
        &self,
        request: &ExecutionRequest,
        method: reqwest::Method,
        accept: &'static str,
        endpoint_override: Option<&str>,
    ) -> Result<reqwest::Response> {
        let endpoint = request
            .endpoint_override()
            .or(endpoint_override)
            .unwrap_or(self.endpoint.as_str());

        let mut builder = if method == reqwest::Method::GET {
            let url = build_get_url(endpoint, request)?;
            self.client.get(url)
        } else if request.has_uploads() {
            if !self.multipart {
                return Err(TransportError::Config(
                    "Request carries file uploads but multipart encoding is disabled".into(),
                ));
            }
            let form = build_upload_form(request)?;
            self.client.post(Url::parse(endpoint)?).multipart(form)
        } else {
            self.client
                .post(Url::parse(endpoint)?)
                .json(&wire_body(request, request.variables.as_ref()))
        };

        // Build-time headers first, then per-request overrides; insertion
        // replaces, so the request wins on key collision and the accept
        // header set here is authoritative.
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
            } else {
                tracing::warn!(
                    target: "graphql_conduit::http",
                    "Skipping invalid header '{name}'"
                );
            }
        }
        headers.insert(
            http::header::ACCEPT,
            http::header::HeaderValue::from_static(accept),
        );
        if let Some(Authentication::Bearer(token)) = &self.auth
            && let Ok(value) = http::header::HeaderValue::from_str(&format!("Bearer {token}"))
        {
            headers.insert(http::header::AUTHORIZATION, value);
        }
        builder = builder.headers(headers);
        if let Some(Authentication::Basic { username, password }) = &self.auth {
            builder = builder.basic_auth(username, password.as_ref());
        }

        let send = builder.send();
        let response = match self.timeout {
            // The losing future is dropped, which aborts the in-flight
            // request; the call settles exactly once.
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| TransportError::Timeout)??,
            None => send.await?,
        };

        if self.fail_on_error_status && !response.status().is_success() {
            let status = response.status();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().map(str::to_string),
            });
        }

        Ok(response)
    }
}

/// The JSON wire form of a request: all four fields always present, so the
/// body is stable across repeated encodes.
#[derive(Serialize)]
struct WireBody<'a> {
    query: &'a str,
    variables: &'a Value,
    #[serde(rename = "operationName")]
    operation_name: Option<&'a str>,
    extensions: Option<&'a Value>,
}

fn empty_variables() -> &'static Value {
    static EMPTY: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
    EMPTY.get_or_init(|| Value::Object(Default::default()))
}

fn wire_body<'a>(request: &'a ExecutionRequest, variables: Option<&'a Value>) -> WireBody<'a> {
    WireBody {
        query: &request.query,
        variables: variables.unwrap_or_else(|| empty_variables()),
        operation_name: request.operation_name.as_deref(),
        extensions: request.extensions.as_ref(),
    }
}

/// Serialize a request into GET query parameters.
///
/// `variables` and `extensions` are JSON-stringified only when non-empty, so
/// repeated encodes of the same request are byte-identical and empty objects
/// never show up as query-string noise.
fn build_get_url(endpoint: &str, request: &ExecutionRequest) -> Result<Url> {
    let mut url = Url::parse(endpoint)?;

    let variables = match &request.variables {
        Some(value) if !is_empty_value(value) => Some(serde_json::to_string(value)?),
        _ => None,
    };
    let extensions = match &request.extensions {
        Some(value) if !is_empty_value(value) => Some(serde_json::to_string(value)?),
        _ => None,
    };

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("query", &request.query);
        if let Some(name) = &request.operation_name {
            pairs.append_pair("operationName", name);
        }
        if let Some(variables) = &variables {
            pairs.append_pair("variables", variables);
        }
        if let Some(extensions) = &extensions {
            pairs.append_pair("extensions", extensions);
        }
    }

    Ok(url)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Build the multipart form for an upload-carrying request: `operations`
/// with file positions nulled, `map` indexing each file's variable path,
/// then the numbered file parts.
fn build_upload_form(request: &ExecutionRequest) -> Result<reqwest::multipart::Form> {
    let mut variables = request
        .variables
        .clone()
        .unwrap_or(Value::Object(Default::default()));
    upload::null_file_positions(&mut variables, request.files.iter().map(|(path, _)| path));

    let operations = serde_json::to_string(&wire_body(request, Some(&variables)))?;
    upload::build_form(operations, &request.files)
}

impl ExecutionRequest {
    pub(crate) fn endpoint_override(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("endpoint")?.as_str()
    }

    pub(crate) fn header_overrides(&self) -> impl Iterator<Item = (&String, &str)> {
        self.extensions
            .as_ref()
            .and_then(|e| e.get("headers"))
            .and_then(|h| h.as_object())
            .into_iter()
            .flatten()
            .filter_map(|(name, value)| Some((name, value.as_str()?)))
    }
}
