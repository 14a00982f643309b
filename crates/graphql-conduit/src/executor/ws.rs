//! GraphQL subscriptions over WebSocket (graphql-transport-ws protocol).
//!
//! See: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Result, TransportError};
use crate::request::ExecutionRequest;
use crate::response::{ExecutionResult, GraphQLError};
use crate::stream::ExecutionStream;

/// WebSocket message types for the graphql-transport-ws protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    /// Client -> Server: Initialize connection
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server -> Client: Connection acknowledged
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Bidirectional: Ping
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Bidirectional: Pong
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Client -> Server: Subscribe to operation
    Subscribe { id: String, payload: SubscribePayload },
    /// Server -> Client: Operation result
    Next { id: String, payload: ExecutionResult },
    /// Server -> Client: Operation error
    Error { id: String, payload: Vec<GraphQLError> },
    /// Bidirectional: Operation complete
    Complete { id: String },
}

/// The operation payload carried by a subscribe message, shared by every
/// subscription transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SubscribePayload {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl From<&ExecutionRequest> for SubscribePayload {
    fn from(request: &ExecutionRequest) -> Self {
        Self {
            query: request.query.clone(),
            variables: request.variables.clone(),
            operation_name: request.operation_name.clone(),
            extensions: request.extensions.clone(),
        }
    }
}

/// Configuration for a WebSocket subscription connection.
#[derive(Debug, Clone)]
pub(crate) struct WsConfig {
    /// WebSocket URL for subscriptions.
    pub url: String,
    /// Connection initialization payload (e.g. auth tokens).
    pub init_payload: Option<Value>,
    /// Connection establishment timeout.
    pub connection_timeout: Duration,
    /// Keep-alive ping interval; `None` disables pings.
    pub keep_alive_interval: Option<Duration>,
    /// Additional headers for the WebSocket handshake.
    pub headers: HashMap<String, String>,
}

/// The modern (graphql-transport-ws) subscription transport.
///
/// Holds at most one underlying connection, established lazily on the first
/// subscribe. Establishment is serialized behind an async mutex so concurrent
/// first subscribes share one socket instead of racing to open duplicates.
pub(crate) struct WsTransport {
    config: WsConfig,
    connection: tokio::sync::Mutex<Option<Arc<WsConnection>>>,
}

impl WsTransport {
    pub(crate) fn new(config: WsConfig) -> Self {
        Self {
            config,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.config.url
    }

    /// Subscribe to an operation, connecting first if needed.
    pub(crate) async fn subscribe(&self, request: &ExecutionRequest) -> Result<ExecutionStream> {
        let connection = self.connection().await?;
        connection.subscribe(SubscribePayload::from(request))
    }

    async fn connection(&self) -> Result<Arc<WsConnection>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref()
            && !connection.is_closed()
        {
            return Ok(connection.clone());
        }
        let connection = Arc::new(WsConnection::connect(&self.config).await?);
        *guard = Some(connection.clone());
        Ok(connection)
    }
}

/// Per-connection subscription routing state.
struct Registry {
    subscriptions: HashMap<String, mpsc::Sender<Result<ExecutionResult>>>,
    next_id: u64,
}

/// One established graphql-transport-ws connection with its read/write tasks.
pub(crate) struct WsConnection {
    state: Arc<Mutex<Registry>>,
    write_tx: mpsc::Sender<WsMessage>,
    complete_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl WsConnection {
    /// Connect, perform the init/ack handshake, and spawn the I/O tasks.
    async fn connect(config: &WsConfig) -> Result<Self> {
        let mut request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&config.url)
            .header("Sec-WebSocket-Protocol", "graphql-transport-ws");

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let request = request
            .body(())
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let connect_future = tokio_tungstenite::connect_async(request);
        let (ws_stream, _) = tokio::time::timeout(config.connection_timeout, connect_future)
            .await
            .map_err(|_| TransportError::Timeout)??;

        let (write, read) = ws_stream.split();

        let state = Arc::new(Mutex::new(Registry {
            subscriptions: HashMap::new(),
            next_id: 1,
        }));
        let closed = Arc::new(AtomicBool::new(false));
        let (write_tx, write_rx) = mpsc::channel::<WsMessage>(32);
        let (complete_tx, complete_rx) = mpsc::unbounded_channel::<String>();
        let (ack_tx, ack_rx) = oneshot::channel::<()>();

        tokio::spawn(write_task(write, write_rx, complete_rx, state.clone()));
        tokio::spawn(read_task(
            read,
            state.clone(),
            write_tx.clone(),
            closed.clone(),
            ack_tx,
        ));

        let init = WsMessage::ConnectionInit {
            payload: config.init_payload.clone(),
        };
        write_tx
            .send(init)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        // The protocol requires an ack before the first subscribe.
        tokio::time::timeout(config.connection_timeout, ack_rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| {
                TransportError::WebSocket("Connection closed before acknowledgement".into())
            })?;

        if let Some(interval) = config.keep_alive_interval {
            let write_tx = write_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let ping = WsMessage::Ping { payload: None };
                    if write_tx.send(ping).await.is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Self {
            state,
            write_tx,
            complete_tx,
            closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register one logical subscription and return its result sequence.
    ///
    /// Cancelling the sequence sends the protocol's `complete` message so the
    /// server-side subscription is torn down, not just local consumption.
    fn subscribe(&self, payload: SubscribePayload) -> Result<ExecutionStream> {
        let (tx, rx) = mpsc::channel(32);

        let id = {
            let mut state = self.state.lock();
            let id = state.next_id.to_string();
            state.next_id += 1;
            state.subscriptions.insert(id.clone(), tx);
            id
        };

        let subscribe = WsMessage::Subscribe {
            id: id.clone(),
            payload,
        };
        if self.write_tx.try_send(subscribe).is_err() {
            self.state.lock().subscriptions.remove(&id);
            return Err(TransportError::WebSocket("Connection write queue closed".into()));
        }

        let complete_tx = self.complete_tx.clone();
        Ok(ExecutionStream::new(
            ReceiverStream::new(rx),
            Box::new(move || {
                let _ = complete_tx.send(id);
            }),
        ))
    }
}

async fn write_task(
    mut write: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    mut write_rx: mpsc::Receiver<WsMessage>,
    mut complete_rx: mpsc::UnboundedReceiver<String>,
    state: Arc<Mutex<Registry>>,
) {
    loop {
        tokio::select! {
            msg = write_rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Ok(json) = serde_json::to_string(&ws_msg)
                            && write.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
            id = complete_rx.recv() => {
                if let Some(id) = id {
                    // Only notify the server for subscriptions it still
                    // knows about; a completed one needs no message.
                    let removed = state.lock().subscriptions.remove(&id).is_some();
                    if removed {
                        let complete = WsMessage::Complete { id };
                        if let Ok(json) = serde_json::to_string(&complete) {
                            let _ = write.send(Message::Text(json.into())).await;
                        }
                    }
                }
            }
        }
    }
}

async fn read_task(
    mut read: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    state: Arc<Mutex<Registry>>,
    write_tx: mpsc::Sender<WsMessage>,
    closed: Arc<AtomicBool>,
    ack_tx: oneshot::Sender<()>,
) {
    let mut ack_tx = Some(ack_tx);
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(ws_msg) = serde_json::from_str::<WsMessage>(&text) {
                    handle_message(ws_msg, &state, &write_tx, &mut ack_tx).await;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    closed.store(true, Ordering::Release);

    // Connection closed: terminate all live subscriptions with an error
    // element.
    let mut state = state.lock();
    for (_, tx) in state.subscriptions.drain() {
        let _ = tx.try_send(Err(TransportError::WebSocket("Connection closed".into())));
    }
}

async fn handle_message(
    msg: WsMessage,
    state: &Arc<Mutex<Registry>>,
    write_tx: &mpsc::Sender<WsMessage>,
    ack_tx: &mut Option<oneshot::Sender<()>>,
) {
    match msg {
        WsMessage::Next { id, payload } => {
            let state = state.lock();
            if let Some(tx) = state.subscriptions.get(&id) {
                let _ = tx.try_send(Ok(payload));
            }
        }
        WsMessage::Error { id, payload } => {
            // GraphQL errors ride the sequence as an errors-bearing result;
            // the protocol terminates the operation afterwards.
            let mut state = state.lock();
            if let Some(tx) = state.subscriptions.remove(&id) {
                let _ = tx.try_send(Ok(ExecutionResult {
                    data: None,
                    errors: payload,
                    extensions: None,
                }));
            }
        }
        WsMessage::Complete { id } => {
            // Dropping the sender ends the sequence.
            state.lock().subscriptions.remove(&id);
        }
        WsMessage::ConnectionAck { .. } => {
            tracing::debug!(target: "graphql_conduit::ws", "Connection acknowledged");
            if let Some(ack) = ack_tx.take() {
                let _ = ack.send(());
            }
        }
        WsMessage::Ping { payload } => {
            let _ = write_tx.send(WsMessage::Pong { payload }).await;
        }
        WsMessage::Pong { .. } => {
            // Keep-alive response
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_message_wire_format() {
        let msg = WsMessage::Subscribe {
            id: "1".into(),
            payload: SubscribePayload {
                query: "subscription { tick }".into(),
                variables: None,
                operation_name: None,
                extensions: None,
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "subscribe",
                "id": "1",
                "payload": {"query": "subscription { tick }"},
            })
        );
    }

    #[test]
    fn test_next_message_parses() {
        let msg: WsMessage = serde_json::from_str(
            r#"{"type":"next","id":"1","payload":{"data":{"tick":1}}}"#,
        )
        .unwrap();
        let WsMessage::Next { id, payload } = msg else {
            panic!("expected next");
        };
        assert_eq!(id, "1");
        assert_eq!(payload.data.unwrap()["tick"], 1);
    }

    #[test]
    fn test_connection_init_omits_empty_payload() {
        let msg = WsMessage::ConnectionInit { payload: None };
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"type":"connection_init"}"#
        );
    }

    #[test]
    fn test_error_message_parses_error_list() {
        let msg: WsMessage = serde_json::from_str(
            r#"{"type":"error","id":"7","payload":[{"message":"denied"}]}"#,
        )
        .unwrap();
        let WsMessage::Error { payload, .. } = msg else {
            panic!("expected error");
        };
        assert_eq!(payload[0].message, "denied");
    }
}
