//! GraphQL subscriptions over the legacy graphql-ws protocol
//! (subscriptions-transport-ws).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

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

use super::ws::{SubscribePayload, WsConfig};
use crate::error::{Result, TransportError};
use crate::request::ExecutionRequest;
use crate::response::{ExecutionResult, GraphQLError};
use crate::stream::ExecutionStream;

/// Message types for the legacy protocol. Operations are started with
/// `start` and torn down with `stop`; the server keep-alive is `ka`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LegacyMessage {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionError {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ka,
    Start { id: String, payload: SubscribePayload },
    Data { id: String, payload: ExecutionResult },
    /// The legacy protocol sends a single error object, not a list.
    Error { id: String, payload: Value },
    Complete { id: String },
    Stop { id: String },
    ConnectionTerminate,
}

struct Registry {
    subscriptions: HashMap<String, mpsc::Sender<Result<ExecutionResult>>>,
    next_id: u64,
}

/// The legacy (subscriptions-transport-ws) subscription transport, lazily
/// connected and shared exactly like the modern one.
pub(crate) struct LegacyWsTransport {
    config: WsConfig,
    connection: tokio::sync::Mutex<Option<Arc<LegacyWsConnection>>>,
}

impl LegacyWsTransport {
    pub(crate) fn new(config: WsConfig) -> Self {
        Self {
            config,
            connection: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn url(&self) -> &str {
        &self.config.url
    }

    pub(crate) async fn subscribe(&self, request: &ExecutionRequest) -> Result<ExecutionStream> {
        let connection = self.connection().await?;
        connection.subscribe(SubscribePayload::from(request))
    }

    async fn connection(&self) -> Result<Arc<LegacyWsConnection>> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref()
            && !connection.is_closed()
        {
            return Ok(connection.clone());
        }
        let connection = Arc::new(LegacyWsConnection::connect(&self.config).await?);
        *guard = Some(connection.clone());
        Ok(connection)
    }
}

pub(crate) struct LegacyWsConnection {
    state: Arc<Mutex<Registry>>,
    write_tx: mpsc::Sender<LegacyMessage>,
    stop_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl LegacyWsConnection {
    async fn connect(config: &WsConfig) -> Result<Self> {
        let mut request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(&config.url)
            .header("Sec-WebSocket-Protocol", "graphql-ws");

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
        let (write_tx, write_rx) = mpsc::channel::<LegacyMessage>(32);
        let (stop_tx, stop_rx) = mpsc::unbounded_channel::<String>();
        let (ack_tx, ack_rx) = oneshot::channel::<()>();

        tokio::spawn(write_task(write, write_rx, stop_rx, state.clone()));
        tokio::spawn(read_task(read, state.clone(), closed.clone(), ack_tx));

        write_tx
            .send(LegacyMessage::ConnectionInit {
                payload: config.init_payload.clone(),
            })
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        tokio::time::timeout(config.connection_timeout, ack_rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| {
                TransportError::WebSocket("Connection closed before acknowledgement".into())
            })?;

        Ok(Self {
            state,
            write_tx,
            stop_tx,
            closed,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn subscribe(&self, payload: SubscribePayload) -> Result<ExecutionStream> {
        let (tx, rx) = mpsc::channel(32);

        let id = {
            let mut state = self.state.lock();
            let id = state.next_id.to_string();
            state.next_id += 1;
            state.subscriptions.insert(id.clone(), tx);
            id
        };

        let start = LegacyMessage::Start {
            id: id.clone(),
            payload,
        };
        if self.write_tx.try_send(start).is_err() {
            self.state.lock().subscriptions.remove(&id);
            return Err(TransportError::WebSocket("Connection write queue closed".into()));
        }

        let stop_tx = self.stop_tx.clone();
        Ok(ExecutionStream::new(
            ReceiverStream::new(rx),
            Box::new(move || {
                let _ = stop_tx.send(id);
            }),
        ))
    }
}

async fn write_task(
    mut write: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    mut write_rx: mpsc::Receiver<LegacyMessage>,
    mut stop_rx: mpsc::UnboundedReceiver<String>,
    state: Arc<Mutex<Registry>>,
) {
    loop {
        tokio::select! {
            msg = write_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg)
                            && write.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
            id = stop_rx.recv() => {
                if let Some(id) = id {
                    let removed = state.lock().subscriptions.remove(&id).is_some();
                    if removed {
                        let stop = LegacyMessage::Stop { id };
                        if let Ok(json) = serde_json::to_string(&stop) {
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
    closed: Arc<AtomicBool>,
    ack_tx: oneshot::Sender<()>,
) {
    let mut ack_tx = Some(ack_tx);
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(msg) = serde_json::from_str::<LegacyMessage>(&text) {
                    handle_message(msg, &state, &mut ack_tx);
                }
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    closed.store(true, Ordering::Release);

    let mut state = state.lock();
    for (_, tx) in state.subscriptions.drain() {
        let _ = tx.try_send(Err(TransportError::WebSocket("Connection closed".into())));
    }
}

fn handle_message(
    msg: LegacyMessage,
    state: &Arc<Mutex<Registry>>,
    ack_tx: &mut Option<oneshot::Sender<()>>,
) {
    match msg {
        LegacyMessage::Data { id, payload } => {
            let state = state.lock();
            if let Some(tx) = state.subscriptions.get(&id) {
                let _ = tx.try_send(Ok(payload));
            }
        }
        LegacyMessage::Error { id, payload } => {
            let mut state = state.lock();
            if let Some(tx) = state.subscriptions.remove(&id) {
                let error = serde_json::from_value::<GraphQLError>(payload.clone())
                    .unwrap_or_else(|_| GraphQLError {
                        message: payload.to_string(),
                        locations: vec![],
                        path: None,
                        extensions: None,
                    });
                let _ = tx.try_send(Ok(ExecutionResult {
                    data: None,
                    errors: vec![error],
                    extensions: None,
                }));
            }
        }
        LegacyMessage::Complete { id } => {
            state.lock().subscriptions.remove(&id);
        }
        LegacyMessage::ConnectionAck { .. } => {
            tracing::debug!(target: "graphql_conduit::legacy_ws", "Connection acknowledged");
            if let Some(ack) = ack_tx.take() {
                let _ = ack.send(());
            }
        }
        LegacyMessage::ConnectionError { payload } => {
            tracing::warn!(
                target: "graphql_conduit::legacy_ws",
                "Connection error: {:?}",
                payload
            );
        }
        LegacyMessage::Ka => {
            // Server keep-alive
        }
        _ => {}
    }
}
