//! One OCPP-J WebSocket connection
//!
//! A connection owns two tasks: a writer draining the outgoing queue into the socket
//! and a read loop that routes replies to their pending calls and forwards inbound
//! Calls to the requests channel. Both stop once the connection is closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::handler::HandlerError;
use crate::ocpp::messages::result_to_message;
use crate::ocpp::{
    Action, Call, CallError, OcppError, OcppMessage, RequestFamily, ResponseFamily,
};

/// Outgoing frames buffered ahead of the writer
const OUTGOING_QUEUE: usize = 64;

/// Call awaiting its reply
struct PendingCall {
    action: Action,
    reply_tx: oneshot::Sender<Result<Value, OcppError>>,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    calls: HashMap<String, PendingCall>,
}

/// A live OCPP-J session with one peer
pub struct Connection {
    identity: String,
    outgoing: mpsc::Sender<OcppMessage>,
    registry: Mutex<Registry>,
    closed: CancellationToken,
    request_timeout: Option<Duration>,
    requests: Mutex<Option<mpsc::UnboundedReceiver<Call>>>,
}

impl Connection {
    /// Take over an upgraded WebSocket and start its reader and writer tasks.
    ///
    /// `identity` is the charge point on this session; it is stamped on every
    /// inbound Call.
    pub(crate) fn spawn<S>(
        stream: WebSocketStream<S>,
        identity: String,
        config: &ConnectionConfig,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (ws_tx, ws_rx) = stream.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            identity,
            outgoing: outgoing_tx,
            registry: Mutex::new(Registry::default()),
            closed: CancellationToken::new(),
            request_timeout: config.request_timeout,
            requests: Mutex::new(Some(requests_rx)),
        });

        tokio::spawn(write_loop(connection.clone(), ws_tx, outgoing_rx));
        tokio::spawn(read_loop(connection.clone(), ws_rx, requests_tx));

        connection
    }

    /// Identity of the charge point on this session
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Send a request and wait for its reply.
    ///
    /// Resolves with the decoded response, the peer's CALLERROR as
    /// [`OcppError::Remote`], [`OcppError::Timeout`] when a request timeout is set,
    /// or [`OcppError::ConnectionClosed`] if the connection goes away first.
    pub async fn send_request<R: RequestFamily>(
        &self,
        request: R,
    ) -> Result<R::Response, OcppError> {
        let action = request.action();
        let mut call = Call::from_request(Uuid::new_v4().to_string(), &self.identity, &request)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut registry = self.registry.lock();
            if registry.closed {
                return Err(OcppError::ConnectionClosed);
            }
            while registry.calls.contains_key(&call.message_id) {
                call.message_id = Uuid::new_v4().to_string();
            }
            registry
                .calls
                .insert(call.message_id.clone(), PendingCall { action, reply_tx });
        }

        // Removes the registry entry however this future ends
        let _pending = PendingGuard {
            connection: self,
            message_id: call.message_id.clone(),
        };

        debug!("Calling {} on {} ({})", action, self.identity, call.message_id);
        self.enqueue(OcppMessage::Call(call)).await?;

        let reply = match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| OcppError::Timeout)?,
            None => reply_rx.await,
        };

        let payload = reply.map_err(|_| OcppError::ConnectionClosed)??;
        <R::Response as ResponseFamily>::from_payload(action, payload)
    }

    /// Answer an inbound Call with the handler's outcome
    pub async fn send_response<P: ResponseFamily>(
        &self,
        message_id: &str,
        outcome: Result<P, HandlerError>,
    ) -> Result<(), OcppError> {
        self.enqueue(result_to_message(message_id, outcome)).await
    }

    /// Reject an inbound Call
    pub async fn send_error(&self, error: CallError) -> Result<(), OcppError> {
        self.enqueue(OcppMessage::CallError(error)).await
    }

    /// Inbound Calls, in arrival order. Can be taken once.
    pub fn take_requests(&self) -> Option<mpsc::UnboundedReceiver<Call>> {
        self.requests.lock().take()
    }

    /// Close the connection and fail every pending call. Idempotent.
    pub fn close(&self) {
        {
            let mut registry = self.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            for (_, pending) in registry.calls.drain() {
                let _ = pending.reply_tx.send(Err(OcppError::ConnectionClosed));
            }
        }

        info!("Connection to {} closed", self.identity);
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed, from either side
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    async fn enqueue(&self, message: OcppMessage) -> Result<(), OcppError> {
        if self.is_closed() {
            return Err(OcppError::ConnectionClosed);
        }
        self.outgoing
            .send(message)
            .await
            .map_err(|_| OcppError::ConnectionClosed)
    }

    fn fulfill(&self, message_id: &str, reply: Result<Value, OcppError>) {
        let pending = self.registry.lock().calls.remove(message_id);
        match pending {
            Some(pending) => {
                debug!("Reply to {} ({}) from {}", pending.action, message_id, self.identity);
                let _ = pending.reply_tx.send(reply);
            }
            None => warn!(
                "Dropping reply {} from {}: no call outstanding",
                message_id, self.identity
            ),
        }
    }

    fn handle_text(&self, text: &str, requests_tx: &mpsc::UnboundedSender<Call>) {
        debug!("Received from {}: {}", self.identity, text);

        match OcppMessage::parse(text.as_bytes()) {
            Ok(OcppMessage::Call(mut call)) => {
                call.charge_point_id = self.identity.clone();
                if requests_tx.send(call).is_err() {
                    debug!("No dispatcher for {}, dropping Call", self.identity);
                }
            }
            Ok(OcppMessage::CallResult(result)) => {
                self.fulfill(&result.message_id, Ok(result.payload));
            }
            Ok(OcppMessage::CallError(error)) => {
                let message_id = error.message_id.clone();
                self.fulfill(&message_id, Err(error.into()));
            }
            Err(e) => warn!("Dropping malformed frame from {}: {}", self.identity, e),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct PendingGuard<'a> {
    connection: &'a Connection,
    message_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.connection.registry.lock().calls.remove(&self.message_id);
    }
}

async fn write_loop<S>(
    connection: Arc<Connection>,
    mut ws_tx: SplitSink<WebSocketStream<S>, Message>,
    mut outgoing: mpsc::Receiver<OcppMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            message = outgoing.recv() => message,
            _ = connection.closed.cancelled() => None,
        };
        let Some(message) = message else { break };

        let bytes = match message.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to serialize message: {}", e);
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        debug!("Sending to {}: {}", connection.identity, text);

        if let Err(e) = ws_tx.send(Message::Text(text)).await {
            warn!("WebSocket write to {} failed: {}", connection.identity, e);
            connection.close();
            break;
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
}

async fn read_loop<S>(
    connection: Arc<Connection>,
    mut ws_rx: SplitStream<WebSocketStream<S>>,
    requests_tx: mpsc::UnboundedSender<Call>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = connection.closed.cancelled() => break,
            frame = ws_rx.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => connection.handle_text(&text, &requests_tx),
            Some(Ok(Message::Binary(data))) => {
                warn!(
                    "Ignoring {}-byte binary frame from {}",
                    data.len(),
                    connection.identity
                );
            }
            Some(Ok(Message::Close(frame))) => {
                info!("WebSocket closed by {}: {:?}", connection.identity, frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket error from {}: {}", connection.identity, e);
                break;
            }
            None => {
                info!("WebSocket stream from {} ended", connection.identity);
                break;
            }
        }
    }

    connection.close();
}
