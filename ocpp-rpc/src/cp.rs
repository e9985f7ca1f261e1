//! Charge point session
//!
//! [`ChargePoint`] keeps one charge point attached to its central system. Over OCPP-J
//! it dials the WebSocket, dispatches central system calls to the handler and redials
//! after every drop until its cancellation token fires. Over OCPP-S there is no
//! session to keep: calls are plain SOAP round trips, and central system calls reach
//! the handler through [`ChargePoint::handle_soap`].
//!
//! Session state moves `Connecting -> Connected -> Disconnected -> Reconnecting ->
//! Connected ...` and ends in `Closed`, which only cancellation reaches.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CallOptions, ChargePointConfig, TransportKind};
use crate::handler::{spawn_dispatch, Handler};
use crate::ocpp::{
    ChargePointRequest, ChargePointResponse, CentralSystemRequest, HeartbeatResponse, OcppError,
};
use crate::service::CentralSystemService;
use crate::soap::{SoapClient, SoapDispatcher, SoapResponse};
use crate::ws::{self, Connection};

/// Lifecycle of a charge point session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// First dial in progress
    Connecting,
    /// Calls can be sent
    Connected,
    /// The connection dropped; a redial follows
    Disconnected,
    /// Redialing
    Reconnecting,
    /// Cancelled. Terminal.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Socket error, peer close or protocol teardown
    ConnectionLost,
    /// The owner cancelled the session
    Cancelled,
}

/// Emitted once each time a connected session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnection {
    pub identity: String,
    pub reason: DisconnectReason,
}

/// Capacity of the disconnect event channel
const DISCONNECT_EVENTS: usize = 64;

struct Active {
    connection: Option<Arc<Connection>>,
    service: CentralSystemService,
}

struct Inner {
    config: ChargePointConfig,
    state: watch::Sender<SessionState>,
    disconnects: broadcast::Sender<Disconnection>,
    active: RwLock<Option<Active>>,
    /// Inbound side of the SOAP transport
    soap: Option<SoapDispatcher<CentralSystemRequest>>,
    cancel: CancellationToken,
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("{}: {:?} -> {:?}", self.config.identity, previous, state);
        }
    }

    fn activate(&self, connection: Option<Arc<Connection>>, service: CentralSystemService) {
        *self.active.write() = Some(Active {
            connection,
            service,
        });
        self.set_state(SessionState::Connected);
    }

    fn deactivate(&self, reason: DisconnectReason) {
        let was_active = self.active.write().take().is_some();
        if was_active {
            let _ = self.disconnects.send(Disconnection {
                identity: self.config.identity.clone(),
                reason,
            });
        }
    }
}

/// A charge point attached to its central system
pub struct ChargePoint {
    inner: Arc<Inner>,
}

impl ChargePoint {
    /// Connect and start serving central system calls with `handler`.
    ///
    /// Over OCPP-J the first dial must succeed; its error is returned. Over OCPP-S only
    /// the configuration is checked. The session lives until `cancel` fires or the
    /// `ChargePoint` is dropped.
    pub async fn connect<H>(
        config: ChargePointConfig,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<Self, OcppError>
    where
        H: Handler<CentralSystemRequest>,
    {
        config.validate()?;

        let handler: Arc<dyn Handler<CentralSystemRequest>> = Arc::new(handler);
        let soap = (config.transport == TransportKind::Soap).then(|| {
            SoapDispatcher::new(handler.clone(), config.version)
                .with_identity(config.identity.clone())
        });

        let (state, _) = watch::channel(SessionState::Connecting);
        let (disconnects, _) = broadcast::channel(DISCONNECT_EVENTS);
        let inner = Arc::new(Inner {
            config,
            state,
            disconnects,
            active: RwLock::new(None),
            soap,
            cancel: cancel.child_token(),
        });

        match inner.config.transport {
            TransportKind::Soap => {
                let client = SoapClient::new(
                    inner.config.central_system_url.clone(),
                    inner.config.soap(),
                );
                let options = CallOptions {
                    from: None,
                    charge_box_identity: Some(inner.config.identity.clone()),
                };
                info!(
                    "{}: SOAP transport to {}, listener port {:?}",
                    inner.config.identity, inner.config.central_system_url, inner.config.soap_port
                );
                inner.activate(None, CentralSystemService::soap(client, options));
                tokio::spawn(watch_soap(inner.clone()));
            }
            TransportKind::Json => {
                let connection = tokio::select! {
                    _ = inner.cancel.cancelled() => return Err(OcppError::ConnectionClosed),
                    result = ws::dial(&inner.config) => result?,
                };
                inner.activate(
                    Some(connection.clone()),
                    CentralSystemService::from_connection(connection.clone()),
                );
                tokio::spawn(supervise(inner.clone(), connection, handler));
            }
        }

        Ok(Self { inner })
    }

    pub fn identity(&self) -> &str {
        &self.inner.config.identity
    }

    pub fn config(&self) -> &ChargePointConfig {
        &self.inner.config
    }

    /// Port of the local SOAP listener, for the SOAP transport
    pub fn soap_port(&self) -> Option<u16> {
        self.inner.config.soap_port
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch session state changes
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session is connected. Fails once the session is closed.
    pub async fn wait_connected(&self) -> Result<(), OcppError> {
        let mut state = self.inner.state.subscribe();
        let reached = state
            .wait_for(|s| matches!(s, SessionState::Connected | SessionState::Closed))
            .await
            .map_err(|_| OcppError::ConnectionClosed)?;
        match *reached {
            SessionState::Connected => Ok(()),
            _ => Err(OcppError::ConnectionClosed),
        }
    }

    /// Wait until the session is not connected and return the state it left to
    pub async fn wait_disconnect(&self) -> SessionState {
        let mut state = self.inner.state.subscribe();
        let left = match state.wait_for(|s| *s != SessionState::Connected).await {
            Ok(reached) => *reached,
            Err(_) => SessionState::Closed,
        };
        left
    }

    /// One event per disconnect, starting from the moment of subscription
    pub fn disconnections(&self) -> broadcast::Receiver<Disconnection> {
        self.inner.disconnects.subscribe()
    }

    /// The live WebSocket connection, if any
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.inner
            .active
            .read()
            .as_ref()
            .and_then(|active| active.connection.clone())
    }

    /// Handle on the central system for the current session
    pub fn service(&self) -> Result<CentralSystemService, OcppError> {
        self.inner
            .active
            .read()
            .as_ref()
            .map(|active| active.service.clone())
            .ok_or(OcppError::ConnectionClosed)
    }

    /// Send a request to the central system. Fails while disconnected.
    pub async fn send(
        &self,
        request: impl Into<ChargePointRequest>,
    ) -> Result<ChargePointResponse, OcppError> {
        self.service()?.send(request).await
    }

    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, OcppError> {
        self.service()?.heartbeat().await
    }

    /// Answer a central system call POSTed to the local SOAP listener.
    ///
    /// Returns the reply envelope, or a fault envelope with status 500, for the
    /// application's HTTP server to send back.
    pub async fn handle_soap(&self, body: &str) -> Result<SoapResponse, OcppError> {
        let Some(dispatcher) = &self.inner.soap else {
            return Err(OcppError::Config(format!(
                "{} does not use the SOAP transport",
                self.inner.config.identity
            )));
        };
        if self.state() == SessionState::Closed {
            return Err(OcppError::ConnectionClosed);
        }
        Ok(dispatcher.handle(body).await)
    }

    /// Cancel the session and wait until it is closed
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

impl Drop for ChargePoint {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for ChargePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargePoint")
            .field("identity", &self.inner.config.identity)
            .field("state", &self.state())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Ended {
    Dropped,
    Cancelled,
}

/// Serve one connection, then redial, until cancelled
async fn supervise(
    inner: Arc<Inner>,
    mut connection: Arc<Connection>,
    handler: Arc<dyn Handler<CentralSystemRequest>>,
) {
    loop {
        let ended = serve(&inner, &connection, &handler).await;
        connection.close();

        if ended == Ended::Cancelled {
            inner.deactivate(DisconnectReason::Cancelled);
            inner.set_state(SessionState::Closed);
            return;
        }

        warn!("{}: connection lost", inner.config.identity);
        inner.deactivate(DisconnectReason::ConnectionLost);
        inner.set_state(SessionState::Disconnected);
        inner.set_state(SessionState::Reconnecting);

        match redial(&inner).await {
            Some(next) => {
                connection = next;
                inner.activate(
                    Some(connection.clone()),
                    CentralSystemService::from_connection(connection.clone()),
                );
            }
            None => {
                inner.set_state(SessionState::Closed);
                return;
            }
        }
    }
}

async fn serve(
    inner: &Inner,
    connection: &Arc<Connection>,
    handler: &Arc<dyn Handler<CentralSystemRequest>>,
) -> Ended {
    let Some(mut requests) = connection.take_requests() else {
        return tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Ended::Cancelled,
            _ = connection.closed() => Ended::Dropped,
        };
    };

    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Ended::Cancelled,
            _ = connection.closed() => return Ended::Dropped,
            Some(call) = requests.recv() => {
                spawn_dispatch(
                    connection.clone(),
                    handler.clone(),
                    call,
                    inner.config.unrecognized_requests,
                );
            }
        }
    }
}

/// Dial until it works or the session is cancelled
async fn redial(inner: &Inner) -> Option<Arc<Connection>> {
    let mut interval = inner.config.reconnect_interval;

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return None,
            result = ws::dial(&inner.config) => match result {
                Ok(connection) => return Some(connection),
                Err(e) => warn!(
                    "{}: redial failed: {}; retrying in {:?}",
                    inner.config.identity, e, interval
                ),
            },
        }

        tokio::select! {
            _ = inner.cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }

        interval = next_interval(interval, inner.config.max_reconnect_interval);
    }
}

/// Fixed interval without a cap, doubling up to the cap otherwise
fn next_interval(current: Duration, cap: Option<Duration>) -> Duration {
    match cap {
        Some(cap) => std::cmp::min(current * 2, cap),
        None => current,
    }
}

async fn watch_soap(inner: Arc<Inner>) {
    inner.cancel.cancelled().await;
    inner.deactivate(DisconnectReason::Cancelled);
    inner.set_state(SessionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, HandlerError, RequestMetadata};
    use crate::ocpp::CentralSystemResponse;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn reject_all() -> impl Handler<CentralSystemRequest> {
        handler_fn(|_req: CentralSystemRequest, _meta: RequestMetadata| async move {
            Err::<CentralSystemResponse, _>(HandlerError::new("not supported"))
        })
    }

    #[test]
    fn test_next_interval() {
        let base = Duration::from_millis(100);
        assert_eq!(next_interval(base, None), base);
        assert_eq!(
            next_interval(base, Some(Duration::from_millis(300))),
            Duration::from_millis(200)
        );
        assert_eq!(
            next_interval(Duration::from_millis(200), Some(Duration::from_millis(300))),
            Duration::from_millis(300)
        );
    }

    #[tokio::test]
    async fn test_soap_session_starts_connected() {
        let config = ChargePointConfig::new("CP-SOAP", "http://127.0.0.1:1/ocpp").with_soap(9000);
        let cancel = CancellationToken::new();
        let cp = ChargePoint::connect(config, reject_all(), cancel.clone())
            .await
            .unwrap();

        assert_eq!(cp.state(), SessionState::Connected);
        assert_eq!(cp.soap_port(), Some(9000));
        assert!(cp.connection().is_none());
        cp.wait_connected().await.unwrap();

        let mut events = cp.disconnections();
        let mut parked = task::spawn(cp.wait_disconnect());
        assert_pending!(parked.poll());

        cancel.cancel();
        assert_eq!(cp.wait_disconnect().await, SessionState::Closed);
        assert!(parked.is_woken());
        assert_ready_eq!(parked.poll(), SessionState::Closed);
        let event = events.recv().await.unwrap();
        assert_eq!(event.reason, DisconnectReason::Cancelled);
        assert!(cp.wait_connected().await.is_err());
        assert!(matches!(cp.heartbeat().await, Err(OcppError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_handle_soap_until_closed() {
        let config = ChargePointConfig::new("CP-SOAP", "http://127.0.0.1:1/ocpp").with_soap(9000);
        let cp = ChargePoint::connect(config, reject_all(), CancellationToken::new())
            .await
            .unwrap();

        let body = crate::soap::envelope::build_request(
            crate::ocpp::Action::Reset,
            &serde_json::json!({"type": "Soft"}),
            "urn://Ocpp/Cp/2015/10/",
            "http://127.0.0.1:9000/",
            &CallOptions::default(),
        )
        .unwrap();
        let response = cp.handle_soap(&body).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.body.contains("not supported"));

        cp.shutdown().await;
        assert!(matches!(
            cp.handle_soap(&body).await,
            Err(OcppError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_soap_requires_port() {
        let mut config = ChargePointConfig::new("CP-SOAP", "http://127.0.0.1:1/ocpp");
        config.transport = TransportKind::Soap;
        let err = ChargePoint::connect(config, reject_all(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OcppError::Config(_)));
    }
}
