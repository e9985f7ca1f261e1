//! Central system listener
//!
//! Accepts OCPP-J connections from charge points. Each charge point is identified by
//! the last segment of the URL it dials, and its calls are dispatched to one shared
//! handler. The central system calls back into a charge point through
//! [`CentralSystem::charge_point`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CentralSystemConfig;
use crate::handler::{spawn_dispatch, Handler};
use crate::ocpp::{ChargePointRequest, OcppError};
use crate::service::ChargePointService;
use crate::ws::{self, Connection};

/// Charge point arrivals and departures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargePointEvent {
    Connected(String),
    Disconnected(String),
}

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 1024;

struct Shared {
    config: CentralSystemConfig,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    events: broadcast::Sender<ChargePointEvent>,
    shutdown: CancellationToken,
}

impl Shared {
    fn register(&self, connection: &Arc<Connection>) {
        let identity = connection.identity().to_string();
        let previous = self
            .connections
            .write()
            .insert(identity.clone(), connection.clone());

        if let Some(previous) = previous {
            info!("Charge point {} reconnected, closing its old session", identity);
            previous.close();
            let _ = self.events.send(ChargePointEvent::Disconnected(identity.clone()));
        }
        let _ = self.events.send(ChargePointEvent::Connected(identity));
    }

    /// Forget `connection` unless another session already took its identity
    fn deregister(&self, connection: &Arc<Connection>) {
        let identity = connection.identity();
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(identity) {
                Some(current) if Arc::ptr_eq(current, connection) => {
                    connections.remove(identity);
                    true
                }
                _ => false,
            }
        };

        if removed {
            info!("Charge point {} disconnected", identity);
            let _ = self
                .events
                .send(ChargePointEvent::Disconnected(identity.to_string()));
        }
    }
}

/// OCPP-J central system
pub struct CentralSystem {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl CentralSystem {
    /// Bind the listening socket
    pub async fn bind(config: CentralSystemConfig) -> Result<Self, OcppError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            shared: Arc::new(Shared {
                config,
                connections: RwLock::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept charge points until [`shutdown`](Self::shutdown). Can run once.
    pub async fn run<H>(&self, handler: H) -> Result<(), OcppError>
    where
        H: Handler<ChargePointRequest>,
    {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| OcppError::Config("central system is already running".into()))?;
        let handler: Arc<dyn Handler<ChargePointRequest>> = Arc::new(handler);

        info!("Central system listening on {}", self.local_addr);

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            debug!("TCP connection from {}", peer);
            tokio::spawn(serve_charge_point(
                self.shared.clone(),
                handler.clone(),
                stream,
                peer,
            ));
        }

        info!("Central system on {} stopped", self.local_addr);
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<ChargePointEvent> {
        self.shared.events.subscribe()
    }

    /// Handle for calls to a connected charge point
    pub fn charge_point(&self, identity: &str) -> Option<ChargePointService> {
        self.shared
            .connections
            .read()
            .get(identity)
            .cloned()
            .map(ChargePointService::from_connection)
    }

    /// Identities of connected charge points, sorted
    pub fn connected_charge_points(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.shared.connections.read().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Stop accepting and close every session
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let connections: Vec<Arc<Connection>> =
            self.shared.connections.read().values().cloned().collect();
        for connection in connections {
            connection.close();
        }
    }
}

impl Drop for CentralSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_charge_point(
    shared: Arc<Shared>,
    handler: Arc<dyn Handler<ChargePointRequest>>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let accepted = tokio::select! {
        _ = shared.shutdown.cancelled() => return,
        accepted = ws::accept(stream, &shared.config) => accepted,
    };
    let connection = match accepted {
        Ok(connection) => connection,
        Err(e) => {
            warn!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };

    shared.register(&connection);

    if let Some(mut requests) = connection.take_requests() {
        loop {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                _ = connection.closed() => break,
                Some(call) = requests.recv() => {
                    spawn_dispatch(
                        connection.clone(),
                        handler.clone(),
                        call,
                        shared.config.unrecognized_requests,
                    );
                }
            }
        }
    }

    connection.close();
    shared.deregister(&connection);
}
