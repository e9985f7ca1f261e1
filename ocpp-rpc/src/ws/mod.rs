//! OCPP-J over WebSocket
//!
//! [`dial`] opens the charge point side of a session, [`accept`] upgrades an inbound TCP
//! stream on the central system side. Both hand the socket to a [`Connection`].

pub mod connection;

pub use connection::Connection;

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{accept_hdr_async_with_config, connect_async_with_config};
use tracing::{info, warn};

use crate::config::{CentralSystemConfig, ChargePointConfig, ConnectionConfig};
use crate::ocpp::OcppError;

fn ws_config(config: &ConnectionConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        ..Default::default()
    }
}

/// Dial `<central system URL>/<identity>` with the configured OCPP subprotocol
pub async fn dial(config: &ChargePointConfig) -> Result<Arc<Connection>, OcppError> {
    let url = config.dial_url();
    let subprotocol = config.version.subprotocol();

    let mut request = url.as_str().into_client_request()?;
    request.headers_mut().insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(subprotocol),
    );

    let (stream, response) =
        connect_async_with_config(request, Some(ws_config(&config.connection)), false).await?;

    let accepted = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    if accepted != Some(subprotocol) {
        warn!(
            "Central system did not accept {} subprotocol, got: {:?}",
            subprotocol, accepted
        );
    }

    info!("WebSocket connected to {}", url);
    Ok(Connection::spawn(
        stream,
        config.identity.clone(),
        &config.connection,
    ))
}

/// Charge point identity carried by a request path.
///
/// Without a base path it is the last non-empty segment. With one, the path must be
/// exactly `<base>/<identity>`, so a bare `<base>` carries no identity.
pub fn identity_from_path<'a>(path: &'a str, base: Option<&str>) -> Option<&'a str> {
    let path = path.trim_end_matches('/');
    match base {
        Some(base) => {
            let rest = path.strip_prefix(base.trim_end_matches('/'))?;
            let identity = rest.strip_prefix('/')?;
            (!identity.is_empty() && !identity.contains('/')).then_some(identity)
        }
        None => path.rsplit('/').find(|segment| !segment.is_empty()),
    }
}

/// Upgrade an inbound charge point connection.
///
/// The upgrade is refused with 400 when the path carries no identity. The first
/// requested subprotocol the central system supports is echoed back.
pub async fn accept(
    stream: TcpStream,
    config: &CentralSystemConfig,
) -> Result<Arc<Connection>, OcppError> {
    let mut identity: Option<String> = None;

    let callback = |request: &Request, mut response: Response| {
        let Some(id) = identity_from_path(request.uri().path(), config.base_path.as_deref()) else {
            let mut refusal = ErrorResponse::new(Some("missing charge point identity".into()));
            *refusal.status_mut() = StatusCode::BAD_REQUEST;
            return Err(refusal);
        };

        let requested = request
            .headers()
            .get_all(header::SEC_WEBSOCKET_PROTOCOL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','));
        match config.negotiate(requested) {
            Some(version) => {
                response.headers_mut().insert(
                    header::SEC_WEBSOCKET_PROTOCOL,
                    HeaderValue::from_static(version.subprotocol()),
                );
            }
            None => warn!("Charge point {} requested no supported subprotocol", id),
        }

        identity = Some(id.to_string());
        Ok(response)
    };

    let ws = accept_hdr_async_with_config(stream, callback, Some(ws_config(&config.connection)))
        .await?;
    let identity = identity
        .ok_or_else(|| OcppError::Transport("handshake completed without identity".into()))?;

    info!("Charge point {} connected", identity);
    Ok(Connection::spawn(ws, identity, &config.connection))
}
