//! # OCPP RPC
//!
//! Session layer for OCPP (Open Charge Point Protocol): bidirectional RPC between a
//! charge point and its central system over a persistent connection.
//!
//! ## Architecture
//!
//! ```text
//!  Charge point                                   Central system
//! ┌──────────────────────┐                      ┌──────────────────────┐
//! │ ChargePoint          │   OCPP-J (WebSocket) │ CentralSystem        │
//! │  ├ CentralSystemSvc ─┼──────────────────────┼► Handler<CP request> │
//! │  └ Handler<CS req.> ◄┼──────────────────────┼─ ChargePointService  │
//! │                      │   OCPP-S (SOAP/HTTP) │                      │
//! │  SoapClient ─────────┼──────────────────────┼►                     │
//! └──────────────────────┘                      └──────────────────────┘
//! ```
//!
//! - `ocpp`: frames, payload types, request/response families, errors
//! - `ws`: one WebSocket connection with its correlation registry
//! - `soap`: stateless SOAP client and inbound request dispatcher
//! - `service`: typed `send` over either transport
//! - `cp`: charge point session with automatic redial
//! - `cs`: central system listener
//!
//! ## Usage
//!
//! ```no_run
//! use ocpp_rpc::{handler_fn, ChargePoint, ChargePointConfig, HandlerError, RequestMetadata};
//! use ocpp_rpc::ocpp::{CentralSystemRequest, CentralSystemResponse};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChargePointConfig::new("EK3-001", "ws://localhost:8180/steve/websocket/CentralSystemService");
//!     let handler = handler_fn(|_req: CentralSystemRequest, _meta: RequestMetadata| async move {
//!         Err::<CentralSystemResponse, _>(HandlerError::new("not supported"))
//!     });
//!
//!     let cp = ChargePoint::connect(config, handler, CancellationToken::new()).await?;
//!     let reply = cp.heartbeat().await?;
//!     println!("central system time: {}", reply.current_time);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cp;
pub mod cs;
pub mod handler;
pub mod ocpp;
pub mod service;
pub mod soap;
pub mod ws;

pub use config::{
    CallOptions, CentralSystemConfig, ChargePointConfig, ConnectionConfig, SoapConfig,
    TransportKind, UnrecognizedRequestPolicy, Version,
};
pub use cp::{ChargePoint, DisconnectReason, Disconnection, SessionState};
pub use cs::{CentralSystem, ChargePointEvent};
pub use handler::{handler_fn, Handler, HandlerError, HandlerFn, RequestMetadata};
pub use ocpp::{ErrorCode, ErrorKind, OcppError};
pub use service::{CentralSystemService, ChargePointService};
pub use soap::{SoapClient, SoapDispatcher, SoapFault, SoapResponse};
pub use ws::Connection;
