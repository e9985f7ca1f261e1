//! Inbound request handling
//!
//! Applications answer inbound Calls by implementing [`Handler`] for the request family
//! they receive, or by wrapping an async closure with [`handler_fn`]. Every decoded
//! Call runs in its own task and is always answered.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UnrecognizedRequestPolicy;
use crate::ocpp::{Action, Call, CallError, ErrorCode, OcppError, RequestFamily};
use crate::ws::Connection;

/// Context passed to the handler with each request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    /// Identity of the charge point on the other end of the session
    pub charge_point_id: String,
    pub action: Action,
    pub message_id: String,
}

/// Failure reported by a handler. Reaches the peer as a CALLERROR.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{code}] {description}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub description: String,
    pub details: Map<String, Value>,
}

impl HandlerError {
    /// An InternalError with the given description
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::InternalError, description)
    }

    pub fn with_code(code: ErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl From<OcppError> for HandlerError {
    fn from(err: OcppError) -> Self {
        Self::with_code(err.call_error_code(), err.to_string())
    }
}

/// Answers requests of family `R`
#[async_trait]
pub trait Handler<R: RequestFamily>: Send + Sync + 'static {
    async fn handle(&self, request: R, meta: RequestMetadata)
        -> Result<R::Response, HandlerError>;
}

/// [`Handler`] backed by an async closure; see [`handler_fn`]
#[derive(Clone)]
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` as a [`Handler`]
///
/// ```no_run
/// use ocpp_rpc::handler::{handler_fn, HandlerError, RequestMetadata};
/// use ocpp_rpc::ocpp::{ChargePointRequest, ChargePointResponse, HeartbeatResponse};
///
/// let handler = handler_fn(|req: ChargePointRequest, _meta: RequestMetadata| async move {
///     match req {
///         ChargePointRequest::Heartbeat(_) => Ok(ChargePointResponse::Heartbeat(
///             HeartbeatResponse { current_time: chrono::Utc::now() },
///         )),
///         _ => Err(HandlerError::new("not supported")),
///     }
/// });
/// ```
pub fn handler_fn<R, F, Fut>(f: F) -> HandlerFn<F>
where
    R: RequestFamily,
    F: Fn(R, RequestMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<R, F, Fut> Handler<R> for HandlerFn<F>
where
    R: RequestFamily,
    F: Fn(R, RequestMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        request: R,
        meta: RequestMetadata,
    ) -> Result<R::Response, HandlerError> {
        (self.f)(request, meta).await
    }
}

/// Decode an inbound Call as family `R`, run the handler and write the answer.
///
/// Calls that cannot be decoded are rejected with a CALLERROR, except actions of the
/// opposite direction under [`UnrecognizedRequestPolicy::Ignore`].
pub(crate) async fn dispatch<R: RequestFamily>(
    connection: Arc<Connection>,
    handler: Arc<dyn Handler<R>>,
    call: Call,
    policy: UnrecognizedRequestPolicy,
) {
    let Call {
        message_id,
        action,
        charge_point_id,
        payload,
    } = call;

    let request = match R::from_payload(&action, payload) {
        Ok(request) => request,
        Err(err) => {
            if matches!(err, OcppError::NotRecognized { .. })
                && policy == UnrecognizedRequestPolicy::Ignore
            {
                warn!("Ignoring {} from {}: {}", action, charge_point_id, err);
                return;
            }

            warn!("Rejecting {} from {}: {}", action, charge_point_id, err);
            if let Err(e) = connection
                .send_error(CallError::rejecting(message_id, &err))
                .await
            {
                debug!("Could not send CALLERROR for {}: {}", action, e);
            }
            return;
        }
    };

    let meta = RequestMetadata {
        charge_point_id,
        action: request.action(),
        message_id: message_id.clone(),
    };
    let outcome = handler.handle(request, meta).await;

    if let Err(e) = connection.send_response(&message_id, outcome).await {
        debug!("Could not answer {} ({}): {}", action, message_id, e);
    }
}

/// Run [`dispatch`] on its own task
pub(crate) fn spawn_dispatch<R: RequestFamily>(
    connection: Arc<Connection>,
    handler: Arc<dyn Handler<R>>,
    call: Call,
    policy: UnrecognizedRequestPolicy,
) {
    tokio::spawn(dispatch(connection, handler, call, policy));
}
