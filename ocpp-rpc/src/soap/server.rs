//! Answering OCPP-S requests
//!
//! [`SoapDispatcher`] turns one POSTed request envelope into the reply envelope. It does
//! not listen: the application owns the HTTP server and hands each body over.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{self, SoapFault, XmlPayload};
use crate::config::Version;
use crate::handler::{Handler, HandlerError, RequestMetadata};
use crate::ocpp::{OcppError, RequestFamily, ResponseFamily};

const SENDER: &str = "soap:Sender";
const RECEIVER: &str = "soap:Receiver";

/// Reply envelope with the HTTP status to send it under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

impl SoapResponse {
    fn ok(body: String) -> Self {
        Self { status: 200, body }
    }

    fn fault(fault: &SoapFault) -> Self {
        Self {
            status: 500,
            body: envelope::build_fault(fault),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.status != 200
    }
}

/// Decodes request envelopes of family `R` and runs them through a handler
pub struct SoapDispatcher<R: RequestFamily> {
    handler: Arc<dyn Handler<R>>,
    version: Version,
    identity: Option<String>,
}

impl<R: RequestFamily> Clone for SoapDispatcher<R> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            version: self.version,
            identity: self.identity.clone(),
        }
    }
}

impl<R: RequestFamily> fmt::Debug for SoapDispatcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoapDispatcher")
            .field("version", &self.version)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl<R: RequestFamily> SoapDispatcher<R> {
    pub fn new(handler: Arc<dyn Handler<R>>, version: Version) -> Self {
        Self {
            handler,
            version,
            identity: None,
        }
    }

    /// Identity reported to the handler when a request carries no `chargeBoxIdentity`
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Answer one request envelope.
    ///
    /// Undecodable requests and actions of the other family come back as a
    /// `soap:Sender` fault whose subcode is the matching OCPP error code. Handler
    /// failures come back as `soap:Receiver`.
    pub async fn handle(&self, body: &str) -> SoapResponse {
        match self.answer(body).await {
            Ok(reply) => SoapResponse::ok(reply),
            Err(fault) => {
                warn!("SOAP request rejected: {}", fault);
                SoapResponse::fault(&fault)
            }
        }
    }

    async fn answer(&self, body: &str) -> Result<String, SoapFault> {
        let inbound = envelope::parse_request(body).map_err(|e| sender_fault(&e))?;
        let action = envelope::request_action(&inbound.element)
            .ok_or_else(|| sender_fault(&OcppError::UnknownAction(inbound.element.clone())))?;

        let request = R::from_payload(&action, XmlPayload(inbound.xml))
            .map_err(|e| sender_fault(&e))?;
        let action = request.action();

        let meta = RequestMetadata {
            charge_point_id: inbound
                .charge_box_identity
                .or_else(|| self.identity.clone())
                .unwrap_or_default(),
            action,
            message_id: inbound
                .message_id
                .clone()
                .unwrap_or_else(|| format!("uuid:{}", Uuid::new_v4())),
        };
        debug!("SOAP {} from {}", action, meta.charge_point_id);

        let response = self
            .handler
            .handle(request, meta)
            .await
            .map_err(receiver_fault)?;
        if response.action() != action {
            return Err(receiver_fault(HandlerError::new(format!(
                "handler answered {} with a {} response",
                action,
                response.action()
            ))));
        }

        let payload = response
            .to_payload()
            .map_err(|e| receiver_fault(HandlerError::new(e.to_string())))?;
        envelope::build_response(
            action,
            &payload,
            envelope::namespace(self.version, R::RECEIVER),
            inbound.message_id.as_deref(),
        )
        .map_err(|e| receiver_fault(HandlerError::new(e.to_string())))
    }
}

fn sender_fault(err: &OcppError) -> SoapFault {
    SoapFault {
        code: SENDER.to_string(),
        subcode: Some(err.call_error_code().to_string()),
        reason: err.to_string(),
    }
}

fn receiver_fault(err: HandlerError) -> SoapFault {
    SoapFault {
        code: RECEIVER.to_string(),
        subcode: Some(err.code.to_string()),
        reason: err.description,
    }
}
