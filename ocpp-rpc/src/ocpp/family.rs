//! Request and response families
//!
//! OCPP splits its actions by direction. Requests a charge point sends to the central
//! system form [`ChargePointRequest`]; requests the central system sends to a charge
//! point form [`CentralSystemRequest`]. Each family is a sum type whose variant is
//! picked from the action name when a payload is decoded.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::OcppError;
use super::types::*;

/// OCPP actions known to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Authorize,
    BootNotification,
    ChangeAvailability,
    DataTransfer,
    Heartbeat,
    RemoteStartTransaction,
    RemoteStopTransaction,
    Reset,
    StatusNotification,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Authorize => "Authorize",
            Action::BootNotification => "BootNotification",
            Action::ChangeAvailability => "ChangeAvailability",
            Action::DataTransfer => "DataTransfer",
            Action::Heartbeat => "Heartbeat",
            Action::RemoteStartTransaction => "RemoteStartTransaction",
            Action::RemoteStopTransaction => "RemoteStopTransaction",
            Action::Reset => "Reset",
            Action::StatusNotification => "StatusNotification",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = OcppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Authorize" => Ok(Action::Authorize),
            "BootNotification" => Ok(Action::BootNotification),
            "ChangeAvailability" => Ok(Action::ChangeAvailability),
            "DataTransfer" => Ok(Action::DataTransfer),
            "Heartbeat" => Ok(Action::Heartbeat),
            "RemoteStartTransaction" => Ok(Action::RemoteStartTransaction),
            "RemoteStopTransaction" => Ok(Action::RemoteStopTransaction),
            "Reset" => Ok(Action::Reset),
            "StatusNotification" => Ok(Action::StatusNotification),
            other => Err(OcppError::UnknownAction(other.to_string())),
        }
    }
}

/// Endpoint role in an OCPP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    ChargePoint,
    CentralSystem,
}

/// Source of a request or response payload.
///
/// JSON values decode through serde_json; SOAP bodies decode through quick-xml.
pub trait PayloadDecoder {
    fn decode<T: DeserializeOwned>(self, action: &str) -> Result<T, OcppError>;
}

impl PayloadDecoder for Value {
    fn decode<T: DeserializeOwned>(self, action: &str) -> Result<T, OcppError> {
        serde_json::from_value(self).map_err(|e| OcppError::Decode {
            action: action.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A closed set of requests travelling in one direction
pub trait RequestFamily: Sized + Send + 'static {
    /// The matching response family
    type Response: ResponseFamily;

    /// Role of the endpoint that receives and answers these requests
    const RECEIVER: Role;

    fn action(&self) -> Action;

    fn to_payload(&self) -> Result<Value, OcppError>;

    /// Decode a request whose variant is named by `action`.
    ///
    /// Fails with `UnknownAction` for names outside the catalog, `NotRecognized` for
    /// actions of the opposite direction and `Decode` for a malformed payload.
    fn from_payload<D: PayloadDecoder>(action: &str, payload: D) -> Result<Self, OcppError>;
}

/// Responses to a [`RequestFamily`]
pub trait ResponseFamily: Sized + Send + 'static {
    fn action(&self) -> Action;

    fn to_payload(&self) -> Result<Value, OcppError>;

    /// Decode the reply to a call of `call_action`
    fn from_payload<D: PayloadDecoder>(call_action: Action, payload: D)
        -> Result<Self, OcppError>;
}

fn not_recognized(action: Action) -> OcppError {
    OcppError::NotRecognized {
        action: action.to_string(),
    }
}

// ============================================================================
// Charge point -> central system
// ============================================================================

/// Requests a charge point sends to the central system
#[derive(Debug, Clone, PartialEq)]
pub enum ChargePointRequest {
    Authorize(AuthorizeRequest),
    BootNotification(BootNotificationRequest),
    DataTransfer(DataTransferRequest),
    Heartbeat(HeartbeatRequest),
    StatusNotification(StatusNotificationRequest),
}

/// Central system answers to [`ChargePointRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum ChargePointResponse {
    Authorize(AuthorizeResponse),
    BootNotification(BootNotificationResponse),
    DataTransfer(DataTransferResponse),
    Heartbeat(HeartbeatResponse),
    StatusNotification(StatusNotificationResponse),
}

impl RequestFamily for ChargePointRequest {
    type Response = ChargePointResponse;

    const RECEIVER: Role = Role::CentralSystem;

    fn action(&self) -> Action {
        match self {
            ChargePointRequest::Authorize(_) => Action::Authorize,
            ChargePointRequest::BootNotification(_) => Action::BootNotification,
            ChargePointRequest::DataTransfer(_) => Action::DataTransfer,
            ChargePointRequest::Heartbeat(_) => Action::Heartbeat,
            ChargePointRequest::StatusNotification(_) => Action::StatusNotification,
        }
    }

    fn to_payload(&self) -> Result<Value, OcppError> {
        let value = match self {
            ChargePointRequest::Authorize(r) => serde_json::to_value(r)?,
            ChargePointRequest::BootNotification(r) => serde_json::to_value(r)?,
            ChargePointRequest::DataTransfer(r) => serde_json::to_value(r)?,
            ChargePointRequest::Heartbeat(r) => serde_json::to_value(r)?,
            ChargePointRequest::StatusNotification(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    fn from_payload<D: PayloadDecoder>(action: &str, payload: D) -> Result<Self, OcppError> {
        let parsed: Action = action.parse()?;
        match parsed {
            Action::Authorize => Ok(Self::Authorize(payload.decode(action)?)),
            Action::BootNotification => Ok(Self::BootNotification(payload.decode(action)?)),
            Action::DataTransfer => Ok(Self::DataTransfer(payload.decode(action)?)),
            Action::Heartbeat => Ok(Self::Heartbeat(payload.decode(action)?)),
            Action::StatusNotification => Ok(Self::StatusNotification(payload.decode(action)?)),
            other => Err(not_recognized(other)),
        }
    }
}

impl ResponseFamily for ChargePointResponse {
    fn action(&self) -> Action {
        match self {
            ChargePointResponse::Authorize(_) => Action::Authorize,
            ChargePointResponse::BootNotification(_) => Action::BootNotification,
            ChargePointResponse::DataTransfer(_) => Action::DataTransfer,
            ChargePointResponse::Heartbeat(_) => Action::Heartbeat,
            ChargePointResponse::StatusNotification(_) => Action::StatusNotification,
        }
    }

    fn to_payload(&self) -> Result<Value, OcppError> {
        let value = match self {
            ChargePointResponse::Authorize(r) => serde_json::to_value(r)?,
            ChargePointResponse::BootNotification(r) => serde_json::to_value(r)?,
            ChargePointResponse::DataTransfer(r) => serde_json::to_value(r)?,
            ChargePointResponse::Heartbeat(r) => serde_json::to_value(r)?,
            ChargePointResponse::StatusNotification(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    fn from_payload<D: PayloadDecoder>(
        call_action: Action,
        payload: D,
    ) -> Result<Self, OcppError> {
        let name = call_action.as_str();
        match call_action {
            Action::Authorize => Ok(Self::Authorize(payload.decode(name)?)),
            Action::BootNotification => Ok(Self::BootNotification(payload.decode(name)?)),
            Action::DataTransfer => Ok(Self::DataTransfer(payload.decode(name)?)),
            Action::Heartbeat => Ok(Self::Heartbeat(payload.decode(name)?)),
            Action::StatusNotification => Ok(Self::StatusNotification(payload.decode(name)?)),
            other => Err(not_recognized(other)),
        }
    }
}

// ============================================================================
// Central system -> charge point
// ============================================================================

/// Requests the central system sends to a charge point
#[derive(Debug, Clone, PartialEq)]
pub enum CentralSystemRequest {
    ChangeAvailability(ChangeAvailabilityRequest),
    DataTransfer(DataTransferRequest),
    RemoteStartTransaction(RemoteStartTransactionRequest),
    RemoteStopTransaction(RemoteStopTransactionRequest),
    Reset(ResetRequest),
}

/// Charge point answers to [`CentralSystemRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum CentralSystemResponse {
    ChangeAvailability(ChangeAvailabilityResponse),
    DataTransfer(DataTransferResponse),
    RemoteStartTransaction(RemoteStartTransactionResponse),
    RemoteStopTransaction(RemoteStopTransactionResponse),
    Reset(ResetResponse),
}

impl RequestFamily for CentralSystemRequest {
    type Response = CentralSystemResponse;

    const RECEIVER: Role = Role::ChargePoint;

    fn action(&self) -> Action {
        match self {
            CentralSystemRequest::ChangeAvailability(_) => Action::ChangeAvailability,
            CentralSystemRequest::DataTransfer(_) => Action::DataTransfer,
            CentralSystemRequest::RemoteStartTransaction(_) => Action::RemoteStartTransaction,
            CentralSystemRequest::RemoteStopTransaction(_) => Action::RemoteStopTransaction,
            CentralSystemRequest::Reset(_) => Action::Reset,
        }
    }

    fn to_payload(&self) -> Result<Value, OcppError> {
        let value = match self {
            CentralSystemRequest::ChangeAvailability(r) => serde_json::to_value(r)?,
            CentralSystemRequest::DataTransfer(r) => serde_json::to_value(r)?,
            CentralSystemRequest::RemoteStartTransaction(r) => serde_json::to_value(r)?,
            CentralSystemRequest::RemoteStopTransaction(r) => serde_json::to_value(r)?,
            CentralSystemRequest::Reset(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    fn from_payload<D: PayloadDecoder>(action: &str, payload: D) -> Result<Self, OcppError> {
        let parsed: Action = action.parse()?;
        match parsed {
            Action::ChangeAvailability => Ok(Self::ChangeAvailability(payload.decode(action)?)),
            Action::DataTransfer => Ok(Self::DataTransfer(payload.decode(action)?)),
            Action::RemoteStartTransaction => {
                Ok(Self::RemoteStartTransaction(payload.decode(action)?))
            }
            Action::RemoteStopTransaction => {
                Ok(Self::RemoteStopTransaction(payload.decode(action)?))
            }
            Action::Reset => Ok(Self::Reset(payload.decode(action)?)),
            other => Err(not_recognized(other)),
        }
    }
}

impl ResponseFamily for CentralSystemResponse {
    fn action(&self) -> Action {
        match self {
            CentralSystemResponse::ChangeAvailability(_) => Action::ChangeAvailability,
            CentralSystemResponse::DataTransfer(_) => Action::DataTransfer,
            CentralSystemResponse::RemoteStartTransaction(_) => Action::RemoteStartTransaction,
            CentralSystemResponse::RemoteStopTransaction(_) => Action::RemoteStopTransaction,
            CentralSystemResponse::Reset(_) => Action::Reset,
        }
    }

    fn to_payload(&self) -> Result<Value, OcppError> {
        let value = match self {
            CentralSystemResponse::ChangeAvailability(r) => serde_json::to_value(r)?,
            CentralSystemResponse::DataTransfer(r) => serde_json::to_value(r)?,
            CentralSystemResponse::RemoteStartTransaction(r) => serde_json::to_value(r)?,
            CentralSystemResponse::RemoteStopTransaction(r) => serde_json::to_value(r)?,
            CentralSystemResponse::Reset(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    fn from_payload<D: PayloadDecoder>(
        call_action: Action,
        payload: D,
    ) -> Result<Self, OcppError> {
        let name = call_action.as_str();
        match call_action {
            Action::ChangeAvailability => Ok(Self::ChangeAvailability(payload.decode(name)?)),
            Action::DataTransfer => Ok(Self::DataTransfer(payload.decode(name)?)),
            Action::RemoteStartTransaction => {
                Ok(Self::RemoteStartTransaction(payload.decode(name)?))
            }
            Action::RemoteStopTransaction => {
                Ok(Self::RemoteStopTransaction(payload.decode(name)?))
            }
            Action::Reset => Ok(Self::Reset(payload.decode(name)?)),
            other => Err(not_recognized(other)),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

macro_rules! into_family {
    ($family:ident { $($variant:ident($inner:ty)),* $(,)? }) => {
        $(
            impl From<$inner> for $family {
                fn from(inner: $inner) -> Self {
                    $family::$variant(inner)
                }
            }
        )*
    };
}

into_family!(ChargePointRequest {
    Authorize(AuthorizeRequest),
    BootNotification(BootNotificationRequest),
    DataTransfer(DataTransferRequest),
    Heartbeat(HeartbeatRequest),
    StatusNotification(StatusNotificationRequest),
});

into_family!(ChargePointResponse {
    Authorize(AuthorizeResponse),
    BootNotification(BootNotificationResponse),
    DataTransfer(DataTransferResponse),
    Heartbeat(HeartbeatResponse),
    StatusNotification(StatusNotificationResponse),
});

into_family!(CentralSystemRequest {
    ChangeAvailability(ChangeAvailabilityRequest),
    DataTransfer(DataTransferRequest),
    RemoteStartTransaction(RemoteStartTransactionRequest),
    RemoteStopTransaction(RemoteStopTransactionRequest),
    Reset(ResetRequest),
});

into_family!(CentralSystemResponse {
    ChangeAvailability(ChangeAvailabilityResponse),
    DataTransfer(DataTransferResponse),
    RemoteStartTransaction(RemoteStartTransactionResponse),
    RemoteStopTransaction(RemoteStopTransactionResponse),
    Reset(ResetResponse),
});
