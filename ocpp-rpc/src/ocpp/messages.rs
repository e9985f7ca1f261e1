//! OCPP-J message framing
//!
//! OCPP-J carries RPC over WebSocket text frames shaped as JSON arrays:
//! - CALL: [2, messageId, action, payload]
//! - CALLRESULT: [3, messageId, payload]
//! - CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
//!
//! [`result_to_message`] is the single place where a handler outcome becomes a wire frame.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::OcppError;
use super::family::{RequestFamily, ResponseFamily};
use crate::handler::HandlerError;

/// OCPP message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

/// OCPP-J error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Requested action is recognized but not supported by the receiver
    NotSupported,
    /// The receiver could not process the requested action
    InternalError,
    /// Payload for the action is incomplete, or the action belongs to the other role
    ProtocolError,
    /// A security issue prevented the receiver from completing the action
    SecurityError,
    /// Payload is syntactically incorrect
    FormationViolation,
    /// A field contains an invalid value
    PropertyConstraintViolation,
    /// A field violates occurrence constraints
    #[serde(alias = "OccurenceConstraintViolation")]
    OccurrenceConstraintViolation,
    /// A field violates data type constraints
    TypeConstraintViolation,
    /// Any other error
    GenericError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OCPP CALL message (request)
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub message_id: String,
    pub action: String,
    /// Identity of the peer the call travels to or came from. Not part of the
    /// wire array; the receiving connection stamps it on inbound calls.
    pub charge_point_id: String,
    pub payload: Value,
}

impl Call {
    /// Encode a typed request into a CALL
    pub fn from_request<R: RequestFamily>(
        message_id: impl Into<String>,
        charge_point_id: impl Into<String>,
        request: &R,
    ) -> Result<Self, OcppError> {
        Ok(Self {
            message_id: message_id.into(),
            action: request.action().to_string(),
            charge_point_id: charge_point_id.into(),
            payload: request.to_payload()?,
        })
    }

    /// Serialize to OCPP wire format: [2, messageId, action, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::Call as i32,
            &self.message_id,
            &self.action,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

/// OCPP CALLRESULT message (success response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallResult {
    pub message_id: String,
    pub payload: Value,
}

impl CallResult {
    /// Create a new CALLRESULT message
    pub fn new(message_id: impl Into<String>, payload: impl Serialize) -> Result<Self, OcppError> {
        Ok(Self {
            message_id: message_id.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Serialize to OCPP wire format: [3, messageId, payload]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::CallResult as i32,
            &self.message_id,
            &self.payload
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

/// OCPP CALLERROR message (error response)
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub message_id: String,
    pub error_code: ErrorCode,
    pub error_description: String,
    pub error_details: Map<String, Value>,
}

impl CallError {
    /// Create a new CALLERROR message with empty details
    pub fn new(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Map::new(),
        }
    }

    /// Reject an inbound call that could not be decoded or routed
    pub fn rejecting(message_id: impl Into<String>, error: &OcppError) -> Self {
        Self::new(message_id, error.call_error_code(), error.to_string())
    }

    /// Serialize to OCPP wire format: [4, messageId, errorCode, errorDescription, errorDetails]
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        let array = serde_json::json!([
            MessageType::CallError as i32,
            &self.message_id,
            self.error_code.as_str(),
            &self.error_description,
            &self.error_details
        ]);
        Ok(serde_json::to_vec(&array)?)
    }
}

impl From<CallError> for OcppError {
    fn from(error: CallError) -> Self {
        OcppError::Remote {
            code: error.error_code,
            description: error.error_description,
            details: error.error_details,
        }
    }
}

/// Parsed OCPP message (any type)
#[derive(Debug, Clone, PartialEq)]
pub enum OcppMessage {
    Call(Call),
    CallResult(CallResult),
    CallError(CallError),
}

impl OcppMessage {
    /// Parse an OCPP message from JSON bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, OcppError> {
        let array: Vec<Value> = serde_json::from_slice(bytes)?;

        let msg_type = array
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| OcppError::InvalidFrame("missing message type".into()))?;

        match msg_type {
            2 => {
                // CALL: [2, messageId, action, payload]
                expect_arity(&array, 4, "CALL")?;
                Ok(OcppMessage::Call(Call {
                    message_id: string_at(&array, 1, "messageId")?,
                    action: string_at(&array, 2, "action")?,
                    charge_point_id: String::new(),
                    payload: object_at(&array, 3, "payload")?,
                }))
            }
            3 => {
                // CALLRESULT: [3, messageId, payload]
                expect_arity(&array, 3, "CALLRESULT")?;
                Ok(OcppMessage::CallResult(CallResult {
                    message_id: string_at(&array, 1, "messageId")?,
                    payload: object_at(&array, 2, "payload")?,
                }))
            }
            4 => {
                // CALLERROR: [4, messageId, errorCode, errorDescription, errorDetails]
                expect_arity(&array, 5, "CALLERROR")?;
                let error_code_str = string_at(&array, 2, "errorCode")?;
                let error_code: ErrorCode =
                    serde_json::from_value(Value::String(error_code_str))
                        .unwrap_or(ErrorCode::GenericError);
                let error_details = match object_at(&array, 4, "errorDetails")? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };

                Ok(OcppMessage::CallError(CallError {
                    message_id: string_at(&array, 1, "messageId")?,
                    error_code,
                    error_description: string_at(&array, 3, "errorDescription")?,
                    error_details,
                }))
            }
            _ => Err(OcppError::UnknownMessageType(msg_type)),
        }
    }

    /// Get the message ID
    pub fn message_id(&self) -> &str {
        match self {
            OcppMessage::Call(c) => &c.message_id,
            OcppMessage::CallResult(r) => &r.message_id,
            OcppMessage::CallError(e) => &e.message_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            OcppMessage::Call(_) => MessageType::Call,
            OcppMessage::CallResult(_) => MessageType::CallResult,
            OcppMessage::CallError(_) => MessageType::CallError,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, OcppError> {
        match self {
            OcppMessage::Call(c) => c.to_bytes(),
            OcppMessage::CallResult(r) => r.to_bytes(),
            OcppMessage::CallError(e) => e.to_bytes(),
        }
    }
}

/// Turn a handler outcome into the reply frame for `message_id`.
///
/// Success becomes a CALLRESULT. A handler error becomes a CALLERROR carrying the
/// handler's code (InternalError unless it picked one) and its text. A response that
/// cannot be encoded is reported to the peer as InternalError.
pub fn result_to_message<P: ResponseFamily>(
    message_id: &str,
    outcome: Result<P, HandlerError>,
) -> OcppMessage {
    match outcome.map(|response| response.to_payload()) {
        Ok(Ok(payload)) => OcppMessage::CallResult(CallResult {
            message_id: message_id.to_string(),
            payload,
        }),
        Ok(Err(e)) => OcppMessage::CallError(CallError::new(
            message_id,
            ErrorCode::InternalError,
            e.to_string(),
        )),
        Err(e) => OcppMessage::CallError(CallError {
            message_id: message_id.to_string(),
            error_code: e.code,
            error_description: e.description,
            error_details: e.details,
        }),
    }
}

fn expect_arity(array: &[Value], len: usize, kind: &str) -> Result<(), OcppError> {
    if array.len() != len {
        return Err(OcppError::InvalidFrame(format!(
            "{} must have {} elements, got {}",
            kind,
            len,
            array.len()
        )));
    }
    Ok(())
}

fn string_at(array: &[Value], index: usize, field: &str) -> Result<String, OcppError> {
    array[index]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| OcppError::InvalidFrame(format!("{} must be a string", field)))
}

fn object_at(array: &[Value], index: usize, field: &str) -> Result<Value, OcppError> {
    match &array[index] {
        value @ Value::Object(_) => Ok(value.clone()),
        _ => Err(OcppError::InvalidFrame(format!("{} must be an object", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::family::{ChargePointRequest, ChargePointResponse};
    use crate::ocpp::types::{HeartbeatRequest, HeartbeatResponse};

    #[test]
    fn test_call_serialization() {
        let call = Call::from_request(
            "msg-1",
            "CP001",
            &ChargePointRequest::Heartbeat(HeartbeatRequest {}),
        )
        .unwrap();
        let text = String::from_utf8(call.to_bytes().unwrap()).unwrap();

        assert_eq!(text, r#"[2,"msg-1","Heartbeat",{}]"#);
        assert_eq!(call.charge_point_id, "CP001");
    }

    #[test]
    fn test_call_parsing() {
        let json = r#"[2, "msg-123", "Heartbeat", {}]"#;
        let msg = OcppMessage::parse(json.as_bytes()).unwrap();

        match msg {
            OcppMessage::Call(call) => {
                assert_eq!(call.message_id, "msg-123");
                assert_eq!(call.action, "Heartbeat");
                assert!(call.charge_point_id.is_empty());
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn test_call_result_parsing() {
        let json = r#"[3, "msg-123", {"currentTime": "2026-01-20T12:00:00Z"}]"#;
        let msg = OcppMessage::parse(json.as_bytes()).unwrap();

        match msg {
            OcppMessage::CallResult(result) => {
                assert_eq!(result.message_id, "msg-123");
                assert_eq!(result.payload["currentTime"], "2026-01-20T12:00:00Z");
            }
            _ => panic!("Expected CallResult"),
        }
    }

    #[test]
    fn test_call_error_parsing() {
        let json = r#"[4, "msg-123", "NotSupported", "Action not supported", {"hint": 1}]"#;
        let msg = OcppMessage::parse(json.as_bytes()).unwrap();

        match msg {
            OcppMessage::CallError(error) => {
                assert_eq!(error.message_id, "msg-123");
                assert_eq!(error.error_code, ErrorCode::NotSupported);
                assert_eq!(error.error_description, "Action not supported");
                assert_eq!(error.error_details["hint"], 1);
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_legacy_occurrence_spelling() {
        let json = r#"[4, "m", "OccurenceConstraintViolation", "", {}]"#;
        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::CallError(error) => {
                assert_eq!(error.error_code, ErrorCode::OccurrenceConstraintViolation)
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_unknown_error_code_is_generic() {
        let json = r#"[4, "m", "RpcFrameworkError", "boom", {}]"#;
        match OcppMessage::parse(json.as_bytes()).unwrap() {
            OcppMessage::CallError(error) => assert_eq!(error.error_code, ErrorCode::GenericError),
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn test_rejects_malformed_frames() {
        let cases: &[&[u8]] = &[
            b"{}",
            b"[]",
            b"[\"2\", \"id\", \"Heartbeat\", {}]",
            b"[5, \"id\", {}]",
            b"[2, \"id\", \"Heartbeat\"]",
            b"[2, 7, \"Heartbeat\", {}]",
            b"[2, \"id\", \"Heartbeat\", []]",
            b"[3, \"id\", {}, {}]",
            b"[4, \"id\", \"GenericError\", \"x\", \"details\"]",
        ];

        for case in cases {
            assert!(
                OcppMessage::parse(case).is_err(),
                "accepted {}",
                String::from_utf8_lossy(case)
            );
        }

        assert!(matches!(
            OcppMessage::parse(b"[9, \"id\", {}]"),
            Err(OcppError::UnknownMessageType(9))
        ));
    }

    #[test]
    fn test_call_error_wire_format() {
        let error = CallError::new("abc", ErrorCode::InternalError, "not supported");
        let text = String::from_utf8(error.to_bytes().unwrap()).unwrap();
        assert_eq!(text, r#"[4,"abc","InternalError","not supported",{}]"#);
    }

    #[test]
    fn test_result_to_message_success() {
        let response = ChargePointResponse::Heartbeat(HeartbeatResponse {
            current_time: "2026-01-20T12:00:00Z".parse().unwrap(),
        });
        match result_to_message("id-1", Ok(response)) {
            OcppMessage::CallResult(result) => {
                assert_eq!(result.message_id, "id-1");
                assert_eq!(result.payload["currentTime"], "2026-01-20T12:00:00Z");
            }
            other => panic!("Expected CallResult, got {:?}", other),
        }
    }

    #[test]
    fn test_result_to_message_error_defaults_to_internal_error() {
        let outcome: Result<ChargePointResponse, _> = Err(HandlerError::new("not supported"));
        match result_to_message("id-2", outcome) {
            OcppMessage::CallError(error) => {
                assert_eq!(error.message_id, "id-2");
                assert_eq!(error.error_code, ErrorCode::InternalError);
                assert_eq!(error.error_description, "not supported");
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_result_to_message_keeps_handler_code() {
        let outcome: Result<ChargePointResponse, _> =
            Err(HandlerError::with_code(ErrorCode::SecurityError, "bad token"));
        match result_to_message("id-3", outcome) {
            OcppMessage::CallError(error) => assert_eq!(error.error_code, ErrorCode::SecurityError),
            other => panic!("Expected CallError, got {:?}", other),
        }
    }
}
