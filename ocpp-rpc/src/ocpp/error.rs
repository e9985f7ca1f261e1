//! Errors in OCPP session handling
//!
//! Every fallible operation in the crate returns [`OcppError`]. Callers that need to
//! tell "the peer said no" apart from "the call never completed" use [`OcppError::kind`].

use serde_json::{Map, Value};
use thiserror::Error;

use super::messages::ErrorCode;
use crate::soap::SoapFault;

/// Errors in OCPP message handling
#[derive(Debug, Error)]
pub enum OcppError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("{action} is not a recognized request for this role")]
    NotRecognized { action: String },

    #[error("Reply to {action} is not the expected response kind")]
    UnexpectedResponse { action: String },

    #[error("Failed to decode {action} payload: {reason}")]
    Decode { action: String, reason: String },

    #[error("Schema mismatch: expected <{expected}>, got <{found}>")]
    SchemaMismatch { expected: String, found: String },

    #[error("OCPP error from peer: [{code}] {description}")]
    Remote {
        code: ErrorCode,
        description: String,
        details: Map<String, Value>,
    },

    #[error("SOAP fault: {0}")]
    Fault(SoapFault),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Broad classification of an [`OcppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, never retried
    Config,
    /// The call could not be completed (dial, socket, HTTP, timeout, teardown)
    Transport,
    /// A frame or envelope violated the protocol
    Protocol,
    /// The peer answered with a CallError or a SOAP fault
    Rejected,
    /// The reply arrived but did not match the expected response shape
    Contract,
}

impl OcppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcppError::Config(_) => ErrorKind::Config,
            OcppError::Transport(_)
            | OcppError::WebSocket(_)
            | OcppError::Http(_)
            | OcppError::Io(_)
            | OcppError::Timeout
            | OcppError::ConnectionClosed => ErrorKind::Transport,
            OcppError::Json(_)
            | OcppError::Xml(_)
            | OcppError::InvalidFrame(_)
            | OcppError::UnknownMessageType(_)
            | OcppError::UnknownAction(_)
            | OcppError::NotRecognized { .. } => ErrorKind::Protocol,
            OcppError::Remote { .. } | OcppError::Fault(_) => ErrorKind::Rejected,
            OcppError::Decode { .. }
            | OcppError::UnexpectedResponse { .. }
            | OcppError::SchemaMismatch { .. } => ErrorKind::Contract,
        }
    }

    /// Error code used when this error rejects an inbound Call
    pub fn call_error_code(&self) -> ErrorCode {
        match self {
            OcppError::NotRecognized { .. } => ErrorCode::ProtocolError,
            OcppError::UnknownAction(_) => ErrorCode::NotSupported,
            OcppError::Decode { .. } | OcppError::Json(_) | OcppError::Xml(_) => {
                ErrorCode::FormationViolation
            }
            OcppError::Remote { code, .. } => *code,
            _ => ErrorCode::InternalError,
        }
    }
}
