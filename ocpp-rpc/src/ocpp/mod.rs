//! OCPP protocol model
//!
//! - `types`: OCPP 1.6 payload structs
//! - `family`: request/response families resolved by action name
//! - `messages`: OCPP-J framing (CALL, CALLRESULT, CALLERROR)
//! - `error`: the crate error type

pub mod error;
pub mod family;
pub mod messages;
pub mod types;

pub use error::{ErrorKind, OcppError};
pub use family::*;
pub use messages::*;
pub use types::*;
