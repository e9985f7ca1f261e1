//! OCPP-S: OCPP over SOAP 1.2
//!
//! [`SoapClient`] sends requests. [`SoapDispatcher`] answers them, but does not listen:
//! a SOAP charge point still needs an HTTP listener for central system calls, and the
//! application serves it and passes each body to the dispatcher.

pub mod client;
pub mod envelope;
pub mod server;

pub use client::SoapClient;
pub use envelope::{SoapFault, XmlPayload};
pub use server::{SoapDispatcher, SoapResponse};
