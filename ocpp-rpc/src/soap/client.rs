//! SOAP-over-HTTP client
//!
//! Stateless: each call builds its own HTTP client with pooling disabled and asks the
//! server to close the connection, so nothing survives between calls.

use reqwest::header::{CONNECTION, CONTENT_TYPE};
use tracing::debug;

use super::envelope::{self, Reply, XmlPayload};
use crate::config::{CallOptions, SoapConfig};
use crate::ocpp::{OcppError, RequestFamily, ResponseFamily};

pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Sends OCPP requests to one SOAP endpoint
#[derive(Debug, Clone)]
pub struct SoapClient {
    url: String,
    config: SoapConfig,
}

impl SoapClient {
    pub fn new(url: impl Into<String>, config: SoapConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One round trip: POST the request envelope and decode the reply
    pub async fn call<R: RequestFamily>(
        &self,
        request: R,
        options: &CallOptions,
    ) -> Result<R::Response, OcppError> {
        if self.url.is_empty() {
            return Err(OcppError::Config("SOAP endpoint URL is empty".into()));
        }

        let action = request.action();
        let namespace = envelope::namespace(self.config.version, R::RECEIVER);
        let body = envelope::build_request(
            action,
            &request.to_payload()?,
            namespace,
            &self.url,
            options,
        )?;

        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .pool_max_idle_per_host(0)
            .build()?;

        debug!("SOAP {} -> {}", action, self.url);
        let response = client
            .post(&self.url)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .header(CONNECTION, "close")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!("SOAP {} <- HTTP {} ({} bytes)", action, status, text.len());

        if text.trim().is_empty() {
            let reason = if status.is_success() {
                format!("HTTP {} with empty reply to {}", status, action)
            } else {
                format!("HTTP {} with empty body", status)
            };
            return Err(OcppError::Transport(reason));
        }

        let reply = match envelope::parse_reply(&text) {
            Ok(reply) => reply,
            Err(_) if !status.is_success() => {
                return Err(OcppError::Transport(format!("HTTP {}", status)));
            }
            Err(e) => return Err(e),
        };

        match reply {
            Reply::Fault(fault) => Err(OcppError::Fault(fault)),
            Reply::Element { .. } if !status.is_success() => {
                Err(OcppError::Transport(format!("HTTP {}", status)))
            }
            Reply::Element { name, xml } => {
                let expected = envelope::response_element(action);
                if name != expected {
                    return Err(OcppError::SchemaMismatch {
                        expected,
                        found: name,
                    });
                }
                <R::Response as ResponseFamily>::from_payload(action, XmlPayload(xml))
            }
        }
    }
}
