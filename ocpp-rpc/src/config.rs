//! Configuration for charge points and central systems
//!
//! Plain structs with defaults and `with_*` builders. Checks that can fail fast are in
//! [`ChargePointConfig::validate`], which `ChargePoint::connect` runs before any I/O.

use std::net::SocketAddr;
use std::time::Duration;

use crate::ocpp::OcppError;

/// OCPP protocol version spoken on the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    V15,
    #[default]
    V16,
}

impl Version {
    /// WebSocket subprotocol name
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Version::V15 => "ocpp1.5",
            Version::V16 => "ocpp1.6",
        }
    }

    pub fn from_subprotocol(name: &str) -> Option<Self> {
        match name {
            "ocpp1.5" => Some(Version::V15),
            "ocpp1.6" => Some(Version::V16),
            _ => None,
        }
    }
}

/// Wire transport between charge point and central system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// OCPP-J: JSON frames over a persistent WebSocket
    #[default]
    Json,
    /// OCPP-S: one SOAP request per call over HTTP
    Soap,
}

/// What to do with an inbound Call whose action belongs to the opposite direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnrecognizedRequestPolicy {
    /// Answer with a ProtocolError CallError
    #[default]
    Reject,
    /// Log and send nothing
    Ignore,
}

/// Settings for one WebSocket connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted WebSocket message
    pub max_message_size: usize,
    /// Per-call reply deadline; `None` waits until the reply or teardown
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            request_timeout: None,
        }
    }
}

/// Settings for the SOAP client
#[derive(Debug, Clone)]
pub struct SoapConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub version: Version,
}

impl Default for SoapConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            request_timeout: Duration::from_secs(30),
            version: Version::V16,
        }
    }
}

/// Per-call addressing for SOAP requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// WS-Addressing From/Address, where the receiver can reach the sender
    pub from: Option<String>,
    /// Value of the `chargeBoxIdentity` header
    pub charge_box_identity: Option<String>,
}

/// Charge point side configuration
#[derive(Debug, Clone)]
pub struct ChargePointConfig {
    /// Charge point identity, appended to the central system URL
    pub identity: String,

    /// Central system endpoint (WebSocket base URL or SOAP service URL)
    pub central_system_url: String,

    pub version: Version,

    pub transport: TransportKind,

    /// Port of the local SOAP listener; required for the SOAP transport
    pub soap_port: Option<u16>,

    /// Delay between redial attempts
    pub reconnect_interval: Duration,

    /// Cap for exponential redial backoff; `None` keeps the interval fixed
    pub max_reconnect_interval: Option<Duration>,

    /// Reply deadline for SOAP calls
    pub soap_request_timeout: Duration,

    pub unrecognized_requests: UnrecognizedRequestPolicy,

    pub connection: ConnectionConfig,
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            identity: "EK3-001".to_string(),
            central_system_url: "ws://localhost:8180/steve/websocket/CentralSystemService"
                .to_string(),
            version: Version::V16,
            transport: TransportKind::Json,
            soap_port: None,
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_interval: None,
            soap_request_timeout: Duration::from_secs(30),
            unrecognized_requests: UnrecognizedRequestPolicy::Reject,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ChargePointConfig {
    /// Create config with basic parameters
    pub fn new(identity: impl Into<String>, central_system_url: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            central_system_url: central_system_url.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Use OCPP-S with the local listener on `port`
    pub fn with_soap(mut self, port: u16) -> Self {
        self.transport = TransportKind::Soap;
        self.soap_port = Some(port);
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Double the redial delay after each failure, up to `cap`
    pub fn with_max_reconnect_interval(mut self, cap: Duration) -> Self {
        self.max_reconnect_interval = Some(cap);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.connection.request_timeout = Some(timeout);
        self.soap_request_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.connection.max_message_size = size;
        self
    }

    pub fn with_unrecognized_requests(mut self, policy: UnrecognizedRequestPolicy) -> Self {
        self.unrecognized_requests = policy;
        self
    }

    /// URL dialled for the WebSocket transport
    pub fn dial_url(&self) -> String {
        format!(
            "{}/{}",
            self.central_system_url.trim_end_matches('/'),
            self.identity
        )
    }

    /// SOAP client settings derived from this config
    pub fn soap(&self) -> SoapConfig {
        SoapConfig {
            request_timeout: self.soap_request_timeout,
            version: self.version,
            ..Default::default()
        }
    }

    /// Reject configurations that can never work
    pub fn validate(&self) -> Result<(), OcppError> {
        if self.identity.is_empty() {
            return Err(OcppError::Config("charge point identity is empty".into()));
        }
        if let Some(c) = self.identity.chars().find(|c| !is_identity_char(*c)) {
            return Err(OcppError::Config(format!(
                "charge point identity {:?} contains {:?}, which cannot appear in a URL path segment",
                self.identity, c
            )));
        }
        if self.central_system_url.is_empty() {
            return Err(OcppError::Config("central system URL is empty".into()));
        }
        if self.transport == TransportKind::Soap && self.soap_port.is_none() {
            return Err(OcppError::Config(
                "SOAP transport needs a listener port".into(),
            ));
        }
        if self.reconnect_interval.is_zero() {
            return Err(OcppError::Config("reconnect interval must be positive".into()));
        }
        if let Some(cap) = self.max_reconnect_interval {
            if cap < self.reconnect_interval {
                return Err(OcppError::Config(
                    "max reconnect interval is below the reconnect interval".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Characters a charge point identity may use. The identity is the last segment of the
/// dial URL and is sent unencoded, so only unreserved characters and `:` are allowed.
pub fn is_identity_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | ':')
}

/// Central system side configuration
#[derive(Debug, Clone)]
pub struct CentralSystemConfig {
    pub listen_addr: SocketAddr,

    /// Accepted subprotocols, in order of preference
    pub versions: Vec<Version>,

    /// Path charge points dial under, e.g. `/ocpp`. When set, only `<base_path>/<identity>`
    /// is accepted; otherwise the last non-empty segment of any path is the identity.
    pub base_path: Option<String>,

    pub unrecognized_requests: UnrecognizedRequestPolicy,

    pub connection: ConnectionConfig,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8180)),
            versions: vec![Version::V16, Version::V15],
            base_path: None,
            unrecognized_requests: UnrecognizedRequestPolicy::Reject,
            connection: ConnectionConfig::default(),
        }
    }
}

impl CentralSystemConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_versions(mut self, versions: Vec<Version>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.connection.request_timeout = Some(timeout);
        self
    }

    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    pub fn with_unrecognized_requests(mut self, policy: UnrecognizedRequestPolicy) -> Self {
        self.unrecognized_requests = policy;
        self
    }

    /// First requested subprotocol this central system speaks
    pub fn negotiate<'a>(&self, requested: impl IntoIterator<Item = &'a str>) -> Option<Version> {
        requested
            .into_iter()
            .filter_map(|name| Version::from_subprotocol(name.trim()))
            .find(|v| self.versions.contains(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ChargePointConfig::new("CP001", "ws://localhost:8180/ocpp/")
            .with_version(Version::V15)
            .with_reconnect_interval(Duration::from_millis(200))
            .with_max_reconnect_interval(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(3));

        assert_eq!(config.identity, "CP001");
        assert_eq!(config.dial_url(), "ws://localhost:8180/ocpp/CP001");
        assert_eq!(config.version.subprotocol(), "ocpp1.5");
        assert_eq!(config.connection.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.soap().request_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = ChargePointConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_interval, None);
        assert_eq!(config.connection.request_timeout, None);
        assert_eq!(config.unrecognized_requests, UnrecognizedRequestPolicy::Reject);
        assert_eq!(config.soap().connect_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let config = ChargePointConfig::new("CP001", "");
        assert!(matches!(config.validate(), Err(OcppError::Config(_))));

        let mut config = ChargePointConfig::new("CP001", "http://localhost:8080/ocpp");
        config.transport = TransportKind::Soap;
        assert!(matches!(config.validate(), Err(OcppError::Config(_))));
        assert!(config.with_soap(9000).validate().is_ok());

        let config = ChargePointConfig::new("", "ws://localhost:8180");
        assert!(config.validate().is_err());

        for identity in ["CP/1", "CP?7", "CP#7", "CP 7", "CP%207", "CPé"] {
            let config = ChargePointConfig::new(identity, "ws://localhost:8180");
            assert!(
                matches!(config.validate(), Err(OcppError::Config(_))),
                "{:?} should be rejected",
                identity
            );
        }
        let config = ChargePointConfig::new("EK3-001_a.b~c:1", "ws://localhost:8180");
        assert!(config.validate().is_ok());

        let config = ChargePointConfig::new("CP001", "ws://localhost:8180")
            .with_reconnect_interval(Duration::from_secs(10))
            .with_max_reconnect_interval(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_subprotocol_negotiation() {
        let config = CentralSystemConfig::default();
        assert_eq!(config.negotiate(["ocpp2.0.1", "ocpp1.5"]), Some(Version::V15));
        assert_eq!(config.negotiate(["ocpp1.6", "ocpp1.5"]), Some(Version::V16));
        assert_eq!(config.negotiate(["ocpp2.0.1"]), None);

        let only_16 = CentralSystemConfig::default().with_versions(vec![Version::V16]);
        assert_eq!(only_16.negotiate(["ocpp1.5"]), None);
    }
}
