//! SOAP 1.2 envelopes for OCPP-S
//!
//! Requests carry WS-Addressing headers and one body element named after the action
//! (`<heartbeatRequest>`). Replies are scanned for the first element inside `Body`,
//! which is either a `Fault` or the `<actionResponse>` payload.

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::{CallOptions, Version};
use crate::ocpp::{Action, OcppError, PayloadDecoder, Role};

pub const SOAP_ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WS_ADDRESSING_NS: &str = "http://www.w3.org/2005/08/addressing";

/// OCPP service namespace of the endpoint playing `receiver`
pub fn namespace(version: Version, receiver: Role) -> &'static str {
    match (version, receiver) {
        (Version::V15, Role::CentralSystem) => "urn://Ocpp/Cs/2012/06/",
        (Version::V15, Role::ChargePoint) => "urn://Ocpp/Cp/2012/06/",
        (Version::V16, Role::CentralSystem) => "urn://Ocpp/Cs/2015/10/",
        (Version::V16, Role::ChargePoint) => "urn://Ocpp/Cp/2015/10/",
    }
}

/// `BootNotification` -> `bootNotification`
fn lower_camel(action: Action) -> String {
    let name = action.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Body element of a request, e.g. `heartbeatRequest`
pub fn request_element(action: Action) -> String {
    lower_camel(action) + "Request"
}

/// Body element of a reply, e.g. `heartbeatResponse`
pub fn response_element(action: Action) -> String {
    lower_camel(action) + "Response"
}

/// `resetRequest` -> `Reset`
pub fn request_action(element: &str) -> Option<String> {
    let stem = element.strip_suffix("Request")?;
    let mut chars = stem.chars();
    let first = chars.next()?;
    Some(first.to_ascii_uppercase().to_string() + chars.as_str())
}

/// Serialize `payload` as `<root xmlns="namespace">...</root>`
fn body_element(root: &str, payload: &Value, namespace: &str) -> Result<String, OcppError> {
    let body = quick_xml::se::to_string_with_root(root, payload)
        .map_err(|e| OcppError::Xml(e.to_string()))?;
    match body.strip_prefix(&format!("<{}", root)) {
        Some(rest) => Ok(format!("<{} xmlns=\"{}\"{}", root, namespace, rest)),
        None => Err(OcppError::Xml(format!("serializer did not emit <{}>", root))),
    }
}

fn envelope(header: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soap:Envelope xmlns:soap=\"{}\" xmlns:wsa=\"{}\">\
         <soap:Header>{}</soap:Header>\
         <soap:Body>{}</soap:Body>\
         </soap:Envelope>",
        SOAP_ENVELOPE_NS, WS_ADDRESSING_NS, header, body
    )
}

/// Build the envelope for one call to `to`
pub fn build_request(
    action: Action,
    payload: &Value,
    namespace: &str,
    to: &str,
    options: &CallOptions,
) -> Result<String, OcppError> {
    let body = body_element(&request_element(action), payload, namespace)?;

    let mut header = String::new();
    if let Some(identity) = &options.charge_box_identity {
        header.push_str(&format!(
            "<chargeBoxIdentity xmlns=\"{}\">{}</chargeBoxIdentity>",
            namespace,
            escape(identity.as_str())
        ));
    }
    header.push_str(&format!("<wsa:Action>/{}</wsa:Action>", action));
    header.push_str(&format!(
        "<wsa:MessageID>uuid:{}</wsa:MessageID>",
        Uuid::new_v4()
    ));
    header.push_str(&format!("<wsa:To>{}</wsa:To>", escape(to)));
    if let Some(from) = &options.from {
        header.push_str(&format!(
            "<wsa:From><wsa:Address>{}</wsa:Address></wsa:From>",
            escape(from.as_str())
        ));
    }

    Ok(envelope(&header, &body))
}

/// Build the reply to a request whose `wsa:MessageID` was `relates_to`
pub fn build_response(
    action: Action,
    payload: &Value,
    namespace: &str,
    relates_to: Option<&str>,
) -> Result<String, OcppError> {
    let body = body_element(&response_element(action), payload, namespace)?;

    let mut header = format!("<wsa:Action>/{}Response</wsa:Action>", action);
    header.push_str(&format!(
        "<wsa:MessageID>uuid:{}</wsa:MessageID>",
        Uuid::new_v4()
    ));
    if let Some(id) = relates_to {
        header.push_str(&format!("<wsa:RelatesTo>{}</wsa:RelatesTo>", escape(id)));
    }

    Ok(envelope(&header, &body))
}

/// Build a SOAP 1.2 fault envelope
pub fn build_fault(fault: &SoapFault) -> String {
    let subcode = match &fault.subcode {
        Some(subcode) => format!(
            "<soap:Subcode><soap:Value>{}</soap:Value></soap:Subcode>",
            escape(subcode.as_str())
        ),
        None => String::new(),
    };
    let body = format!(
        "<soap:Fault><soap:Code><soap:Value>{}</soap:Value>{}</soap:Code>\
         <soap:Reason><soap:Text xml:lang=\"en\">{}</soap:Text></soap:Reason></soap:Fault>",
        escape(fault.code.as_str()),
        subcode,
        escape(fault.reason.as_str())
    );
    envelope("", &body)
}

/// A SOAP fault returned instead of a response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub subcode: Option<String>,
    pub reason: String,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subcode {
            Some(subcode) => write!(f, "{} ({}): {}", self.code, subcode, self.reason),
            None => write!(f, "{}: {}", self.code, self.reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FaultXml {
    #[serde(rename = "Code", default)]
    code: Option<FaultCodeXml>,
    #[serde(rename = "Reason", default)]
    reason: Option<FaultReasonXml>,
    // SOAP 1.1
    #[serde(default)]
    faultcode: Option<String>,
    #[serde(default)]
    faultstring: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaultCodeXml {
    #[serde(rename = "Value", default)]
    value: String,
    #[serde(rename = "Subcode", default)]
    subcode: Option<FaultSubcodeXml>,
}

#[derive(Debug, Deserialize)]
struct FaultSubcodeXml {
    #[serde(rename = "Value", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct FaultReasonXml {
    #[serde(rename = "Text", default)]
    text: Vec<FaultTextXml>,
}

#[derive(Debug, Deserialize)]
struct FaultTextXml {
    #[serde(rename = "$text", default)]
    value: String,
}

impl From<FaultXml> for SoapFault {
    fn from(xml: FaultXml) -> Self {
        let (code, subcode) = match xml.code {
            Some(code) => (code.value, code.subcode.map(|s| s.value)),
            None => (xml.faultcode.unwrap_or_default(), None),
        };
        let reason = xml
            .reason
            .and_then(|r| r.text.into_iter().next())
            .map(|t| t.value)
            .or(xml.faultstring)
            .unwrap_or_default();
        SoapFault {
            code,
            subcode,
            reason,
        }
    }
}

/// The first element inside a reply's `Body`
#[derive(Debug, PartialEq)]
pub enum Reply<'a> {
    Fault(SoapFault),
    Element {
        /// Local name of the element
        name: String,
        /// Raw XML of the element, start tag to end tag
        xml: &'a str,
    },
}

/// Locate the payload of a reply envelope
pub fn parse_reply(xml: &str) -> Result<Reply<'_>, OcppError> {
    let mut reader = Reader::from_str(xml);
    let mut in_body = false;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| OcppError::Xml(e.to_string()))?;

        match event {
            Event::Start(e) if !in_body => {
                in_body = e.local_name().as_ref() == b"Body";
            }
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                reader
                    .read_to_end(e.name())
                    .map_err(|e| OcppError::Xml(e.to_string()))?;
                let end = reader.buffer_position() as usize;
                return element(name, &xml[start..end]);
            }
            Event::Empty(e) if in_body => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let end = reader.buffer_position() as usize;
                return element(name, &xml[start..end]);
            }
            Event::End(e) if in_body && e.local_name().as_ref() == b"Body" => {
                return Err(OcppError::SchemaMismatch {
                    expected: "a body element".into(),
                    found: "empty Body".into(),
                });
            }
            Event::Eof => return Err(OcppError::Xml("reply has no SOAP Body".into())),
            _ => {}
        }
    }
}

/// A request envelope received by an OCPP-S endpoint
#[derive(Debug, PartialEq)]
pub struct InboundRequest<'a> {
    pub charge_box_identity: Option<String>,
    /// `wsa:MessageID`, echoed as `wsa:RelatesTo`
    pub message_id: Option<String>,
    /// Local name of the body element, e.g. `resetRequest`
    pub element: String,
    /// Raw XML of the body element
    pub xml: &'a str,
}

#[derive(Clone, Copy)]
enum HeaderField {
    Identity,
    MessageId,
}

fn xml_error(e: impl fmt::Display) -> OcppError {
    OcppError::Xml(e.to_string())
}

/// Read the addressing headers and locate the body element of a request
pub fn parse_request(xml: &str) -> Result<InboundRequest<'_>, OcppError> {
    let mut reader = Reader::from_str(xml);
    let mut in_header = false;
    let mut in_body = false;
    let mut field = None;
    let mut charge_box_identity = None;
    let mut message_id = None;

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(xml_error)?;

        match event {
            Event::Start(e) if in_body => {
                let element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                reader.read_to_end(e.name()).map_err(xml_error)?;
                let end = reader.buffer_position() as usize;
                return Ok(InboundRequest {
                    charge_box_identity,
                    message_id,
                    element,
                    xml: &xml[start..end],
                });
            }
            Event::Empty(e) if in_body => {
                let element = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let end = reader.buffer_position() as usize;
                return Ok(InboundRequest {
                    charge_box_identity,
                    message_id,
                    element,
                    xml: &xml[start..end],
                });
            }
            Event::Start(e) => match e.local_name().as_ref() {
                b"Header" => in_header = true,
                b"Body" => in_body = true,
                b"chargeBoxIdentity" if in_header => field = Some(HeaderField::Identity),
                b"MessageID" if in_header => field = Some(HeaderField::MessageId),
                _ => {}
            },
            Event::Text(text) => {
                if let Some(target) = field {
                    let value = text.unescape().map_err(xml_error)?.trim().to_string();
                    match target {
                        HeaderField::Identity => charge_box_identity = Some(value),
                        HeaderField::MessageId => message_id = Some(value),
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Header" => in_header = false,
                b"Body" => {
                    return Err(OcppError::SchemaMismatch {
                        expected: "a request element".into(),
                        found: "empty Body".into(),
                    });
                }
                _ => field = None,
            },
            Event::Eof => return Err(OcppError::Xml("request has no SOAP Body".into())),
            _ => {}
        }
    }
}

fn element(name: String, xml: &str) -> Result<Reply<'_>, OcppError> {
    if name == "Fault" {
        // An unreadable fault is still a fault
        let fault = quick_xml::de::from_str::<FaultXml>(xml)
            .map(SoapFault::from)
            .unwrap_or_else(|e| SoapFault {
                code: "Unknown".into(),
                subcode: None,
                reason: format!("unreadable fault: {}", e),
            });
        return Ok(Reply::Fault(fault));
    }
    Ok(Reply::Element { name, xml })
}

/// An XML element decoded as a payload struct
#[derive(Debug, Clone, Copy)]
pub struct XmlPayload<'a>(pub &'a str);

impl PayloadDecoder for XmlPayload<'_> {
    fn decode<T: DeserializeOwned>(self, action: &str) -> Result<T, OcppError> {
        quick_xml::de::from_str(self.0).map_err(|e| OcppError::Decode {
            action: action.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::{ChargePointResponse, HeartbeatResponse, ResponseFamily};

    fn wrap(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?>\
             <s:Envelope xmlns:s=\"{}\"><s:Header/><s:Body>{}</s:Body></s:Envelope>",
            SOAP_ENVELOPE_NS, body
        )
    }

    #[test]
    fn test_element_names() {
        assert_eq!(request_element(Action::BootNotification), "bootNotificationRequest");
        assert_eq!(response_element(Action::Heartbeat), "heartbeatResponse");
    }

    #[test]
    fn test_namespaces() {
        assert_eq!(namespace(Version::V16, Role::CentralSystem), "urn://Ocpp/Cs/2015/10/");
        assert_eq!(namespace(Version::V15, Role::ChargePoint), "urn://Ocpp/Cp/2012/06/");
    }

    #[test]
    fn test_build_request() {
        let options = CallOptions {
            from: Some("http://10.0.0.5:9000/".into()),
            charge_box_identity: Some("CP<1>".into()),
        };
        let payload = serde_json::json!({"idTag": "ABC123"});
        let xml = build_request(
            Action::Authorize,
            &payload,
            "urn://Ocpp/Cs/2015/10/",
            "http://localhost:8080/ocpp",
            &options,
        )
        .unwrap();

        assert!(xml.contains("<wsa:Action>/Authorize</wsa:Action>"));
        assert!(xml.contains("<wsa:MessageID>uuid:"));
        assert!(xml.contains("<wsa:To>http://localhost:8080/ocpp</wsa:To>"));
        assert!(xml.contains("<wsa:Address>http://10.0.0.5:9000/</wsa:Address>"));
        assert!(xml.contains("CP&lt;1&gt;"));
        assert!(xml.contains(
            "<authorizeRequest xmlns=\"urn://Ocpp/Cs/2015/10/\"><idTag>ABC123</idTag></authorizeRequest>"
        ));
    }

    #[test]
    fn test_build_request_without_options() {
        let xml = build_request(
            Action::Heartbeat,
            &serde_json::json!({}),
            "urn://Ocpp/Cs/2015/10/",
            "http://cs/",
            &CallOptions::default(),
        )
        .unwrap();
        assert!(!xml.contains("wsa:From"));
        assert!(!xml.contains("chargeBoxIdentity"));
        assert!(xml.contains("<heartbeatRequest xmlns=\"urn://Ocpp/Cs/2015/10/\""));
    }

    #[test]
    fn test_parse_response() {
        let xml = wrap(
            "<heartbeatResponse xmlns=\"urn://Ocpp/Cs/2015/10/\">\
             <currentTime>2026-01-20T12:00:00Z</currentTime></heartbeatResponse>",
        );
        let Reply::Element { name, xml } = parse_reply(&xml).unwrap() else {
            panic!("Expected element");
        };
        assert_eq!(name, "heartbeatResponse");

        let response =
            ChargePointResponse::from_payload(Action::Heartbeat, XmlPayload(xml)).unwrap();
        assert_eq!(
            response,
            ChargePointResponse::Heartbeat(HeartbeatResponse {
                current_time: "2026-01-20T12:00:00Z".parse().unwrap()
            })
        );
    }

    #[test]
    fn test_parse_prefixed_response() {
        let xml = wrap(
            "<cs:heartbeatResponse xmlns:cs=\"urn://Ocpp/Cs/2015/10/\">\
             <cs:currentTime>2026-01-20T12:00:00Z</cs:currentTime></cs:heartbeatResponse>",
        );
        match parse_reply(&xml).unwrap() {
            Reply::Element { name, .. } => assert_eq!(name, "heartbeatResponse"),
            other => panic!("Expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_soap12_fault() {
        let xml = wrap(
            "<s:Fault><s:Code><s:Value>s:Sender</s:Value>\
             <s:Subcode><s:Value>IdentityMismatch</s:Value></s:Subcode></s:Code>\
             <s:Reason><s:Text xml:lang=\"en\">Unknown charge box</s:Text></s:Reason></s:Fault>",
        );
        match parse_reply(&xml).unwrap() {
            Reply::Fault(fault) => {
                assert_eq!(fault.code, "s:Sender");
                assert_eq!(fault.subcode.as_deref(), Some("IdentityMismatch"));
                assert_eq!(fault.reason, "Unknown charge box");
                assert_eq!(
                    fault.to_string(),
                    "s:Sender (IdentityMismatch): Unknown charge box"
                );
            }
            other => panic!("Expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_soap11_fault() {
        let xml = wrap(
            "<s:Fault><faultcode>Server</faultcode><faultstring>boom</faultstring></s:Fault>",
        );
        match parse_reply(&xml).unwrap() {
            Reply::Fault(fault) => {
                assert_eq!(fault.code, "Server");
                assert_eq!(fault.reason, "boom");
            }
            other => panic!("Expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_request_action() {
        assert_eq!(request_action("resetRequest").as_deref(), Some("Reset"));
        assert_eq!(
            request_action("remoteStartTransactionRequest").as_deref(),
            Some("RemoteStartTransaction")
        );
        assert_eq!(request_action("resetResponse"), None);
        assert_eq!(request_action("Request"), None);
    }

    #[test]
    fn test_parse_request_headers() {
        let xml = build_request(
            Action::Reset,
            &serde_json::json!({"type": "Hard"}),
            "urn://Ocpp/Cp/2015/10/",
            "http://10.0.0.5:9000/",
            &CallOptions {
                from: None,
                charge_box_identity: Some("CP&1".into()),
            },
        )
        .unwrap();

        let inbound = parse_request(&xml).unwrap();
        assert_eq!(inbound.charge_box_identity.as_deref(), Some("CP&1"));
        assert!(inbound.message_id.unwrap().starts_with("uuid:"));
        assert_eq!(inbound.element, "resetRequest");
        assert!(inbound.xml.starts_with("<resetRequest"));
        assert!(inbound.xml.ends_with("</resetRequest>"));
    }

    #[test]
    fn test_parse_empty_request_element() {
        let xml = wrap("<heartbeatRequest xmlns=\"urn://Ocpp/Cs/2015/10/\"/>");
        let inbound = parse_request(&xml).unwrap();
        assert_eq!(inbound.element, "heartbeatRequest");
        assert_eq!(inbound.charge_box_identity, None);
        assert_eq!(inbound.message_id, None);
    }

    #[test]
    fn test_response_and_fault_round_trip() {
        let xml = build_response(
            Action::Reset,
            &serde_json::json!({"status": "Accepted"}),
            "urn://Ocpp/Cp/2015/10/",
            Some("uuid:42"),
        )
        .unwrap();
        assert!(xml.contains("<wsa:Action>/ResetResponse</wsa:Action>"));
        assert!(xml.contains("<wsa:RelatesTo>uuid:42</wsa:RelatesTo>"));
        match parse_reply(&xml).unwrap() {
            Reply::Element { name, .. } => assert_eq!(name, "resetResponse"),
            other => panic!("Expected element, got {:?}", other),
        }

        let fault = SoapFault {
            code: "soap:Sender".into(),
            subcode: Some("ProtocolError".into()),
            reason: "Heartbeat <not> here".into(),
        };
        match parse_reply(&build_fault(&fault)).unwrap() {
            Reply::Fault(parsed) => assert_eq!(parsed, fault),
            other => panic!("Expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_without_body() {
        let xml = format!("<s:Envelope xmlns:s=\"{}\"></s:Envelope>", SOAP_ENVELOPE_NS);
        assert!(matches!(parse_reply(&xml), Err(OcppError::Xml(_))));

        let empty = wrap("");
        assert!(matches!(
            parse_reply(&empty),
            Err(OcppError::SchemaMismatch { .. })
        ));
    }
}
