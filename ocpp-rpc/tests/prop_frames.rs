//! Property tests for OCPP-J framing
//!
//! - Round trip: every CALL, CALLRESULT and CALLERROR parses back to itself
//! - Totality: arbitrary input never panics the parser

use ocpp_rpc::ocpp::*;
use proptest::prelude::*;
use serde_json::{Map, Value};

// ============================================================================
// Strategies
// ============================================================================

fn message_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9-]{1,36}"
}

fn action() -> impl Strategy<Value = String> {
    "[A-Z][a-zA-Z]{0,30}"
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,20}".prop_map(Value::from),
    ]
}

fn object() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,12}", scalar(), 0..6)
        .prop_map(|m| m.into_iter().collect())
}

fn error_code() -> impl Strategy<Value = ErrorCode> {
    prop_oneof![
        Just(ErrorCode::NotSupported),
        Just(ErrorCode::InternalError),
        Just(ErrorCode::ProtocolError),
        Just(ErrorCode::SecurityError),
        Just(ErrorCode::FormationViolation),
        Just(ErrorCode::PropertyConstraintViolation),
        Just(ErrorCode::OccurrenceConstraintViolation),
        Just(ErrorCode::TypeConstraintViolation),
        Just(ErrorCode::GenericError),
    ]
}

// ============================================================================
// Round Trip Property Tests
// ============================================================================

proptest! {
    #[test]
    fn call_round_trip(id in message_id(), action in action(), payload in object()) {
        let call = Call {
            message_id: id,
            action,
            charge_point_id: String::new(),
            payload: Value::Object(payload),
        };
        let parsed = OcppMessage::parse(&call.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(parsed.message_type(), MessageType::Call);
        prop_assert_eq!(parsed, OcppMessage::Call(call));
    }

    #[test]
    fn call_result_round_trip(id in message_id(), payload in object()) {
        let result = CallResult::new(id, Value::Object(payload)).unwrap();
        let parsed = OcppMessage::parse(&result.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(parsed, OcppMessage::CallResult(result));
    }

    #[test]
    fn call_error_round_trip(
        id in message_id(),
        code in error_code(),
        description in "[ -~]{0,40}",
        details in object()
    ) {
        let error = CallError {
            message_id: id,
            error_code: code,
            error_description: description,
            error_details: details,
        };
        let parsed = OcppMessage::parse(&error.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(parsed.message_id(), error.message_id.as_str());
        prop_assert_eq!(parsed, OcppMessage::CallError(error));
    }
}

// ============================================================================
// Totality
// ============================================================================

proptest! {
    /// Peer input never panics the parser
    #[test]
    fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = OcppMessage::parse(&bytes);
    }

    /// Every frame kind needs an object member, so arrays of scalars are always rejected
    #[test]
    fn parse_rejects_scalar_arrays(kind in 0i64..6, members in prop::collection::vec(scalar(), 0..6)) {
        let mut array = vec![Value::from(kind)];
        array.extend(members);
        let bytes = serde_json::to_vec(&Value::Array(array)).unwrap();
        prop_assert!(OcppMessage::parse(&bytes).is_err());
    }
}
