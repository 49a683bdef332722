#![allow(clippy::unwrap_used, clippy::expect_used)]

use relay_core::*;

// ---------------------------------------------------------------------------
// 1. Message wire format
// ---------------------------------------------------------------------------

#[test]
fn message_serializes_camel_case() {
    let msg = Message::optimistic_user("gm");
    let json = serde_json::to_value(&msg).unwrap();

    assert_eq!(json["role"], "user");
    assert_eq!(json["content"], "gm");
    assert_eq!(json["sync"], "pending");
    assert_eq!(json["isError"], false);
    assert!(json.get("createdAt").is_some());
    assert!(json.get("tools").is_none());
}

#[test]
fn message_roundtrip_keeps_tools() {
    let mut msg = Message::assistant("checking your balance");
    let mut call = ToolCall::new("t1", "get_balance", r#"{"coin":"APT"}"#);
    call.result = Some("42".to_string());
    msg.tools.push(call);

    let json = serde_json::to_string(&msg).unwrap();
    let back: Message = serde_json::from_str(&json).unwrap();

    assert_eq!(back, msg);
    assert_eq!(back.tools[0].result.as_deref(), Some("42"));
}

// ---------------------------------------------------------------------------
// 2. Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn json_errors_convert() {
    let parse: Result<Message, _> = serde_json::from_str("not json");
    let err: RelayError = parse.unwrap_err().into();
    assert!(matches!(err, RelayError::Json(_)));
    assert!(!err.is_network());
}

#[test]
fn error_messages_are_prefixed() {
    let cases = [
        (RelayError::DuplicateMessage("m1".into()), "Duplicate message: m1"),
        (RelayError::ProtocolAnomaly("late delta".into()), "Protocol anomaly: late delta"),
        (RelayError::Stream("rate limited".into()), "Stream error: rate limited"),
        (RelayError::Network("refused".into()), "Network failure: refused"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}
