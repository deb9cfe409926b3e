use courier_common::protocol::ws::{EchoMode, InboundMessage, MESSAGE_SEQUENCE, WS_PATH};
use serde_json::Value;

#[test]
fn websocket_contract_endpoint_and_counter_names() {
    assert_eq!(WS_PATH, "/ws");
    assert_eq!(MESSAGE_SEQUENCE, "message_sequence");
}

#[test]
fn inbound_message_accepts_legacy_sender_and_token_fields() {
    let inbound: InboundMessage = serde_json::from_str(
        r#"{"content":"hi","recipientId":7,"senderId":99,"token":"stale","extra":true}"#,
    )
    .expect("inbound payload should decode");

    assert_eq!(inbound.content, "hi");
    assert_eq!(inbound.recipient_id, 7);
    assert_eq!(inbound.sender_id, Some(99));
    assert_eq!(inbound.token.as_deref(), Some("stale"));
}

#[test]
fn inbound_message_defaults_missing_fields() {
    let inbound: InboundMessage =
        serde_json::from_str("{}").expect("empty object should decode with defaults");

    assert_eq!(inbound, InboundMessage::default());
}

#[test]
fn inbound_message_treats_null_as_missing() {
    let inbound: InboundMessage = serde_json::from_str(r#"{"content":null,"recipientId":null}"#)
        .expect("null fields should decode with defaults");

    assert_eq!(inbound, InboundMessage::default());
}

#[test]
fn inbound_message_omits_absent_optional_fields() {
    let inbound = InboundMessage {
        content: "hi".to_string(),
        recipient_id: 7,
        sender_id: None,
        token: None,
    };

    let value = serde_json::to_value(inbound).expect("inbound payload should serialize");
    let mut keys = value
        .as_object()
        .expect("value should be an object")
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, vec!["content".to_string(), "recipientId".to_string()]);
}

#[test]
fn echo_mode_parses_case_insensitively() {
    assert_eq!(EchoMode::parse("raw"), Some(EchoMode::Raw));
    assert_eq!(EchoMode::parse(" Record "), Some(EchoMode::Record));
    assert_eq!(EchoMode::parse("enriched"), None);
    assert_eq!(EchoMode::default(), EchoMode::Raw);

    let value = serde_json::to_value(EchoMode::Record).expect("echo mode should serialize");
    assert_eq!(value, Value::String(EchoMode::Record.as_str().to_string()));
}
