// Inbound message validation.
//
// - `validate`: decodes a WebSocket payload into an unsequenced `Message`.
// - WebSocket frame size limit constant.

use courier_common::{protocol::ws::InboundMessage, types::Message};
use thiserror::Error;

/// Maximum WebSocket frame payload in bytes (256 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 256 * 1024;

/// Hard cap handed to the WebSocket transport. Frames between this and
/// `MAX_WS_FRAME_BYTES` reach the session, which closes with 1009; anything
/// larger is cut off by the transport itself.
pub const MAX_WS_TRANSPORT_BYTES: usize = 2 * MAX_WS_FRAME_BYTES;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed message payload: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Decode and check a raw inbound payload.
///
/// The result carries only `recipient_id` and `content`; sender, id and
/// timestamp are stamped by the session. A client-supplied `senderId` is
/// dropped here.
pub fn validate(raw: &[u8]) -> Result<Message, ValidationError> {
    let inbound: InboundMessage = serde_json::from_slice(raw).map_err(ValidationError::Malformed)?;

    if inbound.recipient_id == 0 {
        return Err(ValidationError::MissingField("recipientId"));
    }
    if inbound.content.is_empty() {
        return Err(ValidationError::MissingField("content"));
    }

    Ok(Message::unsequenced(inbound.recipient_id, inbound.content))
}

/// Check if a WebSocket frame exceeds the size limit.
pub fn check_ws_frame_size(payload: &[u8]) -> Result<(), String> {
    if payload.len() > MAX_WS_FRAME_BYTES {
        Err(format!(
            "frame size {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_WS_FRAME_BYTES
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_minimal_payload() {
        let message = validate(br#"{"content":"hi","recipientId":7}"#).expect("valid payload");
        assert_eq!(message, Message::unsequenced(7, "hi"));
    }

    #[test]
    fn ignores_client_supplied_sender() {
        let message = validate(br#"{"content":"hi","recipientId":7,"senderId":999,"token":"x"}"#)
            .expect("valid payload");
        assert_eq!(message.sender_id, 0);
        assert_eq!(message.recipient_id, 7);
    }

    #[test]
    fn negative_recipient_is_accepted() {
        let message = validate(br#"{"content":"hi","recipientId":-3}"#).expect("non-zero id");
        assert_eq!(message.recipient_id, -3);
    }

    #[test]
    fn rejects_empty_content() {
        let error = validate(br#"{"content":"","recipientId":7}"#).expect_err("empty content");
        assert!(matches!(error, ValidationError::MissingField("content")));
    }

    #[test]
    fn rejects_zero_or_absent_recipient() {
        let zero = validate(br#"{"content":"hi","recipientId":0}"#).expect_err("zero recipient");
        assert!(matches!(zero, ValidationError::MissingField("recipientId")));

        let absent = validate(br#"{"content":"hi"}"#).expect_err("absent recipient");
        assert!(matches!(absent, ValidationError::MissingField("recipientId")));
    }

    #[test]
    fn null_fields_are_reported_as_missing() {
        let recipient =
            validate(br#"{"content":"hi","recipientId":null}"#).expect_err("null recipient");
        assert!(matches!(recipient, ValidationError::MissingField("recipientId")));

        let content = validate(br#"{"content":null,"recipientId":7}"#).expect_err("null content");
        assert!(matches!(content, ValidationError::MissingField("content")));
    }

    #[test]
    fn rejects_malformed_payloads() {
        for raw in [
            &b"not json"[..],
            &b"[1,2,3]"[..],
            &b"\"hi\""[..],
            &br#"{"content":5,"recipientId":7}"#[..],
            &br#"{"content":"hi","recipientId":"7"}"#[..],
            &br#"{"content":"hi","recipientId":7"#[..],
            &[0xff, 0xfe][..],
        ] {
            let error = validate(raw).expect_err("payload should be malformed");
            assert!(matches!(error, ValidationError::Malformed(_)), "{raw:?} -> {error}");
        }
    }

    #[test]
    fn frame_size_limit_is_inclusive() {
        assert!(check_ws_frame_size(&vec![b'a'; MAX_WS_FRAME_BYTES]).is_ok());
        let error = check_ws_frame_size(&vec![b'a'; MAX_WS_FRAME_BYTES + 1])
            .expect_err("oversized frame");
        assert!(error.contains("exceeds limit"));
    }
}
