use courier_common::{protocol::ws::EchoMode, types::Message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EchoError {
    #[error("inbound payload is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("failed to encode stored message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Build the acknowledgement written back once `stored` is durable.
pub fn encode_echo(mode: EchoMode, raw: &[u8], stored: &Message) -> Result<String, EchoError> {
    match mode {
        EchoMode::Raw => Ok(String::from_utf8(raw.to_vec())?),
        EchoMode::Record => Ok(serde_json::to_string(stored)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> Message {
        Message {
            id: 9,
            sender_id: 42,
            recipient_id: 7,
            content: "hi".to_string(),
            timestamp: 1_760_000_000,
        }
    }

    #[test]
    fn raw_echo_is_byte_identical() {
        let raw = br#"{ "recipientId": 7, "content": "hi", "senderId": 1 }"#;
        let echo = encode_echo(EchoMode::Raw, raw, &stored()).expect("raw echo");
        assert_eq!(echo.as_bytes(), raw);
    }

    #[test]
    fn record_echo_exposes_server_fields() {
        let raw = br#"{"content":"hi","recipientId":7,"senderId":1}"#;
        let echo = encode_echo(EchoMode::Record, raw, &stored()).expect("record echo");
        let value: serde_json::Value = serde_json::from_str(&echo).expect("echo is json");

        assert_eq!(value["id"], 9);
        assert_eq!(value["senderId"], 42);
        assert_eq!(value["timestamp"], 1_760_000_000);
    }
}
