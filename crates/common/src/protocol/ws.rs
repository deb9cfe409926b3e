// WebSocket payload types for the courier relay.

use serde::{Deserialize, Deserializer, Serialize};

/// Path the relay serves the WebSocket upgrade on.
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the bearer token on the upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Counter name used to allocate message ids.
pub const MESSAGE_SEQUENCE: &str = "message_sequence";

/// Client -> Server: a chat message submission.
///
/// Missing or null `content` / `recipientId` decode as empty / zero so the
/// relay can report them as missing fields rather than malformed frames. `senderId` and
/// `token` are tolerated for older clients but never trusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recipient_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// What the relay writes back after a message has been stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoMode {
    /// The inbound frame, byte for byte.
    #[default]
    Raw,
    /// The stored record, including server-assigned fields.
    Record,
}

impl EchoMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(Self::Raw),
            "record" => Some(Self::Record),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Record => "record",
        }
    }
}
