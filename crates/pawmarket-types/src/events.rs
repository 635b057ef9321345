use serde::{Deserialize, Serialize};

use crate::models::MessagePayload;

/// Frames sent FROM server TO client over a live conversation socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// A message was persisted in the conversation
    Message { message: MessagePayload },

    /// Best-effort notice sent before the server closes the socket
    Error { code: String, message: String },
}

impl OutboundFrame {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A message-send request from the client. Extra fields such as `type` are
/// ignored so older clients keep working.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub text: String,
}

/// First frame of a socket opened without a credential in its address.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifyFrame {
    pub token: String,
}
