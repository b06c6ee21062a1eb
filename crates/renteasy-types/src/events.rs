use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Message, MessageKind};

/// Frame sent FROM client TO server over the chat socket.
///
/// `type` is accepted for forward compatibility but the streaming path always
/// stores text messages.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub content: String,
}

/// A persisted message pushed to every live session of its conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for OutboundFrame {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content: message.content.clone(),
            created_at: message.created_at,
        }
    }
}

/// Sent only to the connection whose message could not be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub const MESSAGE_NOT_PERSISTED: &'static str = "message_not_persisted";

    pub fn message_not_persisted() -> Self {
        Self {
            error: Self::MESSAGE_NOT_PERSISTED.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_type_is_optional() {
        let frame: InboundFrame = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(frame.content, "hi");
        assert!(frame.kind.is_none());

        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"image","content":"x"}"#).unwrap();
        assert_eq!(frame.kind.as_deref(), Some("image"));
    }

    #[test]
    fn inbound_requires_content() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"text"}"#).is_err());
        assert!(serde_json::from_str::<InboundFrame>("not json").is_err());
    }

    #[test]
    fn outbound_uses_wire_field_names() {
        let frame = OutboundFrame {
            id: 5,
            conversation_id: 42,
            sender_id: 1,
            kind: MessageKind::Text,
            content: "hi".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["id"], 5);
        assert_eq!(value["conversationId"], 42);
        assert_eq!(value["senderId"], 1);
        assert_eq!(value["type"], "text");
        assert_eq!(value["content"], "hi");
        assert!(value["createdAt"].is_string());
    }
}
