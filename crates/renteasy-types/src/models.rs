use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated caller, attached to a request or a WebSocket session
/// once its access token has been verified. Every consumer reads this one
/// type instead of re-deriving the id from claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthUser {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// A 1:1 thread between a seeker and an owner, optionally bound to a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<i64>,
    pub initiator_id: i64,
    pub recipient_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.initiator_id == user_id || self.recipient_id == user_id
    }

    /// The other side of the conversation from `user_id`'s point of view.
    pub fn counterpart(&self, user_id: i64) -> i64 {
        if self.initiator_id == user_id {
            self.recipient_id
        } else {
            self.initiator_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessageKind(pub String);

impl fmt::Display for UnknownMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownMessageKind {}

impl FromStr for MessageKind {
    type Err = UnknownMessageKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            other => Err(UnknownMessageKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Present in the schema; nothing marks messages read yet.
    pub read_at: Option<DateTime<Utc>>,
}
