//! Conversation data models.
//!
//! Message records serialize with camelCase field names; the same shape is
//! used for API responses and for the line-delimited archive format, so a
//! record written by the archive job parses back into the identical struct.

use serde::{Deserialize, Serialize};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation between a user and the assistant.
///
/// `id` is the external thread identifier assigned by the assistant provider.
/// `archived` means the message rows have been relocated to the object store;
/// the two never hold the authoritative copy at the same time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: Option<String>,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A single message within a conversation.
///
/// `sequence_number` increases strictly per conversation and is assigned when
/// the message is first recorded. Archival and rehydration preserve both `id`
/// and `sequence_number` verbatim; rehydration relies on the preserved `id`
/// for its duplicate-skip insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: i64,
    pub conversation_id: String,
    pub message_text: String,
    pub role: Role,
    pub sequence_number: i64,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_camel_case() {
        let message = ConversationMessage {
            id: 7,
            conversation_id: "thread_abc".to_string(),
            message_text: "hello".to_string(),
            role: Role::User,
            sequence_number: 1,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["conversationId"], "thread_abc");
        assert_eq!(json["messageText"], "hello");
        assert_eq!(json["role"], "user");
        assert_eq!(json["sequenceNumber"], 1);
    }

    #[test]
    fn message_round_trips_through_json() {
        let message = ConversationMessage {
            id: 42,
            conversation_id: "thread_xyz".to_string(),
            message_text: "a reply".to_string(),
            role: Role::Assistant,
            sequence_number: 6,
            created_at: "2024-06-01T12:30:00+00:00".to_string(),
        };

        let line = serde_json::to_string(&message).unwrap();
        let parsed: ConversationMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, message);
    }
}
