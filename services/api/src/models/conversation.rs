//! Conversation and message models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Assistant,
    System,
}

impl SenderType {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Assistant => "assistant",
            SenderType::System => "system",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(SenderType::User),
            "assistant" => Some(SenderType::Assistant),
            "system" => Some(SenderType::System),
            _ => None,
        }
    }
}

/// Conversation entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Message entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Request for creating a conversation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

/// Request for renaming a conversation
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
}

/// Message representation returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        MessageResponse {
            id: message.id,
            sender_type: message.sender_type,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// Conversation representation returned to callers, messages included
#[derive(Debug, Clone, Serialize)]
pub struct ConversationResponse {
    pub id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<MessageResponse>,
}

impl ConversationResponse {
    pub fn new(conversation: Conversation, messages: Vec<Message>) -> Self {
        ConversationResponse {
            id: conversation.id,
            title: conversation.title,
            created_at: conversation.created_at,
            messages: messages.into_iter().map(MessageResponse::from).collect(),
        }
    }
}

/// Request for a chat round trip
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<i64>,
}

/// Response for a chat round trip
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: i64,
    pub message_id: i64,
}
