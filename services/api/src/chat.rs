//! Chat round trips against the LLM
//!
//! Admission runs first and is recorded as part of the same decision, so
//! every inbound attempt counts exactly once, whatever happens afterwards.

use chrono::{DateTime, Utc};
use tracing::error;
use uuid::Uuid;

use crate::error::ApiError;
use crate::llm::{self, LlmService};
use crate::models::{ChatRequest, ChatResponse, SenderType};
use crate::rate_limit::RateLimiter;
use crate::repositories::ConversationRepository;

/// Prepended to every transcript sent to the provider; never persisted
const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer questions based on the conversation history and provide accurate information.";

/// Chat service
#[derive(Clone)]
pub struct ChatService {
    conversations: ConversationRepository,
    llm: LlmService,
    rate_limiter: RateLimiter,
}

impl ChatService {
    /// Create a new chat service
    pub fn new(
        conversations: ConversationRepository,
        llm: LlmService,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            conversations,
            llm,
            rate_limiter,
        }
    }

    /// Run one chat round trip for the user as of `now`
    pub async fn send(
        &self,
        user_id: Uuid,
        request: &ChatRequest,
        now: DateTime<Utc>,
    ) -> Result<ChatResponse, ApiError> {
        if request.message.trim().is_empty() {
            return Err(ApiError::InvalidInput("Message is required".to_string()));
        }

        self.rate_limiter.check_and_record(user_id, now).await?;

        let conversation = match request.conversation_id {
            Some(id) => self
                .conversations
                .find_for_user(id, user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?,
            None => {
                let title = llm::conversation_title(&request.message);
                self.conversations.create(user_id, Some(&title)).await?
            }
        };

        self.conversations
            .add_message(conversation.id, SenderType::User, &request.message, now)
            .await?;

        let history = self.conversations.messages(conversation.id).await?;
        let prompt = llm::with_system_prompt(llm::format_history(&history), SYSTEM_PROMPT);

        let reply = self.llm.generate_response(&prompt).await.map_err(|e| {
            error!("LLM request failed: {}", e);
            ApiError::Internal
        })?;

        let assistant_message = self
            .conversations
            .add_message(conversation.id, SenderType::Assistant, &reply, now)
            .await?;

        Ok(ChatResponse {
            response: reply,
            conversation_id: conversation.id,
            message_id: assistant_message.id,
        })
    }
}
