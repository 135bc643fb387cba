//! OpenAI-compatible chat completion client
//!
//! Works with the OpenAI API and any endpoint that speaks the same
//! `/chat/completions` contract (vLLM, Ollama, gateways).

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

use crate::models::{Message, SenderType};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

/// LLM provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key for the provider
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Model identifier
    pub model: String,
}

impl LlmConfig {
    /// Create a new LlmConfig from environment variables
    ///
    /// # Environment Variables
    /// - `OPENAI_API_KEY`: API key for the provider
    /// - `OPENAI_BASE_URL`: Base URL (default: "https://api.openai.com/v1")
    /// - `OPENAI_MODEL`: Model identifier (default: "gpt-4o-mini")
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(LlmConfig {
            api_key,
            base_url,
            model,
        })
    }
}

/// One turn in provider wire format
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// LLM service
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    /// Create a new LLM service
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client with custom timeout: {}", e);
                Client::new()
            });

        Self { client, config }
    }

    /// Generate a completion for the given conversation
    pub async fn generate_response(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatCompletionResponse>()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("LLM response contained no choices"))
    }
}

/// Convert stored messages to provider wire format
pub fn format_history(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| ChatMessage {
            role: match message.sender_type {
                SenderType::User => "user",
                SenderType::Assistant => "assistant",
                SenderType::System => "system",
            },
            content: message.content.clone(),
        })
        .collect()
}

/// Put `system_prompt` at the head of the transcript, replacing a stored
/// leading system message rather than stacking a second one
pub fn with_system_prompt(mut messages: Vec<ChatMessage>, system_prompt: &str) -> Vec<ChatMessage> {
    let system_message = ChatMessage {
        role: "system",
        content: system_prompt.to_string(),
    };

    match messages.first() {
        Some(first) if first.role == "system" => messages[0] = system_message,
        _ => messages.insert(0, system_message),
    }

    messages
}

/// Title for a new conversation, taken from its first user message
pub fn conversation_title(first_message: &str) -> String {
    let title = first_message
        .split_whitespace()
        .take(5)
        .collect::<Vec<_>>()
        .join(" ");

    if title.is_empty() {
        return "New Conversation".to_string();
    }

    if title.chars().count() > 50 {
        let truncated: String = title.chars().take(47).collect();
        format!("{}...", truncated)
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(sender_type: SenderType, content: &str) -> Message {
        Message {
            id: 0,
            conversation_id: 0,
            sender_type,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_history_maps_roles() {
        let history = format_history(&[
            message(SenderType::System, "s"),
            message(SenderType::User, "u"),
            message(SenderType::Assistant, "a"),
        ]);

        let roles: Vec<&str> = history.iter().map(|m| m.role).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
    }

    #[test]
    fn test_system_prompt_is_prepended() {
        let history = format_history(&[message(SenderType::User, "hi")]);
        let with_prompt = with_system_prompt(history, "be helpful");

        assert_eq!(with_prompt[0].role, "system");
        assert_eq!(with_prompt[0].content, "be helpful");
        assert_eq!(with_prompt.len(), 2);
    }

    #[test]
    fn test_existing_system_message_is_replaced() {
        let history = format_history(&[
            message(SenderType::System, "stored prompt"),
            message(SenderType::User, "hi"),
        ]);
        let with_prompt = with_system_prompt(history, "be helpful");

        assert_eq!(with_prompt.len(), 2);
        assert_eq!(with_prompt[0].content, "be helpful");
    }

    #[test]
    fn test_title_takes_first_five_words() {
        assert_eq!(
            conversation_title("what is the tallest mountain on earth"),
            "what is the tallest mountain"
        );
    }

    #[test]
    fn test_title_of_short_message() {
        assert_eq!(conversation_title("hello"), "hello");
    }

    #[test]
    fn test_title_of_empty_message() {
        assert_eq!(conversation_title(""), "New Conversation");
        assert_eq!(conversation_title("   "), "New Conversation");
    }

    #[test]
    fn test_title_is_truncated() {
        let long = "incomprehensibilities incomprehensibilities incomprehensibilities";
        let title = conversation_title(long);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
    }
}
