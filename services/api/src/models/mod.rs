//! API service models

pub mod conversation;
pub mod subscription;
pub mod user;

// Re-export for convenience
pub use conversation::{
    ChatRequest, ChatResponse, Conversation, ConversationResponse, CreateConversationRequest,
    Message, MessageResponse, SenderType, UpdateConversationRequest,
};
pub use subscription::{SubscriptionPlan, UserSubscription, UserSubscriptionResponse};
pub use user::{LoginRequest, NewUser, RegisterRequest, TokenResponse, User, UserResponse};
