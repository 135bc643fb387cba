//! Application state shared across handlers

use sqlx::PgPool;

use crate::{
    auth::AuthService,
    chat::ChatService,
    jwt::JwtService,
    oauth::OAuthRegistry,
    repositories::{ConversationRepository, SubscriptionRepository, UserRepository},
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub jwt_service: JwtService,
    pub auth_service: AuthService,
    pub chat_service: ChatService,
    pub user_repository: UserRepository,
    pub subscription_repository: SubscriptionRepository,
    pub conversation_repository: ConversationRepository,
    pub oauth: OAuthRegistry,
    /// Public base URL, used for post-OAuth redirects
    pub app_url: String,
}
