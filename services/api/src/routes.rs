//! API service routes

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect},
    routing::{delete, get, post, put},
};
use chrono::Utc;
use oauth2::{PkceCodeVerifier, TokenResponse as _};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{
    error::ApiError,
    middleware::auth_middleware,
    models::{
        ChatRequest, ConversationResponse, CreateConversationRequest, LoginRequest, Message,
        RegisterRequest, TokenResponse, UpdateConversationRequest, User, UserResponse,
        UserSubscriptionResponse,
    },
    oauth::OAuthProvider,
    state::AppState,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/me", get(me))
        .route("/chat", post(chat))
        .route("/conversations", post(create_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id", get(get_conversation))
        .route("/conversations/:id", put(update_conversation))
        .route("/conversations/:id", delete(delete_conversation))
        .route("/subscriptions/my-subscription", get(get_my_subscription))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/:provider", get(oauth_login))
        .route("/auth/callback/:provider", get(oauth_callback))
        .route("/subscriptions/plans", get(get_subscription_plans))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);

    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "service": "converse-api"
    }))
}

/// Register a new user
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.register(&payload).await?;
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Authenticate a user and return an access token
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = state
        .auth_service
        .authenticate(&payload.email, &payload.password, Utc::now())
        .await?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

/// Get current user information
pub async fn me(Extension(user): Extension<User>) -> impl IntoResponse {
    Json(UserResponse::from(user))
}

/// Initiate OAuth login with a provider
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = OAuthProvider::parse(&provider)
        .ok_or_else(|| ApiError::InvalidInput("Unsupported OAuth provider".to_string()))?;
    let client = state
        .oauth
        .get(provider)
        .ok_or_else(|| ApiError::InvalidInput("Unsupported OAuth provider".to_string()))?;

    let (auth_url, csrf_token, pkce_verifier) = client.generate_auth_url();
    state
        .oauth
        .sessions
        .insert(
            csrf_token.secret().clone(),
            pkce_verifier.secret().clone(),
            provider,
        )
        .await;

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct OAuthCallbackQuery {
    code: String,
    state: String,
}

/// Handle the OAuth callback
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = OAuthProvider::parse(&provider)
        .ok_or_else(|| ApiError::InvalidInput("Unsupported OAuth provider".to_string()))?;
    let client = state
        .oauth
        .get(provider)
        .ok_or_else(|| ApiError::InvalidInput("Unsupported OAuth provider".to_string()))?;

    let session = state
        .oauth
        .sessions
        .take(&query.state)
        .await
        .filter(|session| session.provider == provider)
        .ok_or_else(|| ApiError::InvalidInput("OAuth authentication failed".to_string()))?;

    let token = client
        .exchange_code(query.code, PkceCodeVerifier::new(session.pkce_verifier))
        .await
        .map_err(|e| {
            error!("OAuth code exchange failed: {}", e);
            ApiError::InvalidInput("OAuth authentication failed".to_string())
        })?;

    let access_token = token.access_token().secret().clone();
    let refresh_token = token.refresh_token().map(|t| t.secret().clone());

    let profile = client.get_user_profile(&access_token).await.map_err(|e| {
        error!("OAuth profile fetch failed: {}", e);
        ApiError::InvalidInput("OAuth authentication failed".to_string())
    })?;

    let user = state
        .auth_service
        .oauth_login(&profile, Some(&access_token), refresh_token.as_deref())
        .await?;

    let access_token = state.jwt_service.issue_token(user.id, Utc::now())?;

    Ok(Redirect::temporary(&format!(
        "{}/?token={}&token_type=bearer",
        state.app_url, access_token
    )))
}

/// Send a message to the LLM and get a response
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .chat_service
        .send(user.id, &payload, Utc::now())
        .await?;

    Ok(Json(response))
}

/// Create a new conversation
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_repository
        .create(user.id, payload.title.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::new(conversation, Vec::new())),
    ))
}

/// Get all conversations for the current user, messages included
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.conversation_repository.list_for_user(user.id).await?;

    let ids: Vec<i64> = conversations.iter().map(|c| c.id).collect();
    let mut by_conversation: HashMap<i64, Vec<Message>> = HashMap::new();
    for message in state.conversation_repository.messages_for_all(&ids).await? {
        by_conversation
            .entry(message.conversation_id)
            .or_default()
            .push(message);
    }

    let response: Vec<ConversationResponse> = conversations
        .into_iter()
        .map(|conversation| {
            let messages = by_conversation.remove(&conversation.id).unwrap_or_default();
            ConversationResponse::new(conversation, messages)
        })
        .collect();

    Ok(Json(response))
}

/// Get a specific conversation with all messages
pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_repository
        .find_for_user(id, user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

    let messages = state.conversation_repository.messages(id).await?;

    Ok(Json(ConversationResponse::new(conversation, messages)))
}

/// Update a conversation's title
pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state
        .conversation_repository
        .update_title(id, user.id, payload.title.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

    let messages = state.conversation_repository.messages(id).await?;

    Ok(Json(ConversationResponse::new(conversation, messages)))
}

/// Delete a conversation
pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.conversation_repository.delete(id, user.id).await?;

    if deleted {
        Ok(Json(json!({"message": "Conversation deleted successfully"})))
    } else {
        Err(ApiError::NotFound("Conversation not found".to_string()))
    }
}

/// Get all available subscription plans
pub async fn get_subscription_plans(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let plans = state.subscription_repository.list_plans().await?;
    Ok(Json(plans))
}

/// Get the current user's active subscription
pub async fn get_my_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let (subscription, plan) = state
        .subscription_repository
        .active_subscription(user.id, Utc::now())
        .await?
        .ok_or(ApiError::NoActivePlan)?;

    Ok(Json(UserSubscriptionResponse {
        id: subscription.id,
        plan,
        start_date: subscription.start_date,
        end_date: subscription.end_date,
        active: subscription.active,
    }))
}
