//! Middleware for JWT token validation and authentication

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::{error::ApiError, state::AppState};

/// Extract and validate the JWT token from the Authorization header
///
/// Token validation itself is a pure signature-and-expiry check; stateless
/// tokens can outlive account deactivation, so the subject is additionally
/// required to still exist and be active. The authenticated user is placed
/// into the request extensions for handlers.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .ok_or(ApiError::TokenInvalid)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::TokenInvalid)?;

    let claims = state.jwt_service.validate_token(token, Utc::now())?;

    let user = state
        .user_repository
        .find_by_id(claims.sub)
        .await?
        .filter(|user| user.active)
        .ok_or(ApiError::TokenInvalid)?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
