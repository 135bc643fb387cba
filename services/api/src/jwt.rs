//! JWT service for access token issuance and validation
//!
//! Tokens are stateless: a signed claim set with an issued-at and expiry
//! timestamp, sealed with a server-held secret (HS256). Nothing is stored
//! server-side, so an issued token stays usable until its TTL elapses.
//! Expiry is checked against the caller-supplied clock, not the wall clock,
//! which keeps the whole lifecycle deterministic under test.

use anyhow::Result;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for signing and verifying tokens
    pub secret: String,
    /// Access token expiration time in seconds (default: 30 minutes)
    pub access_token_expiry: u64,
}

impl JwtConfig {
    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: Secret key for signing tokens
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 1800)
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable not set"))?;

        let access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .unwrap_or_else(|_| "1800".to_string()) // 30 minutes
            .parse()
            .unwrap_or(1800);

        Ok(JwtConfig {
            secret,
            access_token_expiry,
        })
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    /// Issued at time
    pub iat: u64,
    /// Expiration time
    pub exp: u64,
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_expiry: u64,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: &JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        // Expiry is compared against the injected clock in `validate_token`,
        // not against the library's view of the wall clock.
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;

        JwtService {
            encoding_key,
            decoding_key,
            validation,
            access_token_expiry: config.access_token_expiry,
        }
    }

    /// Issue an access token for a user, valid from `now` for the configured TTL
    pub fn issue_token(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<String, ApiError> {
        let issued_at = now.timestamp().max(0) as u64;

        let claims = Claims {
            sub: user_id,
            iat: issued_at,
            exp: issued_at + self.access_token_expiry,
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode access token: {}", e);
            ApiError::Internal
        })
    }

    /// Validate a token against `now` and return the claims
    ///
    /// A token has exactly two states: valid (signature verifies and `now`
    /// is before the expiry) and invalid. Signature or format failures map
    /// to `TokenInvalid`, a verified but stale token to `TokenExpired`.
    pub fn validate_token(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, ApiError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| ApiError::TokenInvalid)?;

        let claims = token_data.claims;
        if now.timestamp().max(0) as u64 >= claims.exp {
            return Err(ApiError::TokenExpired);
        }

        Ok(claims)
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.access_token_expiry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn service(secret: &str) -> JwtService {
        JwtService::new(&JwtConfig {
            secret: secret.to_string(),
            access_token_expiry: 1800,
        })
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let jwt = service("test-secret");
        let user_id = Uuid::new_v4();
        let now = at(1_700_000_000);

        let token = jwt.issue_token(user_id, now).unwrap();
        let claims = jwt.validate_token(&token, now).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.iat, 1_700_000_000);
        assert_eq!(claims.exp, 1_700_000_000 + 1800);
    }

    #[test]
    fn test_token_expires_after_ttl() {
        let jwt = service("test-secret");
        let user_id = Uuid::new_v4();
        let issued = at(1_700_000_000);

        let token = jwt.issue_token(user_id, issued).unwrap();

        // One second before expiry the token is still valid
        assert!(jwt.validate_token(&token, at(1_700_001_799)).is_ok());

        // At and after the expiry instant it is expired, not invalid
        for now in [at(1_700_001_800), at(1_700_005_000)] {
            match jwt.validate_token(&token, now) {
                Err(ApiError::TokenExpired) => {}
                other => panic!("expected TokenExpired, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_tampered_payload_is_invalid() {
        let jwt = service("test-secret");
        let now = at(1_700_000_000);
        let token = jwt.issue_token(Uuid::new_v4(), now).unwrap();

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        assert_eq!(parts.len(), 3);

        // Flip one character in the payload segment
        let payload = &parts[1];
        let target = payload.len() / 2;
        let flipped: String = payload
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i == target {
                    if c == 'A' { 'B' } else { 'A' }
                } else {
                    c
                }
            })
            .collect();
        assert_ne!(&flipped, payload);
        parts[1] = flipped;

        let tampered = parts.join(".");
        match jwt.validate_token(&tampered, now) {
            Err(ApiError::TokenInvalid) => {}
            _ => panic!("expected TokenInvalid for tampered payload"),
        }
    }

    #[test]
    fn test_foreign_signature_is_invalid() {
        let ours = service("test-secret");
        let theirs = service("another-secret");
        let now = at(1_700_000_000);

        let forged = theirs.issue_token(Uuid::new_v4(), now).unwrap();
        match ours.validate_token(&forged, now) {
            Err(ApiError::TokenInvalid) => {}
            _ => panic!("expected TokenInvalid for foreign signature"),
        }
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        let jwt = service("test-secret");
        match jwt.validate_token("not.a.token", at(1_700_000_000)) {
            Err(ApiError::TokenInvalid) => {}
            _ => panic!("expected TokenInvalid for garbage input"),
        }
    }
}
