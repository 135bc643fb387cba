//! Credential verification and account lifecycle
//!
//! Registration and login for password accounts, plus the find-or-create
//! step behind OAuth logins. Password hashes use argon2 with a per-user
//! salt; verification goes through the argon2 verifier, which compares in
//! constant time. A failed login never reveals whether the email exists,
//! the account is inactive, or the password was wrong.

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{ApiError, is_unique_violation};
use crate::jwt::JwtService;
use crate::models::{NewUser, RegisterRequest, User};
use crate::oauth::OAuthUserProfile;
use crate::repositories::UserRepository;
use crate::validation::{validate_email, validate_password, validate_username};

/// Derive a salted argon2 hash for storage
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {}", e);
            ApiError::Internal
        })
}

/// Verify a plaintext password against a stored hash
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(password_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    jwt: JwtService,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(users: UserRepository, jwt: JwtService) -> Self {
        Self { users, jwt }
    }

    /// Register a new password account
    ///
    /// Emails are stored lowercased, so uniqueness is case-insensitive. The
    /// user row and its default subscription are created atomically; the
    /// unique-violation mapping covers the race where two registrations for
    /// the same identity pass the pre-checks together.
    pub async fn register(&self, request: &RegisterRequest) -> Result<User, ApiError> {
        validate_email(&request.email).map_err(ApiError::InvalidInput)?;
        validate_username(&request.username).map_err(ApiError::InvalidInput)?;
        validate_password(&request.password).map_err(ApiError::InvalidInput)?;

        let email = request.email.to_lowercase();

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(ApiError::DuplicateIdentity);
        }
        if self.users.find_by_username(&request.username).await?.is_some() {
            return Err(ApiError::DuplicateIdentity);
        }

        let new_user = NewUser {
            email,
            username: request.username.clone(),
            password_hash: Some(hash_password(&request.password)?),
        };

        let user = self
            .users
            .create_with_default_plan(&new_user)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ApiError::DuplicateIdentity
                } else {
                    ApiError::Database(e)
                }
            })?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Authenticate by email and password, issuing an access token
    ///
    /// Unknown email, inactive account, OAuth-only account, and wrong
    /// password all collapse into the same `InvalidCredentials` outcome.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let user = self
            .users
            .find_by_email(&email.to_lowercase())
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if !user.active {
            return Err(ApiError::InvalidCredentials);
        }

        let Some(password_hash) = user.password_hash.as_deref() else {
            return Err(ApiError::InvalidCredentials);
        };

        if !verify_password(password, password_hash) {
            return Err(ApiError::InvalidCredentials);
        }

        self.jwt.issue_token(user.id, now)
    }

    /// Resolve an OAuth login to a local user, creating one if needed
    ///
    /// Resolution order: an existing link for this provider identity, then
    /// an existing account with the same email (which gets linked), then a
    /// fresh account with no password and the default subscription.
    pub async fn oauth_login(
        &self,
        profile: &OAuthUserProfile,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<User, ApiError> {
        let provider = profile.provider.as_str();

        if let Some(user) = self
            .users
            .find_by_oauth_account(provider, &profile.id)
            .await?
        {
            if !user.active {
                return Err(ApiError::InvalidCredentials);
            }
            self.users
                .link_oauth_account(user.id, provider, &profile.id, access_token, refresh_token)
                .await?;
            return Ok(user);
        }

        let email = profile.email.to_lowercase();
        if let Some(user) = self.users.find_by_email(&email).await? {
            if !user.active {
                return Err(ApiError::InvalidCredentials);
            }
            self.users
                .link_oauth_account(user.id, provider, &profile.id, access_token, refresh_token)
                .await?;
            return Ok(user);
        }

        let user = self.create_oauth_user(&email, profile).await?;
        self.users
            .link_oauth_account(user.id, provider, &profile.id, access_token, refresh_token)
            .await?;

        info!("Created user {} from {} login", user.id, provider);
        Ok(user)
    }

    async fn create_oauth_user(
        &self,
        email: &str,
        profile: &OAuthUserProfile,
    ) -> Result<User, ApiError> {
        let base = oauth_username_base(profile.name.as_deref(), email);

        let new_user = NewUser {
            email: email.to_string(),
            username: base.clone(),
            password_hash: None,
        };

        match self.users.create_with_default_plan(&new_user).await {
            Ok(user) => Ok(user),
            // The preferred username may be taken; retry once with a suffix
            Err(e) if is_unique_violation(&e) => {
                let suffix = Uuid::new_v4().simple().to_string();
                let retry = NewUser {
                    username: format!("{}_{}", base, &suffix[..8]),
                    ..new_user
                };
                self.users
                    .create_with_default_plan(&retry)
                    .await
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            ApiError::DuplicateIdentity
                        } else {
                            ApiError::Database(e)
                        }
                    })
            }
            Err(e) => Err(ApiError::Database(e)),
        }
    }
}

/// A username candidate from an OAuth display name or email local part,
/// reduced to the characters the username policy allows
fn oauth_username_base(name: Option<&str>, email: &str) -> String {
    let source = name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email));

    let mut base: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    base.truncate(24);

    if base.len() < 3 {
        base = format!("user_{}", &Uuid::new_v4().simple().to_string()[..8]);
    }

    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same password").unwrap();
        let b = hash_password("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_oauth_username_from_name() {
        assert_eq!(
            oauth_username_base(Some("Ada Lovelace"), "ada@example.com"),
            "Ada_Lovelace"
        );
    }

    #[test]
    fn test_oauth_username_falls_back_to_email() {
        assert_eq!(
            oauth_username_base(None, "ada.l@example.com"),
            "ada_l"
        );
        assert_eq!(
            oauth_username_base(Some("   "), "ada.l@example.com"),
            "ada_l"
        );
    }

    #[test]
    fn test_oauth_username_is_bounded() {
        let name = "x".repeat(60);
        assert_eq!(oauth_username_base(Some(&name), "a@b.co").len(), 24);
    }

    #[test]
    fn test_oauth_username_too_short_gets_generated() {
        let generated = oauth_username_base(Some("a"), "a@b.co");
        assert!(generated.starts_with("user_"));
        assert!(generated.len() >= 3);
    }
}
