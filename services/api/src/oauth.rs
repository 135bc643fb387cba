//! OAuth2 integration for Google and GitHub providers

use anyhow::Result;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl,
    Scope, TokenUrl, basic::BasicClient,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

/// Authorization attempts not completed within this window are discarded
const SESSION_TTL: Duration = Duration::from_secs(600);

/// OAuth2 provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    /// Get the provider name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }

    /// Parse a provider from a path segment
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(OAuthProvider::Google),
            "github" => Some(OAuthProvider::Github),
            _ => None,
        }
    }
}

/// OAuth2 configuration for a provider
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
}

/// OAuth2 client wrapper
#[derive(Clone)]
pub struct OAuthClient {
    provider: OAuthProvider,
    client: BasicClient,
    http: reqwest::Client,
}

impl OAuthClient {
    fn new(provider: OAuthProvider, config: OAuthConfig) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone())?,
            Some(TokenUrl::new(config.token_url.clone())?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone())?);

        Ok(Self {
            provider,
            client,
            http: reqwest::Client::new(),
        })
    }

    /// Create a new OAuth2 client for Google
    pub fn new_google(config: OAuthConfig) -> Result<Self> {
        Self::new(OAuthProvider::Google, config)
    }

    /// Create a new OAuth2 client for GitHub
    pub fn new_github(config: OAuthConfig) -> Result<Self> {
        Self::new(OAuthProvider::Github, config)
    }

    /// Scopes requested from the provider
    pub fn scopes(&self) -> &'static [&'static str] {
        match self.provider {
            OAuthProvider::Google => &["openid", "email", "profile"],
            OAuthProvider::Github => &["user:email"],
        }
    }

    /// Generate authorization URL with PKCE
    pub fn generate_auth_url(&self) -> (String, CsrfToken, PkceCodeVerifier) {
        info!("Generating authorization URL for {:?}", self.provider);

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);

        for scope in self.scopes() {
            request = request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token) = request.url();

        (auth_url.to_string(), csrf_token, pkce_verifier)
    }

    /// Exchange authorization code for access token
    pub async fn exchange_code(
        &self,
        code: String,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<
        oauth2::StandardTokenResponse<oauth2::EmptyExtraTokenFields, oauth2::basic::BasicTokenType>,
    > {
        info!(
            "Exchanging authorization code for access token for {:?}",
            self.provider
        );

        let token_response = self
            .client
            .exchange_code(oauth2::AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(oauth2::reqwest::async_http_client)
            .await?;

        Ok(token_response)
    }

    /// Get user profile information from the provider
    pub async fn get_user_profile(&self, access_token: &str) -> Result<OAuthUserProfile> {
        info!("Getting user profile for {:?}", self.provider);

        match self.provider {
            OAuthProvider::Google => self.get_google_user_profile(access_token).await,
            OAuthProvider::Github => self.get_github_user_profile(access_token).await,
        }
    }

    /// Get Google user profile
    async fn get_google_user_profile(&self, access_token: &str) -> Result<OAuthUserProfile> {
        let response = self
            .http
            .get("https://www.googleapis.com/oauth2/v2/userinfo")
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to get Google user profile: {}",
                response.status()
            ));
        }

        let google_user: GoogleUser = response.json().await?;
        let name = match (google_user.given_name, google_user.family_name) {
            (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
            (Some(given), None) => Some(given),
            (None, Some(family)) => Some(family),
            (None, None) => None,
        };

        Ok(OAuthUserProfile {
            id: google_user.id,
            email: google_user.email,
            name,
            provider: OAuthProvider::Google,
        })
    }

    /// Get GitHub user profile
    ///
    /// The profile email is often unset for GitHub accounts, in which case
    /// the primary address comes from the emails endpoint.
    async fn get_github_user_profile(&self, access_token: &str) -> Result<OAuthUserProfile> {
        let response = self
            .http
            .get("https://api.github.com/user")
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, "converse-api")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to get GitHub user profile: {}",
                response.status()
            ));
        }

        let github_user: GithubUser = response.json().await?;

        let email = match github_user.email {
            Some(email) => email,
            None => self.get_github_primary_email(access_token).await?,
        };

        Ok(OAuthUserProfile {
            id: github_user.id.to_string(),
            email,
            name: github_user.name.or(Some(github_user.login)),
            provider: OAuthProvider::Github,
        })
    }

    async fn get_github_primary_email(&self, access_token: &str) -> Result<String> {
        let response = self
            .http
            .get("https://api.github.com/user/emails")
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, "converse-api")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to get GitHub user emails: {}",
                response.status()
            ));
        }

        let emails: Vec<GithubEmail> = response.json().await?;
        emails
            .into_iter()
            .find(|e| e.primary)
            .map(|e| e.email)
            .ok_or_else(|| anyhow::anyhow!("GitHub account has no primary email"))
    }

    /// Get the provider
    pub fn provider(&self) -> OAuthProvider {
        self.provider
    }
}

/// Google user profile response
#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    email: String,
    given_name: Option<String>,
    family_name: Option<String>,
}

/// GitHub user profile response
#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
}

/// OAuth user profile information
#[derive(Debug, Clone)]
pub struct OAuthUserProfile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub provider: OAuthProvider,
}

/// In-flight authorization attempt, keyed by its csrf token
#[derive(Debug)]
pub struct OAuthSession {
    pub pkce_verifier: String,
    pub provider: OAuthProvider,
    created_at: Instant,
}

/// Store for in-flight authorization attempts
///
/// The PKCE verifier has to survive between the redirect to the provider
/// and the callback; entries expire after ten minutes.
#[derive(Clone, Default)]
pub struct OAuthSessionStore {
    entries: Arc<Mutex<HashMap<String, OAuthSession>>>,
}

impl OAuthSessionStore {
    /// Create a new session store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an authorization attempt
    pub async fn insert(&self, csrf_token: String, pkce_verifier: String, provider: OAuthProvider) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, session| session.created_at.elapsed() < SESSION_TTL);
        entries.insert(
            csrf_token,
            OAuthSession {
                pkce_verifier,
                provider,
                created_at: Instant::now(),
            },
        );
    }

    /// Take the attempt matching a callback's state parameter, if it is
    /// still fresh
    pub async fn take(&self, csrf_token: &str) -> Option<OAuthSession> {
        let mut entries = self.entries.lock().await;
        let session = entries.remove(csrf_token)?;
        if session.created_at.elapsed() >= SESSION_TTL {
            return None;
        }
        Some(session)
    }
}

/// The configured providers plus the shared session store
#[derive(Clone, Default)]
pub struct OAuthRegistry {
    google: Option<OAuthClient>,
    github: Option<OAuthClient>,
    pub sessions: OAuthSessionStore,
}

impl OAuthRegistry {
    /// Build clients for every provider with credentials in the environment
    ///
    /// # Environment Variables
    /// - `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`
    /// - `GITHUB_CLIENT_ID` / `GITHUB_CLIENT_SECRET`
    /// - `APP_URL`: public base URL used for redirect URIs (default:
    ///   "http://localhost:8000")
    pub fn from_env() -> Result<Self> {
        let app_url =
            std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

        let google = match (
            std::env::var("GOOGLE_CLIENT_ID"),
            std::env::var("GOOGLE_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(OAuthClient::new_google(OAuthConfig {
                client_id,
                client_secret,
                redirect_url: format!("{}/auth/callback/google", app_url),
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
            })?),
            _ => None,
        };

        let github = match (
            std::env::var("GITHUB_CLIENT_ID"),
            std::env::var("GITHUB_CLIENT_SECRET"),
        ) {
            (Ok(client_id), Ok(client_secret)) => Some(OAuthClient::new_github(OAuthConfig {
                client_id,
                client_secret,
                redirect_url: format!("{}/auth/callback/github", app_url),
                auth_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
            })?),
            _ => None,
        };

        if google.is_some() {
            info!("Google OAuth provider configured");
        }
        if github.is_some() {
            info!("GitHub OAuth provider configured");
        }

        Ok(Self {
            google,
            github,
            sessions: OAuthSessionStore::new(),
        })
    }

    /// Get the client for a provider, if configured
    pub fn get(&self, provider: OAuthProvider) -> Option<&OAuthClient> {
        match provider {
            OAuthProvider::Google => self.google.as_ref(),
            OAuthProvider::Github => self.github.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse_round_trip() {
        for provider in [OAuthProvider::Google, OAuthProvider::Github] {
            assert_eq!(OAuthProvider::parse(provider.as_str()), Some(provider));
        }
        assert_eq!(OAuthProvider::parse("gitlab"), None);
    }

    #[tokio::test]
    async fn test_session_store_take_is_single_use() {
        let store = OAuthSessionStore::new();
        store
            .insert("state-1".to_string(), "verifier".to_string(), OAuthProvider::Google)
            .await;

        let session = store.take("state-1").await.expect("session should exist");
        assert_eq!(session.pkce_verifier, "verifier");
        assert_eq!(session.provider, OAuthProvider::Google);

        assert!(store.take("state-1").await.is_none());
    }

    #[tokio::test]
    async fn test_session_store_unknown_state() {
        let store = OAuthSessionStore::new();
        assert!(store.take("never-issued").await.is_none());
    }
}
