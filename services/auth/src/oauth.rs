//! OAuth2 authorization-code login
//!
//! Two steps: `handle_login` stores a fresh state nonce in the session and
//! hands back the provider's authorization URL; `handle_callback` verifies
//! the nonce (single use, constant-time), exchanges the code, maps the
//! provider token to a local user, and completes a session login. Every
//! failure propagates out before a login can happen — the flow is
//! fail-closed.
//!
//! The state nonce is always generated server-side. A `state` query
//! parameter supplied by the client on the login request is ignored.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::info;

use crate::authenticator::{AuthSession, Authenticator};
use crate::error::AuthError;
use crate::models::User;
use crate::random::{self, TOKEN_ALPHABET, constant_time_eq};
use crate::repositories::UserRepository;

/// Length of generated state nonces.
const STATE_LENGTH: usize = 32;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

/// Exchanges an authorization code with the provider.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Provider authorization URL carrying `state`.
    fn auth_code_url(&self, state: &str) -> String;

    /// Trade the callback's code for an access token.
    async fn exchange(&self, code: &str) -> Result<BasicTokenResponse>;
}

/// Maps a provider token to a local user, creating one when needed.
#[async_trait]
pub trait UserFetcher: Send + Sync {
    async fn fetch(&self, token: &BasicTokenResponse) -> Result<User>;
}

/// OAuth2 provider configuration
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: String,
    pub scopes: Vec<String>,
}

impl OAuthProviderConfig {
    /// Google configuration from the environment, or `None` when the
    /// provider is not configured.
    ///
    /// # Environment Variables
    /// - `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET`
    /// - `GOOGLE_REDIRECT_URL`: our callback URL as registered with Google
    pub fn google_from_env() -> Result<Option<Self>> {
        let Ok(client_id) = std::env::var("GOOGLE_CLIENT_ID") else {
            return Ok(None);
        };
        let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
            .context("GOOGLE_CLIENT_SECRET environment variable not set")?;
        let redirect_url = std::env::var("GOOGLE_REDIRECT_URL")
            .context("GOOGLE_REDIRECT_URL environment variable not set")?;

        Ok(Some(Self {
            client_id,
            client_secret,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            redirect_url,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }))
    }
}

/// Token exchanger over the `oauth2` crate's basic client.
pub struct OAuthClient {
    client: BasicClient,
    scopes: Vec<Scope>,
}

impl OAuthClient {
    pub fn new(config: &OAuthProviderConfig) -> Result<Self> {
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.auth_url.clone())?,
            Some(TokenUrl::new(config.token_url.clone())?),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_url.clone())?);

        Ok(Self {
            client,
            scopes: config.scopes.iter().cloned().map(Scope::new).collect(),
        })
    }
}

#[async_trait]
impl TokenExchanger for OAuthClient {
    fn auth_code_url(&self, state: &str) -> String {
        let state = state.to_string();
        let mut request = self.client.authorize_url(move || CsrfToken::new(state));
        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }
        let (url, _) = request.url();
        url.to_string()
    }

    async fn exchange(&self, code: &str) -> Result<BasicTokenResponse> {
        self.client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| anyhow::anyhow!("token exchange failed: {e}"))
    }
}

/// Google profile payload from the userinfo endpoint.
#[derive(Debug, Deserialize)]
struct GoogleProfile {
    email: String,
    #[serde(default)]
    verified_email: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Resolves a Google access token to a local user, creating the account on
/// first sign-in.
pub struct GoogleUserFetcher {
    http: reqwest::Client,
    users: Arc<dyn UserRepository>,
}

impl GoogleUserFetcher {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self {
            http: reqwest::Client::new(),
            users,
        }
    }
}

#[async_trait]
impl UserFetcher for GoogleUserFetcher {
    async fn fetch(&self, token: &BasicTokenResponse) -> Result<User> {
        let response = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(token.access_token().secret())
            .send()
            .await
            .context("userinfo request failed")?;

        if !response.status().is_success() {
            bail!("userinfo request failed with status {}", response.status());
        }

        let profile: GoogleProfile = response.json().await.context("malformed userinfo body")?;
        if !profile.verified_email {
            bail!("provider account email is not verified");
        }

        if let Some(user) = self.users.find_by_email(&profile.email).await? {
            return Ok(user);
        }

        let mut user = User::new(&profile.email);
        user.profile.name = profile.name;
        user.profile.picture = profile.picture;
        self.users.save(&user).await?;

        info!(user_id = %user.id, "created account from oauth sign-in");
        Ok(user)
    }
}

/// Query parameters the provider sends to our callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// One configured provider's login flow.
#[derive(Clone)]
pub struct OAuth2Login {
    name: String,
    redirect_path: String,
    exchanger: Arc<dyn TokenExchanger>,
    fetcher: Arc<dyn UserFetcher>,
    authenticator: Authenticator,
}

impl OAuth2Login {
    pub fn new(
        name: impl Into<String>,
        redirect_path: impl Into<String>,
        exchanger: Arc<dyn TokenExchanger>,
        fetcher: Arc<dyn UserFetcher>,
        authenticator: Authenticator,
    ) -> Self {
        Self {
            name: name.into(),
            redirect_path: redirect_path.into(),
            exchanger,
            fetcher,
            authenticator,
        }
    }

    /// Session key the state nonce lives under, scoped per provider.
    fn state_key(&self) -> String {
        format!("oauth2.state.{}", self.name)
    }

    /// Start the flow: bind a fresh nonce to the session and return the
    /// provider's authorization URL.
    pub fn handle_login(&self, sess: &AuthSession) -> Result<String, AuthError> {
        let state = random::random_string(STATE_LENGTH, TOKEN_ALPHABET)
            .map_err(|e| AuthError::Upstream(e.into()))?;
        sess.insert(self.state_key(), state.clone());
        Ok(self.exchanger.auth_code_url(&state))
    }

    /// Finish the flow. The stored nonce is removed before anything else, so
    /// it can never be replayed; verification happens before any token
    /// exchange.
    pub async fn handle_callback(
        &self,
        sess: &AuthSession,
        params: &CallbackParams,
    ) -> Result<String, AuthError> {
        let stored = sess
            .remove(&self.state_key())
            .ok_or(AuthError::ForgeryDetected)?;

        let presented = params.state.as_deref().unwrap_or_default();
        if presented.is_empty() || !constant_time_eq(stored.as_bytes(), presented.as_bytes()) {
            return Err(AuthError::ForgeryDetected);
        }

        if let Some(provider_error) = &params.error {
            let detail = params.error_description.as_deref().unwrap_or("");
            return Err(AuthError::Upstream(anyhow::anyhow!(
                "provider returned error: {provider_error} {detail}"
            )));
        }

        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AuthError::Upstream(anyhow::anyhow!("callback missing code")))?;

        let token = self
            .exchanger
            .exchange(code)
            .await
            .map_err(AuthError::Upstream)?;
        let user = self
            .fetcher
            .fetch(&token)
            .await
            .map_err(AuthError::Upstream)?;

        self.authenticator.login(&user, sess).await?;
        info!(provider = %self.name, user_id = %user.id, "oauth sign-in complete");

        Ok(self.redirect_path.clone())
    }
}
