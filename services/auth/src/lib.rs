//! Authentication service for the Storefront application
//!
//! Everything identity-related lives here: the session-backed authenticator,
//! the password-reset broker and its pluggable one-time-token stores, the
//! per-client rate limiter, and the OAuth2 login flow. Persistence, mail
//! delivery, and the OAuth provider are collaborators behind traits; `main`
//! wires the production implementations.

use std::collections::HashMap;
use std::sync::Arc;

pub mod authenticator;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod oauth;
pub mod passwords;
pub mod random;
pub mod rate_limiter;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod tokens;
pub mod validation;

use crate::authenticator::Authenticator;
use crate::oauth::OAuth2Login;
use crate::passwords::PasswordResetBroker;
use crate::rate_limiter::RateLimiter;
use crate::repositories::UserRepository;
use crate::session::SessionStore;

/// Application state shared across handlers. Constructed once in `main` (or
/// a test harness) and cloned into every handler; there is no process-global
/// instance.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserRepository>,
    pub authenticator: Authenticator,
    pub broker: Arc<PasswordResetBroker>,
    pub signin_limiter: Arc<RateLimiter>,
    pub reset_limiter: Arc<RateLimiter>,
    pub oauth_providers: Arc<HashMap<String, OAuth2Login>>,
}
