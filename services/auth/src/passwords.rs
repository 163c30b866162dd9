//! Password-reset broker
//!
//! Orchestrates the two-phase reset workflow: issue a link backed by a
//! one-time token, then validate the link and apply the new password. The
//! broker owns policy; hashing and persistence stay with the caller through
//! the apply callback.

use std::future::Future;
use std::sync::Arc;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::User;
use crate::notifier::Notifier;
use crate::repositories::UserRepository;
use crate::tokens::ResetTokenStore;

/// Minimum password length for standard accounts.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Minimum password length for staff and superuser accounts.
pub const MIN_ELEVATED_PASSWORD_LEN: usize = 15;

/// Why a reset completion was refused. One variant per user-facing message
/// so the presentation layer maps them deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompleteError {
    #[error("passwords do not match")]
    PasswordMismatch,

    #[error("password must be at least 8 characters")]
    TooShortMinimum,

    #[error("password must be at least 15 characters for staff accounts")]
    TooShortElevated,

    #[error("could not update the password")]
    Upstream,
}

/// One validated reset attempt. Never persisted; lives for a single
/// completion call.
#[derive(Debug, Clone)]
pub struct ResetRequest {
    pub user: User,
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

pub struct PasswordResetBroker {
    reset_url: String,
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn ResetTokenStore>,
    notifier: Arc<dyn Notifier>,
}

impl PasswordResetBroker {
    pub fn new(
        reset_url: impl Into<String>,
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn ResetTokenStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            reset_url: reset_url.into(),
            users,
            tokens,
            notifier,
        }
    }

    /// Issue a token for the account behind `email` and hand the reset link
    /// to the notifier. An unknown email comes back `NotFound`; the caller
    /// renders the same confirmation either way so the response never
    /// confirms account existence. A failed notification leaves the token
    /// standing — it is harmless without the delivery channel and dies at
    /// its TTL.
    pub async fn send_reset_link(&self, source_ip: &str, email: &str) -> Result<(), AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await
            .map_err(AuthError::Upstream)?
            .ok_or(AuthError::NotFound)?;

        let token = self
            .tokens
            .generate(&user)
            .await
            .map_err(|e| AuthError::Upstream(e.into()))?;

        let link = format!("{}/{}/{}", self.reset_url, encode_user_id(user.id), token);
        let body = reset_message(&link, &user.email, source_ip, Utc::now());

        self.notifier
            .notify(&user, "Reset your password", &body)
            .await
            .map_err(AuthError::Upstream)?;

        Ok(())
    }

    /// Check a reset link. Failures are indistinguishable on purpose: a bad
    /// id and a bad token both come back `None`.
    pub async fn validate_reset(&self, uid: &str, token: &str) -> Option<ResetRequest> {
        if uid.is_empty() || token.is_empty() {
            return None;
        }

        let id = decode_user_id(uid)?;
        let user = self.users.find_by_id(id).await.ok().flatten()?;

        if !self.tokens.is_valid(&user, token).await {
            return None;
        }

        Some(ResetRequest {
            user,
            token: token.to_string(),
            new_password: String::new(),
            confirm_password: String::new(),
        })
    }

    /// Apply a validated reset. `apply` hashes and persists the new
    /// password; the consumed token is deleted only after it succeeds.
    pub async fn resets<F, Fut>(&self, request: &ResetRequest, apply: F) -> Result<(), CompleteError>
    where
        F: FnOnce(User, String) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if request.new_password != request.confirm_password {
            return Err(CompleteError::PasswordMismatch);
        }

        if request.user.is_elevated() && request.new_password.len() < MIN_ELEVATED_PASSWORD_LEN {
            return Err(CompleteError::TooShortElevated);
        }

        if request.new_password.len() < MIN_PASSWORD_LEN {
            return Err(CompleteError::TooShortMinimum);
        }

        apply(request.user.clone(), request.new_password.clone())
            .await
            .map_err(|err| {
                warn!(user_id = %request.user.id, "password update failed: {err:#}");
                CompleteError::Upstream
            })?;

        self.tokens.delete(&request.token).await.map_err(|err| {
            warn!(user_id = %request.user.id, "consumed token cleanup failed: {err}");
            CompleteError::Upstream
        })?;

        Ok(())
    }
}

/// Opaque form of the user id used in reset links.
fn encode_user_id(id: Uuid) -> String {
    Base64UrlUnpadded::encode_string(id.as_bytes())
}

fn decode_user_id(encoded: &str) -> Option<Uuid> {
    let bytes = Base64UrlUnpadded::decode_vec(encoded).ok()?;
    Uuid::from_slice(&bytes).ok()
}

fn reset_message(link: &str, email: &str, source_ip: &str, at: DateTime<Utc>) -> String {
    format!(
        "A password reset was requested for your account.\n\
         If this wasn't you, ignore this message. The link below expires in\n\
         two hours; after that a new request is needed.\n\
         \n\
         {link}\n\
         \n\
         Account: {email}\n\
         Requested from: {source_ip}\n\
         Requested at: {}\n",
        at.to_rfc2822()
    )
}
