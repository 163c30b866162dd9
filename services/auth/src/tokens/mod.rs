//! One-time password-reset tokens
//!
//! A token authorizes exactly one password reset within its lifetime. Two
//! interchangeable backends exist: an in-process map for single-instance
//! deployments and a Redis store for shared ones. Both keep the mapping in
//! both directions (`user -> record`, `token -> user`) under one TTL and
//! guarantee that issuing a new token supersedes the old one atomically.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::models::User;
use crate::random::{self, RandomError, TOKEN_ALPHABET, constant_time_eq};

pub mod memory;
pub mod redis;

pub use self::memory::MemoryTokenStore;
pub use self::redis::RedisTokenStore;

/// Length of generated reset tokens.
pub const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Random(#[from] RandomError),

    #[error("token store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// What a backend stores for an outstanding token.
#[derive(Debug, Clone)]
pub struct ResetTokenRecord {
    pub token: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

impl ResetTokenRecord {
    /// Issue a fresh record for `user`, snapshotting the credentials a later
    /// validation must still match.
    pub(crate) fn issue(user: &User) -> Result<Self, TokenError> {
        Ok(Self {
            token: random::random_string(TOKEN_LENGTH, TOKEN_ALPHABET)?,
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            created_at: Utc::now().timestamp(),
        })
    }

    /// A record authorizes a reset only for the exact token it was issued
    /// as, the email it was issued to, and the password hash in force at
    /// issuance. Any password change since then reads as a stale snapshot.
    pub(crate) fn authorizes(&self, user: &User, token: &str) -> bool {
        self.token == token
            && self.email == user.email
            && constant_time_eq(self.password_hash.as_bytes(), user.password_hash.as_bytes())
    }
}

/// One-time token lifecycle as the reset broker consumes it.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Issue a token for `user`, superseding any outstanding one.
    async fn generate(&self, user: &User) -> Result<String, TokenError>;

    /// Invalidate `token`. An unknown token is already deleted; that is not
    /// an error.
    async fn delete(&self, token: &str) -> Result<(), TokenError>;

    /// Whether `token` is outstanding for `user` with a live snapshot.
    /// Backend failures read as invalid.
    async fn is_valid(&self, user: &User, token: &str) -> bool;
}
