//! Redis-backed token store for multi-process deployments
//!
//! Both keys are mutated by a single server-side script, so two requests
//! racing to generate or delete the same user's token cannot interleave
//! between the two writes. TTLs land on both keys in the same round trip.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};

use common::cache::RedisPool;

use super::{ResetTokenRecord, ResetTokenStore, TokenError};
use crate::models::User;

/// Default token lifetime: two hours.
const DEFAULT_TTL_SECONDS: u64 = 7200;

const DEFAULT_KEY_PREFIX: &str = "reset:";

/// Writes both directions of the mapping and unlinks the superseded token.
/// KEYS[1] = user key, KEYS[2] = token key.
/// ARGV = [ttl, token, email, password_hash, created_at, token_key_prefix]
const INSERT_SCRIPT: &str = r"
local previous = redis.call('HGET', KEYS[1], 'token')
if previous then
  redis.call('DEL', ARGV[6] .. previous)
end
redis.call('HSET', KEYS[1], 'token', ARGV[2], 'email', ARGV[3], 'pass', ARGV[4], 'created_at', ARGV[5])
redis.call('SET', KEYS[2], KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[1])
redis.call('EXPIRE', KEYS[2], ARGV[1])
return 1
";

/// Resolves the token key to the user key and deletes both. A missing token
/// is already deleted. KEYS[1] = token key.
const DELETE_SCRIPT: &str = r"
local user_key = redis.call('GET', KEYS[1])
if not user_key then
  return 0
end
redis.call('DEL', KEYS[1])
redis.call('DEL', user_key)
return 1
";

pub struct RedisTokenStore {
    pool: RedisPool,
    ttl_seconds: u64,
    key_prefix: String,
    insert: Script,
    delete: Script,
}

impl RedisTokenStore {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            insert: Script::new(INSERT_SCRIPT),
            delete: Script::new(DELETE_SCRIPT),
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn user_key(&self, user: &User) -> String {
        // token characters never include ':', so these namespaces cannot
        // collide
        format!("{}user:{}", self.key_prefix, user.id)
    }

    fn token_key(&self, token: &str) -> String {
        format!("{}token:{}", self.key_prefix, token)
    }

    fn token_key_prefix(&self) -> String {
        format!("{}token:", self.key_prefix)
    }
}

#[async_trait]
impl ResetTokenStore for RedisTokenStore {
    async fn generate(&self, user: &User) -> Result<String, TokenError> {
        let record = ResetTokenRecord::issue(user)?;

        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|e| TokenError::Store(e.into()))?;

        let _: i64 = self
            .insert
            .key(self.user_key(user))
            .key(self.token_key(&record.token))
            .arg(self.ttl_seconds)
            .arg(&record.token)
            .arg(&record.email)
            .arg(&record.password_hash)
            .arg(record.created_at)
            .arg(self.token_key_prefix())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TokenError::Store(e.into()))?;

        Ok(record.token)
    }

    async fn delete(&self, token: &str) -> Result<(), TokenError> {
        let mut conn = self
            .pool
            .connection()
            .await
            .map_err(|e| TokenError::Store(e.into()))?;

        let _: i64 = self
            .delete
            .key(self.token_key(token))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TokenError::Store(e.into()))?;

        Ok(())
    }

    async fn is_valid(&self, user: &User, token: &str) -> bool {
        let Ok(mut conn) = self.pool.connection().await else {
            return false;
        };

        let fields: HashMap<String, String> = match conn.hgetall(self.user_key(user)).await {
            Ok(fields) => fields,
            Err(_) => return false,
        };

        let (Some(stored_token), Some(email), Some(pass)) =
            (fields.get("token"), fields.get("email"), fields.get("pass"))
        else {
            return false;
        };

        let record = ResetTokenRecord {
            token: stored_token.clone(),
            email: email.clone(),
            password_hash: pass.clone(),
            created_at: fields
                .get("created_at")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default(),
        };

        record.authorizes(user, token)
    }
}
