//! Server-side sessions
//!
//! A session is an opaque identifier carried by a cookie plus a small map of
//! named values held server-side. The cookie never carries credentials or
//! tokens, only the identifier.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use common::cache::RedisPool;

use crate::random::{self, RandomError, SESSION_ID_ALPHABET};

/// Name of the cookie carrying the opaque session identifier.
pub const SESSION_COOKIE: &str = "sid";

/// Length of generated session identifiers.
const SESSION_ID_LENGTH: usize = 32;

/// One session record: identifier plus named values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    values: HashMap<String, String>,
}

impl Session {
    /// Start a fresh session under a newly generated identifier.
    pub fn generate() -> Result<Self, RandomError> {
        Ok(Session {
            id: random::random_string(SESSION_ID_LENGTH, SESSION_ID_ALPHABET)?,
            values: HashMap::new(),
        })
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }
}

/// Where sessions live between requests. The store serializes updates per
/// session key; the core only ever reads/writes whole records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session with the given id, if present and not expired.
    async fn load(&self, id: &str) -> Result<Option<Session>>;
    /// Persist the session under its id, refreshing its lifetime.
    async fn save(&self, session: &Session) -> Result<()>;
    /// Drop the session.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Redis-backed store: one JSON value per session under `session:<id>`,
/// expiry delegated to the key TTL.
pub struct RedisSessionStore {
    pool: RedisPool,
    ttl_seconds: u64,
}

impl RedisSessionStore {
    pub fn new(pool: RedisPool, ttl_seconds: u64) -> Self {
        Self { pool, ttl_seconds }
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let Some(raw) = self.pool.get(&Self::key(id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.pool
            .set(&Self::key(&session.id), &raw, Some(self.ttl_seconds))
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.pool.delete(&Self::key(id)).await?;
        Ok(())
    }
}

/// In-process store for single-instance deployments and tests.
pub struct MemorySessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, MemoryEntry>>,
}

struct MemoryEntry {
    session: Session,
    expires_at: Instant,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>> {
        let mut inner = self.inner.lock().expect("session store lock poisoned");
        match inner.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.session.clone())),
            Some(_) => {
                inner.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut inner = self.inner.lock().expect("session store lock poisoned");
        inner.insert(
            session.id.clone(),
            MemoryEntry {
                session: session.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("session store lock poisoned");
        inner.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let mut session = Session::generate().unwrap();
        session.insert("auth.user_id", "some-id");

        store.save(&session).await.unwrap();
        let loaded = store.load(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.value("auth.user_id"), Some("some-id"));

        store.delete(&session.id).await.unwrap();
        assert!(store.load(&session.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires_sessions() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let session = Session::generate().unwrap();
        store.save(&session).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.load(&session.id).await.unwrap().is_none());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = Session::generate().unwrap();
        let b = Session::generate().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn removed_values_stay_removed_after_round_trip() {
        let mut session = Session::generate().unwrap();
        session.insert("oauth2.state.google", "nonce");
        assert_eq!(session.remove("oauth2.state.google").as_deref(), Some("nonce"));
        assert_eq!(session.remove("oauth2.state.google"), None);

        let raw = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&raw).unwrap();
        assert!(restored.value("oauth2.state.google").is_none());
    }
}
