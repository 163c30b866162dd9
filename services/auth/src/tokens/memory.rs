//! Memory-backed token store for single-process deployments

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use super::{ResetTokenRecord, ResetTokenStore, TokenError};
use crate::models::User;

/// Default token lifetime: two hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);

/// In-process backend. Both directions of the mapping live under one lock,
/// so generate and delete are transactional by construction; expiry is
/// enforced lazily at access time.
pub struct MemoryTokenStore {
    ttl: Duration,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<Uuid, Entry>,
    by_token: HashMap<String, Uuid>,
}

struct Entry {
    record: ResetTokenRecord,
    expires_at: Instant,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<Uuid> = self
            .by_user
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(entry) = self.by_user.remove(&id) {
                self.by_token.remove(&entry.record.token);
            }
        }
    }
}

impl MemoryTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("token store lock poisoned")
    }
}

#[async_trait]
impl ResetTokenStore for MemoryTokenStore {
    async fn generate(&self, user: &User) -> Result<String, TokenError> {
        let record = ResetTokenRecord::issue(user)?;
        let token = record.token.clone();

        let mut inner = self.lock();
        let now = Instant::now();
        inner.purge_expired(now);

        // Unlink the superseded token so it can no longer resolve.
        if let Some(previous) = inner.by_user.remove(&user.id) {
            inner.by_token.remove(&previous.record.token);
        }

        inner.by_token.insert(token.clone(), user.id);
        inner.by_user.insert(
            user.id,
            Entry {
                record,
                expires_at: now + self.ttl,
            },
        );

        Ok(token)
    }

    async fn delete(&self, token: &str) -> Result<(), TokenError> {
        let mut inner = self.lock();
        if let Some(user_id) = inner.by_token.remove(token) {
            inner.by_user.remove(&user_id);
        }
        Ok(())
    }

    async fn is_valid(&self, user: &User, token: &str) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.by_user.get(&user.id) {
            Some(entry) if entry.expires_at > now => entry.record.authorizes(user, token),
            Some(_) => {
                inner.purge_expired(now);
                false
            }
            None => false,
        }
    }
}
