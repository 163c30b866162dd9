//! Session-backed authentication
//!
//! The authenticator binds a user to a session at login, resolves the stored
//! identity on each request, and strips it at logout. The identity rides the
//! request as an explicit [`CurrentUser`] so callers always see either a
//! resolved user or a deliberate `Anonymous`, never a null.

use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::session::{Session, SessionStore};

/// Session value under which the authenticated user's id is stored.
pub const USER_SESSION_KEY: &str = "auth.user_id";

/// The identity attached to a request.
#[derive(Debug, Clone, Default)]
pub enum CurrentUser {
    Identified(User),
    #[default]
    Anonymous,
}

impl CurrentUser {
    pub fn user(&self) -> Option<&User> {
        match self {
            CurrentUser::Identified(user) => Some(user),
            CurrentUser::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, CurrentUser::Anonymous)
    }
}

/// Request-scoped handle: the session plus the identity resolved for this
/// request. Cheap to clone; every clone shares state, so a login performed
/// in a handler is visible to the middleware that persists the session.
#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    session: Session,
    identity: CurrentUser,
    /// Session values changed and not yet persisted.
    dirty: bool,
    /// The session was written to the store during this request.
    persisted: bool,
}

impl AuthSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                session,
                identity: CurrentUser::Anonymous,
                dirty: false,
                persisted: false,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("auth session lock poisoned")
    }

    pub fn id(&self) -> String {
        self.lock().session.id.clone()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().session.value(key).map(str::to_string)
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut inner = self.lock();
        inner.session.insert(key, value);
        inner.dirty = true;
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();
        let removed = inner.session.remove(key);
        if removed.is_some() {
            inner.dirty = true;
        }
        removed
    }

    /// The identity resolved for this request. A pure in-memory read; the
    /// session store is never consulted here.
    pub fn current_user(&self) -> CurrentUser {
        self.lock().identity.clone()
    }

    pub(crate) fn set_identity(&self, identity: CurrentUser) {
        self.lock().identity = identity;
    }

    /// Copy of the session for persistence.
    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    /// Whether unsaved changes exist; clears the flag.
    pub fn take_dirty(&self) -> bool {
        let mut inner = self.lock();
        std::mem::take(&mut inner.dirty)
    }

    /// Record a completed store write.
    pub fn mark_saved(&self) {
        let mut inner = self.lock();
        inner.dirty = false;
        inner.persisted = true;
    }

    pub fn persisted(&self) -> bool {
        self.lock().persisted
    }
}

/// Authenticates requests against the session store and a user repository.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserRepository>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn SessionStore>, users: Arc<dyn UserRepository>) -> Self {
        Self { store, users }
    }

    /// Bind `user` to the session, persist it, and expose the identity to
    /// the rest of the request.
    pub async fn login(&self, user: &User, sess: &AuthSession) -> Result<(), AuthError> {
        sess.insert(USER_SESSION_KEY, user.id.to_string());
        self.store
            .save(&sess.snapshot())
            .await
            .map_err(AuthError::Upstream)?;
        sess.mark_saved();
        sess.set_identity(CurrentUser::Identified(user.clone()));
        Ok(())
    }

    /// Remove the identity from the session and the request.
    pub async fn logout(&self, sess: &AuthSession) -> Result<(), AuthError> {
        sess.remove(USER_SESSION_KEY);
        self.store
            .save(&sess.snapshot())
            .await
            .map_err(AuthError::Upstream)?;
        sess.mark_saved();
        sess.set_identity(CurrentUser::Anonymous);
        Ok(())
    }

    /// Resolve the identity the session carries, if any. Authentication is
    /// not mandatory: a missing value, a malformed id, or a lookup miss all
    /// leave the request anonymous without failing it.
    pub async fn authenticate(&self, sess: &AuthSession) {
        let Some(raw) = sess.value(USER_SESSION_KEY) else {
            return;
        };

        let id = match raw.parse::<Uuid>() {
            Ok(id) => id,
            Err(_) => {
                debug!("session carries a malformed user id");
                return;
            }
        };

        match self.users.find_by_id(id).await {
            Ok(Some(user)) => sess.set_identity(CurrentUser::Identified(user)),
            Ok(None) => debug!(user_id = %id, "session user no longer exists"),
            Err(err) => debug!(user_id = %id, "user lookup failed: {err:#}"),
        }
    }
}
