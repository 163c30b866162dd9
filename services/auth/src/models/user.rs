//! User model and password handling

use anyhow::Result;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Account lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Registered but not yet confirmed
    Inactive,
    /// In good standing
    Active,
    /// Administratively locked
    Locked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Inactive => "inactive",
            UserStatus::Active => "active",
            UserStatus::Locked => "locked",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(UserStatus::Inactive),
            "active" => Ok(UserStatus::Active),
            "locked" => Ok(UserStatus::Locked),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

/// Public profile attributes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub web: Option<String>,
}

/// User entity
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub slug: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: UserStatus,
    pub superuser: bool,
    pub staff: bool,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create an active account with no password set. Accounts created this
    /// way (OAuth sign-ins) cannot authenticate with a password until one is
    /// set explicitly.
    pub fn new(email: &str) -> Self {
        let email = email.trim().to_lowercase();
        let slug = email.split('@').next().unwrap_or_default().to_string();
        User {
            id: Uuid::new_v4(),
            email,
            slug,
            password_hash: String::new(),
            status: UserStatus::Active,
            superuser: false,
            staff: false,
            profile: Profile::default(),
            created_at: Utc::now(),
        }
    }

    /// Create an unconfirmed account with the given password.
    pub fn create(email: &str, password: &str) -> Result<Self> {
        let mut user = User::new(email);
        user.status = UserStatus::Inactive;
        user.set_password(password)?;
        Ok(user)
    }

    /// Hash `password` with argon2 and store the PHC string.
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let salt = SaltString::generate(&mut rand::thread_rng());
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
        self.password_hash = hash.to_string();
        Ok(())
    }

    /// Verify `password` against the stored hash. Accounts without a
    /// password never verify.
    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.password_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Staff and superuser accounts are held to stricter password policy.
    pub fn is_elevated(&self) -> bool {
        self.staff || self.superuser
    }
}
