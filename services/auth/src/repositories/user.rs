//! User repository contract and its PostgreSQL implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Profile, User, UserStatus};

/// Persistent user storage as the auth core consumes it. The core never
/// issues queries itself; everything goes through this seam.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn save(&self, user: &User) -> Result<()>;
}

const USER_COLUMNS: &str =
    "id, email, slug, password_hash, status, is_superuser, is_staff, profile, created_at";

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> Result<User> {
        let status: String = row.get("status");
        let status = status
            .parse::<UserStatus>()
            .map_err(|e| anyhow::anyhow!("corrupt user row: {e}"))?;

        let profile: serde_json::Value = row.get("profile");
        let profile: Profile =
            serde_json::from_value(profile).context("corrupt user profile column")?;

        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            slug: row.get("slug"),
            password_hash: row.get("password_hash"),
            status,
            superuser: row.get("is_superuser"),
            staff: row.get("is_staff"),
            profile,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::map_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::map_row).transpose()
    }

    async fn save(&self, user: &User) -> Result<()> {
        let profile = serde_json::to_value(&user.profile)?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, slug, password_hash, status, is_superuser, is_staff, profile, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                slug = EXCLUDED.slug,
                password_hash = EXCLUDED.password_hash,
                status = EXCLUDED.status,
                is_superuser = EXCLUDED.is_superuser,
                is_staff = EXCLUDED.is_staff,
                profile = EXCLUDED.profile
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.slug)
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.superuser)
        .bind(user.staff)
        .bind(profile)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
