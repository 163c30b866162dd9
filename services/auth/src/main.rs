use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::cache::{RedisConfig, RedisPool};
use common::database::{self, DatabaseConfig};

use auth::authenticator::Authenticator;
use auth::notifier::{Notifier, SmtpConfig, SmtpNotifier};
use auth::oauth::{GoogleUserFetcher, OAuth2Login, OAuthClient, OAuthProviderConfig};
use auth::passwords::PasswordResetBroker;
use auth::rate_limiter::RateLimiter;
use auth::repositories::{PgUserRepository, UserRepository};
use auth::routes;
use auth::session::{MemorySessionStore, RedisSessionStore, SessionStore};
use auth::tokens::{MemoryTokenStore, RedisTokenStore, ResetTokenStore};
use auth::AppState;

/// Session lifetime in seconds (default: one day).
const DEFAULT_SESSION_TTL: u64 = 86_400;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting authentication service");

    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;
    if database::health_check(&pool).await? {
        info!("database connection successful");
    } else {
        anyhow::bail!("failed to connect to database");
    }

    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config)?;

    let session_ttl = std::env::var("SESSION_TTL_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SESSION_TTL);

    let users: Arc<dyn UserRepository> = Arc::new(PgUserRepository::new(pool.clone()));

    // backend selection: the embedded store suits a single instance, the
    // shared one a fleet behind a load balancer
    let backend = std::env::var("TOKEN_STORE").unwrap_or_else(|_| "redis".to_string());
    let (sessions, tokens): (Arc<dyn SessionStore>, Arc<dyn ResetTokenStore>) =
        match backend.as_str() {
            "memory" => (
                Arc::new(MemorySessionStore::new(Duration::from_secs(session_ttl))),
                Arc::new(MemoryTokenStore::with_default_ttl()),
            ),
            "redis" => (
                Arc::new(RedisSessionStore::new(redis_pool.clone(), session_ttl)),
                Arc::new(RedisTokenStore::new(redis_pool.clone())),
            ),
            other => anyhow::bail!("unknown TOKEN_STORE backend: {other}"),
        };

    let notifier: Arc<dyn Notifier> = Arc::new(SmtpNotifier::new(&SmtpConfig::from_env()?)?);

    let authenticator = Authenticator::new(sessions.clone(), users.clone());

    let public_url =
        std::env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let broker = Arc::new(PasswordResetBroker::new(
        format!("{public_url}/auth/passwords"),
        users.clone(),
        tokens,
        notifier,
    ));

    // sign-in: refill every minute; reset links: refill every ten minutes
    let signin_limiter = Arc::new(RateLimiter::by_source_ip(Duration::from_secs(60), 5));
    let reset_limiter = Arc::new(RateLimiter::by_source_ip(Duration::from_secs(600), 2));

    let mut oauth_providers = HashMap::new();
    if let Some(config) = OAuthProviderConfig::google_from_env()? {
        oauth_providers.insert(
            "google".to_string(),
            OAuth2Login::new(
                "google",
                "/",
                Arc::new(OAuthClient::new(&config)?),
                Arc::new(GoogleUserFetcher::new(users.clone())),
                authenticator.clone(),
            ),
        );
        info!("google oauth sign-in enabled");
    }

    let state = AppState {
        sessions,
        users,
        authenticator,
        broker,
        signin_limiter,
        reset_limiter,
        oauth_providers: Arc::new(oauth_providers),
    };

    let app = routes::create_router(state);

    let addr = std::env::var("AUTH_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!("authentication service listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
