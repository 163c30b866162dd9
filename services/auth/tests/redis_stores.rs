//! Tests for the Redis-backed session and token stores
//!
//! These need a local Redis, so they are ignored by default:
//!
//!   cargo test -p auth -- --ignored

use common::cache::{RedisConfig, RedisPool};

use auth::models::User;
use auth::session::{Session, SessionStore, RedisSessionStore};
use auth::tokens::{RedisTokenStore, ResetTokenStore};

fn pool() -> RedisPool {
    let config = RedisConfig::from_env().expect("redis config");
    RedisPool::new(&config).expect("redis client")
}

#[tokio::test]
#[ignore = "requires local Redis"]
async fn redis_token_store_lifecycle() {
    let store = RedisTokenStore::new(pool()).with_key_prefix("test:reset:");
    let mut user = User::create("redis-test@example.com", "original pass").unwrap();

    let token = store.generate(&user).await.unwrap();
    assert!(store.is_valid(&user, &token).await);
    assert!(!store.is_valid(&user, "forged-token").await);

    // regeneration supersedes, and the stale token no longer resolves
    let second = store.generate(&user).await.unwrap();
    assert!(!store.is_valid(&user, &token).await);
    assert!(store.is_valid(&user, &second).await);
    store.delete(&token).await.unwrap();
    assert!(store.is_valid(&user, &second).await);

    // password change invalidates the snapshot
    user.set_password("rotated out of band").unwrap();
    assert!(!store.is_valid(&user, &second).await);

    store.delete(&second).await.unwrap();
    assert!(!store.is_valid(&user, &second).await);

    // deleting again is a no-op
    store.delete(&second).await.unwrap();
}

#[tokio::test]
#[ignore = "requires local Redis"]
async fn redis_session_store_round_trip() {
    let store = RedisSessionStore::new(pool(), 60);

    let mut session = Session::generate().unwrap();
    session.insert("auth.user_id", "some-id");
    store.save(&session).await.unwrap();

    let loaded = store.load(&session.id).await.unwrap().unwrap();
    assert_eq!(loaded.value("auth.user_id"), Some("some-id"));

    store.delete(&session.id).await.unwrap();
    assert!(store.load(&session.id).await.unwrap().is_none());
}
