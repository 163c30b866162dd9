//! Route-level tests driving the full router over in-memory collaborators

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;
use uuid::Uuid;

use auth::AppState;
use auth::authenticator::Authenticator;
use auth::models::{User, UserStatus};
use auth::notifier::Notifier;
use auth::oauth::{OAuth2Login, TokenExchanger, UserFetcher};
use auth::passwords::PasswordResetBroker;
use auth::rate_limiter::RateLimiter;
use auth::repositories::UserRepository;
use auth::routes::create_router;
use auth::session::MemorySessionStore;
use auth::tokens::MemoryTokenStore;

use oauth2::basic::{BasicTokenResponse, BasicTokenType};
use oauth2::{AccessToken, EmptyExtraTokenFields, StandardTokenResponse};

struct MapUserRepository {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MapUserRepository {
    fn with(users: Vec<User>) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(users.into_iter().map(|u| (u.id, u)).collect()),
        })
    }
}

#[async_trait]
impl UserRepository for MapUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn save(&self, user: &User) -> Result<()> {
        self.users.lock().unwrap().insert(user.id, user.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    bodies: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _user: &User, _subject: &str, body: &str) -> Result<()> {
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

struct FakeExchanger;

#[async_trait]
impl TokenExchanger for FakeExchanger {
    fn auth_code_url(&self, state: &str) -> String {
        format!("https://provider.example.com/authorize?state={state}")
    }

    async fn exchange(&self, _code: &str) -> Result<BasicTokenResponse> {
        Ok(StandardTokenResponse::new(
            AccessToken::new("provider-access-token".to_string()),
            BasicTokenType::Bearer,
            EmptyExtraTokenFields {},
        ))
    }
}

struct FixedFetcher {
    user: User,
}

#[async_trait]
impl UserFetcher for FixedFetcher {
    async fn fetch(&self, _token: &BasicTokenResponse) -> Result<User> {
        Ok(self.user.clone())
    }
}

struct Harness {
    router: Router,
    notifier: Arc<RecordingNotifier>,
    user: User,
}

fn harness() -> Harness {
    let mut user = User::create("shopper@example.com", "original password").unwrap();
    user.status = UserStatus::Active;
    let users = MapUserRepository::with(vec![user.clone()]);
    let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
    let tokens = Arc::new(MemoryTokenStore::with_default_ttl());
    let notifier = Arc::new(RecordingNotifier::default());

    let authenticator = Authenticator::new(sessions.clone(), users.clone());
    let broker = Arc::new(PasswordResetBroker::new(
        "https://shop.example.com/auth/passwords",
        users.clone(),
        tokens,
        notifier.clone(),
    ));

    let mut oauth_providers = HashMap::new();
    oauth_providers.insert(
        "google".to_string(),
        OAuth2Login::new(
            "google",
            "/",
            Arc::new(FakeExchanger),
            Arc::new(FixedFetcher { user: user.clone() }),
            authenticator.clone(),
        ),
    );

    let state = AppState {
        sessions,
        users,
        authenticator,
        broker,
        signin_limiter: Arc::new(RateLimiter::by_source_ip(Duration::from_secs(60), 10)),
        reset_limiter: Arc::new(RateLimiter::by_source_ip(Duration::from_secs(600), 2)),
        oauth_providers: Arc::new(oauth_providers),
    };

    Harness {
        router: create_router(state),
        notifier,
        user,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn session_cookie(response: &axum::response::Response) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()
        .map(str::to_string)
}

#[tokio::test]
async fn health_check_responds() {
    let h = harness();
    let response = h
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_sets_cookie_and_me_sees_the_user() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": "shopper@example.com", "password": "original password" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response).expect("login should set a session cookie");

    let response = h
        .router
        .oneshot(
            Request::get("/auth/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user"]["email"], "shopper@example.com");
    // the password hash never leaves the server
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn wrong_credentials_collapse_to_one_message() {
    let h = harness();

    let bad_password = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": "shopper@example.com", "password": "wrong" }),
        ))
        .await
        .unwrap();

    let unknown_account = h
        .router
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": "nobody@example.com", "password": "wrong" }),
        ))
        .await
        .unwrap();

    assert_eq!(bad_password.status(), StatusCode::FORBIDDEN);
    assert_eq!(unknown_account.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(bad_password).await,
        body_json(unknown_account).await
    );
}

#[tokio::test]
async fn forgot_password_never_reveals_account_existence() {
    let h = harness();

    let known = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/passwords/forgot",
            serde_json::json!({ "email": "shopper@example.com" }),
        ))
        .await
        .unwrap();

    let unknown = h
        .router
        .oneshot(json_request(
            "POST",
            "/auth/passwords/forgot",
            serde_json::json!({ "email": "a@example.com" }),
        ))
        .await
        .unwrap();

    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(body_json(known).await, body_json(unknown).await);

    // only the real account got a message
    assert_eq!(h.notifier.bodies.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reset_requests_are_rate_limited() {
    let h = harness();

    for _ in 0..2 {
        let response = h
            .router
            .clone()
            .oneshot(json_request(
                "POST",
                "/auth/passwords/forgot",
                serde_json::json!({ "email": "shopper@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let throttled = h
        .router
        .oneshot(json_request(
            "POST",
            "/auth/passwords/forgot",
            serde_json::json!({ "email": "shopper@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn full_reset_flow_rotates_the_password() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/passwords/forgot",
            serde_json::json!({ "email": "shopper@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // lift uid and token out of the delivered link
    let bodies = h.notifier.bodies.lock().unwrap();
    let link = bodies[0]
        .lines()
        .find(|l| l.starts_with("https://"))
        .unwrap()
        .to_string();
    drop(bodies);
    let mut parts = link.rsplit('/');
    let token = parts.next().unwrap().to_string();
    let uid = parts.next().unwrap().to_string();

    let response = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/passwords/reset",
            serde_json::json!({
                "uid": uid,
                "token": token,
                "password": "a brand new password",
                "confirm_password": "a brand new password",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // the link is spent
    let replay = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/passwords/reset",
            serde_json::json!({
                "uid": uid,
                "token": token,
                "password": "another password",
                "confirm_password": "another password",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::FORBIDDEN);

    // old credentials fail, new ones work
    let old = h
        .router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": "shopper@example.com", "password": "original password" }),
        ))
        .await
        .unwrap();
    assert_eq!(old.status(), StatusCode::FORBIDDEN);

    let new = h
        .router
        .oneshot(json_request(
            "POST",
            "/auth/login",
            serde_json::json!({ "email": "shopper@example.com", "password": "a brand new password" }),
        ))
        .await
        .unwrap();
    assert_eq!(new.status(), StatusCode::OK);
}

#[tokio::test]
async fn short_reset_password_is_a_policy_error() {
    let h = harness();

    h.router
        .clone()
        .oneshot(json_request(
            "POST",
            "/auth/passwords/forgot",
            serde_json::json!({ "email": "shopper@example.com" }),
        ))
        .await
        .unwrap();

    let bodies = h.notifier.bodies.lock().unwrap();
    let link = bodies[0]
        .lines()
        .find(|l| l.starts_with("https://"))
        .unwrap()
        .to_string();
    drop(bodies);
    let mut parts = link.rsplit('/');
    let token = parts.next().unwrap().to_string();
    let uid = parts.next().unwrap().to_string();

    let response = h
        .router
        .oneshot(json_request(
            "POST",
            "/auth/passwords/reset",
            serde_json::json!({
                "uid": uid,
                "token": token,
                "password": "short",
                "confirm_password": "short",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oauth_callback_with_forged_state_never_logs_in() {
    let h = harness();

    // start the flow to obtain a session
    let response = h
        .router
        .clone()
        .oneshot(
            Request::get("/auth/oauth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let cookie = session_cookie(&response).expect("oauth login should set a session cookie");

    let response = h
        .router
        .clone()
        .oneshot(
            Request::get("/auth/oauth/google/callback?code=auth-code&state=forged")
                .header(header::COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // and the session stayed anonymous
    let me = h
        .router
        .oneshot(
            Request::get("/auth/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(me).await;
    assert!(body["user"].is_null());
}

#[tokio::test]
async fn oauth_round_trip_signs_the_user_in() {
    let h = harness();

    let response = h
        .router
        .clone()
        .oneshot(
            Request::get("/auth/oauth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let cookie = session_cookie(&response).expect("oauth login should set a session cookie");
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    let response = h
        .router
        .clone()
        .oneshot(
            Request::get(format!(
                "/auth/oauth/google/callback?code=auth-code&state={state}"
            ))
            .header(header::COOKIE, cookie.clone())
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let me = h
        .router
        .oneshot(
            Request::get("/auth/me")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(me).await;
    assert_eq!(body["user"]["id"], serde_json::json!(h.user.id));
}
