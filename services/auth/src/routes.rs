//! Authentication service routes

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::authenticator::{AuthSession, CurrentUser};
use crate::error::AuthError;
use crate::middleware::{session_layer, throttle};
use crate::models::UserStatus;
use crate::oauth::CallbackParams;
use crate::passwords::CompleteError;
use crate::rate_limiter::ip_from_headers;
use crate::validation;

/// Request for password sign-in
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request for a password-reset link
#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Request to complete a password reset
#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub uid: String,
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

/// Create the router for the authentication service
pub fn create_router(state: AppState) -> Router {
    let signin_limiter = state.signin_limiter.clone();
    let reset_limiter = state.reset_limiter.clone();

    let throttled = Router::new()
        .route("/auth/login", post(login))
        .route_layer(middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                let limiter = signin_limiter.clone();
                async move { throttle(limiter, request, next).await }
            },
        ))
        .merge(
            Router::new()
                .route("/auth/passwords/forgot", post(forgot_password))
                .route_layer(middleware::from_fn(
                    move |request: axum::extract::Request, next: axum::middleware::Next| {
                        let limiter = reset_limiter.clone();
                        async move { throttle(limiter, request, next).await }
                    },
                )),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/passwords/reset", post(reset_password))
        .route("/auth/oauth/:provider", get(oauth_login))
        .route("/auth/oauth/:provider/callback", get(oauth_callback))
        .merge(throttled)
        .layer(middleware::from_fn_with_state(state.clone(), session_layer))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "auth-service"
    }))
}

/// Password sign-in. Every credential failure collapses into the same
/// response; only account-status problems get their own message.
pub async fn login(
    State(state): State<AppState>,
    Extension(sess): Extension<AuthSession>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    if validation::validate_email(&payload.email).is_err() || payload.password.is_empty() {
        return Err(AuthError::PolicyViolation(
            "email and password are required".to_string(),
        ));
    }

    let user = state
        .users
        .find_by_email(&payload.email)
        .await
        .map_err(AuthError::Upstream)?
        .ok_or(AuthError::NotFound)?;

    if !user.verify_password(&payload.password) {
        return Err(AuthError::NotFound);
    }

    if !user.is_active() {
        let message = match user.status {
            UserStatus::Inactive => "your account is inactive, confirm your email first",
            _ => "your account is locked",
        };
        return Err(AuthError::PolicyViolation(message.to_string()));
    }

    state.authenticator.login(&user, &sess).await?;
    info!(user_id = %user.id, "user signed in");

    Ok(Json(serde_json::json!({
        "user_id": user.id,
        "message": "signed in"
    })))
}

/// Sign-out endpoint
pub async fn logout(
    State(state): State<AppState>,
    Extension(sess): Extension<AuthSession>,
) -> Result<impl IntoResponse, AuthError> {
    state.authenticator.logout(&sess).await?;
    Ok(Json(serde_json::json!({ "message": "signed out" })))
}

/// Current identity, straight from the request carrier.
pub async fn me(Extension(sess): Extension<AuthSession>) -> impl IntoResponse {
    match sess.current_user() {
        CurrentUser::Identified(user) => Json(serde_json::json!({ "user": user })),
        CurrentUser::Anonymous => Json(serde_json::json!({ "user": null })),
    }
}

/// Request a password-reset link. The confirmation is identical whether or
/// not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let source_ip = ip_from_headers(&headers).unwrap_or_else(|| "unknown".to_string());

    match state.broker.send_reset_link(&source_ip, &payload.email).await {
        Ok(()) => {}
        Err(AuthError::NotFound) => {
            info!("password reset requested for unknown email");
        }
        Err(err) => return Err(err),
    }

    Ok(Json(serde_json::json!({
        "message": "If that account exists, a reset link is on its way."
    })))
}

/// Complete a password reset and sign the user in with the new credentials.
pub async fn reset_password(
    State(state): State<AppState>,
    Extension(sess): Extension<AuthSession>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(mut request) = state.broker.validate_reset(&payload.uid, &payload.token).await
    else {
        return Err(AuthError::TokenInvalid);
    };
    request.new_password = payload.password;
    request.confirm_password = payload.confirm_password;

    let users = state.users.clone();
    state
        .broker
        .resets(&request, |mut user, password| async move {
            user.set_password(&password)?;
            users.save(&user).await
        })
        .await
        .map_err(|code| match code {
            CompleteError::Upstream => {
                AuthError::Upstream(anyhow::anyhow!("password reset failed"))
            }
            policy => AuthError::PolicyViolation(policy.to_string()),
        })?;

    let user = state
        .users
        .find_by_id(request.user.id)
        .await
        .map_err(AuthError::Upstream)?
        .ok_or(AuthError::NotFound)?;
    state.authenticator.login(&user, &sess).await?;
    info!(user_id = %user.id, "password reset completed");

    Ok(Json(serde_json::json!({ "message": "password updated" })))
}

/// Start an OAuth2 sign-in with the named provider.
pub async fn oauth_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Extension(sess): Extension<AuthSession>,
) -> Result<Redirect, AuthError> {
    let flow = state
        .oauth_providers
        .get(&provider)
        .ok_or(AuthError::NotFound)?;
    let url = flow.handle_login(&sess)?;
    Ok(Redirect::temporary(&url))
}

/// Finish an OAuth2 sign-in. Any failure aborts before login; nothing here
/// completes a session on error.
pub async fn oauth_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
    Extension(sess): Extension<AuthSession>,
) -> Result<Redirect, AuthError> {
    let flow = state
        .oauth_providers
        .get(&provider)
        .ok_or(AuthError::NotFound)?;
    let target = flow.handle_callback(&sess, &params).await?;
    Ok(Redirect::temporary(&target))
}
