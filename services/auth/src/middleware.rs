//! Request middleware: the session layer and per-route throttling

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::error;

use crate::AppState;
use crate::authenticator::AuthSession;
use crate::error::AuthError;
use crate::rate_limiter::RateLimiter;
use crate::session::{SESSION_COOKIE, Session};

/// Load (or start) the session, resolve the identity it carries, and attach
/// both to the request. On the way out, persist the session if anything
/// changed and hand a fresh session id to the client. Identity resolution
/// failures leave the request anonymous; they never fail the request.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let mut fresh = false;
    let session = match load_session(&state, &jar).await {
        Some(session) => session,
        None => {
            fresh = true;
            match Session::generate() {
                Ok(session) => session,
                Err(err) => {
                    error!("failed to generate session id: {err}");
                    return AuthError::Upstream(err.into()).into_response();
                }
            }
        }
    };

    let sess = AuthSession::new(session);
    state.authenticator.authenticate(&sess).await;
    request.extensions_mut().insert(sess.clone());

    let response = next.run(request).await;

    if sess.take_dirty() {
        if let Err(err) = state.sessions.save(&sess.snapshot()).await {
            error!("failed to persist session: {err:#}");
        } else {
            sess.mark_saved();
        }
    }

    // the client only needs the cookie once the session actually exists
    // server-side
    if fresh && sess.persisted() {
        let jar = CookieJar::new().add(session_cookie(sess.id()));
        return (jar, response).into_response();
    }

    response
}

/// Shed the request if its key has exhausted its bucket. 429 is distinct
/// from every authentication failure; clients may retry after the refill
/// interval.
pub async fn throttle(limiter: Arc<RateLimiter>, request: Request, next: Next) -> Response {
    if limiter.get(&request).await.allow() {
        next.run(request).await
    } else {
        AuthError::RateLimited.into_response()
    }
}

async fn load_session(state: &AppState, jar: &CookieJar) -> Option<Session> {
    let cookie = jar.get(SESSION_COOKIE)?;
    match state.sessions.load(cookie.value()).await {
        Ok(session) => session,
        Err(err) => {
            error!("failed to load session: {err:#}");
            None
        }
    }
}

fn session_cookie(id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie
}
