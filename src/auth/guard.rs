//! Per-request gate. Public paths pass untouched; everything else needs a
//! valid session token, from the `Authorization: Bearer` header or the
//! session cookie.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    auth::{claims::Claims, jwt::SessionKeys},
    error::AppError,
    state::AppState,
};

pub const SESSION_COOKIE: &str = "logistics_session";

/// Reachable without a session: sign-in pages, registration and the
/// federated handshake.
pub const PUBLIC_PATHS: &[&str] = &[
    "/login",
    "/register",
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/logout",
    "/api/auth/providers",
    "/api/auth/google",
    "/api/auth/google/callback",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Public,
    Authenticated(Claims),
    Denied,
}

pub fn is_public(path: &str) -> bool {
    let path = match path.strip_suffix('/') {
        Some(p) if !p.is_empty() => p,
        _ => path,
    };
    PUBLIC_PATHS.contains(&path)
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

pub fn admit(path: &str, token: Option<&str>, keys: &SessionKeys, now: OffsetDateTime) -> Admission {
    if is_public(path) {
        return Admission::Public;
    }
    match token.and_then(|t| keys.validate_at(t, now)) {
        Some(claims) => Admission::Authenticated(claims),
        None => Admission::Denied,
    }
}

pub async fn route_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let token = session_token(req.headers());

    match admit(&path, token.as_deref(), &state.keys, OffsetDateTime::now_utc()) {
        Admission::Public => next.run(req).await,
        Admission::Authenticated(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Admission::Denied => {
            debug!(%path, had_token = token.is_some(), "request denied");
            deny(&path)
        }
    }
}

fn deny(path: &str) -> Response {
    if path.starts_with("/api/") {
        return AppError::NotAuthenticated.into_response();
    }
    let target = format!("/login?callbackUrl={}", urlencoding::encode(path));
    Redirect::to(&target).into_response()
}
