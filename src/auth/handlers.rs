use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, OauthCallbackQuery, ProvidersResponse, PublicUser,
            RegisterRequest, RegisterResponse, SessionResponse,
        },
        extractors::{ApiJson, AuthUser},
        guard::SESSION_COOKIE,
        jwt::{OAUTH_STATE_TTL, SESSION_TTL},
        repo_types::{Identity, Role},
        services::{authenticate_credentials, register_user, resolve_federated, NewUser},
    },
    error::AppError,
    state::AppState,
};

const OAUTH_STATE_COOKIE: &str = "logistics_oauth_state";
const OAUTH_FAILURE_REDIRECT: &str = "/login?error=OAuthSignin";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/session", get(session))
        .route("/api/auth/providers", get(providers))
        .route("/api/auth/google", get(google_start))
        .route("/api/auth/google/callback", get(google_callback))
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .path("/")
        .max_age(SESSION_TTL)
        .build()
}

fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

/// Mint a token for `identity` and attach it to the jar.
fn start_session(
    state: &AppState,
    jar: CookieJar,
    identity: &Identity,
) -> Result<(CookieJar, String, OffsetDateTime), AppError> {
    let (token, claims) = state.keys.issue(identity.id, identity.role)?;
    let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp).map_err(anyhow::Error::from)?;
    let secure = state.config.environment.is_production();
    let jar = jar.add(session_cookie(token.clone(), secure));
    Ok((jar, token, expires_at))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let new = NewUser::validate(
        payload.username.as_deref(),
        payload.email.as_deref(),
        payload.password.as_deref(),
    )
    .map_err(|e| {
        warn!(error = %e, "registration rejected");
        e
    })?;

    let identity = register_user(state.users.as_ref(), new, Role::User).await?;

    Ok(Json(RegisterResponse {
        success: true,
        message: "User created successfully",
        user: PublicUser {
            id: identity.id,
            username: identity.username,
            email: identity.email,
        },
    }))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    let identity = authenticate_credentials(
        state.users.as_ref(),
        payload.username.as_deref(),
        payload.password.as_deref(),
    )
    .await?;

    let (jar, token, expires_at) = start_session(&state, jar, &identity)?;
    info!(user_id = %identity.id, username = %identity.username, "user logged in");
    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            token,
            expires_at,
            user: identity,
        }),
    ))
}

/// Tokens are stateless; logging out only drops the cookie. A plain HTML
/// form post is sent back to the login page.
pub async fn logout(headers: HeaderMap, jar: CookieJar) -> Response {
    let jar = jar.remove(removal(SESSION_COOKIE));
    let from_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if from_form {
        (jar, Redirect::to("/login")).into_response()
    } else {
        (jar, StatusCode::NO_CONTENT).into_response()
    }
}

#[instrument(skip(state, jar))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    AuthUser(claims): AuthUser,
) -> Result<(CookieJar, Json<AuthResponse>), AppError> {
    // Re-read so role changes made since issuance take effect.
    let user = state
        .users
        .find_by_id(claims.sub)
        .await
        .map_err(|e| AppError::Dependency(e.into()))?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "refresh for a user that no longer exists");
            AppError::NotAuthenticated
        })?;
    let identity = Identity::from(&user);

    let (jar, token, expires_at) = start_session(&state, jar, &identity)?;
    Ok((
        jar,
        Json(AuthResponse {
            success: true,
            token,
            expires_at,
            user: identity,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn session(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<SessionResponse>, AppError> {
    let user = state
        .users
        .find_by_id(claims.sub)
        .await
        .map_err(|e| AppError::Dependency(e.into()))?
        .ok_or(AppError::NotAuthenticated)?;
    Ok(Json(SessionResponse {
        success: true,
        user: Identity::from(&user),
    }))
}

pub async fn providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        credentials: state.config.providers.credentials_enabled,
        google: state.config.providers.federated_enabled(),
    })
}

#[instrument(skip(state, jar))]
pub async fn google_start(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(provider) = state.google.as_ref() else {
        return AppError::NotFound("Google sign-in is not configured".into()).into_response();
    };

    let request = provider.authorize();
    let signed = match state
        .keys
        .sign_oauth_state(&request.state, &request.nonce, &request.pkce_verifier)
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to sign oauth state");
            return Redirect::to(OAUTH_FAILURE_REDIRECT).into_response();
        }
    };

    let cookie = Cookie::build((OAUTH_STATE_COOKIE, signed))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.environment.is_production())
        .path("/")
        .max_age(OAUTH_STATE_TTL)
        .build();

    (jar.add(cookie), Redirect::to(&request.url)).into_response()
}

#[instrument(skip(state, jar, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<OauthCallbackQuery>,
) -> Response {
    let Some(provider) = state.google.clone() else {
        return AppError::NotFound("Google sign-in is not configured".into()).into_response();
    };
    let jar_without_state = jar.clone().remove(removal(OAUTH_STATE_COOKIE));
    let fail = |jar: CookieJar| (jar, Redirect::to(OAUTH_FAILURE_REDIRECT)).into_response();

    if let Some(err) = &query.error {
        warn!(error = %err, "provider returned an error");
        return fail(jar_without_state);
    }

    let handshake = match jar
        .get(OAUTH_STATE_COOKIE)
        .and_then(|c| state.keys.verify_oauth_state(c.value()))
    {
        Some(h) if query.state.as_deref() == Some(h.state.as_str()) => h,
        _ => {
            warn!("oauth state missing or mismatched");
            return fail(jar_without_state);
        }
    };

    let Some(code) = query.code.as_deref() else {
        warn!("oauth callback without authorization code");
        return fail(jar_without_state);
    };

    let assertion = match provider
        .exchange_code(code, &handshake.pkce_verifier, &handshake.nonce)
        .await
    {
        Ok(a) => a,
        Err(e) => {
            error!(error = ?e, "oauth code exchange failed");
            return fail(jar_without_state);
        }
    };
    if !assertion.email_verified {
        warn!(email = %assertion.email, "provider email not verified");
        return fail(jar_without_state);
    }

    let identity = match resolve_federated(state.users.as_ref(), &assertion.email).await {
        Ok(id) => id,
        Err(e) => {
            if !matches!(e, AppError::Dependency(_)) {
                warn!(error = %e, "federated sign-in refused");
            } else {
                error!(error = ?e, "federated sign-in failed");
            }
            return fail(jar_without_state);
        }
    };

    match start_session(&state, jar_without_state.clone(), &identity) {
        Ok((jar, _, _)) => {
            info!(user_id = %identity.id, username = %identity.username, "user logged in via google");
            (jar, Redirect::to("/")).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to issue session after federated sign-in");
            fail(jar_without_state)
        }
    }
}
