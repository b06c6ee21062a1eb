use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use tracing::{debug, info};

use renteasy_auth::password::{hash_password, verify_password};
use renteasy_auth::{TokenPair, TokenService};
use renteasy_db::Database;
use renteasy_types::api::{
    AuthResponse, LoginRequest, RefreshResponse, RegisterRequest, UpdateRoleRequest,
};
use renteasy_types::models::{AuthUser, User};

use crate::error::ApiError;
use crate::run_blocking;

pub const REFRESH_COOKIE: &str = "refresh_token";

const MIN_PASSWORD_LEN: usize = 6;

/// Roles a user may pick for themselves. New accounts start as `user`.
const SELECTABLE_ROLES: &[&str] = &["landlord", "tenant"];

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub tokens: Arc<TokenService>,
    /// Adds `Secure` to the refresh cookie. Off for plain-HTTP local setups.
    pub secure_cookies: bool,
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::InvalidRequest)?;

    let email = req.email.trim().to_string();
    let first_name = req.first_name.trim();
    let last_name = req.last_name.trim();
    if !looks_like_email(&email)
        || req.password.len() < MIN_PASSWORD_LEN
        || first_name.is_empty()
        || last_name.is_empty()
    {
        return Err(ApiError::InvalidRequest);
    }
    let name = format!("{} {}", first_name, last_name);
    let phone = req
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string);

    let db = state.db.clone();
    let user = run_blocking(move || {
        if db.get_user_by_email(&email)?.is_some() {
            return Err(ApiError::EmailTaken);
        }

        let password_hash = hash_password(&req.password)?;
        // A concurrent registration can still win the race to the UNIQUE index
        let id = db
            .create_user(&email, &password_hash, &name, phone.as_deref())
            .map_err(|e| {
                if e.is_constraint_violation() {
                    ApiError::EmailTaken
                } else {
                    ApiError::Store(e)
                }
            })?;

        db.get_user_by_id(id)?
            .map(|row| row.to_user())
            .ok_or(ApiError::NotFound)
    })
    .await?;

    info!("Registered user {} ({})", user.id, user.email);

    let pair = issue_pair(&state, user.id)?;
    let jar = jar.add(refresh_cookie(&state, pair.refresh_token)?);

    Ok((
        StatusCode::CREATED,
        jar,
        Json(AuthResponse {
            user,
            access_token: pair.access_token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::InvalidRequest)?;
    if !looks_like_email(req.email.trim()) || req.password.is_empty() {
        return Err(ApiError::InvalidRequest);
    }

    let db = state.db.clone();
    let user = run_blocking(move || {
        // Unknown email and wrong password are indistinguishable to the caller
        let row = db
            .get_user_by_email(req.email.trim())?
            .ok_or(ApiError::InvalidCredentials)?;
        if !verify_password(&row.password_hash, &req.password) {
            return Err(ApiError::InvalidCredentials);
        }
        Ok(row.to_user())
    })
    .await?;

    debug!("User {} logged in", user.id);

    let pair = issue_pair(&state, user.id)?;
    let jar = jar.add(refresh_cookie(&state, pair.refresh_token)?);

    Ok((
        jar,
        Json(AuthResponse {
            user,
            access_token: pair.access_token,
        }),
    ))
}

/// Rotates the refresh cookie into a new pair. The old refresh token is not
/// revoked and keeps working until it expires.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::RefreshTokenMissing)?;

    let pair = state.tokens.rotate(&token).map_err(|e| {
        debug!("Refresh rejected: {}", e);
        ApiError::InvalidRefreshToken
    })?;

    let jar = jar.add(refresh_cookie(&state, pair.refresh_token)?);
    Ok((
        jar,
        Json(RefreshResponse {
            access_token: pair.access_token,
        }),
    ))
}

pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(Cookie::build(REFRESH_COOKIE).path("/"));
    (jar, Json(json!({ "message": "logged_out" })))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<User>, ApiError> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        db.get_user_by_id(user.user_id)?
            .map(|row| row.to_user())
            .ok_or(ApiError::NotFound)
    })
    .await?;

    Ok(Json(user))
}

/// `PUT /auth/role`: switch the caller between landlord and tenant.
pub async fn update_role(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|_| ApiError::InvalidRequest)?;
    if !SELECTABLE_ROLES.contains(&req.role.as_str()) {
        return Err(ApiError::InvalidRequest);
    }

    let db = state.db.clone();
    let role = req.role.clone();
    let updated = run_blocking(move || Ok(db.update_user_role(user.user_id, &role)?)).await?;
    if !updated {
        return Err(ApiError::NotFound);
    }

    info!("User {} switched role to {}", user.user_id, req.role);
    Ok(Json(json!({ "message": "role_updated" })))
}

fn issue_pair(state: &AppState, user_id: i64) -> Result<TokenPair, ApiError> {
    state.tokens.issue_pair(user_id).map_err(ApiError::Token)
}

fn refresh_cookie(state: &AppState, token: String) -> Result<Cookie<'static>, ApiError> {
    let secure = if state.secure_cookies { "; Secure" } else { "" };
    let raw = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        REFRESH_COOKIE,
        token,
        state.tokens.refresh_ttl().num_seconds(),
        secure
    );
    Cookie::parse(raw).map_err(|e| ApiError::Cookie(e.to_string()))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}
