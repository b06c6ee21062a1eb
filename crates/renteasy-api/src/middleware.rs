use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use renteasy_auth::Audience;

use crate::auth::AppState;
use crate::error::ApiError;

/// Verify the `Authorization: Bearer` access token and attach the caller as
/// an [`AuthUser`](renteasy_types::models::AuthUser) extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingAuthorization)?;

    let token = match auth_header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            token.trim()
        }
        _ => return Err(ApiError::InvalidAuthorization),
    };

    let claims = state
        .tokens
        .verify(token, Audience::Access)
        .map_err(ApiError::InvalidToken)?;

    req.extensions_mut().insert(claims.auth_user());
    Ok(next.run(req).await)
}
