pub mod auth;
pub mod chat;
pub mod error;
pub mod middleware;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tracing::error;

use crate::auth::AppState;
use crate::error::ApiError;

/// Account and chat REST routes. Everything except register, login, refresh
/// and logout sits behind `require_auth`.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/role", put(auth::update_role))
        .route("/chat/start/{property_id}", post(chat::start_conversation))
        .route("/chat/conversations", get(chat::list_conversations))
        .route("/chat/{conversation_id}/messages", get(chat::list_messages))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

/// Run blocking DB or hashing work off the async runtime.
pub(crate) async fn run_blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Join(e)
    })?
}
