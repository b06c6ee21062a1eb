use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::debug;

use renteasy_db::{ChatStore, Database};
use renteasy_types::api::{ConversationList, ConversationSummary, MessageList};
use renteasy_types::models::{AuthUser, Conversation};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::run_blocking;

/// `POST /chat/start/{property_id}`: open (or reopen) the caller's thread
/// with the listing's owner.
pub async fn start_conversation(
    State(state): State<AppState>,
    Path(raw_property_id): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Conversation>, ApiError> {
    let property_id = parse_id(&raw_property_id).ok_or(ApiError::InvalidPropertyId)?;

    let db = state.db.clone();
    let conversation = run_blocking(move || {
        let property = db
            .get_property(property_id)?
            .ok_or(ApiError::PropertyNotFound)?;
        if property.owner_id == user.user_id {
            return Err(ApiError::OwnProperty);
        }
        Ok(db.find_or_create_conversation(Some(property.id), user.user_id, property.owner_id)?)
    })
    .await?;

    debug!(
        "User {} opened conversation {} on property {}",
        user.user_id, conversation.id, property_id
    );
    Ok(Json(conversation))
}

/// `GET /chat/{conversation_id}/messages`, oldest first. Only the two
/// participants may read a conversation.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(raw_conversation_id): Path<String>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MessageList>, ApiError> {
    let conversation_id = parse_id(&raw_conversation_id).ok_or(ApiError::InvalidConversationId)?;

    let db = state.db.clone();
    let items = run_blocking(move || {
        let conversation = db
            .get_conversation(conversation_id)?
            .ok_or(ApiError::ConversationNotFound)?;
        if !conversation.has_participant(user.user_id) {
            return Err(ApiError::Forbidden);
        }
        Ok(db.list_messages(conversation_id)?)
    })
    .await?;

    Ok(Json(MessageList { items }))
}

/// `GET /chat/conversations`, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ConversationList>, ApiError> {
    let db = state.db.clone();
    let conversations = run_blocking(move || {
        db.list_conversations_for_user(user.user_id)?
            .into_iter()
            .map(|conversation| summarize(&db, user.user_id, conversation))
            .collect::<Result<Vec<_>, _>>()
    })
    .await?;

    Ok(Json(ConversationList { conversations }))
}

fn summarize(
    db: &Database,
    user_id: i64,
    conversation: Conversation,
) -> Result<ConversationSummary, ApiError> {
    let property = match conversation.property_id {
        Some(id) => db.get_property(id)?,
        None => None,
    };
    let counterpart_id = conversation.counterpart(user_id);
    let counterpart = db.get_user_by_id(counterpart_id)?;
    let last_message = db.last_message(conversation.id)?;
    let unread_count = db.unread_count(conversation.id, user_id)?;

    Ok(ConversationSummary {
        property_title: property.as_ref().map(|p| p.title.clone()),
        property_price: property.as_ref().map(|p| p.price),
        counterpart_id,
        counterpart_name: counterpart.map(|u| u.name),
        last_message,
        unread_count,
        conversation,
    })
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}
