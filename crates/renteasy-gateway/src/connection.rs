use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use renteasy_auth::{Audience, TokenError, TokenService};
use renteasy_db::{ChatStore, StoreError};
use renteasy_types::events::{ErrorFrame, InboundFrame, OutboundFrame};
use renteasy_types::models::{AuthUser, MessageKind};

use crate::hub::{Hub, LiveSession, Payload, SessionHandle};

/// Everything a chat socket needs, shared by all connections.
#[derive(Clone)]
pub struct GatewayState {
    pub hub: Hub,
    pub store: Arc<dyn ChatStore>,
    pub tokens: Arc<TokenService>,
}

/// Lifecycle of one chat connection. States are only ever entered in order;
/// a failed handshake goes straight from `Connecting` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Streaming,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated) | (Connecting, Closed) | (Authenticated, Streaming) | (Streaming, Closed)
        )
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.can_transition_to(next),
            "invalid session transition {:?} -> {:?}",
            self,
            next
        );
        *self = next;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid conversation id")]
    InvalidConversationId,

    #[error("missing token")]
    MissingToken,

    #[error("token rejected: {0}")]
    Token(#[from] TokenError),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("user is not a participant of this conversation")]
    NotParticipant,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl HandshakeError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidConversationId => (StatusCode::BAD_REQUEST, "invalid_conversation_id"),
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "missing_token"),
            Self::Token(TokenError::Expired) => (StatusCode::UNAUTHORIZED, "token_expired"),
            Self::Token(_) => (StatusCode::UNAUTHORIZED, "invalid_token"),
            Self::ConversationNotFound => (StatusCode::NOT_FOUND, "conversation_not_found"),
            Self::NotParticipant => (StatusCode::FORBIDDEN, "forbidden"),
            Self::Store(_) | Self::Join(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Chat handshake failed: {}", self);
        } else {
            debug!("Chat handshake rejected: {}", self);
        }
        (status, Json(json!({ "error": code }))).into_response()
    }
}

/// A malformed frame from an authenticated peer. Ends the session.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("binary frames are not supported")]
    UnexpectedBinary,
}

#[derive(Debug)]
enum SessionEnd {
    ClientClosed,
    Transport(String),
    Protocol(ProtocolError),
    WriterClosed,
}

impl SessionEnd {
    fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Self::Protocol(e) => Some(CloseFrame {
                code: close_code::PROTOCOL,
                reason: e.to_string().into(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

/// `GET /ws/chat/{conversation_id}?token=...`
///
/// The token may also arrive as `Authorization: Bearer`. Token and
/// membership are both checked before the upgrade, so a rejected client never
/// gets a socket and nothing is registered.
pub async fn ws_chat(
    State(state): State<GatewayState>,
    Path(raw_conversation_id): Path<String>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, HandshakeError> {
    let conversation_id = parse_conversation_id(&raw_conversation_id)?;

    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers))
        .ok_or(HandshakeError::MissingToken)?;

    let user = state.tokens.verify(&token, Audience::Access)?.auth_user();

    let store = state.store.clone();
    let conversation = tokio::task::spawn_blocking(move || store.get_conversation(conversation_id))
        .await??
        .ok_or(HandshakeError::ConversationNotFound)?;
    if !conversation.has_participant(user.user_id) {
        return Err(HandshakeError::NotParticipant);
    }

    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!("Chat upgrade failed for user {}: {}", user.user_id, e);
        })
        .on_upgrade(move |socket| handle_connection(socket, state, user, conversation_id)))
}

fn parse_conversation_id(raw: &str) -> Result<i64, HandshakeError> {
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(HandshakeError::InvalidConversationId),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Unregisters the session when dropped, whichever way the connection ends.
struct Registration {
    hub: Hub,
    handle: SessionHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.handle);
    }
}

/// Drives one authenticated socket until it closes.
pub async fn handle_connection(
    socket: WebSocket,
    state: GatewayState,
    user: AuthUser,
    conversation_id: i64,
) {
    let mut lifecycle = SessionState::Connecting;
    lifecycle.advance(SessionState::Authenticated);

    let session = LiveSession::new(user.user_id, conversation_id);
    let outbound = state.hub.register(session.clone());
    let registration = Registration {
        hub: state.hub.clone(),
        handle: session.handle,
    };

    lifecycle.advance(SessionState::Streaming);
    info!(
        "User {} joined conversation {} (session {})",
        user.user_id, conversation_id, session.handle
    );

    let end = run_connection_loop(socket, outbound, &state, &session).await;

    drop(registration);
    lifecycle.advance(SessionState::Closed);

    match &end {
        SessionEnd::Protocol(e) => warn!(
            "User {} left conversation {}: protocol error: {}",
            user.user_id, conversation_id, e
        ),
        SessionEnd::Transport(e) => info!(
            "User {} left conversation {}: transport error: {}",
            user.user_id, conversation_id, e
        ),
        SessionEnd::ClientClosed | SessionEnd::WriterClosed => info!(
            "User {} left conversation {}",
            user.user_id, conversation_id
        ),
    }
}

async fn run_connection_loop(
    socket: WebSocket,
    outbound: mpsc::Receiver<Payload>,
    state: &GatewayState,
    session: &LiveSession,
) -> SessionEnd {
    let (sender, mut receiver) = socket.split();
    let (close_tx, close_rx) = oneshot::channel::<Option<CloseFrame>>();

    let mut send_task = tokio::spawn(write_loop(sender, outbound, close_rx));

    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task =
        tokio::spawn(async move { read_loop(&mut receiver, &recv_state, &recv_session).await });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            SessionEnd::WriterClosed
        }
        result = &mut recv_task => {
            let end = result.unwrap_or_else(|e| {
                error!("Chat read task failed: {}", e);
                SessionEnd::Transport(e.to_string())
            });
            let _ = close_tx.send(end.close_frame());
            let _ = send_task.await;
            end
        }
    }
}

/// Drains the hub queue into the socket. Stops when the queue closes (the hub
/// dropped this session), on a write error, or when asked to close.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Payload>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
) {
    loop {
        tokio::select! {
            biased;

            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if sender.send(Message::Text(payload.as_ref().into())).await.is_err() {
                    break;
                }
            }
            frame = &mut close_rx => {
                if let Ok(Some(frame)) = frame {
                    let _ = sender.send(Message::Close(Some(frame))).await;
                }
                break;
            }
        }
    }
}

/// Reads frames in order. Each valid frame is persisted before the next one
/// is read, which keeps one sender's messages in transmission order.
async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    state: &GatewayState,
    session: &LiveSession,
) -> SessionEnd {
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => return SessionEnd::Transport(e.to_string()),
        };

        match msg {
            Message::Text(text) => match decode_frame(text.as_str()) {
                Ok(frame) => relay_message(state, session, frame).await,
                Err(e) => {
                    warn!(
                        "User {} sent a bad frame: {} -- raw: {}",
                        session.user_id,
                        e,
                        truncate(text.as_str(), 200)
                    );
                    return SessionEnd::Protocol(e);
                }
            },
            Message::Binary(_) => return SessionEnd::Protocol(ProtocolError::UnexpectedBinary),
            Message::Close(_) => return SessionEnd::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    SessionEnd::ClientClosed
}

fn decode_frame(text: &str) -> Result<InboundFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Persist, then broadcast. A message that failed to persist is never
/// broadcast; the sender alone gets an error frame and the session goes on.
async fn relay_message(state: &GatewayState, session: &LiveSession, frame: InboundFrame) {
    let store = state.store.clone();
    let conversation_id = session.conversation_id;
    let sender_id = session.user_id;

    let persisted = tokio::task::spawn_blocking(move || {
        store.append_message(conversation_id, sender_id, MessageKind::Text, &frame.content)
    })
    .await;

    let message = match persisted {
        Ok(Ok(message)) => message,
        Ok(Err(e)) => {
            warn!(
                "Message from user {} in conversation {} not persisted: {}",
                sender_id, conversation_id, e
            );
            notify_not_persisted(state, session);
            return;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            notify_not_persisted(state, session);
            return;
        }
    };

    let json = match serde_json::to_string(&OutboundFrame::from(&message)) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to encode message {}: {}", message.id, e);
            return;
        }
    };

    let delivered = state.hub.broadcast(conversation_id, json.into());
    debug!(
        "Message {} in conversation {} delivered to {} session(s)",
        message.id, conversation_id, delivered
    );
}

fn notify_not_persisted(state: &GatewayState, session: &LiveSession) {
    if let Ok(json) = serde_json::to_string(&ErrorFrame::message_not_persisted()) {
        state.hub.send_to(session.handle, json.into());
    }
}
