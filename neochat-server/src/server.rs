//! Server core: shared state, WebSocket handler, and HTTP routes.
//!
//! A connection is authenticated once at handshake: the first frame must be
//! `Hello { token }`, verified before any registry mutation. After that the
//! connection is bound to its identity for life; send/delete requests run
//! through a [`ChatSession`], and fan-out events reach the connection through
//! the channel registered in the [`ConnectionRegistry`].
//!
//! Historical reads and HTTP-side deletes bypass the push path for the
//! request/response side but still fan out notifications through the router.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{delete, get};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use neochat_proto::message::{ChatMessage, MessageId, UserId};
use neochat_proto::wire::{self, ClientFrame, ErrorKind, ServerFrame};

use crate::auth::{Identity, TokenVerifier};
use crate::registry::{ConnId, ConnectionRegistry, FrameSender};
use crate::router::DeliveryRouter;
use crate::session::ChatSession;
use crate::store::MessageStore;

/// Shared server state: the one registry instance, the store, the router
/// over that registry, and the credential verifier.
pub struct AppState {
    /// Live connection table, owned here and injected everywhere else.
    pub registry: Arc<ConnectionRegistry>,
    /// Durable message storage.
    pub store: Arc<MessageStore>,
    /// Fan-out router over the registry.
    pub router: DeliveryRouter,
    /// Bearer credential verifier.
    pub verifier: TokenVerifier,
}

impl AppState {
    /// Wires the shared components together around a store and verifier.
    #[must_use]
    pub fn new(store: MessageStore, verifier: TokenVerifier) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = DeliveryRouter::new(Arc::clone(&registry));
        Self {
            registry,
            store: Arc::new(store),
            router,
            verifier,
        }
    }

    /// Builds a session for an authenticated caller.
    fn session(&self, identity: Identity) -> ChatSession {
        ChatSession::new(identity, Arc::clone(&self.store), self.router.clone())
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` frame and verify its token; refuse on failure
///    before any registry mutation.
/// 2. Register the connection and send `Welcome` back.
/// 3. Spawn a writer task draining the connection's channel.
/// 4. Run the read loop, executing one operation at a time.
/// 5. On disconnect, unregister the connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(token) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before handshake");
        return;
    };

    let identity = match state.verifier.verify(&token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "handshake rejected");
            let refusal = ServerFrame::Error {
                kind: ErrorKind::Unauthenticated,
                reason: e.to_string(),
            };
            let _ = send_frame(&mut ws_sender, &refusal).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Record the display name for read-side resolution. A failure here only
    // degrades name resolution, never the connection.
    if let Err(e) = state.store.upsert_user(&identity.id, &identity.username) {
        tracing::warn!(user_id = %identity.id, error = %e, "failed to record display name");
    }

    let conn_id = ConnId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.registry.register(&identity.id, conn_id, tx.clone()).await;

    let welcome = ServerFrame::Welcome {
        user_id: identity.id.clone(),
        username: identity.username.clone(),
    };
    if let Err(e) = send_frame(&mut ws_sender, &welcome).await {
        tracing::error!(user_id = %identity.id, error = %e, "failed to send Welcome");
        state.registry.unregister(conn_id).await;
        return;
    }

    tracing::info!(user_id = %identity.id, conn_id = %conn_id, "connection registered");

    // Writer task: forwards both direct responses and fan-out events from
    // the connection's channel to the WebSocket.
    let writer_user = identity.id.clone();
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Read loop. Each operation runs to completion before the next frame is
    // polled, so a disconnect mid-operation still persists and notifies;
    // only the final direct acknowledgment is lost.
    let session = state.session(identity.clone());
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Binary(data) => handle_client_frame(&session, &tx, &data).await,
            Message::Close(_) => {
                tracing::info!(user_id = %identity.id, "received close frame");
                break;
            }
            _ => {
                // Ignore text, ping, pong frames.
            }
        }
    }

    state.registry.unregister(conn_id).await;
    drop(tx);
    write_task.abort();
    tracing::info!(user_id = %identity.id, conn_id = %conn_id, "connection unregistered");
}

/// Waits for the first frame, expecting `Hello { token }`.
///
/// Returns the token, or `None` if the connection closes or the first frame
/// is not a valid `Hello`.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match wire::decode_client(&data) {
                Ok(ClientFrame::Hello { token }) => return Some(token),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode handshake frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip ping/pong frames during the handshake.
            }
        }
    }
    None
}

/// Executes one client request and queues the direct response on the
/// caller's own connection channel.
async fn handle_client_frame(session: &ChatSession, direct: &FrameSender, data: &[u8]) {
    let frame = match wire::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(user_id = %session.identity().id, error = %e, "failed to decode frame");
            let response = ServerFrame::Error {
                kind: ErrorKind::InvalidInput,
                reason: "malformed frame".to_string(),
            };
            queue_direct(direct, &response);
            return;
        }
    };

    let response = match frame {
        ClientFrame::Hello { .. } => ServerFrame::Error {
            kind: ErrorKind::InvalidInput,
            reason: "connection is already authenticated".to_string(),
        },
        ClientFrame::Send {
            recipient_id,
            content,
        } => match session.send(&recipient_id, &content).await {
            Ok(message) => ServerFrame::SendOk { message },
            Err(e) => e.to_frame(),
        },
        ClientFrame::DeleteMessage { message_id } => {
            match session.delete_message(&message_id).await {
                Ok(message_id) => ServerFrame::DeleteOk { message_id },
                Err(e) => e.to_frame(),
            }
        }
        ClientFrame::ClearConversation { peer_id } => {
            match session.clear_conversation(&peer_id).await {
                Ok(deleted) => ServerFrame::ClearOk { deleted },
                Err(e) => e.to_frame(),
            }
        }
    };

    queue_direct(direct, &response);
}

/// Queues a direct response on the connection's channel. A send failure
/// means the connection is already tearing down; the ack is simply lost.
fn queue_direct(direct: &FrameSender, frame: &ServerFrame) {
    if let Ok(bytes) = wire::encode_server(frame) {
        let _ = direct.send(Message::Binary(bytes.into()));
    }
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = wire::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

/// JSON error body returned by the HTTP routes.
#[derive(Debug, serde::Serialize)]
struct ErrorBody {
    error: String,
}

/// JSON body for a single deleted message.
#[derive(Debug, serde::Serialize)]
struct DeletedBody {
    message_id: MessageId,
}

/// JSON body for a cleared conversation.
#[derive(Debug, serde::Serialize)]
struct ClearedBody {
    deleted: Vec<MessageId>,
}

type HttpError = (StatusCode, Json<ErrorBody>);

fn http_error(status: StatusCode, reason: impl Into<String>) -> HttpError {
    (
        status,
        Json(ErrorBody {
            error: reason.into(),
        }),
    )
}

const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Verifies the `Authorization: Bearer` header and extracts the caller.
fn bearer_identity(state: &AppState, headers: &HeaderMap) -> Result<Identity, HttpError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    state
        .verifier
        .verify(token)
        .map_err(|e| http_error(StatusCode::UNAUTHORIZED, e.to_string()))
}

/// `GET /api/messages/{peer}` — full ordered conversation with a peer.
async fn http_conversation(
    State(state): State<Arc<AppState>>,
    Path(peer): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ChatMessage>>, HttpError> {
    let identity = bearer_identity(&state, &headers)?;
    let session = state.session(identity);
    let messages = session
        .history(&UserId::new(peer))
        .map_err(|e| http_error(status_for(e.kind()), e.to_string()))?;
    Ok(Json(messages))
}

/// `DELETE /api/messages/{message_id}` — sender-only delete with the same
/// dual notification as the WebSocket path.
async fn http_delete_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeletedBody>, HttpError> {
    let identity = bearer_identity(&state, &headers)?;
    let message_id = MessageId::parse(&message_id)
        .map_err(|_| http_error(StatusCode::BAD_REQUEST, "invalid message id"))?;
    let session = state.session(identity);
    let message_id = session
        .delete_message(&message_id)
        .await
        .map_err(|e| http_error(status_for(e.kind()), e.to_string()))?;
    Ok(Json(DeletedBody { message_id }))
}

/// `DELETE /api/messages/clear/{peer}` — bulk delete of a conversation,
/// notifying both participants per deleted id.
async fn http_clear_conversation(
    State(state): State<Arc<AppState>>,
    Path(peer): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ClearedBody>, HttpError> {
    let identity = bearer_identity(&state, &headers)?;
    let session = state.session(identity);
    let deleted = session
        .clear_conversation(&UserId::new(peer))
        .await
        .map_err(|e| http_error(status_for(e.kind()), e.to_string()))?;
    Ok(Json(ClearedBody { deleted }))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Starts the server on the given address and returns the bound address and
/// a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code;
/// tests bind `127.0.0.1:0` for an OS-assigned port.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    state: Arc<AppState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route(
            "/api/messages/{target}",
            get(http_conversation).delete(http_delete_message),
        )
        .route("/api/messages/clear/{peer}", delete(http_clear_conversation))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}
