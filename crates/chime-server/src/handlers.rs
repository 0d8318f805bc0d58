//! HTTP and WebSocket handlers for the Chime server.
//!
//! Chat messages enter through `POST /rooms/:room_id/messages` or a `send`
//! frame on a WebSocket session. Both paths record the message in its room
//! and hand it to the dispatcher.

use crate::config::Config;
use crate::metrics::{self, SessionMetricsGuard};
use crate::realtime::{MeteredStore, SessionBroadcaster};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use chime_core::{
    Collaborators, DispatchError, DispatchOutcome, Dispatcher, InMemoryNotificationStore,
    InMemoryRooms, RoomError, SessionRegistry,
};
use chime_protocol::{codec, now_millis, Author, ChatMessage, Frame, Notification, RoomId, UserId};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Errors returned by the HTTP and WebSocket API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Message body is empty.
    #[error("Message content is empty")]
    EmptyMessage,

    /// Message body exceeds the configured limit.
    #[error("Message is longer than {max} characters")]
    MessageTooLong {
        /// Configured limit.
        max: usize,
    },

    /// Room operation failed.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::EmptyMessage | ApiError::MessageTooLong { .. } => StatusCode::BAD_REQUEST,
            ApiError::Room(RoomError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Room(RoomError::NotAMember { .. }) => StatusCode::FORBIDDEN,
            ApiError::Room(RoomError::AlreadyExists(_) | RoomError::Full(_)) => {
                StatusCode::CONFLICT
            }
            ApiError::Dispatch(DispatchError::InvalidMessage(_)) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(DispatchError::Collaborator(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Error code carried in `error` frames.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self.status() {
            StatusCode::BAD_REQUEST => 1001,
            StatusCode::FORBIDDEN => 1003,
            StatusCode::NOT_FOUND => 1004,
            StatusCode::CONFLICT => 1009,
            _ => 1011,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Body of `POST /rooms`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub room_id: RoomId,
    pub owner: UserId,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Body of `POST /rooms/:room_id/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessage {
    pub from_uid: UserId,
    pub content: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub displayname: Option<String>,
    /// Join, leave and rename notices.
    #[serde(default)]
    pub system: bool,
}

impl PostMessage {
    /// A plain chat message from a user.
    #[must_use]
    pub fn chat(from_uid: impl Into<UserId>, content: impl Into<String>) -> Self {
        Self {
            from_uid: from_uid.into(),
            content: content.into(),
            username: None,
            displayname: None,
            system: false,
        }
    }

    fn author(&self) -> Author {
        let username = self
            .username
            .clone()
            .unwrap_or_else(|| self.from_uid.to_string());
        let author = Author::new(self.from_uid.clone(), username);
        match &self.displayname {
            Some(name) => author.with_displayname(name.clone()),
            None => author,
        }
    }
}

/// Response to a posted message.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedMessage {
    pub message: ChatMessage,
    /// Users the realtime event went to.
    pub recipients: usize,
    /// Messages now merged in the sender's notification window.
    pub coalesced: usize,
}

/// Body of `POST /rooms/:room_id/read` and `POST /users/:uid/blocks`.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    pub uid: UserId,
    /// Lift the block instead of adding it.
    #[serde(default)]
    pub unblock: bool,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub online_users: usize,
    pub sessions: usize,
    /// Open debounce windows, read from the queue at request time.
    pub pending_windows: usize,
}

/// Query string of `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub uid: UserId,
}

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Rooms, blocks and unread state.
    pub rooms: Arc<InMemoryRooms>,
    /// Open realtime sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Notification inboxes.
    pub store: Arc<InMemoryNotificationStore>,
    /// The chat dispatcher.
    pub dispatcher: Dispatcher,
    next_session: AtomicU64,
}

impl AppState {
    /// Create new app state with in-memory collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let rooms = Arc::new(InMemoryRooms::with_max_members(config.limits.max_room_members));
        let sessions = Arc::new(SessionRegistry::new());
        let store = Arc::new(InMemoryNotificationStore::new());

        let services = Collaborators {
            rooms: rooms.clone(),
            filter: rooms.clone(),
            presence: sessions.clone(),
            broadcaster: Arc::new(SessionBroadcaster::new(sessions.clone(), rooms.clone())),
            store: Arc::new(MeteredStore::new(store.clone())),
        };
        let dispatcher = Dispatcher::new(config.dispatcher(), services);

        Self {
            config,
            rooms,
            sessions,
            store,
            dispatcher,
            next_session: AtomicU64::new(1),
        }
    }

    /// Record a message in a room and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is empty or too long, the room does
    /// not accept it, or dispatch fails.
    pub async fn post_message(
        &self,
        room_id: RoomId,
        request: PostMessage,
    ) -> Result<PostedMessage, ApiError> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        let max = self.config.limits.max_message_length;
        if content.chars().count() > max {
            return Err(ApiError::MessageTooLong { max });
        }

        let mut message = ChatMessage::new(room_id.clone(), request.author(), content);
        if request.system {
            message = message.as_system();
        }
        let message = self.rooms.record_message(message)?;

        let start = Instant::now();
        let outcome = self
            .dispatcher
            .handle_message(&request.from_uid, &room_id, message.clone())
            .await
            .map_err(|e| {
                metrics::record_error("dispatch");
                e
            })?;
        metrics::record_latency(start.elapsed().as_secs_f64());
        metrics::record_message(message.system);

        let (recipients, coalesced) = match outcome {
            DispatchOutcome::Vetoed => (0, 0),
            DispatchOutcome::Broadcast { recipients } => (recipients, 0),
            DispatchOutcome::Queued {
                recipients,
                coalesced,
            } => (recipients, coalesced),
        };

        Ok(PostedMessage {
            message,
            recipients,
            coalesced,
        })
    }

    /// Mark a room read and push the new unread count to the user's sessions.
    pub fn mark_read(&self, uid: &UserId, room_id: &RoomId) -> usize {
        self.rooms.mark_read(uid, room_id);
        let count = self.rooms.unread_count(uid);
        self.sessions.send(uid, Frame::UnreadCount { count });
        count
    }

    /// Current service health.
    #[must_use]
    pub fn health(&self) -> Health {
        let stats = self.sessions.stats();
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            online_users: stats.online_users,
            sessions: stats.sessions,
            pending_windows: self.dispatcher.queue().len(),
        }
    }

    fn next_session_id(&self) -> String {
        let seq = self.next_session.fetch_add(1, Ordering::Relaxed);
        format!("sess_{}_{}", now_millis(), seq)
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/rooms", post(create_room_handler))
        .route("/rooms/:room_id/messages", post(post_message_handler))
        .route("/rooms/:room_id/read", post(mark_read_handler))
        .route("/users/:uid/blocks", post(block_handler))
        .route("/users/:uid/notifications", get(notifications_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let heartbeat = spawn_heartbeat(
        state.clone(),
        Duration::from_millis(config.heartbeat.interval_ms),
        Duration::from_millis(config.heartbeat.timeout_ms),
    );

    let listener = TcpListener::bind(addr).await?;

    info!("Chime server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?uid=<uid>",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    heartbeat.abort();
    let dropped = state.dispatcher.shutdown();
    info!(dropped, "Chime server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

/// Periodically drop sessions that stopped sending heartbeats.
fn spawn_heartbeat(state: Arc<AppState>, interval: Duration, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let pruned = state.sessions.prune_stale(timeout);
            if !pruned.is_empty() {
                debug!(pruned = pruned.len(), "Pruned stale sessions");
            }
        }
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(state.health())
}

async fn create_room_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoom>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .rooms
        .create_room(request.room_id.clone(), request.owner, request.members)?;
    let members = state.rooms.members(&request.room_id).unwrap_or_default();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "roomId": request.room_id, "members": members })),
    ))
}

async fn post_message_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    Json(request): Json<PostMessage>,
) -> Result<Json<PostedMessage>, ApiError> {
    state.post_message(room_id, request).await.map(Json)
}

async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    Json(request): Json<UserRequest>,
) -> impl IntoResponse {
    let unread = state.mark_read(&request.uid, &room_id);
    Json(serde_json::json!({ "uid": request.uid, "unread": unread }))
}

async fn block_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<UserId>,
    Json(request): Json<UserRequest>,
) -> StatusCode {
    if request.unblock {
        state.rooms.unblock(&uid, &request.uid);
    } else {
        state.rooms.block(&uid, &request.uid);
    }
    debug!(uid = %uid, target = %request.uid, unblock = request.unblock, "Block list updated");
    StatusCode::NO_CONTENT
}

async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    Path(uid): Path<UserId>,
) -> Json<Vec<Notification>> {
    Json(state.store.inbox(&uid))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, query.uid))
}

type WsSender = SplitSink<WebSocket, Message>;

/// Handle a WebSocket session.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, uid: UserId) {
    let _metrics_guard = SessionMetricsGuard::new();
    let session_id = state.next_session_id();
    let mut frames = state.sessions.connect(&uid, session_id.clone());
    let closed = state
        .sessions
        .close_signal(&uid, &session_id)
        .unwrap_or_else(|| Arc::new(Notify::new()));

    let (mut sender, mut receiver) = socket.split();

    let connected = Frame::connected(
        session_id.clone(),
        uid.clone(),
        state.config.heartbeat_hint_ms(),
    );
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(uid = %uid, session = %session_id, "Failed to send Connected frame");
        state.sessions.disconnect(&uid, &session_id);
        return;
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            _ = closed.notified() => {
                debug!(uid = %uid, session = %session_id, "Session pruned");
                break;
            }

            // Frames addressed to this user
            outbound = frames.recv() => {
                match outbound {
                    Ok(frame) => {
                        if send_frame(&mut sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(uid = %uid, session = %session_id, skipped, "Session lagged");
                        metrics::record_error("lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(uid = %uid, session = %session_id, "User channel closed");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        read_buffer.extend_from_slice(&data);
                        if !drain_frames(&mut read_buffer, &uid, &session_id, &state, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                        if !drain_frames(&mut read_buffer, &uid, &session_id, &state, &mut sender).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        state.sessions.touch(&uid, &session_id);
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.sessions.touch(&uid, &session_id);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(uid = %uid, session = %session_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(uid = %uid, session = %session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(uid = %uid, session = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.sessions.disconnect(&uid, &session_id);
    debug!(uid = %uid, session = %session_id, "WebSocket disconnected");
}

/// Decode and handle every complete frame in the buffer.
///
/// Returns `false` when the session should close.
async fn drain_frames(
    buffer: &mut BytesMut,
    uid: &UserId,
    session_id: &str,
    state: &Arc<AppState>,
    sender: &mut WsSender,
) -> bool {
    loop {
        match codec::decode_from(buffer) {
            Ok(Some(frame)) => {
                state.sessions.touch(uid, session_id);
                let reply = handle_frame(frame, uid, session_id, state).await;
                if let Some(reply) = reply {
                    if send_frame(sender, &reply).await.is_err() {
                        return false;
                    }
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(uid = %uid, session = %session_id, error = %e, "Undecodable frame");
                metrics::record_error("protocol");
                // Framing is lost, nothing after this point can be trusted
                let _ = send_frame(sender, &Frame::error(0, 1002, e.to_string())).await;
                return false;
            }
        }
    }
}

/// Handle a decoded frame, returning the reply to send back.
async fn handle_frame(
    frame: Frame,
    uid: &UserId,
    session_id: &str,
    state: &Arc<AppState>,
) -> Option<Frame> {
    match frame {
        Frame::Send {
            id,
            room_id,
            content,
        } => {
            let request = PostMessage::chat(uid.clone(), content);
            Some(match state.post_message(room_id, request).await {
                Ok(_) => Frame::ack(id),
                Err(e) => {
                    debug!(uid = %uid, session = %session_id, error = %e, "Send rejected");
                    Frame::error(id, e.code(), e.to_string())
                }
            })
        }

        Frame::MarkRead { id, room_id } => {
            state.mark_read(uid, &room_id);
            Some(Frame::ack(id))
        }

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        other => {
            warn!(uid = %uid, session = %session_id, frame_type = ?other.frame_type(), "Unexpected frame type");
            Some(Frame::error(0, 1002, "Unexpected frame type"))
        }
    }
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSender, frame: &Frame) -> Result<()> {
    let data = codec::encode(frame)?;
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.dispatch.notification_send_delay_secs = 5;
        config.limits.max_message_length = 20;
        let state = Arc::new(AppState::new(config));
        state
            .rooms
            .create_room("r1", "u1", ["u2".into(), "u3".into()])
            .unwrap();
        state
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_posted_burst_notifies_offline_members_once() {
        let state = state();
        let _online = state.sessions.connect(&"u3".into(), "s-1");

        for content in ["hey", "you there?"] {
            let posted = state
                .post_message("r1".into(), PostMessage::chat("u1", content))
                .await
                .unwrap();
            assert_eq!(posted.recipients, 3);
        }
        assert_eq!(state.dispatcher.queue().len(), 1);

        advance(6).await;

        let inbox = state.store.inbox(&"u2".into());
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].fields.body_long, "hey\nyou there?");
        assert_eq!(inbox[0].fields.path, "/chats/r1");
        assert!(state.store.inbox(&"u3".into()).is_empty());
        assert!(state.store.inbox(&"u1".into()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_member_receives_frames() {
        let state = state();
        let mut rx = state.sessions.connect(&"u2".into(), "s-1");

        state
            .post_message("r1".into(), PostMessage::chat("u1", "hello"))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let frames = [(*first).clone(), (*second).clone()];

        let event = frames
            .iter()
            .find_map(|f| match f {
                Frame::ChatReceive(event) => Some(event.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(event.self_flag, 0);
        assert_eq!(event.message.content, "hello");
        assert!(frames.contains(&Frame::UnreadCount { count: 1 }));
    }

    #[tokio::test]
    async fn test_message_validation() {
        let state = state();

        let empty = state
            .post_message("r1".into(), PostMessage::chat("u1", "   "))
            .await;
        assert!(matches!(empty, Err(ApiError::EmptyMessage)));

        let long = state
            .post_message("r1".into(), PostMessage::chat("u1", "x".repeat(21)))
            .await;
        assert!(matches!(long, Err(ApiError::MessageTooLong { max: 20 })));

        let outsider = state
            .post_message("r1".into(), PostMessage::chat("u9", "hi"))
            .await
            .unwrap_err();
        assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

        let missing = state
            .post_message("nope".into(), PostMessage::chat("u1", "hi"))
            .await
            .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.code(), 1004);
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_message_is_not_queued() {
        let state = state();
        let mut request = PostMessage::chat("u1", "u4 joined");
        request.system = true;

        let posted = state.post_message("r1".into(), request).await.unwrap();
        assert!(posted.message.system);
        assert_eq!(posted.coalesced, 0);
        assert!(state.dispatcher.queue().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_pushes_count() {
        let state = state();
        state
            .post_message("r1".into(), PostMessage::chat("u1", "hi"))
            .await
            .unwrap();
        assert_eq!(state.rooms.unread_count(&"u2".into()), 1);

        let mut rx = state.sessions.connect(&"u2".into(), "s-1");
        assert_eq!(state.mark_read(&"u2".into(), &"r1".into()), 0);
        assert_eq!(*rx.recv().await.unwrap(), Frame::UnreadCount { count: 0 });
        state.dispatcher.shutdown();
    }

    #[tokio::test]
    async fn test_send_frame_is_acked() {
        let state = state();
        let uid = UserId::from("u1");

        let reply = handle_frame(Frame::send(7, "r1", "hi"), &uid, "s-1", &state).await;
        assert_eq!(reply, Some(Frame::ack(7)));

        let reply = handle_frame(Frame::send(8, "nope", "hi"), &uid, "s-1", &state).await;
        assert!(matches!(reply, Some(Frame::Error { id: 8, code: 1004, .. })));

        let reply = handle_frame(Frame::pong(None), &uid, "s-1", &state).await;
        assert!(reply.is_none());
        state.dispatcher.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_tracks_timer_flush() {
        let state = state();
        let _online = state.sessions.connect(&"u3".into(), "s-1");
        assert_eq!(state.health().pending_windows, 0);

        state
            .post_message("r1".into(), PostMessage::chat("u1", "hi"))
            .await
            .unwrap();
        let health = state.health();
        assert_eq!(health.pending_windows, 1);
        assert_eq!(health.online_users, 1);

        // Flushed by its timer, not by another post
        advance(6).await;
        assert_eq!(state.health().pending_windows, 0);
        assert_eq!(state.store.inbox(&"u2".into()).len(), 1);
    }
}
