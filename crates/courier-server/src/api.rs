use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_chat::{log_delivery, ChatRead, ChatService, Relayed, Resolved};
use courier_shared::{ChatId, MessageId, MessageType, UserId, UserStatus};
use courier_store::{Chat, Message, User};

use crate::config::ServerConfig;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<ChatService>, config: ServerConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Users
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/online", get(list_online_users))
        .route("/api/users/{user_id}", get(get_user))
        .route("/api/users/{user_id}/last-seen", put(touch_last_seen))
        .route("/api/users/{user_id}/status", put(update_status))
        // Chats
        .route("/api/chats/direct", post(open_direct))
        .route("/api/chats/group", post(create_group))
        .route("/api/chats/user/{user_id}", get(chats_for_user))
        .route("/api/chats/{chat_id}", get(get_chat))
        .route("/api/chats/{chat_id}/participants", post(add_participant))
        .route(
            "/api/chats/{chat_id}/participants/{user_id}",
            delete(remove_participant),
        )
        .route("/api/chats/{chat_id}/mute", put(set_muted))
        .route("/api/chats/{chat_id}/archive", put(set_archived))
        // Messages
        .route("/api/messages", post(send_message))
        .route("/api/messages/chat/{chat_id}", get(list_messages))
        .route("/api/messages/chat/{chat_id}/read", put(mark_chat_read))
        .route(
            "/api/messages/chat/{chat_id}/unread/{user_id}",
            get(unread_count),
        )
        .route("/api/messages/{message_id}/read", put(mark_read))
        .route("/api/messages/{message_id}/redeliver", post(redeliver))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);
type ApiResult<T> = Result<Reply<T>, ApiError>;

fn respond<T>(status: StatusCode, data: T, warning: Option<String>) -> Reply<T> {
    (
        status,
        Json(ApiResponse {
            success: true,
            data,
            warning,
        }),
    )
}

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(respond(StatusCode::OK, data, None))
}

fn created<T>(data: T) -> ApiResult<T> {
    Ok(respond(StatusCode::CREATED, data, None))
}

/// The write succeeded; a failed publish becomes a warning on the body.
fn relayed<T>(status: StatusCode, operation: &str, outcome: Relayed<T>) -> ApiResult<T> {
    log_delivery(operation, &outcome);
    let warning = outcome.warning();
    Ok(respond(status, outcome.value, warning))
}

fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid {kind} id: {raw}")))
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: u64,
    broker_client_id: String,
    broker_peers: usize,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    username: String,
    email: String,
}

#[derive(Deserialize)]
struct UpdateStatusRequest {
    status: String,
}

#[derive(Deserialize)]
struct DirectChatRequest {
    user1_id: UserId,
    user2_id: UserId,
}

#[derive(Deserialize)]
struct GroupChatRequest {
    creator_id: UserId,
    participant_ids: Vec<UserId>,
    group_name: String,
}

#[derive(Deserialize)]
struct UserRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
struct MuteRequest {
    user_id: UserId,
    muted: bool,
}

#[derive(Deserialize)]
struct ArchiveRequest {
    user_id: UserId,
    archived: bool,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    chat_id: ChatId,
    sender_id: UserId,
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

#[derive(Deserialize)]
struct ListMessagesQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Deserialize)]
struct MarkChatReadRequest {
    user_id: UserId,
    before: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct UnreadResponse {
    unread_count: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker = state.service.broker();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        broker_client_id: broker.client_id().to_string(),
        broker_peers: broker.peer_count().await,
    })
}

async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<User> {
    let Json(req) = body?;
    created(state.service.users().create(&req.username, &req.email)?)
}

async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    ok(state.service.users().list()?)
}

async fn list_online_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    ok(state.service.users().list_online()?)
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<User> {
    ok(state.service.users().get(&UserId::from(user_id))?)
}

async fn touch_last_seen(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<User> {
    ok(state.service.users().touch_last_seen(&UserId::from(user_id))?)
}

async fn update_status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ApiResult<User> {
    let Json(req) = body?;
    let status = UserStatus::from_str(&req.status)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    ok(state
        .service
        .users()
        .update_status(&UserId::from(user_id), status)?)
}

/// 201 when the chat was created by this call, 200 when it already existed.
async fn open_direct(
    State(state): State<AppState>,
    body: Result<Json<DirectChatRequest>, JsonRejection>,
) -> ApiResult<Resolved> {
    let Json(req) = body?;
    let outcome = state.service.open_direct(&req.user1_id, &req.user2_id).await?;
    let status = if outcome.value.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    relayed(status, "open_direct", outcome)
}

async fn create_group(
    State(state): State<AppState>,
    body: Result<Json<GroupChatRequest>, JsonRejection>,
) -> ApiResult<Chat> {
    let Json(req) = body?;
    let outcome = state
        .service
        .create_group(&req.creator_id, &req.participant_ids, &req.group_name)
        .await?;
    relayed(StatusCode::CREATED, "create_group", outcome)
}

async fn chats_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<Chat>> {
    ok(state.service.chats_for_user(&UserId::from(user_id))?)
}

async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Chat> {
    ok(state.service.get_chat(parse_id("chat", &chat_id)?)?)
}

async fn add_participant(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<Chat> {
    let chat_id = parse_id("chat", &chat_id)?;
    let Json(req) = body?;
    ok(state.service.add_participant(chat_id, &req.user_id)?)
}

async fn remove_participant(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(String, String)>,
) -> ApiResult<Chat> {
    let chat_id = parse_id("chat", &chat_id)?;
    ok(state
        .service
        .remove_participant(chat_id, &UserId::from(user_id))?)
}

async fn set_muted(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Result<Json<MuteRequest>, JsonRejection>,
) -> ApiResult<Chat> {
    let chat_id = parse_id("chat", &chat_id)?;
    let Json(req) = body?;
    ok(state.service.set_muted(chat_id, &req.user_id, req.muted)?)
}

async fn set_archived(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Result<Json<ArchiveRequest>, JsonRejection>,
) -> ApiResult<Chat> {
    let chat_id = parse_id("chat", &chat_id)?;
    let Json(req) = body?;
    ok(state
        .service
        .set_archived(chat_id, &req.user_id, req.archived)?)
}

async fn send_message(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Message> {
    let Json(req) = body?;
    let outcome = state
        .service
        .send_message(req.chat_id, &req.sender_id, &req.content, req.message_type)
        .await?;
    relayed(StatusCode::CREATED, "send_message", outcome)
}

async fn list_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> ApiResult<Vec<Message>> {
    let chat_id = parse_id("chat", &chat_id)?;
    let Query(query) = query?;
    ok(state
        .service
        .list_messages(chat_id, query.limit, query.offset.unwrap_or(0))?)
}

async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    body: Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<Message> {
    let message_id: MessageId = parse_id("message", &message_id)?;
    let Json(req) = body?;
    let outcome = state.service.mark_read(message_id, &req.user_id).await?;
    relayed(StatusCode::OK, "mark_read", outcome)
}

async fn mark_chat_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Result<Json<MarkChatReadRequest>, JsonRejection>,
) -> ApiResult<ChatRead> {
    let chat_id = parse_id("chat", &chat_id)?;
    let Json(req) = body?;
    let outcome = state
        .service
        .mark_chat_read(chat_id, &req.user_id, req.before)
        .await?;
    relayed(StatusCode::OK, "mark_chat_read", outcome)
}

async fn unread_count(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(String, String)>,
) -> ApiResult<UnreadResponse> {
    let chat_id = parse_id("chat", &chat_id)?;
    let unread_count = state
        .service
        .unread_count(chat_id, &UserId::from(user_id))?;
    ok(UnreadResponse { unread_count })
}

async fn redeliver(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> ApiResult<Message> {
    let message_id = parse_id("message", &message_id)?;
    ok(state.service.redeliver_message(message_id).await?)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Bind `addr` and serve the API until the listener fails.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
