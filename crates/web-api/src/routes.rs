use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use application::{
    AddContactRequest, ChatSummary, ContactEntry, CreateChatRequest, DeleteMessageRequest,
    DeviceInfo, EditMessageRequest, HistoryRequest, InitiateCallRequest, PostStatusRequest,
    RegisterDeviceRequest, Registration, SendMessageRequest,
};
use domain::{
    Call, CallType, Chat, ChatKind, Contact, Message, MessageType, Status, StatusContentType,
    Timestamp, User, UserId, UserProfileUpdate,
};

use crate::{error::ApiError, identity::Caller, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    phone_number: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    device: DeviceInfo,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

#[derive(Debug, Deserialize)]
struct AddContactPayload {
    phone_number: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateChatPayload {
    #[serde(rename = "type")]
    kind: ChatKind,
    name: Option<String>,
    #[serde(default)]
    participants: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    before: Option<Timestamp>,
    before_sequence: Option<u64>,
}

fn default_message_type() -> MessageType {
    MessageType::Text
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    chat_id: Uuid,
    #[serde(default)]
    content: String,
    #[serde(default = "default_message_type")]
    message_type: MessageType,
    reply_to: Option<Uuid>,
    #[serde(default)]
    attachments: Vec<JsonValue>,
    encryption_data: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct EditMessagePayload {
    content: String,
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    delete_for_everyone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactQuery {
    emoji: String,
}

#[derive(Debug, Deserialize)]
struct PostStatusPayload {
    content_type: StatusContentType,
    #[serde(default)]
    content: String,
    media_url: Option<String>,
    background_color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InitiateCallPayload {
    chat_id: Uuid,
    call_type: CallType,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register_device))
        .route("/users/me", get(get_profile).patch(update_profile))
        .route("/users/search", get(search_users))
        .route("/contacts", post(add_contact).get(list_contacts))
        .route("/chats", post(create_chat).get(list_chats))
        .route("/chats/{chat_id}", get(get_chat))
        .route("/chats/{chat_id}/messages", get(get_history))
        .route("/messages", post(send_message))
        .route(
            "/messages/{message_id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/messages/{message_id}/react", post(react_to_message))
        .route("/status", post(post_status).get(status_feed))
        .route("/status/{status_id}/view", post(view_status))
        .route("/calls", post(initiate_call))
        .route("/calls/{call_id}/answer", post(answer_call))
        .route("/calls/{call_id}/end", post(end_call))
}

/// `*` 表示放开所有来源
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// 查询参数中的开关：出现即为真，显式 `false`/`0` 为假
fn flag(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(raw) => !matches!(raw.trim(), "false" | "0"),
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, state).run())
}

async fn register_device(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = state
        .services
        .users
        .register_device(RegisterDeviceRequest {
            phone_number: payload.phone_number,
            email: payload.email,
            display_name: payload.display_name,
            device: payload.device,
        })
        .await?;

    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

async fn get_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.services.users.get_profile(user_id).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(update): Json<UserProfileUpdate>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(
        state.services.users.update_profile(user_id, update).await?,
    ))
}

async fn search_users(
    State(state): State<AppState>,
    Caller(_): Caller,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(state.services.users.search(&query.query).await?))
}

async fn add_contact(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(payload): Json<AddContactPayload>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    let contact = state
        .services
        .users
        .add_contact(AddContactRequest {
            user_id,
            phone_number: payload.phone_number,
            username: payload.username,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn list_contacts(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<Vec<ContactEntry>>, ApiError> {
    Ok(Json(state.services.users.list_contacts(user_id).await?))
}

async fn create_chat(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(payload): Json<CreateChatPayload>,
) -> Result<(StatusCode, Json<Chat>), ApiError> {
    let chat = state
        .services
        .chats
        .create_chat(CreateChatRequest {
            requester: user_id,
            kind: payload.kind,
            name: payload.name,
            participants: payload.participants.into_iter().map(UserId::from).collect(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn list_chats(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    Ok(Json(state.services.chats.list_chats(user_id).await?))
}

async fn get_chat(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Chat>, ApiError> {
    Ok(Json(
        state.services.chats.get_chat(user_id, chat_id.into()).await?,
    ))
}

async fn get_history(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let items = state
        .services
        .messages
        .history(HistoryRequest {
            viewer_id: user_id,
            chat_id: chat_id.into(),
            limit: query.limit,
            before: query.before,
            before_sequence: query.before_sequence,
        })
        .await?;
    Ok(Json(items))
}

async fn send_message(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let message = state
        .services
        .messages
        .send(SendMessageRequest {
            sender_id: user_id,
            chat_id: payload.chat_id.into(),
            content: payload.content,
            message_type: payload.message_type,
            reply_to: payload.reply_to.map(Into::into),
            attachments: payload.attachments,
            encryption_data: payload.encryption_data,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<EditMessagePayload>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .services
        .messages
        .edit(EditMessageRequest {
            editor_id: user_id,
            message_id: message_id.into(),
            content: payload.content,
        })
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(message_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    state
        .services
        .messages
        .delete(DeleteMessageRequest {
            requester_id: user_id,
            message_id: message_id.into(),
            for_everyone: flag(query.delete_for_everyone.as_deref()),
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn react_to_message(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(message_id): Path<Uuid>,
    Query(query): Query<ReactQuery>,
) -> Result<Json<Message>, ApiError> {
    let message = state
        .services
        .messages
        .react(user_id, message_id.into(), query.emoji)
        .await?;
    Ok(Json(message))
}

async fn post_status(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(payload): Json<PostStatusPayload>,
) -> Result<(StatusCode, Json<Status>), ApiError> {
    let status = state
        .services
        .statuses
        .post(PostStatusRequest {
            user_id,
            content_type: payload.content_type,
            content: payload.content,
            media_url: payload.media_url,
            background_color: payload.background_color,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(status)))
}

async fn status_feed(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<Vec<Status>>, ApiError> {
    Ok(Json(state.services.statuses.feed(user_id).await?))
}

async fn view_status(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(status_id): Path<Uuid>,
) -> Result<Json<Status>, ApiError> {
    Ok(Json(
        state.services.statuses.view(user_id, status_id.into()).await?,
    ))
}

async fn initiate_call(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(payload): Json<InitiateCallPayload>,
) -> Result<(StatusCode, Json<Call>), ApiError> {
    let call = state
        .services
        .calls
        .initiate(InitiateCallRequest {
            caller_id: user_id,
            chat_id: payload.chat_id.into(),
            call_type: payload.call_type,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(call)))
}

async fn answer_call(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(call_id): Path<Uuid>,
) -> Result<Json<Call>, ApiError> {
    Ok(Json(
        state.services.calls.answer(user_id, call_id.into()).await?,
    ))
}

async fn end_call(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(call_id): Path<Uuid>,
) -> Result<Json<Call>, ApiError> {
    Ok(Json(state.services.calls.end(user_id, call_id.into()).await?))
}
