use crate::auth::AuthRejection;
use crate::error::ChatError;
use crate::models::chat::{ ConversationDetail, ConversationSummary, MessageView, User };
use crate::server::{ websocket, AppState };

use axum::{
    extract::{ FromRequestParts, Path, Query, State },
    extract::rejection::{ JsonRejection, QueryRejection },
    http::{ request::Parts, StatusCode },
    response::IntoResponse,
    routing::{ get, post, put },
    Json,
    Router,
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };

/// The authenticated caller of an HTTP route.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state.auth.authenticate_request(&parts.headers, &parts.uri).await.map(CurrentUser)
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { success: true, data })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    pub conversation_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub reader_id: Option<String>,
    pub content: String,
}

#[derive(Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/conversations", get(all_conversations_handler))
        .route("/chat/user-conversations", get(user_conversation_handler))
        .route("/chat/conversation", get(conversation_handler))
        .route("/chat/message", post(send_message_handler))
        .route("/chat/message/{message_id}", put(update_message_handler).patch(delete_message_handler))
        .route("/chat/ws", get(websocket::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn all_conversations_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<Vec<ConversationSummary>>>, ChatError> {
    if !user.is_admin() {
        return Err(ChatError::Forbidden("Admin access required".to_string()));
    }
    Ok(ok(state.chat.conversation_summaries().await?))
}

async fn user_conversation_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ApiResponse<ConversationDetail>>, ChatError> {
    if user.is_admin() {
        return Err(ChatError::Forbidden("Admins do not have a personal conversation".to_string()));
    }
    let viewed = state.chat.get_user_conversation(&user).await?;
    state.dispatcher.conversation_viewed(&user, &viewed).await;
    Ok(ok(viewed.detail_for(&user.id)))
}

async fn conversation_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<ConversationDetail>>, ChatError> {
    let Query(query) = query.map_err(|e| ChatError::BadRequest(e.body_text()))?;
    let viewed = state.chat.get_conversation(&query.conversation_id, &user).await?;
    state.dispatcher.conversation_viewed(&user, &viewed).await;
    Ok(ok(viewed.detail_for(&user.id)))
}

async fn send_message_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Json(req) = body.map_err(|e| ChatError::BadRequest(e.body_text()))?;
    let sent = state.chat.send_message(req.reader_id.as_deref(), &user, &req.content).await?;
    state.dispatcher.message_sent(&user, &sent).await;
    Ok((StatusCode::CREATED, ok(MessageView::for_viewer(&sent.message, Some(&user.id)))))
}

async fn update_message_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<String>,
    body: Result<Json<UpdateMessageRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<MessageView>>, ChatError> {
    let Json(req) = body.map_err(|e| ChatError::BadRequest(e.body_text()))?;
    let change = state.chat.update_message(&message_id, &req.content, &user).await?;
    state.dispatcher.message_updated(&change).await;
    Ok(ok(MessageView::for_viewer(&change.message, Some(&user.id))))
}

async fn delete_message_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<String>,
) -> Result<Json<ApiResponse<MessageView>>, ChatError> {
    let change = state.chat.delete_message(&message_id, &user).await?;
    state.dispatcher.message_deleted(&change).await;
    Ok(ok(MessageView::for_viewer(&change.message, Some(&user.id))))
}
