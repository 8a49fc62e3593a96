use crate::error::{ ChatError, ErrorBody };
use crate::models::chat::User;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::rooms::{ conversation_room, user_room, ConnectionId, ADMIN_ROOM };
use crate::server::AppState;

use std::net::SocketAddr;

use axum::{
    extract::{ ws::{ Message, WebSocket, WebSocketUpgrade }, ConnectInfo, State },
    http::{ HeaderMap, StatusCode, Uri },
    response::{ IntoResponse, Response },
    Json,
};
use futures::{ SinkExt, StreamExt };
use log::{ debug, info, warn };
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if state.limiter.check().is_err() {
        warn!("Global connection rate limit exceeded for {}. Refusing upgrade.", peer);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody { success: false, message: "too many connections".to_string() }),
        ).into_response();
    }

    let user = match state.auth.authenticate_request(&headers, &uri).await {
        Ok(user) => user,
        Err(rejection) => {
            warn!("Handshake from {} rejected: {}", peer, rejection);
            return rejection.into_response();
        }
    };

    info!("Incoming connection from {} as {}", peer, user.id);
    ws.max_message_size(state.socket.max_message_size)
        .on_upgrade(move |socket| handle_connection(peer, socket, user, state))
}

pub async fn handle_connection(peer: SocketAddr, socket: WebSocket, user: User, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<String>(state.socket.outbound_buffer);

    let connection = state.rooms.register(outbound).await;
    state.rooms.join(&connection, &user_room(&user.id)).await;
    info!(
        "New WebSocket connection {} for {} ({}), {} live",
        connection,
        user.id,
        peer,
        state.rooms.connection_count().await
    );

    let writer = tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                break;
            }
            Ok(_) => {
                continue;
            }
            Err(e) => {
                warn!("WebSocket error from {}: {}", peer, e);
                break;
            }
        };

        let event = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(event) => event,
            Err(e) => {
                debug!("Unparseable event from {}: {}", connection, e);
                let message = format!("invalid event: {}", e);
                state.rooms.send_to(&connection, &ServerMessage::Error { message }).await;
                continue;
            }
        };

        if let Err(e) = handle_client_event(&state, &connection, &user, event).await {
            debug!("Event from {} failed: {}", connection, e);
            state.rooms.send_to(&connection, &ServerMessage::Error { message: e.to_string() }).await;
        }
    }

    state.rooms.disconnect(&connection).await;
    if let Err(e) = writer.await {
        warn!("Writer task for {} ended abnormally: {}", connection, e);
    }
    info!("Connection {} for {} closed", connection, user.id);
}

async fn handle_client_event(
    state: &AppState,
    connection: &ConnectionId,
    user: &User,
    event: ClientMessage
) -> Result<(), ChatError> {
    match event {
        ClientMessage::JoinAdminRoom => {
            if !user.is_admin() {
                return Err(ChatError::Forbidden("Admin access required".to_string()));
            }
            state.rooms.join(connection, ADMIN_ROOM).await;
            state.rooms.send_to(connection, &ServerMessage::Joined { room: ADMIN_ROOM.to_string() }).await;

            let summaries = match state.chat.conversation_summaries().await {
                Ok(list) => list,
                Err(ChatError::NotFound(_)) => Vec::new(),
                Err(e) => {
                    return Err(e);
                }
            };
            state.rooms.send_to(connection, &ServerMessage::ConversationsUpdated(summaries)).await;
        }
        ClientMessage::JoinConversation { conversation_id } => {
            let conversation = state.chat.authorize_conversation(&conversation_id, user).await?;
            let room = conversation.room();
            state.rooms.join(connection, &room).await;
            state.rooms.send_to(connection, &ServerMessage::Joined { room }).await;
        }
        ClientMessage::LeaveConversation { conversation_id } => {
            state.rooms.leave(connection, &conversation_room(&conversation_id)).await;
        }
        ClientMessage::Typing { conversation_id, is_typing } => {
            if !state.rooms.is_member(connection, &conversation_room(&conversation_id)).await {
                return Err(ChatError::Forbidden("Join the conversation before typing".to_string()));
            }
            state.dispatcher.typing(&conversation_id, &user.id, is_typing).await;
        }
        ClientMessage::SendMessage { reader_id, content } => {
            let sent = state.chat.send_message(reader_id.as_deref(), user, &content).await?;
            state.dispatcher.message_sent(user, &sent).await;
        }
        ClientMessage::UpdateMessage { message_id, content } => {
            let change = state.chat.update_message(&message_id, &content, user).await?;
            state.dispatcher.message_updated(&change).await;
        }
        ClientMessage::DeleteMessage { message_id } => {
            let change = state.chat.delete_message(&message_id, user).await?;
            state.dispatcher.message_deleted(&change).await;
        }
    }
    Ok(())
}
