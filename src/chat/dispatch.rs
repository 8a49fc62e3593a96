use crate::chat::{ ChatService, MessageChange, SentMessage, ViewedConversation };
use crate::error::ChatError;
use crate::models::chat::{ MessageStatus, MessageView, User };
use crate::models::websocket::ServerMessage;
use crate::rooms::{ user_room, conversation_room, RoomBroadcast, ADMIN_ROOM };
use log::{ debug, error };
use std::sync::Arc;

/// Turns orchestration results into room broadcasts. Receivers may see the
/// same event more than once and de-duplicate by message id. Nothing here
/// returns an error: the store write already happened and pushes are best
/// effort.
#[derive(Clone)]
pub struct Dispatcher {
    rooms: Arc<dyn RoomBroadcast>,
    chat: Arc<ChatService>,
}

impl Dispatcher {
    pub fn new(rooms: Arc<dyn RoomBroadcast>, chat: Arc<ChatService>) -> Self {
        Self { rooms, chat }
    }

    pub async fn message_sent(&self, sender: &User, sent: &SentMessage) {
        let view = MessageView::public(&sent.message);

        if sender.is_admin() {
            self.rooms.broadcast(
                &user_room(&sent.conversation.user_id),
                &ServerMessage::NewMessage(view.clone())
            ).await;
        }

        match self.chat.summarize(&sent.conversation).await {
            Ok(conversation) => {
                self.rooms.broadcast(ADMIN_ROOM, &ServerMessage::AdminConversation {
                    conversation,
                    message: view.clone(),
                }).await;
            }
            Err(e) => error!("Skipping admin_conversation for {}: {}", sent.conversation.id, e),
        }

        self.rooms.broadcast(&user_room(&sender.id), &ServerMessage::MessageSent(view)).await;
        self.refresh_admin_list().await;
    }

    pub async fn message_updated(&self, change: &MessageChange) {
        let event = ServerMessage::MessageUpdated(MessageView::public(&change.message));
        self.to_affected_rooms(change, &event).await;
        self.refresh_admin_list().await;
    }

    pub async fn message_deleted(&self, change: &MessageChange) {
        let event = ServerMessage::MessageDeleted(MessageView::public(&change.message));
        self.to_affected_rooms(change, &event).await;
        self.refresh_admin_list().await;
    }

    /// Announces a `seen` transition. Views that advanced nothing (an author
    /// reopening their own message, an empty conversation) stay silent.
    pub async fn conversation_viewed(&self, viewer: &User, viewed: &ViewedConversation) {
        let conversation = &viewed.conversation;
        let seen = match &viewed.seen_message {
            Some(m) => m,
            None => {
                debug!("View of {} by {} advanced nothing", conversation.id, viewer.id);
                return;
            }
        };
        let event = ServerMessage::MessagesSeen {
            conversation_id: conversation.id.clone(),
            message_id: Some(seen.id.clone()),
            status: MessageStatus::Seen,
            viewer_id: viewer.id.clone(),
        };
        self.rooms.broadcast(&conversation_room(&conversation.id), &event).await;
        self.rooms.broadcast(ADMIN_ROOM, &event).await;
        self.rooms.broadcast(&user_room(&conversation.user_id), &event).await;
        self.refresh_admin_list().await;
    }

    pub async fn typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) {
        self.rooms.broadcast(&conversation_room(conversation_id), &ServerMessage::Typing {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            is_typing,
        }).await;
    }

    async fn to_affected_rooms(&self, change: &MessageChange, event: &ServerMessage) {
        self.rooms.broadcast(&user_room(&change.conversation.user_id), event).await;
        self.rooms.broadcast(ADMIN_ROOM, event).await;
        let room = change.conversation.room();
        if self.rooms.has_members(&room).await {
            self.rooms.broadcast(&room, event).await;
        }
    }

    /// Re-sends the whole inbox to admins. Coarse, but the inbox is small.
    pub async fn refresh_admin_list(&self) {
        if !self.rooms.has_members(ADMIN_ROOM).await {
            debug!("No admin listening; skipping conversation list refresh");
            return;
        }
        let summaries = match self.chat.conversation_summaries().await {
            Ok(list) => list,
            Err(ChatError::NotFound(_)) => Vec::new(),
            Err(e) => {
                error!("Failed to rebuild conversation list: {}", e);
                return;
            }
        };
        self.rooms.broadcast(ADMIN_ROOM, &ServerMessage::ConversationsUpdated(summaries)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;
    use crate::store::MemoryChatStore;
    use crate::users::MemoryUserDirectory;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Records broadcasts instead of delivering them.
    #[derive(Default)]
    struct RecordingRooms {
        occupied: Mutex<HashSet<String>>,
        sent: Mutex<Vec<(String, &'static str)>>,
    }

    impl RecordingRooms {
        async fn occupy(&self, room: &str) {
            self.occupied.lock().await.insert(room.to_string());
        }

        async fn events_for(&self, room: &str) -> Vec<&'static str> {
            self.sent
                .lock().await
                .iter()
                .filter(|(r, _)| r == room)
                .map(|(_, e)| *e)
                .collect()
        }
    }

    #[async_trait]
    impl RoomBroadcast for RecordingRooms {
        async fn broadcast(&self, room: &str, event: &ServerMessage) {
            self.sent.lock().await.push((room.to_string(), event.event_name()));
        }

        async fn has_members(&self, room: &str) -> bool {
            self.occupied.lock().await.contains(room)
        }
    }

    fn admin() -> User {
        User { id: "admin-1".into(), role: Role::Admin, display_name: "Support".into() }
    }

    fn user() -> User {
        User { id: "u1".into(), role: Role::User, display_name: "Uma".into() }
    }

    fn setup() -> (Arc<RecordingRooms>, Arc<ChatService>, Dispatcher) {
        let rooms = Arc::new(RecordingRooms::default());
        let users = MemoryUserDirectory::from_users(vec![admin(), user()]);
        let chat = Arc::new(
            ChatService::new(Arc::new(MemoryChatStore::default()), Arc::new(users))
        );
        let dispatcher = Dispatcher::new(rooms.clone(), chat.clone());
        (rooms, chat, dispatcher)
    }

    #[tokio::test]
    async fn admin_send_notifies_user_admins_and_echoes() {
        let (rooms, chat, dispatcher) = setup();
        rooms.occupy(ADMIN_ROOM).await;
        let sent = chat.send_message(Some("u1"), &admin(), "Hi").await.unwrap();
        dispatcher.message_sent(&admin(), &sent).await;

        assert_eq!(rooms.events_for("user:u1").await, vec!["new_message"]);
        assert_eq!(
            rooms.events_for(ADMIN_ROOM).await,
            vec!["admin_conversation", "conversations_updated"]
        );
        assert_eq!(rooms.events_for("user:admin-1").await, vec!["message_sent"]);
    }

    #[tokio::test]
    async fn user_send_has_no_targeted_receiver() {
        let (rooms, chat, dispatcher) = setup();
        let sent = chat.send_message(None, &user(), "help").await.unwrap();
        dispatcher.message_sent(&user(), &sent).await;

        // only the echo lands in the user's own room
        assert_eq!(rooms.events_for("user:u1").await, vec!["message_sent"]);
        // no admin listening: no list refresh
        assert_eq!(rooms.events_for(ADMIN_ROOM).await, vec!["admin_conversation"]);
    }

    #[tokio::test]
    async fn edits_reach_open_conversation_room_only_when_occupied() {
        let (rooms, chat, dispatcher) = setup();
        let sent = chat.send_message(None, &user(), "typo").await.unwrap();
        let change = chat.update_message(&sent.message.id, "fixed", &user()).await.unwrap();

        dispatcher.message_updated(&change).await;
        let room = conversation_room(&sent.conversation.id);
        assert!(rooms.events_for(&room).await.is_empty());

        rooms.occupy(&room).await;
        let retracted = chat.delete_message(&sent.message.id, &user()).await.unwrap();
        dispatcher.message_deleted(&retracted).await;
        assert_eq!(rooms.events_for(&room).await, vec!["message_deleted"]);
        assert_eq!(
            rooms.events_for("user:u1").await,
            vec!["message_updated", "message_deleted"]
        );
    }

    #[tokio::test]
    async fn seen_goes_to_conversation_admin_and_user_rooms() {
        let (rooms, chat, dispatcher) = setup();
        let sent = chat.send_message(Some("u1"), &admin(), "Hi").await.unwrap();
        let viewed = chat.get_user_conversation(&user()).await.unwrap();
        dispatcher.conversation_viewed(&user(), &viewed).await;

        let room = conversation_room(&sent.conversation.id);
        assert_eq!(rooms.events_for(&room).await, vec!["messages_seen"]);
        assert_eq!(rooms.events_for(ADMIN_ROOM).await, vec!["messages_seen"]);
        assert_eq!(rooms.events_for("user:u1").await, vec!["messages_seen"]);
    }

    #[tokio::test]
    async fn author_view_broadcasts_nothing() {
        let (rooms, chat, dispatcher) = setup();
        rooms.occupy(ADMIN_ROOM).await;
        let sent = chat.send_message(None, &user(), "anyone there?").await.unwrap();
        let viewed = chat.get_user_conversation(&user()).await.unwrap();
        dispatcher.conversation_viewed(&user(), &viewed).await;

        let room = conversation_room(&sent.conversation.id);
        assert!(rooms.events_for(&room).await.is_empty());
        assert!(!rooms.events_for("user:u1").await.contains(&"messages_seen"));
        assert!(!rooms.events_for(ADMIN_ROOM).await.contains(&"messages_seen"));
    }

    #[tokio::test]
    async fn empty_inbox_refresh_sends_empty_list() {
        let (rooms, _chat, dispatcher) = setup();
        rooms.occupy(ADMIN_ROOM).await;
        dispatcher.refresh_admin_list().await;
        assert_eq!(rooms.events_for(ADMIN_ROOM).await, vec!["conversations_updated"]);
    }
}
