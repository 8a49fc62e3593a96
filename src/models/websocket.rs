use crate::models::chat::{ ConversationSummary, MessageStatus, MessageView };
use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinAdminRoom,
    #[serde(rename_all = "camelCase")]
    JoinConversation {
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    LeaveConversation {
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        reader_id: Option<String>,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMessage {
        message_id: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    NewMessage(MessageView),
    MessageSent(MessageView),
    MessageUpdated(MessageView),
    MessageDeleted(MessageView),
    #[serde(rename_all = "camelCase")]
    MessagesSeen {
        conversation_id: String,
        message_id: Option<String>,
        status: MessageStatus,
        viewer_id: String,
    },
    #[serde(rename_all = "camelCase")]
    AdminConversation {
        conversation: ConversationSummary,
        message: MessageView,
    },
    ConversationsUpdated(Vec<ConversationSummary>),
    #[serde(rename_all = "camelCase")]
    Typing {
        conversation_id: String,
        user_id: String,
        is_typing: bool,
    },
    Joined {
        room: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::NewMessage(_) => "new_message",
            ServerMessage::MessageSent(_) => "message_sent",
            ServerMessage::MessageUpdated(_) => "message_updated",
            ServerMessage::MessageDeleted(_) => "message_deleted",
            ServerMessage::MessagesSeen { .. } => "messages_seen",
            ServerMessage::AdminConversation { .. } => "admin_conversation",
            ServerMessage::ConversationsUpdated(_) => "conversations_updated",
            ServerMessage::Typing { .. } => "typing",
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_wire_names() {
        let join: ClientMessage = serde_json::from_str(r#"{"event":"join_admin_room"}"#).unwrap();
        assert_eq!(join, ClientMessage::JoinAdminRoom);

        let typing: ClientMessage = serde_json
            ::from_str(r#"{"event":"typing","data":{"conversationId":"c1","isTyping":true}}"#)
            .unwrap();
        assert_eq!(typing, ClientMessage::Typing {
            conversation_id: "c1".into(),
            is_typing: true,
        });

        let send: ClientMessage = serde_json
            ::from_str(r#"{"event":"send_message","data":{"content":"hi"}}"#)
            .unwrap();
        assert_eq!(send, ClientMessage::SendMessage { reader_id: None, content: "hi".into() });
    }

    #[test]
    fn server_event_tag_matches_event_name() {
        let msg = ServerMessage::Joined { room: "admin".into() };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], msg.event_name());
        assert_eq!(value["data"]["room"], "admin");

        let seen = ServerMessage::MessagesSeen {
            conversation_id: "c1".into(),
            message_id: None,
            status: MessageStatus::Seen,
            viewer_id: "u1".into(),
        };
        let value = serde_json::to_value(&seen).unwrap();
        assert_eq!(value["event"], "messages_seen");
        assert_eq!(value["data"]["conversationId"], "c1");
        assert_eq!(value["data"]["status"], "seen");
    }
}
