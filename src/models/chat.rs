use crate::error::ChatError;
use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 10_000;
pub const RETRACTED_PLACEHOLDER: &str = "This message has been retracted";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub role: Role,
    pub display_name: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Delivery status of a message. The derived ordering follows the lifecycle,
/// so `a < b` means `b` is further along than `a`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "seen" => Ok(MessageStatus::Seen),
            _ => Err(ChatError::Internal(format!("unknown message status '{}'", s))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub last_message_id: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            last_message_id: None,
            is_read: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn room(&self) -> String {
        crate::rooms::conversation_room(&self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub is_updated: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, sender_id: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            status: MessageStatus::Sent,
            is_updated: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the status forward. Returns false (and leaves the message alone)
    /// when `next` is not ahead of the current status.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if next <= self.status {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Edits are the one path allowed to pull a `seen` message back to
    /// `delivered`; the new text has not been viewed yet.
    pub fn apply_edit(&mut self, content: &str) {
        self.content = content.to_string();
        self.status = MessageStatus::Delivered;
        self.is_updated = true;
        self.updated_at = Utc::now();
    }

    pub fn retract(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }
}

/// Message as shown to one viewer. Retracted text is replaced by a
/// placeholder for everyone but the author.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub is_updated: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageView {
    pub fn for_viewer(message: &Message, viewer_id: Option<&str>) -> Self {
        let reveal = message.is_active || viewer_id == Some(message.sender_id.as_str());
        Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            content: if reveal {
                message.content.clone()
            } else {
                RETRACTED_PLACEHOLDER.to_string()
            },
            status: message.status,
            is_updated: message.is_updated,
            is_active: message.is_active,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }

    /// Rendering used for room broadcasts, where the audience is mixed.
    pub fn public(message: &Message) -> Self {
        Self::for_viewer(message, None)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub is_read: bool,
    pub last_message: Option<MessageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub messages: Vec<MessageView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_only_moves_forward() {
        let mut msg = Message::new("c1", "u1", "hi");
        assert!(msg.advance(MessageStatus::Delivered));
        assert!(msg.advance(MessageStatus::Seen));
        assert!(!msg.advance(MessageStatus::Delivered));
        assert!(!msg.advance(MessageStatus::Sent));
        assert_eq!(msg.status, MessageStatus::Seen);
    }

    #[test]
    fn edit_resets_seen_to_delivered() {
        let mut msg = Message::new("c1", "u1", "hi");
        msg.advance(MessageStatus::Seen);
        msg.apply_edit("hello");
        assert_eq!(msg.status, MessageStatus::Delivered);
        assert!(msg.is_updated);
        assert!(msg.is_active);
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn retracted_content_hidden_except_for_author() {
        let mut msg = Message::new("c1", "author", "secret");
        msg.retract();
        assert_eq!(msg.content, "secret");
        assert_eq!(MessageView::for_viewer(&msg, Some("author")).content, "secret");
        assert_eq!(MessageView::for_viewer(&msg, Some("other")).content, RETRACTED_PLACEHOLDER);
        assert_eq!(MessageView::public(&msg).content, RETRACTED_PLACEHOLDER);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
        let user: User = serde_json
            ::from_str(r#"{"id":"a1","role":"admin","displayName":"Ops"}"#)
            .unwrap();
        assert!(user.is_admin());
    }
}
