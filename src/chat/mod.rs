pub mod dispatch;

use crate::error::ChatError;
use crate::models::chat::{
    Conversation,
    ConversationDetail,
    ConversationSummary,
    Message,
    MessageStatus,
    MessageView,
    Role,
    User,
    MAX_CONTENT_CHARS,
};
use crate::store::ChatStore;
use crate::users::UserDirectory;
use log::{ info, warn };
use std::error::Error;
use std::sync::Arc;

pub use dispatch::Dispatcher;

/// Result of a send: the conversation as it stands after the message was
/// attached, and the message after its `delivered` advance.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub conversation: Conversation,
    pub message: Message,
    pub created_conversation: bool,
}

/// Result of an edit or retraction.
#[derive(Debug, Clone)]
pub struct MessageChange {
    pub conversation: Conversation,
    pub message: Message,
}

/// Result of opening a conversation: it is now read and its last message,
/// if any, has been advanced to `seen`.
#[derive(Debug, Clone)]
pub struct ViewedConversation {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub seen_message: Option<Message>,
}

impl ViewedConversation {
    pub fn detail_for(&self, viewer_id: &str) -> ConversationDetail {
        ConversationDetail {
            conversation: self.conversation.clone(),
            messages: self.messages
                .iter()
                .map(|m| MessageView::for_viewer(m, Some(viewer_id)))
                .collect(),
        }
    }
}

pub fn validate_content(content: &str) -> Result<(), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::BadRequest("Message content must not be empty".to_string()));
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(
            ChatError::BadRequest(
                format!("Message content is {} characters; the limit is {}", len, MAX_CONTENT_CHARS)
            )
        );
    }
    Ok(())
}

fn directory_error(e: Box<dyn Error + Send + Sync>) -> ChatError {
    ChatError::Internal(format!("user directory error: {}", e))
}

/// Business rules for the support chat. Every mutation is a short sequence
/// of independent store writes; none of them is wrapped in a transaction and
/// each is safe to repeat.
pub struct ChatService {
    store: Arc<dyn ChatStore>,
    users: Arc<dyn UserDirectory>,
}

impl ChatService {
    pub fn new(store: Arc<dyn ChatStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self { store, users }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<User>, ChatError> {
        self.users.find_user_by_id(id).await.map_err(directory_error)
    }

    /// Every conversation. An empty store is reported as `NotFound`; callers
    /// that only want data should treat that as an empty list.
    pub async fn get_all_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let all = self.store.list_conversations().await?;
        if all.is_empty() {
            return Err(ChatError::NotFound("No conversations found".to_string()));
        }
        Ok(all)
    }

    /// The admin inbox: every conversation with its user's name and last
    /// message, most recently updated first.
    pub async fn conversation_summaries(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        let mut summaries = Vec::new();
        for conversation in self.get_all_conversations().await? {
            summaries.push(self.summarize(&conversation).await?);
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    pub async fn summarize(&self, conversation: &Conversation) -> Result<ConversationSummary, ChatError> {
        let display_name = match self.find_user(&conversation.user_id).await {
            Ok(user) => user.map(|u| u.display_name),
            Err(e) => {
                warn!("Could not resolve user {}: {}", conversation.user_id, e);
                None
            }
        };
        let last_message = match &conversation.last_message_id {
            Some(id) => self.store.find_message(id).await?.map(|m| MessageView::public(&m)),
            None => None,
        };
        Ok(ConversationSummary {
            id: conversation.id.clone(),
            user_id: conversation.user_id.clone(),
            display_name,
            is_read: conversation.is_read,
            last_message,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        })
    }

    pub async fn get_user_conversation(&self, user: &User) -> Result<ViewedConversation, ChatError> {
        let conversation = self.store
            .find_conversation_by_user(&user.id).await?
            .ok_or_else(|| ChatError::NotFound(format!("No conversation for user {}", user.id)))?;
        self.mark_viewed(conversation, user).await
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        viewer: &User
    ) -> Result<ViewedConversation, ChatError> {
        let conversation = self.authorize_conversation(conversation_id, viewer).await?;
        self.mark_viewed(conversation, viewer).await
    }

    /// Loads a conversation the user is allowed to see: admins see all,
    /// users only their own.
    pub async fn authorize_conversation(
        &self,
        conversation_id: &str,
        user: &User
    ) -> Result<Conversation, ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::BadRequest("conversationId is required".to_string()));
        }
        let conversation = self.store
            .find_conversation(conversation_id).await?
            .ok_or_else(|| ChatError::NotFound(format!("Conversation {} not found", conversation_id)))?;
        if !user.is_admin() && conversation.user_id != user.id {
            return Err(ChatError::Forbidden("Not a participant of this conversation".to_string()));
        }
        Ok(conversation)
    }

    // Only the recipient of the last message reads it: an author reopening a
    // conversation leaves both the read flag and the status alone. Read flag
    // first, then the message; a lost second write is repaired by the next view.
    async fn mark_viewed(
        &self,
        conversation: Conversation,
        viewer: &User
    ) -> Result<ViewedConversation, ChatError> {
        let last = match &conversation.last_message_id {
            Some(id) =>
                match self.store.find_message(id).await? {
                    Some(m) => Some(m),
                    None => {
                        warn!(
                            "Conversation {} points at missing message {}",
                            conversation.id,
                            id
                        );
                        None
                    }
                }
            None => None,
        };

        let (conversation, seen_message) = match last {
            Some(m) if m.sender_id == viewer.id => (conversation, None),
            Some(m) => {
                let conversation = self.store.mark_conversation_read(&conversation.id).await?;
                match self.store.advance_message_status(&m.id, MessageStatus::Seen).await {
                    Ok(m) => (conversation, Some(m)),
                    Err(ChatError::NotFound(_)) => (conversation, None),
                    Err(e) => {
                        return Err(e);
                    }
                }
            }
            None => (conversation, None),
        };
        let messages = self.store.list_messages(&conversation.id).await?;
        Ok(ViewedConversation { conversation, messages, seen_message })
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        self.store.list_messages(conversation_id).await
    }

    /// Resolves which user's conversation a message belongs to. Admins must
    /// name a non-admin target; users can only write to their own.
    async fn resolve_owner(&self, target: Option<&str>, sender: &User) -> Result<String, ChatError> {
        let target = target.map(str::trim).filter(|t| !t.is_empty());
        match (sender.role, target) {
            (Role::Admin, Some(target_id)) => {
                let target_user = self
                    .find_user(target_id).await?
                    .ok_or_else(|| ChatError::NotFound(format!("User {} not found", target_id)))?;
                if target_user.is_admin() {
                    return Err(
                        ChatError::BadRequest("Conversations can only be opened with users".to_string())
                    );
                }
                Ok(target_user.id)
            }
            (Role::Admin, None) => {
                Err(ChatError::BadRequest("readerId is required when an admin sends a message".to_string()))
            }
            (Role::User, Some(target_id)) if target_id != sender.id => {
                Err(ChatError::Forbidden("Users can only write to their own conversation".to_string()))
            }
            (Role::User, _) => Ok(sender.id.clone()),
        }
    }

    async fn ensure_conversation(&self, user_id: &str) -> Result<(Conversation, bool), ChatError> {
        if let Some(existing) = self.store.find_conversation_by_user(user_id).await? {
            return Ok((existing, false));
        }
        match self.store.create_conversation(user_id).await {
            Ok(created) => {
                info!("Opened conversation {} for user {}", created.id, user_id);
                Ok((created, true))
            }
            Err(ChatError::Conflict(_)) => {
                let existing = self.store
                    .find_conversation_by_user(user_id).await?
                    .ok_or_else(|| {
                        ChatError::Internal(
                            format!("conversation for {} vanished after conflict", user_id)
                        )
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn send_message(
        &self,
        target_user_id: Option<&str>,
        sender: &User,
        content: &str
    ) -> Result<SentMessage, ChatError> {
        validate_content(content)?;
        let owner_id = self.resolve_owner(target_user_id, sender).await?;
        let (conversation, created_conversation) = self.ensure_conversation(&owner_id).await?;

        let message = Message::new(&conversation.id, &sender.id, content);
        self.store.insert_message(&message).await?;
        let conversation = self.store.attach_last_message(&conversation.id, &message.id).await?;
        let message = self.store.advance_message_status(
            &message.id,
            MessageStatus::Delivered
        ).await?;

        info!("Message {} from {} in conversation {}", message.id, sender.id, conversation.id);
        Ok(SentMessage { conversation, message, created_conversation })
    }

    async fn load_change(&self, message: Message) -> Result<MessageChange, ChatError> {
        let conversation = self.store
            .find_conversation(&message.conversation_id).await?
            .ok_or_else(|| {
                ChatError::Internal(
                    format!("message {} belongs to missing conversation {}", message.id, message.conversation_id)
                )
            })?;
        Ok(MessageChange { conversation, message })
    }

    async fn existing_message(&self, message_id: &str) -> Result<Message, ChatError> {
        if message_id.trim().is_empty() {
            return Err(ChatError::BadRequest("messageId is required".to_string()));
        }
        self.store
            .find_message(message_id).await?
            .ok_or_else(|| ChatError::NotFound(format!("Message {} not found", message_id)))
    }

    /// Only the author may edit. An edit pulls the status back to
    /// `delivered`, even from `seen`.
    pub async fn update_message(
        &self,
        message_id: &str,
        content: &str,
        editor: &User
    ) -> Result<MessageChange, ChatError> {
        validate_content(content)?;
        let existing = self.existing_message(message_id).await?;
        if existing.sender_id != editor.id {
            return Err(ChatError::Forbidden("Only the author can edit this message".to_string()));
        }
        // the store refuses retracted messages atomically with the write
        let message = self.store.edit_message(message_id, content).await?;
        info!("Message {} edited by {}", message_id, editor.id);
        self.load_change(message).await
    }

    /// Soft delete. The author or any admin may retract; the content stays in
    /// storage.
    pub async fn delete_message(
        &self,
        message_id: &str,
        actor: &User
    ) -> Result<MessageChange, ChatError> {
        let existing = self.existing_message(message_id).await?;
        if existing.sender_id != actor.id && !actor.is_admin() {
            return Err(ChatError::Forbidden("Only the author can retract this message".to_string()));
        }
        let message = self.store.retract_message(message_id).await?;
        info!("Message {} retracted by {}", message_id, actor.id);
        self.load_change(message).await
    }
}
