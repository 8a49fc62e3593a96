use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::ChatError;
use crate::models::chat::{ Conversation, Message, MessageStatus };
use crate::store::{ conversation_not_found, message_not_found, message_retracted, ChatStore };

#[derive(Default)]
struct Tables {
    conversations: HashMap<String, Conversation>,
    conversation_by_user: HashMap<String, String>,
    messages: HashMap<String, Message>,
    messages_by_conversation: HashMap<String, Vec<String>>,
}

/// Process-local store. Each operation is one critical section, matching the
/// per-key atomicity of the Redis backend.
#[derive(Default)]
pub struct MemoryChatStore {
    tables: RwLock<Tables>,
}

impl MemoryChatStore {
    fn update_message<F>(tables: &mut Tables, id: &str, f: F) -> Result<Message, ChatError>
        where F: FnOnce(&mut Message) -> Result<(), ChatError>
    {
        let message = tables.messages.get_mut(id).ok_or_else(|| message_not_found(id))?;
        f(message)?;
        Ok(message.clone())
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let mut tables = self.tables.write().await;
        if tables.conversation_by_user.contains_key(user_id) {
            return Err(
                ChatError::Conflict(format!("User {} already has a conversation", user_id))
            );
        }
        let conversation = Conversation::new(user_id);
        tables.conversation_by_user.insert(user_id.to_string(), conversation.id.clone());
        tables.conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        Ok(self.tables.read().await.conversations.get(id).cloned())
    }

    async fn find_conversation_by_user(
        &self,
        user_id: &str
    ) -> Result<Option<Conversation>, ChatError> {
        let tables = self.tables.read().await;
        Ok(
            tables.conversation_by_user
                .get(user_id)
                .and_then(|id| tables.conversations.get(id))
                .cloned()
        )
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let mut all: Vec<Conversation> = self.tables
            .read().await
            .conversations.values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn attach_last_message(
        &self,
        conversation_id: &str,
        message_id: &str
    ) -> Result<Conversation, ChatError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversations
            .get_mut(conversation_id)
            .ok_or_else(|| conversation_not_found(conversation_id))?;
        conversation.last_message_id = Some(message_id.to_string());
        conversation.is_read = false;
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let mut tables = self.tables.write().await;
        let conversation = tables.conversations
            .get_mut(conversation_id)
            .ok_or_else(|| conversation_not_found(conversation_id))?;
        conversation.is_read = true;
        Ok(conversation.clone())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), ChatError> {
        let mut tables = self.tables.write().await;
        tables.messages_by_conversation
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.id.clone());
        tables.messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>, ChatError> {
        Ok(self.tables.read().await.messages.get(id).cloned())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables.messages_by_conversation
            .get(conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.messages.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn advance_message_status(
        &self,
        id: &str,
        status: MessageStatus
    ) -> Result<Message, ChatError> {
        let mut tables = self.tables.write().await;
        Self::update_message(&mut tables, id, |m| {
            m.advance(status);
            Ok(())
        })
    }

    async fn edit_message(&self, id: &str, content: &str) -> Result<Message, ChatError> {
        let mut tables = self.tables.write().await;
        Self::update_message(&mut tables, id, |m| {
            if !m.is_active {
                return Err(message_retracted(id));
            }
            m.apply_edit(content);
            Ok(())
        })
    }

    async fn retract_message(&self, id: &str) -> Result<Message, ChatError> {
        let mut tables = self.tables.write().await;
        Self::update_message(&mut tables, id, |m| {
            m.retract();
            Ok(())
        })
    }
}
