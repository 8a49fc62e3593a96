mod memory;
mod redis;

use crate::cli::Args;
use crate::error::ChatError;
use crate::models::chat::{ Conversation, Message, MessageStatus };
use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

pub use self::memory::MemoryChatStore;
pub use self::redis::RedisChatStore;

/// Persistence for conversations and their messages.
///
/// Mutations are narrow, single-record writes so that concurrent tasks
/// touching different fields of the same record do not clobber each other,
/// and so that each write is safe to replay.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Creates the conversation for `user_id`. Fails with `Conflict` when the
    /// user already has one.
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, ChatError>;

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, ChatError>;

    async fn find_conversation_by_user(
        &self,
        user_id: &str
    ) -> Result<Option<Conversation>, ChatError>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError>;

    /// Points the conversation at `message_id`, flags it unread and bumps
    /// `updated_at`.
    async fn attach_last_message(
        &self,
        conversation_id: &str,
        message_id: &str
    ) -> Result<Conversation, ChatError>;

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<Conversation, ChatError>;

    async fn insert_message(&self, message: &Message) -> Result<(), ChatError>;

    async fn find_message(&self, id: &str) -> Result<Option<Message>, ChatError>;

    /// Messages of one conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError>;

    /// Moves the status forward if `status` is ahead of the stored one and
    /// returns the record as it stands afterwards.
    async fn advance_message_status(
        &self,
        id: &str,
        status: MessageStatus
    ) -> Result<Message, ChatError>;

    /// Replaces content, forces `delivered` and sets `is_updated`. Fails with
    /// `BadRequest` when the message is already retracted, checked in the
    /// same atomic step as the write.
    async fn edit_message(&self, id: &str, content: &str) -> Result<Message, ChatError>;

    /// Sets `is_active = false`; content stays in storage.
    async fn retract_message(&self, id: &str) -> Result<Message, ChatError>;
}

pub(crate) fn message_not_found(id: &str) -> ChatError {
    ChatError::NotFound(format!("Message {} not found", id))
}

pub(crate) fn message_retracted(id: &str) -> ChatError {
    ChatError::BadRequest(format!("Message {} was retracted and cannot be edited", id))
}

pub(crate) fn conversation_not_found(id: &str) -> ChatError {
    ChatError::NotFound(format!("Conversation {} not found", id))
}

pub fn create_chat_store(args: &Args) -> Result<Arc<dyn ChatStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let store = RedisChatStore::new(&args.store_host, &args.store_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(MemoryChatStore::default())),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_chat_store(
    args: &Args
) -> Result<Arc<dyn ChatStore>, Box<dyn Error + Send + Sync>> {
    info!("Chat records will be stored in: {} at {}", args.store_type, args.store_host);
    create_chat_store(args)
}
