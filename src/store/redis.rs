use async_trait::async_trait;
use chrono::{ DateTime, SecondsFormat, Utc };
use redis::aio::MultiplexedConnection;
use redis::{ AsyncCommands, Client, Script };
use std::collections::HashMap;
use std::error::Error;

use crate::error::ChatError;
use crate::models::chat::{ Conversation, Message, MessageStatus };
use crate::store::{ conversation_not_found, message_not_found, message_retracted, ChatStore };

// KEYS: user index, conversation hash, conversation set.
// ARGV: conversation id, user id, timestamp.
const CREATE_CONVERSATION: &str =
    r#"
if redis.call('SETNX', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], 'id', ARGV[1], 'userId', ARGV[2], 'lastMessageId', '',
  'isRead', '0', 'createdAt', ARGV[3], 'updatedAt', ARGV[3])
redis.call('SADD', KEYS[3], ARGV[1])
return 1
"#;

const HSET_IF_EXISTS: &str =
    r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

// 0: missing, -1: retracted, 1: written.
const EDIT_ACTIVE: &str =
    r#"
local active = redis.call('HGET', KEYS[1], 'isActive')
if not active then
  return 0
end
if active ~= '1' then
  return -1
end
redis.call('HSET', KEYS[1], 'content', ARGV[1], 'status', 'delivered', 'isUpdated', '1',
  'updatedAt', ARGV[2])
return 1
"#;

const ADVANCE_STATUS: &str =
    r#"
local rank = { sent = 0, delivered = 1, seen = 2 }
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return 0
end
if rank[ARGV[1]] > rank[current] then
  redis.call('HSET', KEYS[1], 'status', ARGV[1], 'updatedAt', ARGV[2])
end
return 1
"#;

/// Conversations and messages as Redis hashes:
///
/// - `<prefix>conversation:<id>` hash, `<prefix>conversation:user:<userId>` -> id,
///   `<prefix>conversations` set of ids
/// - `<prefix>message:<id>` hash, `<prefix>messages:<conversationId>` sorted set
///   scored by creation time
///
/// Field-level writes go through Lua so that a status advance racing an edit
/// can never lose either write or move the status backwards, and an edit
/// racing a retraction cannot rewrite retracted content.
///
/// A connection is opened per operation, so a Redis restart only fails the
/// calls made while it is down.
pub struct RedisChatStore {
    client: Client,
    key_prefix: String,
    create_script: Script,
    hset_script: Script,
    edit_script: Script,
    advance_script: Script,
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn field<'a>(row: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ChatError> {
    row.get(name)
        .map(String::as_str)
        .ok_or_else(|| ChatError::Internal(format!("record missing field '{}'", name)))
}

fn timestamp(row: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>, ChatError> {
    let raw = field(row, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChatError::Internal(format!("bad timestamp in '{}': {}", name, e)))
}

fn conversation_from_row(row: &HashMap<String, String>) -> Result<Conversation, ChatError> {
    let last = field(row, "lastMessageId")?;
    Ok(Conversation {
        id: field(row, "id")?.to_string(),
        user_id: field(row, "userId")?.to_string(),
        last_message_id: if last.is_empty() { None } else { Some(last.to_string()) },
        is_read: field(row, "isRead")? == "1",
        created_at: timestamp(row, "createdAt")?,
        updated_at: timestamp(row, "updatedAt")?,
    })
}

fn message_from_row(row: &HashMap<String, String>) -> Result<Message, ChatError> {
    Ok(Message {
        id: field(row, "id")?.to_string(),
        conversation_id: field(row, "conversationId")?.to_string(),
        sender_id: field(row, "senderId")?.to_string(),
        content: field(row, "content")?.to_string(),
        status: field(row, "status")?.parse()?,
        is_updated: field(row, "isUpdated")? == "1",
        is_active: field(row, "isActive")? == "1",
        created_at: timestamp(row, "createdAt")?,
        updated_at: timestamp(row, "updatedAt")?,
    })
}

fn flag(value: bool) -> String {
    if value { "1".to_string() } else { "0".to_string() }
}

impl RedisChatStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
            create_script: Script::new(CREATE_CONVERSATION),
            hset_script: Script::new(HSET_IF_EXISTS),
            edit_script: Script::new(EDIT_ACTIVE),
            advance_script: Script::new(ADVANCE_STATUS),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ChatError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}conversation:{}", self.key_prefix, id)
    }

    fn user_index_key(&self, user_id: &str) -> String {
        format!("{}conversation:user:{}", self.key_prefix, user_id)
    }

    fn conversations_key(&self) -> String {
        format!("{}conversations", self.key_prefix)
    }

    fn message_key(&self, id: &str) -> String {
        format!("{}message:{}", self.key_prefix, id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, conversation_id)
    }

    async fn hset_if_exists(&self, key: &str, fields: &[(&str, String)]) -> Result<bool, ChatError> {
        let mut conn = self.connection().await?;
        let mut invocation = self.hset_script.key(key);
        for (name, value) in fields {
            invocation.arg(*name).arg(value);
        }
        let applied: i32 = invocation.invoke_async(&mut conn).await?;
        Ok(applied == 1)
    }

    async fn load_rows(&self, keys: &[String]) -> Result<Vec<HashMap<String, String>>, ChatError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;
        Ok(rows)
    }

    async fn load_message(&self, id: &str) -> Result<Message, ChatError> {
        self.find_message(id).await?.ok_or_else(|| message_not_found(id))
    }

    async fn load_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        self.find_conversation(id).await?.ok_or_else(|| conversation_not_found(id))
    }
}

#[async_trait]
impl ChatStore for RedisChatStore {
    async fn create_conversation(&self, user_id: &str) -> Result<Conversation, ChatError> {
        let conversation = Conversation::new(user_id);
        let mut conn = self.connection().await?;
        let created: i32 = self.create_script
            .key(self.user_index_key(user_id))
            .key(self.conversation_key(&conversation.id))
            .key(self.conversations_key())
            .arg(&conversation.id)
            .arg(user_id)
            .arg(ts(conversation.created_at))
            .invoke_async(&mut conn).await?;
        if created == 0 {
            return Err(
                ChatError::Conflict(format!("User {} already has a conversation", user_id))
            );
        }
        Ok(conversation)
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        let mut conn = self.connection().await?;
        let row: HashMap<String, String> = conn.hgetall(self.conversation_key(id)).await?;
        if row.is_empty() {
            return Ok(None);
        }
        conversation_from_row(&row).map(Some)
    }

    async fn find_conversation_by_user(
        &self,
        user_id: &str
    ) -> Result<Option<Conversation>, ChatError> {
        let mut conn = self.connection().await?;
        let id: Option<String> = conn.get(self.user_index_key(user_id)).await?;
        match id {
            Some(id) => self.find_conversation(&id).await,
            None => Ok(None),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.conversations_key()).await?;
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.conversation_key(id))
            .collect();
        let mut all = Vec::with_capacity(keys.len());
        for row in self.load_rows(&keys).await? {
            if !row.is_empty() {
                all.push(conversation_from_row(&row)?);
            }
        }
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn attach_last_message(
        &self,
        conversation_id: &str,
        message_id: &str
    ) -> Result<Conversation, ChatError> {
        let applied = self.hset_if_exists(
            &self.conversation_key(conversation_id),
            &[
                ("lastMessageId", message_id.to_string()),
                ("isRead", flag(false)),
                ("updatedAt", ts(Utc::now())),
            ]
        ).await?;
        if !applied {
            return Err(conversation_not_found(conversation_id));
        }
        self.load_conversation(conversation_id).await
    }

    async fn mark_conversation_read(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let applied = self.hset_if_exists(
            &self.conversation_key(conversation_id),
            &[("isRead", flag(true))]
        ).await?;
        if !applied {
            return Err(conversation_not_found(conversation_id));
        }
        self.load_conversation(conversation_id).await
    }

    async fn insert_message(&self, message: &Message) -> Result<(), ChatError> {
        let mut conn = self.connection().await?;
        let fields = [
            ("id", message.id.clone()),
            ("conversationId", message.conversation_id.clone()),
            ("senderId", message.sender_id.clone()),
            ("content", message.content.clone()),
            ("status", message.status.as_str().to_string()),
            ("isUpdated", flag(message.is_updated)),
            ("isActive", flag(message.is_active)),
            ("createdAt", ts(message.created_at)),
            ("updatedAt", ts(message.updated_at)),
        ];
        let _: () = redis
            ::pipe()
            .atomic()
            .hset_multiple(self.message_key(&message.id), &fields)
            .zadd(
                self.messages_key(&message.conversation_id),
                &message.id,
                message.created_at.timestamp_micros()
            )
            .query_async(&mut conn).await?;
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>, ChatError> {
        let mut conn = self.connection().await?;
        let row: HashMap<String, String> = conn.hgetall(self.message_key(id)).await?;
        if row.is_empty() {
            return Ok(None);
        }
        message_from_row(&row).map(Some)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.zrange(self.messages_key(conversation_id), 0, -1).await?;
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.message_key(id))
            .collect();
        let mut messages = Vec::with_capacity(keys.len());
        for row in self.load_rows(&keys).await? {
            if !row.is_empty() {
                messages.push(message_from_row(&row)?);
            }
        }
        Ok(messages)
    }

    async fn advance_message_status(
        &self,
        id: &str,
        status: MessageStatus
    ) -> Result<Message, ChatError> {
        let mut conn = self.connection().await?;
        let found: i32 = self.advance_script
            .key(self.message_key(id))
            .arg(status.as_str())
            .arg(ts(Utc::now()))
            .invoke_async(&mut conn).await?;
        if found == 0 {
            return Err(message_not_found(id));
        }
        self.load_message(id).await
    }

    async fn edit_message(&self, id: &str, content: &str) -> Result<Message, ChatError> {
        let mut conn = self.connection().await?;
        let outcome: i32 = self.edit_script
            .key(self.message_key(id))
            .arg(content)
            .arg(ts(Utc::now()))
            .invoke_async(&mut conn).await?;
        match outcome {
            0 => Err(message_not_found(id)),
            -1 => Err(message_retracted(id)),
            _ => self.load_message(id).await,
        }
    }

    async fn retract_message(&self, id: &str) -> Result<Message, ChatError> {
        let applied = self.hset_if_exists(
            &self.message_key(id),
            &[
                ("isActive", flag(false)),
                ("updatedAt", ts(Utc::now())),
            ]
        ).await?;
        if !applied {
            return Err(message_not_found(id));
        }
        self.load_message(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_row_round_trips_through_hash_fields() {
        let mut msg = Message::new("c1", "u1", "hello");
        msg.advance(MessageStatus::Delivered);
        let row: HashMap<String, String> = [
            ("id", msg.id.clone()),
            ("conversationId", "c1".to_string()),
            ("senderId", "u1".to_string()),
            ("content", "hello".to_string()),
            ("status", "delivered".to_string()),
            ("isUpdated", flag(false)),
            ("isActive", flag(true)),
            ("createdAt", ts(msg.created_at)),
            ("updatedAt", ts(msg.updated_at)),
        ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let parsed = message_from_row(&row).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.status, MessageStatus::Delivered);
        assert!(parsed.is_active);
        assert_eq!(parsed.created_at.timestamp_micros(), msg.created_at.timestamp_micros());
    }

    #[test]
    fn conversation_row_without_last_message() {
        let now = ts(Utc::now());
        let row: HashMap<String, String> = [
            ("id", "c1"),
            ("userId", "u1"),
            ("lastMessageId", ""),
            ("isRead", "0"),
            ("createdAt", now.as_str()),
            ("updatedAt", now.as_str()),
        ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let parsed = conversation_from_row(&row).unwrap();
        assert_eq!(parsed.last_message_id, None);
        assert!(!parsed.is_read);
    }

    #[test]
    fn missing_field_is_internal_error() {
        let row = HashMap::new();
        assert!(matches!(message_from_row(&row), Err(ChatError::Internal(_))));
    }
}
