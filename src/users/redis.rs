use async_trait::async_trait;
use crate::models::chat::User;
use crate::users::UserDirectory;
use std::error::Error;
use redis::{ Client, AsyncCommands };

/// Users live as JSON documents under `<prefix>user:<id>`, written by the
/// account service.
pub struct RedisUserDirectory {
    client: Client,
    key_prefix: String,
}

impl RedisUserDirectory {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for RedisUserDirectory {
    async fn find_user_by_id(
        &self,
        id: &str
    ) -> Result<Option<User>, Box<dyn Error + Send + Sync>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("{}user:{}", self.key_prefix, id);
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}
