mod redis;

use crate::cli::Args;
use crate::models::chat::User;
use async_trait::async_trait;
use log::info;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::sync::Arc;
use tokio::sync::RwLock;

pub use self::redis::RedisUserDirectory;

/// Read-only view of the account service's users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_id(
        &self,
        id: &str
    ) -> Result<Option<User>, Box<dyn Error + Send + Sync>>;
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserDirectory {
    pub fn from_users(users: Vec<User>) -> Self {
        Self {
            users: RwLock::new(
                users
                    .into_iter()
                    .map(|u| (u.id.clone(), u))
                    .collect()
            ),
        }
    }

    /// Loads a JSON array of users, e.g. `[{"id":"a1","role":"admin","displayName":"Ops"}]`.
    pub fn load(path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let json_str = fs
            ::read_to_string(path)
            .map_err(|e| format!("Failed to read users file '{}': {}", path, e))?;
        let users: Vec<User> = serde_json
            ::from_str(&json_str)
            .map_err(|e| format!("Failed to parse users file '{}': {}", path, e))?;
        info!("Loaded {} users from {}", users.len(), path);
        Ok(Self::from_users(users))
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user_by_id(
        &self,
        id: &str
    ) -> Result<Option<User>, Box<dyn Error + Send + Sync>> {
        Ok(self.users.read().await.get(id).cloned())
    }
}

pub fn create_user_directory(
    args: &Args
) -> Result<Arc<dyn UserDirectory>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => {
            let directory = RedisUserDirectory::new(&args.store_host, &args.store_redis_prefix)?;
            Ok(Arc::new(directory))
        }
        "memory" => {
            let directory = match &args.users_path {
                Some(path) => MemoryUserDirectory::load(path)?,
                None => MemoryUserDirectory::default(),
            };
            Ok(Arc::new(directory))
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[tokio::test]
    async fn finds_inserted_users() {
        let directory = MemoryUserDirectory::default();
        assert!(directory.find_user_by_id("a1").await.unwrap().is_none());
        directory.insert(User {
            id: "a1".into(),
            role: Role::Admin,
            display_name: "Ops".into(),
        }).await;
        let found = directory.find_user_by_id("a1").await.unwrap().unwrap();
        assert!(found.is_admin());
    }

    #[test]
    fn unknown_store_type_is_rejected() {
        let args = Args { store_type: "mongo".into(), ..Args::default() };
        let err = create_user_directory(&args).err().unwrap();
        assert!(err.to_string().contains("Unsupported store type"));
    }
}
