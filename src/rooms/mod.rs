//! In-memory room membership for live socket connections.
//!
//! Rooms are plain strings: `user:<id>` for personal rooms, [`ADMIN_ROOM`]
//! for the shared admin feed and `conversation:<id>` for whoever has a
//! conversation open. Nothing here is persisted; a restart starts empty.

use crate::models::websocket::ServerMessage;
use async_trait::async_trait;
use log::{ debug, error, warn };
use std::collections::{ HashMap, HashSet };
use tokio::sync::mpsc::{ self, error::TrySendError };
use tokio::sync::RwLock;
use uuid::Uuid;

pub type ConnectionId = String;

pub const ADMIN_ROOM: &str = "admin";

pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{}", conversation_id)
}

/// The slice of the registry the fan-out path needs. Broadcasts never fail
/// and never wait on a receiver.
#[async_trait]
pub trait RoomBroadcast: Send + Sync {
    async fn broadcast(&self, room: &str, event: &ServerMessage);

    async fn has_members(&self, room: &str) -> bool;
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, mpsc::Sender<String>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
}

#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<Registry>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection's outbound queue and returns its id.
    pub async fn register(&self, outbound: mpsc::Sender<String>) -> ConnectionId {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write().await;
        inner.connections.insert(id.clone(), outbound);
        inner.memberships.insert(id.clone(), HashSet::new());
        id
    }

    /// Returns false when the connection is not registered.
    pub async fn join(&self, connection: &str, room: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.memberships.get_mut(connection) {
            Some(joined) => {
                joined.insert(room.to_string());
            }
            None => {
                return false;
            }
        }
        inner.rooms.entry(room.to_string()).or_default().insert(connection.to_string());
        debug!("{} joined {}", connection, room);
        true
    }

    pub async fn leave(&self, connection: &str, room: &str) {
        let mut inner = self.inner.write().await;
        if let Some(joined) = inner.memberships.get_mut(connection) {
            joined.remove(room);
        }
        Self::remove_member(&mut inner, room, connection);
    }

    /// Drops the connection from every room it joined.
    pub async fn disconnect(&self, connection: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(connection);
        let joined = inner.memberships.remove(connection).unwrap_or_default();
        for room in joined {
            Self::remove_member(&mut inner, &room, connection);
        }
    }

    fn remove_member(inner: &mut Registry, room: &str, connection: &str) {
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(connection);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.inner
            .read().await
            .rooms.get(room)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    pub async fn is_member(&self, connection: &str, room: &str) -> bool {
        self.inner
            .read().await
            .memberships.get(connection)
            .map(|joined| joined.contains(room))
            .unwrap_or(false)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Sends one event to a single connection (acks and errors).
    pub async fn send_to(&self, connection: &str, event: &ServerMessage) {
        let sender = self.inner.read().await.connections.get(connection).cloned();
        if let (Some(sender), Some(payload)) = (sender, encode(event)) {
            deliver(connection, &sender, payload);
        }
    }
}

fn encode(event: &ServerMessage) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to encode {} event: {}", event.event_name(), e);
            None
        }
    }
}

fn deliver(connection: &str, sender: &mpsc::Sender<String>, payload: String) {
    match sender.try_send(payload) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!("Outbound queue full for {}. Dropping event.", connection);
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Connection {} already closed. Dropping event.", connection);
        }
    }
}

#[async_trait]
impl RoomBroadcast for RoomRegistry {
    async fn broadcast(&self, room: &str, event: &ServerMessage) {
        let targets: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let inner = self.inner.read().await;
            match inner.rooms.get(room) {
                Some(members) =>
                    members
                        .iter()
                        .filter_map(|id| inner.connections.get(id).map(|s| (id.clone(), s.clone())))
                        .collect(),
                None => {
                    return;
                }
            }
        };

        let payload = match encode(event) {
            Some(p) => p,
            None => {
                return;
            }
        };
        debug!("Broadcasting {} to {} ({} members)", event.event_name(), room, targets.len());
        for (id, sender) in targets {
            deliver(&id, &sender, payload.clone());
        }
    }

    async fn has_members(&self, room: &str) -> bool {
        self.member_count(room).await > 0
    }
}
