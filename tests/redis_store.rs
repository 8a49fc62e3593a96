//! Runs against a real Redis only when `REDIS_URL` is set, e.g.
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_store`.

use chatdesk::error::ChatError;
use chatdesk::models::chat::{ Message, MessageStatus };
use chatdesk::store::{ ChatStore, RedisChatStore };
use uuid::Uuid;

fn redis_url() -> Option<String> {
    std::env::var("REDIS_URL").ok()
}

fn store() -> Option<RedisChatStore> {
    let url = redis_url()?;
    // fresh prefix per test so runs never see each other's keys
    let prefix = format!("chatdesk-test:{}:", Uuid::new_v4());
    Some(RedisChatStore::new(&url, &prefix).unwrap())
}

#[tokio::test]
async fn conversation_is_unique_per_user() {
    let Some(store) = store() else {
        return;
    };
    let created = store.create_conversation("u1").await.unwrap();
    match store.create_conversation("u1").await {
        Err(ChatError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {:?}", other.map(|c| c.id)),
    }
    let found = store.find_conversation_by_user("u1").await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(store.list_conversations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn message_lifecycle_round_trips_through_redis() {
    let Some(store) = store() else {
        return;
    };
    let conversation = store.create_conversation("u1").await.unwrap();
    let first = Message::new(&conversation.id, "admin-1", "Hi");
    store.insert_message(&first).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = Message::new(&conversation.id, "u1", "Hello back");
    store.insert_message(&second).await.unwrap();

    let updated = store.attach_last_message(&conversation.id, &second.id).await.unwrap();
    assert_eq!(updated.last_message_id.as_deref(), Some(second.id.as_str()));
    assert!(!updated.is_read);

    let seen = store.advance_message_status(&first.id, MessageStatus::Seen).await.unwrap();
    assert_eq!(seen.status, MessageStatus::Seen);
    let unchanged = store.advance_message_status(&first.id, MessageStatus::Delivered).await.unwrap();
    assert_eq!(unchanged.status, MessageStatus::Seen);

    let edited = store.edit_message(&first.id, "Hey").await.unwrap();
    assert_eq!(edited.status, MessageStatus::Delivered);
    assert!(edited.is_updated);

    let retracted = store.retract_message(&first.id).await.unwrap();
    assert!(!retracted.is_active);
    assert_eq!(retracted.content, "Hey");

    let ids: Vec<String> = store
        .list_messages(&conversation.id).await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

    assert!(matches!(store.edit_message(&first.id, "again").await, Err(ChatError::BadRequest(_))));
    assert_eq!(store.find_message(&first.id).await.unwrap().unwrap().content, "Hey");

    assert!(store.mark_conversation_read(&conversation.id).await.unwrap().is_read);
    assert!(matches!(store.retract_message("missing").await, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn store_survives_dropped_server_connections() {
    let Some(store) = store() else {
        return;
    };
    let Some(url) = redis_url() else {
        return;
    };
    let conversation = store.create_conversation("u1").await.unwrap();

    // drop every other client, as a server restart would
    let admin = redis::Client::open(url.as_str()).unwrap();
    let mut conn = admin.get_multiplexed_async_connection().await.unwrap();
    let _: i64 = redis
        ::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .arg("SKIPME")
        .arg("yes")
        .query_async(&mut conn).await
        .unwrap();

    let found = store.find_conversation(&conversation.id).await.unwrap();
    assert_eq!(found.map(|c| c.id), Some(conversation.id));
}
