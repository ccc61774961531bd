use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{Json, debug_handler, extract::{Path, State}};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{self, Message};
use crate::rooms::{expiry, registry};
use crate::{ServiceError, ServiceResult};

const CHANNEL_CAPACITY: usize = 256;

/// Per-room fan-out of appended messages.
///
/// A subscriber holds a [`broadcast::Receiver`] and cancels by dropping it;
/// dropping twice is naturally a no-op. A channel with no receivers left is
/// pruned on the next publish.
#[derive(Clone, Default)]
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Message>>>>,
}

impl MessageBus {
    pub fn subscribe(&self, room_id: &str) -> broadcast::Receiver<Message> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(room_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, room_id: &str, message: &Message) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(tx) = channels.get(room_id) {
            if tx.send(message.clone()).is_err() {
                channels.remove(room_id);
            }
        }
    }
}

/// Appends a message to a live room and fans it out to subscribers.
///
/// The timestamp is assigned here, on the service side; ties are broken by
/// insertion order when listing.
pub async fn append(
    pool: &SqlitePool,
    bus: &MessageBus,
    room_id: &str,
    sender_name: &str,
    content: &str,
    tripcode: Option<String>,
) -> ServiceResult<Message> {
    db::with_timeout(async {
        if content.trim().is_empty() {
            return Err(ServiceError::Validation {
                field: "content",
                reason: "must not be blank",
            });
        }
        if sender_name.trim().is_empty() {
            return Err(ServiceError::Validation {
                field: "sender_name",
                reason: "must not be blank",
            });
        }

        let now = db::now_millis();
        let room = registry::room_by_id(pool, room_id).await?;
        if !expiry::is_live(&room, now) {
            return Err(ServiceError::RoomExpired);
        }

        let message = Message {
            id: Uuid::now_v7().to_string(),
            room_id: room.id.clone(),
            sender_name: sender_name.to_owned(),
            content: content.to_owned(),
            timestamp: now,
            tripcode,
        };
        sqlx::query(
            "INSERT INTO messages (id,room_id,sender_name,content,timestamp,tripcode)
             VALUES (?,?,?,?,?,?)",
        )
        .bind(&message.id)
        .bind(&message.room_id)
        .bind(&message.sender_name)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(&message.tripcode)
        .execute(pool)
        .await?;

        registry::touch_last_activity(pool, &room.id, now).await?;
        bus.publish(&room.id, &message);
        Ok(message)
    })
    .await
}

/// All messages of a room, newest first; rowid breaks timestamp ties by
/// insertion order.
pub async fn list_by_room(pool: &SqlitePool, room_id: &str) -> ServiceResult<Vec<Message>> {
    db::with_timeout(async {
        Ok(sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE room_id = ? ORDER BY timestamp DESC, rowid DESC",
        )
        .bind(room_id)
        .fetch_all(pool)
        .await?)
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct SendMessage {
    pub sender_name: String,
    pub content: String,
    pub tripcode: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn post_message(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(bus): State<MessageBus>,
    Json(SendMessage { sender_name, content, tripcode }): Json<SendMessage>,
) -> ServiceResult<Json<Message>> {
    Ok(Json(
        append(&db_pool, &bus, &room_id.to_string(), &sender_name, &content, tripcode).await?,
    ))
}

#[debug_handler]
pub(crate) async fn get_messages(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> ServiceResult<Json<Vec<Message>>> {
    Ok(Json(list_by_room(&db_pool, &room_id.to_string()).await?))
}
