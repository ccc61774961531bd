use axum::{
    debug_handler,
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::{self, Message};
use crate::rooms::{expiry, messages::{self, MessageBus, SendMessage}, registry};
use crate::{ServiceError, ServiceResult};

/// Live message stream for one room. Outbound frames are appended messages
/// as JSON; inbound frames are [`SendMessage`] appends. Closing the socket
/// tears the subscription down.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(bus): State<MessageBus>,
    ws: WebSocketUpgrade,
) -> ServiceResult<Response> {
    let room = registry::room_by_id(&db_pool, &room_id.to_string()).await?;
    if !expiry::is_live(&room, db::now_millis()) {
        return Err(ServiceError::RoomExpired);
    }

    let rx = bus.subscribe(&room.id);
    Ok(ws
        .on_upgrade(move |socket| stream_room(socket, db_pool, bus, room.id, rx))
        .into_response())
}

async fn stream_room(
    socket: WebSocket,
    db_pool: SqlitePool,
    bus: MessageBus,
    room_id: String,
    mut rx: broadcast::Receiver<Message>,
) {
    let (mut sender, mut receiver) = socket.split();

    let forward_task = tokio::spawn(async move {
        while let Ok(message) = rx.recv().await {
            let Ok(payload) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(payload.into()).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(send) = serde_json::from_slice::<SendMessage>(&frame.into_data()) else {
            continue;
        };
        if let Err(error) = messages::append(
            &db_pool,
            &bus,
            &room_id,
            &send.sender_name,
            &send.content,
            send.tripcode,
        )
        .await
        {
            tracing::debug!(%error, room = %room_id, "rejected websocket append");
        }
    }

    // Dropping the receiver inside ends the subscription for good.
    forward_task.abort();
}
