pub mod expiry;
pub mod membership;
pub mod messages;
pub mod registry;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", post(registry::create))
        .route("/public", get(registry::list_public))
        .route("/code/{code}", get(registry::by_code))
        .route("/join", post(membership::join_by_code))
        .route("/join/random", post(membership::join_random))
        .route("/joined/{user_id}", get(membership::joined_rooms))
        .route("/{room_id}/leave", post(membership::leave_room))
        .route(
            "/{room_id}/messages",
            get(messages::get_messages).post(messages::post_message),
        )
        .route("/{room_id}/ws", get(ws::room_ws))
}
