use axum::{Json, debug_handler, extract::{Path, State}};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, Room};
use crate::{ServiceError, ServiceResult};

pub const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CODE_ATTEMPTS: usize = 16;

/// Creates a room and assigns it a join code unused by any live room.
///
/// The room starts with zero members; the creator joins through the
/// membership manager like everyone else.
pub async fn create_room(
    pool: &SqlitePool,
    name: &str,
    expires_at: i64,
    public: bool,
) -> ServiceResult<Room> {
    db::with_timeout(async {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation {
                field: "name",
                reason: "must not be blank",
            });
        }
        let now = db::now_millis();
        if expires_at <= now {
            return Err(ServiceError::Validation {
                field: "expires_at",
                reason: "must be in the future",
            });
        }

        let room = Room {
            id: Uuid::now_v7().to_string(),
            name: name.to_owned(),
            code: fresh_code(pool, now).await?,
            created_at: now,
            expires_at,
            last_activity: now,
            public,
            member_count: 0,
        };
        sqlx::query(
            "INSERT INTO rooms (id,name,code,created_at,expires_at,last_activity,public,member_count)
             VALUES (?,?,?,?,?,?,?,?)",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(&room.code)
        .bind(room.created_at)
        .bind(room.expires_at)
        .bind(room.last_activity)
        .bind(room.public)
        .bind(room.member_count)
        .execute(pool)
        .await?;

        tracing::info!(room = %room.id, code = %room.code, public, "created room");
        Ok(room)
    })
    .await
}

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| *CODE_ALPHABET.choose(&mut rng).unwrap() as char)
        .collect()
}

/// Re-rolls until the code collides with no live room. Expired rooms may
/// keep their codes, so uniqueness is only checked against live ones.
async fn fresh_code(pool: &SqlitePool, now: i64) -> ServiceResult<String> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code();
        let taken: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM rooms WHERE code = ? AND expires_at > ?")
                .bind(&code)
                .bind(now)
                .fetch_optional(pool)
                .await?;
        if taken.is_none() {
            return Ok(code);
        }
    }
    Err(ServiceError::Backend(sqlx::Error::Protocol(
        "live rooms exhausted the join-code space".into(),
    )))
}

/// Exact-match lookup on the stored (uppercase) code.
pub async fn room_by_code(pool: &SqlitePool, code: &str) -> ServiceResult<Room> {
    db::with_timeout(async {
        sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE code = ?")
            .bind(code)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::RoomNotFound)
    })
    .await
}

pub async fn room_by_id(pool: &SqlitePool, id: &str) -> ServiceResult<Room> {
    db::with_timeout(async {
        sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(ServiceError::RoomNotFound)
    })
    .await
}

/// Discoverable rooms: public and still live, filtered in the store itself
/// so a stale row never reaches a listing.
pub async fn list_public_rooms(pool: &SqlitePool, now: i64) -> ServiceResult<Vec<Room>> {
    db::with_timeout(async {
        Ok(sqlx::query_as::<_, Room>(
            "SELECT * FROM rooms WHERE public = 1 AND expires_at > ?
             ORDER BY last_activity DESC",
        )
        .bind(now)
        .fetch_all(pool)
        .await?)
    })
    .await
}

pub async fn touch_last_activity(
    pool: &SqlitePool,
    room_id: &str,
    now: i64,
) -> ServiceResult<()> {
    sqlx::query("UPDATE rooms SET last_activity = ? WHERE id = ?")
        .bind(now)
        .bind(room_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomRequest {
    name: String,
    expires_at: i64,
    #[serde(default)]
    public: bool,
}

#[debug_handler]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    Json(NewRoomRequest { name, expires_at, public }): Json<NewRoomRequest>,
) -> ServiceResult<Json<Room>> {
    Ok(Json(create_room(&db_pool, &name, expires_at, public).await?))
}

#[debug_handler]
pub(crate) async fn by_code(
    Path(code): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> ServiceResult<Json<Room>> {
    // Codes are shared by voice and thumb; accept any casing from clients.
    Ok(Json(room_by_code(&db_pool, &code.to_uppercase()).await?))
}

#[debug_handler]
pub(crate) async fn list_public(
    State(db_pool): State<SqlitePool>,
) -> ServiceResult<Json<Vec<Room>>> {
    Ok(Json(list_public_rooms(&db_pool, db::now_millis()).await?))
}
