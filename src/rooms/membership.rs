use axum::{Json, debug_handler, extract::{Path, State}};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, Membership, Room};
use crate::rooms::{expiry, registry};
use crate::{AppState, ServiceError, ServiceResult};

/// Joins a room by its share code.
///
/// Rejects expired rooms even while their row still exists, and rejects a
/// second join by the same user. Every successful join bumps
/// `member_count`; every leave decrements it.
pub async fn join(
    pool: &SqlitePool,
    user_id: &str,
    code: &str,
    max_members: i64,
) -> ServiceResult<Room> {
    let room = registry::room_by_code(pool, code).await?;
    enroll(pool, user_id, &room, max_members, db::now_millis()).await?;
    registry::room_by_id(pool, &room.id).await
}

/// Joins a uniformly random live public room.
pub async fn join_random_public(
    pool: &SqlitePool,
    user_id: &str,
    max_members: i64,
) -> ServiceResult<Room> {
    let now = db::now_millis();
    let rooms = registry::list_public_rooms(pool, now).await?;
    let room = rooms
        .choose(&mut rand::rng())
        .cloned()
        .ok_or(ServiceError::NoRoomsAvailable)?;
    enroll(pool, user_id, &room, max_members, now).await?;
    registry::room_by_id(pool, &room.id).await
}

async fn enroll(
    pool: &SqlitePool,
    user_id: &str,
    room: &Room,
    max_members: i64,
    now: i64,
) -> ServiceResult<()> {
    db::with_timeout(async {
        if !expiry::is_live(room, now) {
            return Err(ServiceError::RoomExpired);
        }

        let mut tx = pool.begin().await?;

        let duplicate: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM memberships WHERE user_id = ? AND room_id = ?")
                .bind(user_id)
                .bind(&room.id)
                .fetch_optional(&mut *tx)
                .await?;
        if duplicate.is_some() {
            return Err(ServiceError::AlreadyMember);
        }

        // Capacity check and increment in one statement, so two joiners
        // racing at the boundary cannot both pass the check.
        let bumped = sqlx::query(
            "UPDATE rooms SET member_count = member_count + 1
             WHERE id = ? AND member_count < ?",
        )
        .bind(&room.id)
        .bind(max_members)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if bumped == 0 {
            return Err(ServiceError::RoomFull);
        }

        sqlx::query(
            "INSERT INTO memberships (user_id,room_id,code,name,created_at,expires_at,joined_at)
             VALUES (?,?,?,?,?,?,?)",
        )
        .bind(user_id)
        .bind(&room.id)
        .bind(&room.code)
        .bind(&room.name)
        .bind(room.created_at)
        .bind(room.expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(user = user_id, room = %room.id, "joined room");
        Ok(())
    })
    .await
}

/// Removes the membership record unconditionally. Leaving a room the user
/// never joined is a no-op, and the member count never goes below zero.
pub async fn leave(pool: &SqlitePool, user_id: &str, room_id: &str) -> ServiceResult<()> {
    db::with_timeout(async {
        let mut tx = pool.begin().await?;
        let removed = sqlx::query("DELETE FROM memberships WHERE user_id = ? AND room_id = ?")
            .bind(user_id)
            .bind(room_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed > 0 {
            sqlx::query("UPDATE rooms SET member_count = MAX(member_count - 1, 0) WHERE id = ?")
                .bind(room_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    })
    .await
}

/// The user's joined rooms, stale memberships filtered out on read the same
/// way listings are.
pub async fn rooms_for_user(pool: &SqlitePool, user_id: &str) -> ServiceResult<Vec<Membership>> {
    db::with_timeout(async {
        let records = sqlx::query_as::<_, Membership>(
            "SELECT * FROM memberships WHERE user_id = ? ORDER BY joined_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        let now = db::now_millis();
        Ok(records
            .into_iter()
            .filter(|record| now < record.expires_at)
            .collect())
    })
    .await
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinRequest {
    user_id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserRequest {
    user_id: String,
}

#[debug_handler]
pub(crate) async fn join_by_code(
    State(state): State<AppState>,
    Json(JoinRequest { user_id, code }): Json<JoinRequest>,
) -> ServiceResult<Json<Room>> {
    Ok(Json(
        join(&state.db_pool, &user_id, &code.to_uppercase(), state.max_members).await?,
    ))
}

#[debug_handler]
pub(crate) async fn join_random(
    State(state): State<AppState>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> ServiceResult<Json<Room>> {
    Ok(Json(
        join_random_public(&state.db_pool, &user_id, state.max_members).await?,
    ))
}

#[debug_handler]
pub(crate) async fn leave_room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    Json(UserRequest { user_id }): Json<UserRequest>,
) -> ServiceResult<()> {
    leave(&db_pool, &user_id, &room_id.to_string()).await
}

#[debug_handler]
pub(crate) async fn joined_rooms(
    Path(user_id): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> ServiceResult<Json<Vec<Membership>>> {
    Ok(Json(rooms_for_user(&db_pool, &user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: i64 = 50;

    async fn open_room(pool: &SqlitePool, name: &str) -> Room {
        registry::create_room(pool, name, db::now_millis() + 3_600_000, true)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_without_a_second_record() {
        let pool = db::memory_pool().await.unwrap();
        let room = open_room(&pool, "Lobby").await;

        join(&pool, "user2", &room.code, MAX).await.unwrap();
        let second = join(&pool, "user2", &room.code, MAX).await;
        assert!(matches!(second, Err(ServiceError::AlreadyMember)));

        let (records,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE user_id = 'user2'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(records, 1);

        let fresh = registry::room_by_id(&pool, &room.id).await.unwrap();
        assert_eq!(fresh.member_count, 1);
    }

    #[tokio::test]
    async fn join_refuses_expired_rooms() {
        let pool = db::memory_pool().await.unwrap();
        let now = db::now_millis();
        sqlx::query(
            "INSERT INTO rooms (id,name,code,created_at,expires_at,last_activity,public,member_count)
             VALUES ('old','Old','OLDOLD',?,?,?,1,0)",
        )
        .bind(now - 2_000)
        .bind(now - 1_000)
        .bind(now - 2_000)
        .execute(&pool)
        .await
        .unwrap();

        let refused = join(&pool, "user1", "OLDOLD", MAX).await;
        assert!(matches!(refused, Err(ServiceError::RoomExpired)));
    }

    #[tokio::test]
    async fn capacity_is_never_exceeded() {
        let pool = db::memory_pool().await.unwrap();
        let room = open_room(&pool, "Tiny").await;

        join(&pool, "a", &room.code, 2).await.unwrap();
        join(&pool, "b", &room.code, 2).await.unwrap();
        let third = join(&pool, "c", &room.code, 2).await;
        assert!(matches!(third, Err(ServiceError::RoomFull)));

        let fresh = registry::room_by_id(&pool, &room.id).await.unwrap();
        assert_eq!(fresh.member_count, 2);
    }

    #[tokio::test]
    async fn concurrent_joiners_respect_the_capacity_boundary() {
        let pool = db::memory_pool().await.unwrap();
        let room = open_room(&pool, "Contended").await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            let code = room.code.clone();
            handles.push(tokio::spawn(async move {
                join(&pool, &format!("user{i}"), &code, 3).await
            }));
        }

        let mut joined = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                joined += 1;
            }
        }
        assert_eq!(joined, 3);

        let fresh = registry::room_by_id(&pool, &room.id).await.unwrap();
        assert_eq!(fresh.member_count, 3);
    }

    #[tokio::test]
    async fn leave_decrements_and_floors_at_zero() {
        let pool = db::memory_pool().await.unwrap();
        let room = open_room(&pool, "Revolving").await;

        join(&pool, "a", &room.code, MAX).await.unwrap();
        leave(&pool, "a", &room.id).await.unwrap();
        // Second leave has nothing to remove and must not go negative.
        leave(&pool, "a", &room.id).await.unwrap();

        let fresh = registry::room_by_id(&pool, &room.id).await.unwrap();
        assert_eq!(fresh.member_count, 0);
    }

    #[tokio::test]
    async fn random_join_needs_a_live_public_room() {
        let pool = db::memory_pool().await.unwrap();
        let none = join_random_public(&pool, "wanderer", MAX).await;
        assert!(matches!(none, Err(ServiceError::NoRoomsAvailable)));

        let room = open_room(&pool, "Only Option").await;
        let joined = join_random_public(&pool, "wanderer", MAX).await.unwrap();
        assert_eq!(joined.id, room.id);
        assert_eq!(joined.member_count, 1);
    }

    #[tokio::test]
    async fn stale_memberships_are_filtered_on_read() {
        let pool = db::memory_pool().await.unwrap();
        let now = db::now_millis();
        let room = open_room(&pool, "Fresh").await;
        join(&pool, "u", &room.code, MAX).await.unwrap();

        sqlx::query(
            "INSERT INTO memberships (user_id,room_id,code,name,created_at,expires_at,joined_at)
             VALUES ('u','gone','GONEXX','Gone',?,?,?)",
        )
        .bind(now - 2_000)
        .bind(now - 1_000)
        .bind(now - 2_000)
        .execute(&pool)
        .await
        .unwrap();

        let visible = rooms_for_user(&pool, "u").await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].room_id, room.id);
    }
}
