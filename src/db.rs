use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::{ServiceError, ServiceResult};

/// Capacity ceiling applied when `MAX_MEMBERS` is not configured.
pub const MAX_MEMBERS_DEFAULT: i64 = 50;

/// No store call is allowed to hang its caller; elapse surfaces as
/// [`ServiceError::Timeout`] rather than an indefinite wait.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// A named, time-bounded chat channel joinable via a short code.
///
/// All timestamps are Unix milliseconds. A room is live iff
/// `now < expires_at`; expired rooms are excluded from discovery and
/// unjoinable even while their row still exists.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub code: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub last_activity: i64,
    pub public: bool,
    pub member_count: i64,
}

/// Association between a user and a room they joined, with a denormalized
/// copy of the room fields for display without a second lookup.
///
/// Unique per (user_id, room_id); a duplicate join is rejected, not merged.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub user_id: String,
    pub room_id: String,
    pub code: String,
    pub name: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub joined_at: i64,
}

/// Immutable once appended; ordering is by server-assigned timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: i64,
    pub tripcode: Option<String>,
}

pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            last_activity INTEGER NOT NULL,
            public INTEGER NOT NULL DEFAULT 0,
            member_count INTEGER NOT NULL DEFAULT 0
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS rooms_code ON rooms(code)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS memberships (
            user_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            joined_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, room_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            tripcode TEXT
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS messages_room ON messages(room_id, timestamp)")
        .execute(pool)
        .await?;

    Ok(())
}

/// In-memory store with the schema applied, for tests and local experiments.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init(&pool).await?;
    Ok(pool)
}

pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Bounds a store operation by [`STORE_TIMEOUT`].
pub async fn with_timeout<T>(fut: impl Future<Output = ServiceResult<T>>) -> ServiceResult<T> {
    match tokio::time::timeout(STORE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = memory_pool().await.unwrap();
        init(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn timed_out_operations_surface_as_timeout() {
        tokio::time::pause();
        let slow = with_timeout(async {
            tokio::time::sleep(STORE_TIMEOUT * 2).await;
            Ok(())
        });
        assert!(matches!(slow.await, Err(ServiceError::Timeout)));
    }
}
