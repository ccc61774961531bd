use std::time::Duration;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::db::{self, Room};

pub const REAPER_INTERVAL_DEFAULT: Duration = Duration::from_secs(300);

/// A room is live strictly before its expiry instant; `now == expires_at`
/// is already expired.
pub fn is_live(room: &Room, now: i64) -> bool {
    now < room.expires_at
}

/// Drops expired rooms from a listing. Applied to every discovery surface
/// and again defensively at join time.
pub fn filter_live(rooms: Vec<Room>, now: i64) -> Vec<Room> {
    rooms.into_iter().filter(|room| is_live(room, now)).collect()
}

/// Background deletion of expired rooms and their messages.
///
/// Liveness filtering alone keeps the service correct; the reaper only stops
/// dead rows from accumulating forever.
pub fn spawn_reaper(pool: SqlitePool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match reap_expired(&pool, db::now_millis()).await {
                Ok(0) => {}
                Ok(reaped) => tracing::info!(rooms = reaped, "reaped expired rooms"),
                Err(error) => tracing::warn!(%error, "reaper pass failed"),
            }
        }
    })
}

pub async fn reap_expired(pool: &SqlitePool, now: i64) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM messages WHERE room_id IN (SELECT id FROM rooms WHERE expires_at <= ?)",
    )
    .bind(now)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM memberships WHERE room_id IN (SELECT id FROM rooms WHERE expires_at <= ?)",
    )
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let reaped = sqlx::query("DELETE FROM rooms WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{messages, registry};

    fn room_expiring_at(expires_at: i64) -> Room {
        Room {
            id: "room".into(),
            name: "Test".into(),
            code: "ABCDEF".into(),
            created_at: 0,
            expires_at,
            last_activity: 0,
            public: true,
            member_count: 0,
        }
    }

    #[test]
    fn liveness_boundary_is_exclusive() {
        let room = room_expiring_at(1_000);
        assert!(is_live(&room, 999));
        assert!(!is_live(&room, 1_000));
        assert!(!is_live(&room, 1_001));
    }

    #[test]
    fn filter_live_keeps_exactly_the_live_rooms() {
        let live = room_expiring_at(2_000);
        let expired = room_expiring_at(500);
        let kept = filter_live(vec![expired, live.clone()], 1_000);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].expires_at, live.expires_at);
    }

    #[tokio::test]
    async fn reaper_deletes_expired_rooms_and_their_messages() {
        let pool = crate::db::memory_pool().await.unwrap();
        let bus = messages::MessageBus::default();
        let now = crate::db::now_millis();

        let doomed = registry::create_room(&pool, "Doomed", now + 60_000, true)
            .await
            .unwrap();
        messages::append(&pool, &bus, &doomed.id, "alice", "bye", None)
            .await
            .unwrap();
        let kept = registry::create_room(&pool, "Kept", now + 3_600_000, true)
            .await
            .unwrap();

        let reaped = reap_expired(&pool, now + 120_000).await.unwrap();
        assert_eq!(reaped, 1);

        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM rooms")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows, vec![(kept.id,)]);

        let orphaned: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM messages WHERE room_id = ?")
                .bind(&doomed.id)
                .fetch_optional(&pool)
                .await
                .unwrap();
        assert!(orphaned.is_none());
    }
}
