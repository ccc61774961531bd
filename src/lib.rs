pub mod db;
pub mod error;
pub mod identity;
pub mod rooms;

use axum::extract::FromRef;
use sqlx::SqlitePool;

pub use error::{ServiceError, ServiceResult};

use rooms::messages::MessageBus;

/// Shared handles threaded through every handler. The store pool is passed
/// explicitly; nothing in the crate reaches for a global.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub bus: MessageBus,
    pub max_members: i64,
}
