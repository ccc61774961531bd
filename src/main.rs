use std::time::Duration;

use anyhow::Context;
use axum::{Json, Router, debug_handler, routing::get};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use whisperd::{AppState, db, identity, rooms};
use whisperd::rooms::messages::MessageBus;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("whisperd=info")),
        )
        .init();

    let database_url = dotenv::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&database_url)
        .await
        .context("failed to open the room store")?;
    db::init(&db_pool)
        .await
        .context("failed to prepare the room store schema")?;

    let max_members = match dotenv::var("MAX_MEMBERS") {
        Ok(raw) => raw.parse().context("MAX_MEMBERS must be an integer")?,
        Err(_) => db::MAX_MEMBERS_DEFAULT,
    };
    let reaper_interval = match dotenv::var("REAPER_INTERVAL_SECS") {
        Ok(raw) => Duration::from_secs(
            raw.parse().context("REAPER_INTERVAL_SECS must be an integer")?,
        ),
        Err(_) => rooms::expiry::REAPER_INTERVAL_DEFAULT,
    };
    rooms::expiry::spawn_reaper(db_pool.clone(), reaper_interval);

    let app_state = AppState {
        db_pool,
        bus: MessageBus::default(),
        max_members,
    };

    let app = Router::new()
        .route("/", get(index))
        .nest("/r", rooms::router())
        .merge(identity::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let bind_addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "whisperd listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[debug_handler]
async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "service": "whisperd", "status": "ok" }))
}
