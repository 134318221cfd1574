use chrono::Duration;
use log::info;
use std::sync::Arc;

use prepcraft_review::api::{app_router, ApiState, SessionExpiry};
use prepcraft_review::clock::SystemClock;
use prepcraft_review::config::AppConfig;
use prepcraft_review::db::Db;
use prepcraft_review::persistence::{join_card_writer, spawn_card_writer};
use prepcraft_review::session::ReviewEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db = Db::new(&config.database_url).await?;
    if config.seed_demo_deck {
        db.seed_database_if_empty().await?;
    }

    let (card_writer, writer_handle) = spawn_card_writer(db.clone());
    let engine = ReviewEngine::new(
        config.scheduling.clone(),
        Arc::new(SystemClock),
        Arc::new(card_writer),
    );
    let expiry = SessionExpiry {
        idle: Duration::minutes(config.session_idle_minutes),
        completed: Duration::minutes(config.completed_session_minutes),
    };
    let app = app_router(ApiState::new(db, engine).with_expiry(expiry));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    // Dropping the router's last engine handle closes the channel; let the
    // writer drain what is queued.
    join_card_writer(writer_handle).await;

    Ok(())
}
