use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod engine;
mod error;
mod models;
mod routes;
mod store;
#[cfg(test)]
mod testing;

use config::Config;
use routes::AppState;
use store::postgres::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::connect(&config.database_url, config.max_connections).await?;
    db::migrate(&pool).await?;

    let state = AppState {
        store: Arc::new(PgStore::new(pool)),
        settings: Arc::new(config.settings.clone()),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        passing_score = config.settings.default_passing_score,
        streak_offset = %config.settings.streak_offset,
        "listening on http://0.0.0.0:{}",
        config.port
    );

    axum::serve(listener, app).await?;
    Ok(())
}
