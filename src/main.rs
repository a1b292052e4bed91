use std::env;
use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod assignment;
mod classroom;
mod db;
mod error;
mod jwt;
mod launch;
mod models;
mod routes;
mod sessions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "lti_shim=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::connect().await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let ttl_secs: i64 = env::var("LAUNCH_SESSION_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(600);
    let sessions = Arc::new(sessions::SessionStore::new(ttl_secs));

    // expired sessions are also rejected at consumption time; the sweep
    // just keeps the map from accumulating dead entries
    tokio::spawn({
        let sessions = sessions.clone();
        async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                let dropped = sessions.sweep(chrono::Utc::now());
                if dropped > 0 {
                    tracing::debug!(dropped, "swept expired launch sessions");
                }
            }
        }
    });

    let http = reqwest::Client::new();
    let state = routes::AppState {
        db: pool,
        sessions,
        keysets: Arc::new(jwt::KeysetCache::new(http.clone())),
        classroom: Arc::new(classroom::ClassroomClient::new(
            http,
            env::var("CLASSROOM_API_BASE")
                .unwrap_or_else(|_| "https://classroom.googleapis.com/v1".into()),
        )),
        platform_issuer: Arc::new(
            env::var("PLATFORM_ISSUER").unwrap_or_else(|_| "http://localhost:8081".into()),
        ),
        base_url: Arc::new(env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8081".into())),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let port: u16 = env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8081);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
