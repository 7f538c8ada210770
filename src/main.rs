mod config;
mod crypto;
mod domain;
mod error;
mod identity;
mod notifier;
mod routes;
mod scheduler;
mod services;
mod twitter;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
};
use log::info;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};

use config::{Config, RetryPolicy};
use crypto::Vault;
use twitter::TwitterClient;

/// Bounded timeout for image fetches from object storage, per §5.
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Composition root. Built once at startup and shared (via `Arc`) across every
/// request handler and queue worker - no per-request construction, no
/// reflection-based injection.
pub struct AppState {
    pub db: sqlx::PgPool,
    pub vault: Vault,
    pub identity_trust_root: String,
    pub twitter: TwitterClient,
    pub http: Client,
    pub retry_policy: RetryPolicy,
    pub vapid_private_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::from_env();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    info!("[startup] database pool: {} max connections", config.db_pool_size);

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");
    info!("[startup] migrations applied");

    scheduler::reconcile::run_startup_reconciliation(&pool).await;

    let state = Arc::new(AppState {
        db: pool.clone(),
        vault: Vault::new(config.encryption_key),
        identity_trust_root: config.identity_trust_root.clone(),
        twitter: TwitterClient::new(&config.twitter_client_id, &config.twitter_client_secret),
        http: Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build http client"),
        retry_policy: config.retry_policy.clone(),
        vapid_private_key: config.vapid_private_key.clone(),
    });

    tokio::spawn(scheduler::run(state.clone()));
    info!("[startup] publish scheduler started");

    let cors = CorsLayer::new()
        .allow_origin(std::env::var("CORS_ORIGIN").ok().map_or_else(
            || HeaderValue::from_static("*"),
            |origin| {
                origin
                    .parse::<HeaderValue>()
                    .unwrap_or_else(|_| HeaderValue::from_static("*"))
            },
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let x_frame_options = SetResponseHeaderLayer::overriding(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    let x_content_type_options = SetResponseHeaderLayer::overriding(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );

    let app = Router::new()
        .merge(routes::build_routes())
        .layer(cors)
        .layer(x_frame_options)
        .layer(x_content_type_options)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {}: {}", addr, e));

    info!("[startup] listening on http://{}", addr);
    axum::serve(listener, app).await.expect("server failed");

    Ok(())
}
