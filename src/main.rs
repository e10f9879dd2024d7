//! SpaceY Backend
//!
//! REST backend for the SpaceY machine portal with SQLite persistence and
//! Tantivy full-text search.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod mail;
mod models;
mod search;
mod usage;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::JwtManager;
use config::{Config, LogFormat};
use db::Repository;
use mail::Mailer;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub jwt: Arc<JwtManager>,
    pub mailer: Arc<Mailer>,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, search: Arc<SearchIndex>, config: &Config) -> Self {
        let jwt = JwtManager::new(config.jwt_secret.as_bytes(), config.token_ttl_secs);
        let mailer = Mailer::new(config.mail_from.clone(), repo.clone());
        Self {
            repo,
            search,
            jwt: Arc::new(jwt),
            mailer: Arc::new(mailer),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    tracing::info!("Starting SpaceY Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if !config.jwt_secret_configured {
        tracing::warn!(
            "No JWT secret configured (SPACEY_JWT_SECRET). Tokens will not survive a restart!"
        );
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    bootstrap_admin(&repo, &config).await?;

    // Initialize search index
    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    tracing::info!("Building search index...");
    let machines = repo.list_machines().await?;
    let sensors = repo.list_sensors().await?;
    search.rebuild(&machines, &sensors).await?;

    let bind_addr = config.bind_addr;
    let sweep_every = Duration::from_secs(config.cycle_sweep_secs);
    let state = AppState::new(repo.clone(), search, &config);

    tokio::spawn(sweep_expired_cycles(repo, sweep_every));

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Create or refresh the configured administrator account.
async fn bootstrap_admin(
    repo: &Repository,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match (&config.admin_username, &config.admin_password) {
        (Some(username), Some(password)) => {
            if password.chars().count() < auth::password::MIN_PASSWORD_LEN {
                return Err("SPACEY_ADMIN_PASSWORD is too short".into());
            }
            let hash = auth::password::hash_password_async(password.clone()).await?;
            let admin = repo.ensure_admin(username, &hash).await?;
            tracing::info!(user = %admin.username, "Administrator account ready");
        }
        (Some(_), None) | (None, Some(_)) => {
            tracing::warn!(
                "Set both SPACEY_ADMIN_USERNAME and SPACEY_ADMIN_PASSWORD to bootstrap an administrator"
            );
        }
        (None, None) => {}
    }
    Ok(())
}

/// Release users whose cycle ran past its end time.
async fn sweep_expired_cycles(repo: Arc<Repository>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match repo.release_expired_cycles().await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Released {} expired cycles", n),
            Err(e) => tracing::warn!("Cycle sweep failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Administrator-only routes
    let admin_routes = Router::new()
        // Users
        .route("/users", get(api::list_users))
        .route("/users/pending", get(api::list_pending_users))
        .route("/users/{id}", put(api::update_user).delete(api::delete_user))
        .route("/users/{id}/approve", post(api::approve_user))
        .route("/users/{id}/reject", post(api::reject_user))
        // Machines
        .route("/machines", post(api::create_machine))
        .route(
            "/machines/{id}",
            put(api::update_machine).delete(api::delete_machine),
        )
        .route("/machines/{id}/readings", post(api::record_reading))
        // Sensors
        .route("/sensors", post(api::create_sensor))
        .route("/sensors/{id}", put(api::update_sensor).delete(api::delete_sensor))
        // News
        .route("/news", post(api::create_news))
        .route("/news/{id}", put(api::update_news).delete(api::delete_news))
        // Tickets
        .route("/tickets/{id}/approve", post(api::approve_ticket))
        .route("/tickets/{id}/reject", post(api::reject_ticket))
        // Maintenance
        .route("/admin/outbox", get(api::list_outbox))
        .route("/admin/search/rebuild", post(api::rebuild_search))
        .route_layer(middleware::from_fn(auth::require_admin));

    // Routes for any active account
    let protected_routes = Router::new()
        .route("/auth/me", get(api::me))
        .route("/users/{id}", get(api::get_user))
        .route("/users/{id}/cycles", get(api::list_user_cycles))
        .route("/leaderboard", get(api::leaderboard))
        .route("/machines", get(api::list_machines))
        .route("/machines/{id}", get(api::get_machine))
        .route("/machines/{id}/start-cycle", post(api::start_cycle))
        .route("/machines/{id}/end-cycle", post(api::end_cycle))
        .route("/machines/{id}/cycles", get(api::list_machine_cycles))
        .route("/machines/{id}/usage", get(api::get_usage))
        .route("/sensors", get(api::list_sensors))
        .route("/sensors/{id}", get(api::get_sensor))
        .route("/news", get(api::list_news))
        .route("/news/{id}", get(api::get_news))
        .route("/tickets", get(api::list_tickets).post(api::create_ticket))
        .route("/tickets/{id}", get(api::get_ticket))
        .route("/tickets/{id}/cancel", post(api::cancel_ticket))
        .route("/search", get(api::search_catalog))
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    // Signup and login (no token required)
    let public_routes = Router::new()
        .route("/auth/register", post(api::register))
        .route("/auth/login", post(api::login));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.repo.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE")
        }
    }
}

#[cfg(test)]
mod tests;
