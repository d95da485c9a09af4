//! Citizen Complaint Portal
//!
//! REST service where citizens file complaints about public services and
//! administrators work through them tier by tier.
//!
//! ## Features
//!
//! - **Citizen Portal**: Submit complaints with identity and supporting documents
//! - **Tiered Handling**: Sector, district and organization queues with escalation
//! - **Administration**: Account provisioning, dashboard statistics, ZIP export

mod config;
mod db;
mod error;
mod handlers;
mod lifecycle;
mod models;
mod validation;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use handlers::AppState;
use lifecycle::LifecyclePolicy;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "complaint_portal=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Starting Complaint Portal");
    tracing::info!("Environment: {:?}", config.environment);

    // Create database pool
    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    if let Some(seed) = &config.superadmin {
        let password_hash = handlers::hash_password(&seed.password)?;
        if db::users::ensure_superadmin(&pool, &seed.email, &password_hash).await? {
            tracing::info!("Created superadmin account {}", seed.email);
        }
    }

    // Ensure upload directory exists
    let upload_dir = PathBuf::from(&config.upload_dir);
    fs::create_dir_all(&upload_dir).await?;
    let upload_dir = fs::canonicalize(&upload_dir).await?;
    tracing::info!("Upload directory: {:?}", upload_dir);

    let policy = LifecyclePolicy {
        service_catalog: config.service_catalog.clone(),
        response_days: config.complaint_response_days,
    };
    tracing::info!(
        "Service catalog: {} services, response window: {:?} days",
        policy.service_catalog.len(),
        policy.response_days
    );

    let state = AppState {
        pool: pool.clone(),
        upload_dir,
        is_production: config.is_production(),
        trusted_proxies: config.trusted_proxies.clone(),
        session_expiry_hours: config.session_expiry_hours,
        policy: Arc::new(policy),
    };

    // Hourly purge of expired sessions and old rate-limit rows
    let maintenance_pool = pool.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match db::users::purge_expired(&maintenance_pool).await {
                Ok((sessions, attempts)) => tracing::info!(
                    "Maintenance: removed {} expired sessions, {} rate-limit rows",
                    sessions,
                    attempts
                ),
                Err(e) => tracing::error!("Maintenance task failed: {}", e),
            }
        }
    });

    // Build CORS layer
    let cors = if config.is_production() {
        CorsLayer::new()
            .allow_origin(
                config
                    .cors_origins
                    .iter()
                    .filter_map(|o| o.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::permissive()
    };

    let public_routes = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/services", get(handlers::list_services))
        .route("/organizations", get(handlers::list_organizations));

    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route("/complaints", post(handlers::create_complaint))
        .route("/complaints/citizen", get(handlers::list_citizen_complaints))
        .route("/complaints/sector", get(handlers::list_sector_complaints))
        .route("/complaints/district", get(handlers::list_district_complaints))
        .route(
            "/complaints/organization",
            get(handlers::list_organization_complaints),
        )
        .route("/complaints/:id", get(handlers::get_complaint))
        .route(
            "/complaints/:id/status",
            patch(handlers::update_complaint_status),
        )
        .route(
            "/complaints/:id/escalate",
            post(handlers::escalate_complaint),
        )
        .route(
            "/complaints/:id/comments",
            post(handlers::add_complaint_comment),
        )
        .route("/complaints/:id/export", get(handlers::export_complaint))
        .route("/dashboard/stats", get(handlers::get_dashboard_stats))
        .route("/admin/users", post(handlers::create_admin_user))
        .route("/organizations", post(handlers::create_organization))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::require_auth,
        ));

    let app = Router::new()
        .nest("/api", public_routes.merge(protected_routes))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_size))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::middleware::security_headers,
        ))
        .with_state(state);

    // Start server
    let addr = config.server_addr();
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
