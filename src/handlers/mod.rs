//! HTTP request handlers

pub mod admin;
pub mod auth;
pub mod complaints;
pub mod middleware;
pub mod organizations;

pub use admin::*;
pub use auth::*;
pub use complaints::*;
pub use organizations::*;

use crate::lifecycle::LifecyclePolicy;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub upload_dir: PathBuf,
    pub is_production: bool,
    /// Trusted proxy IP prefixes for X-Forwarded-For validation
    pub trusted_proxies: Vec<String>,
    pub session_expiry_hours: i64,
    pub policy: Arc<LifecyclePolicy>,
}
