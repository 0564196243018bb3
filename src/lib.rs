//! VersionsTrack backend.
//!
//! Tracks software projects, their release versions and per-version changelog
//! entries in SQLite, with a role-gated user collection.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod search;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use db::{Database, Startup, StartupReport};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Filled in once the startup seeding and legacy upgrade finish.
    pub startup: Arc<RwLock<Option<StartupReport>>>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            startup: Arc::new(RwLock::new(None)),
        }
    }

    /// Wait for `startup` in the background and publish its report.
    pub fn track_startup(&self, startup: Startup) {
        let slot = Arc::clone(&self.startup);
        tokio::spawn(async move {
            let report = startup.wait().await;
            *slot.write().await = Some(report);
        });
    }
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/health/ready", get(api::readiness))
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests;
