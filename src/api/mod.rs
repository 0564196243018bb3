//! HTTP shell.
//!
//! Only liveness, startup readiness and the 404 fallback live here; project,
//! version and user routes belong to the application layer built on top of
//! [`crate::db::Database`].

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::StartupReport;
use crate::errors::{codes, AppError, ErrorDetails, ErrorResponse};
use crate::AppState;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// GET /health - Liveness probe.
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /health/ready - Report of the startup seeding and legacy upgrade.
///
/// Answers 503 until the startup work has finished.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let report: Option<StartupReport> = state.startup.read().await.clone();
    match report {
        Some(report) => ApiResponse::new(report).into_response(),
        None => {
            let body = ErrorResponse {
                success: false,
                error: ErrorDetails {
                    code: codes::STARTING.to_string(),
                    message: "Startup tasks are still running".to_string(),
                },
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

/// Fallback for every unknown route.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
