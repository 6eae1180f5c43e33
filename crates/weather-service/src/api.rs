//! JSON management API.
//!
//! Read-only views over the stored readings plus a few maintenance actions
//! that the periodic tasks also perform on their own schedule.
//!
//! # Endpoints
//!
//! - `GET /api/health`
//! - `GET /api/weather/latest`
//! - `GET /api/weather/recent?limit=N`
//! - `GET /api/database/info`
//! - `POST /api/database/reset`
//! - `POST /api/cleanup`
//! - `POST /api/logs/clear`
//! - `GET /api/sync/status`
//! - `GET /api/export.csv`
//!
//! ## Error Handling
//!
//! Failures are returned as `{"error": "..."}` via [`AppError`]. Store errors
//! map to HTTP 500.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use weather_store::{StoreStats, StoredReading};

use crate::retention::{LogPruneReport, RetentionManager};
use crate::state::AppState;
use crate::sync::SyncReport;

/// Default number of rows for `/api/weather/recent`.
pub const DEFAULT_RECENT_LIMIT: usize = 10;
/// Upper bound for `/api/weather/recent`.
pub const MAX_RECENT_LIMIT: usize = 1000;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        // Readings
        .route("/api/weather/latest", get(latest))
        .route("/api/weather/recent", get(recent))
        .route("/api/export.csv", get(export_csv))
        // Maintenance
        .route("/api/database/info", get(database_info))
        .route("/api/database/reset", post(database_reset))
        .route("/api/cleanup", post(cleanup))
        .route("/api/logs/clear", post(clear_logs))
        // Relay
        .route("/api/sync/status", get(sync_status))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

async fn latest(State(state): State<Arc<AppState>>) -> Result<Json<StoredReading>, AppError> {
    let reading = state.db.run(|store| store.latest()).await?;
    reading
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No readings stored".to_string()))
}

/// Query parameters for `/api/weather/recent`.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// Most recent readings, newest first.
#[derive(Debug, Serialize)]
pub struct RecentResponse {
    pub count: usize,
    pub readings: Vec<StoredReading>,
}

async fn recent(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<RecentResponse>, AppError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT);
    let readings = state.db.run(move |store| store.recent(limit)).await?;
    Ok(Json(RecentResponse {
        count: readings.len(),
        readings,
    }))
}

async fn export_csv(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .db
        .run(|store| {
            let mut body = Vec::new();
            store.export_csv(&mut body)?;
            Ok(body)
        })
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"weather_data.csv\"",
            ),
        ],
        body,
    ))
}

/// Database location and size.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub path: String,
    #[serde(flatten)]
    pub stats: StoreStats,
}

async fn database_info(State(state): State<Arc<AppState>>) -> Result<Json<DatabaseInfo>, AppError> {
    let stats = state.db.run(|store| store.stats()).await?;
    Ok(Json(DatabaseInfo {
        path: state.db.path().display().to_string(),
        stats,
    }))
}

/// Rows removed by a maintenance action.
#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub records_deleted: u64,
}

async fn database_reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeletedResponse>, AppError> {
    let records_deleted = state.db.run(|store| store.reset()).await?;
    tracing::warn!("Database reset, {} readings deleted", records_deleted);
    Ok(Json(DeletedResponse { records_deleted }))
}

async fn cleanup(State(state): State<Arc<AppState>>) -> Result<Json<DeletedResponse>, AppError> {
    let records_deleted = RetentionManager::new(state).purge().await?;
    Ok(Json(DeletedResponse { records_deleted }))
}

async fn clear_logs(State(state): State<Arc<AppState>>) -> Result<Json<LogPruneReport>, AppError> {
    match RetentionManager::new(state).prune_logs().await {
        Some(Ok(report)) => Ok(Json(report)),
        Some(Err(e)) => Err(AppError::Internal(format!(
            "Failed to read log directory: {e}"
        ))),
        None => Err(AppError::BadRequest(
            "File logging is not configured".to_string(),
        )),
    }
}

/// Relay queue state.
#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub enabled: bool,
    pub queue_length: usize,
    pub capacity: usize,
    pub dropped: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_pending: Option<OffsetDateTime>,
    pub last_pass: Option<SyncReport>,
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatusResponse> {
    Json(SyncStatusResponse {
        enabled: state.config.sync.enabled,
        queue_length: state.sync_queue.len().await,
        capacity: state.sync_queue.capacity(),
        dropped: state.sync_queue.dropped(),
        oldest_pending: state.sync_queue.oldest_enqueued_at().await,
        last_pass: state.last_sync.read().await.clone(),
    })
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(weather_store::Error),
    Internal(String),
}

impl From<weather_store::Error> for AppError {
    fn from(e: weather_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
