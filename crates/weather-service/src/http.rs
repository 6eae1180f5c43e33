//! HTTP listener for station uploads.
//!
//! Stations push reports to one of the configured paths, either as a GET
//! query string or as a form-encoded POST body. Every request is answered
//! with `200 success` once its body has been read, whatever happened to the
//! report; stations retry aggressively on anything else.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{RawQuery, State},
    routing::get,
};
use tracing::debug;
use weather_types::looks_like_telemetry;

use crate::ingest::ingest;
use crate::state::AppState;

/// Body returned for every upload.
pub const ACK: &str = "success";

/// Create the upload router for the given paths.
///
/// Duplicate paths are registered once; paths without a leading `/` are skipped.
pub fn router<S: AsRef<str>>(paths: &[S]) -> Router<Arc<AppState>> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .map(AsRef::as_ref)
        .filter(|path| path.starts_with('/') && seen.insert(*path))
        .fold(Router::new(), |router, path| {
            router.route(path, get(upload_get).post(upload_post))
        })
}

async fn upload_get(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> &'static str {
    handle(&state, query.as_deref().unwrap_or_default()).await;
    ACK
}

async fn upload_post(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> &'static str {
    let body = String::from_utf8_lossy(&body);
    // Some firmware posts an empty body and puts the report in the query.
    let raw = if body.trim().is_empty() {
        query.as_deref().unwrap_or_default()
    } else {
        &*body
    };
    handle(&state, raw).await;
    ACK
}

async fn handle(state: &Arc<AppState>, raw: &str) {
    if !looks_like_telemetry(raw) {
        debug!("Ignoring upload without telemetry fields");
        return;
    }
    let received_at = state.local_now();
    ingest(state, raw, state.config.ingest.http_timestamp, received_at).await;
}
