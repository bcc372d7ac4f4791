//! Manual sync triggers and sync-state inspection.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use callscope_core::types::SyncKind;
use callscope_core::CoreError;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    tenant_id: String,
}

/// Enqueue an immediate run and return 202 right away; the scheduler logs
/// a dropped tick if one is already in flight.
pub async fn sync_now(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind: SyncKind = source
        .parse()
        .map_err(|e: String| ApiError(CoreError::Data(e)))?;
    let enqueued = state.scheduler.sync_now(&query.tenant_id, kind);
    if !enqueued {
        return Err(ApiError(CoreError::State(
            "scheduler is not accepting work".into(),
        )));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "enqueued": true }))))
}

pub async fn state(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<impl IntoResponse> {
    let kind: SyncKind = source
        .parse()
        .map_err(|e: String| ApiError(CoreError::Data(e)))?;
    let sync_state = state.store.get_sync_state(&query.tenant_id, kind)?;
    Ok(Json(json!({ "state": sync_state })))
}
