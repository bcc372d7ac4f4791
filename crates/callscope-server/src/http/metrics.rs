//! System metrics sample listing for the admin dashboard.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplesQuery {
    since: Option<DateTime<Utc>>,
    hours: Option<i64>,
}

pub async fn samples(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SamplesQuery>,
) -> ApiResult<impl IntoResponse> {
    let since = query
        .since
        .unwrap_or_else(|| Utc::now() - Duration::hours(query.hours.unwrap_or(24)));
    Ok(Json(state.store.list_system_samples(since)?))
}
