//! Tenant provisioning, the server-side half of the identity provider's
//! insert trigger: a new account row arrives with default capabilities and
//! the platform-super email is promoted on sight.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantBody {
    email: String,
    #[serde(default = "default_timezone")]
    timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTenantBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state.store.create_tenant(&body.email, &body.timezone)?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

pub async fn list(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_tenants()?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.delete_tenant(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
