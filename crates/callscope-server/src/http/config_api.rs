//! Tenant configuration surface: per-domain document reads (public
//! projection), partial merges, and connectivity probes for the settings
//! screen.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use callscope_core::settings::SettingsDomain;
use callscope_core::CoreError;
use callscope_freepbx::cdr::CdrClient;
use callscope_remotefs::{RemoteFs, SshTarget};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

pub async fn get_domain(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, domain)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let domain: SettingsDomain = domain
        .parse()
        .map_err(|e: String| ApiError(CoreError::Data(e)))?;
    Ok(Json(state.store.public_settings(&tenant_id, domain)?))
}

/// Partial JSON merge into one settings domain. The store holds the
/// document lock for the whole read-merge-write, so concurrent updates
/// from here and the scheduler never lose fields.
pub async fn patch_domain(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, domain)): Path<(String, String)>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<impl IntoResponse> {
    let domain: SettingsDomain = domain
        .parse()
        .map_err(|e: String| ApiError(CoreError::Data(e)))?;
    Ok(Json(state.store.merge_settings(&tenant_id, domain, &patch)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionBody {
    tenant_id: String,
    /// One of: twilio, openai, ssh, mysql, freepbx.
    target: String,
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TestConnectionBody>,
) -> ApiResult<impl IntoResponse> {
    let tenant = state
        .store
        .get_tenant(&body.tenant_id)?
        .ok_or_else(|| crate::error::not_found("tenant", &body.tenant_id))?;

    let result = match body.target.as_str() {
        "twilio" => {
            let settings = state.store.twilio_settings(&tenant.id)?;
            let ok = callscope_twilio::download::test_connection(&settings).await?;
            json!({ "ok": ok })
        }
        "openai" => {
            let effective = state.store.effective_openai(&tenant.id)?;
            let client = callscope_openai::OpenAiClient::new(effective.api_key)?;
            let ok = client.test_connection().await?;
            json!({ "ok": ok })
        }
        "ssh" => {
            let settings = state.store.freepbx_settings(&tenant.id)?;
            let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);
            let report = fs.test_connect(&settings.ssh_base_path).await?;
            serde_json::to_value(report).unwrap_or_else(|_| json!({ "ok": false }))
        }
        "mysql" => {
            let settings = state.store.freepbx_settings(&tenant.id)?;
            let tz = tenant.timezone.parse().unwrap_or(chrono_tz::UTC);
            let client = CdrClient::new(settings, tz)?;
            let ok = client.test_connection().await?;
            json!({ "ok": ok })
        }
        "freepbx" => {
            let settings = state.store.freepbx_settings(&tenant.id)?;
            let client = callscope_freepbx::archive::ArchiveClient::new(settings)?;
            let ok = client.list(None).await.is_ok();
            json!({ "ok": ok })
        }
        other => {
            return Err(ApiError(CoreError::Data(format!(
                "unknown test target: {other}"
            ))))
        }
    };
    Ok(Json(result))
}
