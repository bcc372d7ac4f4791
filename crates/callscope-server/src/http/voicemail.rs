//! Voicemail listing and mailbox maintenance.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use callscope_freepbx::voicemail::move_to_old as spool_move_to_old;
use callscope_remotefs::{RemoteFs, SshTarget};

use crate::app::AppState;
use crate::error::{not_found, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQuery {
    tenant_id: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_voicemail(&query.tenant_id)?))
}

pub async fn mark_listened(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.mark_voicemail_listened(&id)?;
    Ok(Json(json!({ "listened": true })))
}

/// Move a message's files from INBOX to the next free Old slot on the PBX
/// and record the new location.
pub async fn move_to_old(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .store
        .get_voicemail(&id)?
        .ok_or_else(|| not_found("voicemail", &id))?;
    let settings = state.store.freepbx_settings(&message.tenant_id)?;
    let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);

    let new_id = spool_move_to_old(
        &fs,
        &settings.voicemail_base_path,
        &message.context,
        &message.mailbox,
        &message.msg_id,
        &message.folder,
    )
    .await?;

    let stem = format!(
        "{}/{}/{}/Old/{}",
        settings.voicemail_base_path.trim_end_matches('/'),
        message.context,
        message.mailbox,
        new_id
    );
    let recording_path = message
        .recording_path
        .as_deref()
        .and_then(|p| p.rsplit('.').next())
        .map(|ext| format!("{stem}.{ext}"));
    state.store.update_voicemail_location(
        &id,
        "Old",
        &new_id,
        recording_path.as_deref(),
        Some(&format!("{stem}.txt")),
    )?;

    Ok(Json(json!({ "folder": "Old", "msgId": new_id })))
}
