//! Calls API: listing, detail, deletion, manual retry, and audio streaming
//! with byte-range support.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use callscope_core::types::{CallSource, CallStatus, Direction};
use callscope_remotefs::{resolve_path, RemoteFs, SshTarget};
use callscope_store::CallFilter;

use crate::app::AppState;
use crate::error::{not_found, ApiResult};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    tenant_id: Option<String>,
    status: Option<CallStatus>,
    direction: Option<Direction>,
    source: Option<CallSource>,
    number: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    page: Option<usize>,
    page_size: Option<usize>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = state.store.list_calls(&CallFilter {
        tenant_id: query.tenant_id,
        status: query.status,
        direction: query.direction,
        source: query.source,
        number: query.number,
        from: query.from,
        to: query.to,
        page: query.page.unwrap_or(0),
        page_size: query.page_size.unwrap_or(50).min(500),
    })?;
    Ok(Json(page))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let call = state.store.get_call(&id)?.ok_or_else(|| not_found("call", &id))?;
    let metadata = state.store.get_call_metadata(&id)?;
    Ok(Json(json!({ "call": call, "metadata": metadata })))
}

pub async fn delete_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.delete_call(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteBody {
    ids: Vec<String>,
}

pub async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BulkDeleteBody>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.bulk_delete_calls(&body.ids)?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.store.retry_call(&id)?;
    Ok(Json(json!({ "queued": true })))
}

/// Stream recording audio, honoring a single `bytes=a-b` range.
pub async fn stream_audio(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let call = state.store.get_call(&id)?.ok_or_else(|| not_found("call", &id))?;
    if call.recording_deleted_at.is_some() {
        return Err(not_found("recording", &id));
    }
    let recording_ref = call
        .recording_ref
        .clone()
        .ok_or_else(|| not_found("recording", &id))?;

    let bytes = match call.source {
        CallSource::Twilio => {
            let settings = state.store.twilio_settings(&call.tenant_id)?;
            callscope_twilio::download::download_recording(&settings, &recording_ref).await?
        }
        CallSource::FreepbxArchive | CallSource::FreepbxCdr => {
            let settings = state.store.freepbx_settings(&call.tenant_id)?;
            let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);
            let path = resolve_path(&recording_ref, &settings.ssh_base_path);
            fs.download(&path).await?
        }
    };

    Ok(serve_bytes(bytes, headers.get(header::RANGE)))
}

/// Render bytes as `audio/wav`, with 206 + Content-Range when the request
/// carried a satisfiable range.
fn serve_bytes(bytes: Vec<u8>, range: Option<&header::HeaderValue>) -> Response {
    let total = bytes.len();
    let parsed = range
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range(v, total));

    match parsed {
        Some((start, end)) => {
            let slice = bytes[start..=end].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, "audio/wav".to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (
                        header::CONTENT_RANGE,
                        format!("bytes {start}-{end}/{total}"),
                    ),
                ],
                slice,
            )
                .into_response()
        }
        None => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/wav".to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            bytes,
        )
            .into_response(),
    }
}

/// Parse `bytes=a-b` / `bytes=a-` / `bytes=-n` into an inclusive window.
fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    if total == 0 {
        return None;
    }
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    match (start_str.is_empty(), end_str.is_empty()) {
        // bytes=-n → final n bytes
        (true, false) => {
            let n: usize = end_str.parse().ok()?;
            if n == 0 {
                return None;
            }
            Some((total.saturating_sub(n), total - 1))
        }
        // bytes=a- → from a to the end
        (false, true) => {
            let start: usize = start_str.parse().ok()?;
            (start < total).then_some((start, total - 1))
        }
        (false, false) => {
            let start: usize = start_str.parse().ok()?;
            let end: usize = end_str.parse().ok()?;
            (start <= end && start < total).then_some((start, end.min(total - 1)))
        }
        (true, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_range;

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_range("bytes=900-", 1000), Some((900, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
        // End clamps to the resource size.
        assert_eq!(parse_range("bytes=990-2000", 1000), Some((990, 999)));
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=5-2", 1000), None);
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=0-99", 0), None);
    }
}
