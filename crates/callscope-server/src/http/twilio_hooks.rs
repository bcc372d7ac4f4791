//! Twilio webhook handlers.
//!
//! Signature validation runs before any state change, and every response
//! is TwiML, including the error paths: the carrier plays the document, it
//! does not parse JSON. The webhook URL carries a `tenant` query parameter
//! (configured in the Twilio console) selecting whose settings apply; the
//! signature covers the full URL so the parameter is tamper-proof.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use callscope_core::settings::TwilioSettings;
use callscope_core::CoreError;
use callscope_twilio::signature::validate_signature;
use callscope_twilio::twiml;
use callscope_twilio::webhook::WebhookParams;

use crate::app::AppState;

pub async fn voice(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    match authenticate(&state, &uri, &headers, &body) {
        Ok((settings, params, tenant_id)) => {
            let call_sid = params.call_sid().unwrap_or("unknown");
            info!(tenant_id, call_sid, "voice webhook");
            let callback = recording_callback_url(&state, &headers, &tenant_id);
            twiml_ok(twiml::voice_response(&settings, call_sid, Some(&callback)))
        }
        Err(rejection) => rejection.into_twiml(),
    }
}

pub async fn dial_complete(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    match authenticate(&state, &uri, &headers, &body) {
        Ok((settings, params, tenant_id)) => {
            let status = params.dial_status();
            info!(tenant_id, dial_status = status, "dial-complete webhook");
            let callback = recording_callback_url(&state, &headers, &tenant_id);
            twiml_ok(twiml::dial_complete_response(&settings, status, Some(&callback)))
        }
        Err(rejection) => rejection.into_twiml(),
    }
}

pub async fn recording_status(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> Response {
    match authenticate(&state, &uri, &headers, &body) {
        Ok((_, params, tenant_id)) => {
            match params.to_discovered_recording() {
                Some(call) => match state.store.upsert_discovered(&tenant_id, &call) {
                    Ok(inserted) => {
                        info!(tenant_id, external_id = %call.external_id, inserted, "recording enqueued");
                    }
                    Err(e) => {
                        warn!(tenant_id, error = %e, "recording upsert failed");
                        return WebhookRejection::Internal.into_twiml();
                    }
                },
                None => warn!(tenant_id, "recording webhook without recording fields"),
            }
            // Status callbacks don't drive call flow; an empty document acks.
            twiml_ok(twiml::TwiML::new().render())
        }
        Err(rejection) => rejection.into_twiml(),
    }
}

enum WebhookRejection {
    Auth,
    Internal,
}

impl WebhookRejection {
    fn into_twiml(self) -> Response {
        let status = match self {
            WebhookRejection::Auth => StatusCode::FORBIDDEN,
            WebhookRejection::Internal => StatusCode::OK,
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
            twiml::error_response(),
        )
            .into_response()
    }
}

fn twiml_ok(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        xml,
    )
        .into_response()
}

/// Resolve the tenant, load its settings, and validate the signature over
/// the exact request URL and decoded form body.
fn authenticate(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    body: &str,
) -> Result<(TwilioSettings, WebhookParams, String), WebhookRejection> {
    let tenant_id = query_param(uri, "tenant").ok_or_else(|| {
        warn!("twilio webhook without tenant parameter");
        WebhookRejection::Auth
    })?;
    let settings = state.store.twilio_settings(&tenant_id).map_err(|e| {
        warn!(tenant_id, error = %e, "twilio settings unavailable");
        WebhookRejection::Internal
    })?;
    let auth_token = settings.auth_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| {
        warn!(tenant_id, "twilio auth token not configured");
        WebhookRejection::Auth
    })?;

    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!(tenant_id, "missing X-Twilio-Signature header");
            WebhookRejection::Auth
        })?;

    let params = WebhookParams::parse(body);
    let url = public_url(state, headers, uri);
    validate_signature(&auth_token, &url, &params.0, signature).map_err(|e| {
        let core: CoreError = e.into();
        warn!(tenant_id, error = %core, "webhook signature rejected");
        WebhookRejection::Auth
    })?;

    Ok((settings, params, tenant_id))
}

/// The URL Twilio signed: public scheme and host (forwarded headers when
/// the proxy is trusted) plus the original path and query.
fn public_url(state: &AppState, headers: &HeaderMap, uri: &Uri) -> String {
    let trust_proxy = state.config.server.trust_proxy;
    let proto = if trust_proxy {
        headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("https")
    } else {
        "https"
    };
    let host = if trust_proxy {
        headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost")
    } else {
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost")
    };
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{proto}://{host}{path_and_query}")
}

fn recording_callback_url(state: &AppState, headers: &HeaderMap, tenant_id: &str) -> String {
    let base = public_url(
        state,
        headers,
        &Uri::from_static("/webhooks/twilio/recording"),
    );
    format!("{base}?tenant={tenant_id}")
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::query_param;
    use axum::http::Uri;

    #[test]
    fn query_param_extraction() {
        let uri: Uri = "/webhooks/twilio/voice?tenant=t-123&x=1".parse().unwrap();
        assert_eq!(query_param(&uri, "tenant"), Some("t-123".to_string()));
        assert_eq!(query_param(&uri, "missing"), None);

        let uri: Uri = "/webhooks/twilio/voice".parse().unwrap();
        assert_eq!(query_param(&uri, "tenant"), None);
    }
}
