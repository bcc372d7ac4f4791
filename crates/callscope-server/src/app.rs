use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use callscope_core::config::CallscopeConfig;
use callscope_scheduler::SchedulerHandle;
use callscope_store::CallStore;

use crate::http;

pub struct AppState {
    pub store: Arc<CallStore>,
    pub config: CallscopeConfig,
    pub scheduler: SchedulerHandle,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(http::health::healthz))
        // Twilio webhooks: form bodies, always answered with TwiML.
        .route("/webhooks/twilio/voice", post(http::twilio_hooks::voice))
        .route(
            "/webhooks/twilio/dial-complete",
            post(http::twilio_hooks::dial_complete),
        )
        .route(
            "/webhooks/twilio/recording",
            post(http::twilio_hooks::recording_status),
        )
        // Calls surface for the external HTTP collaborator.
        .route("/api/calls", get(http::calls::list))
        .route(
            "/api/calls/{id}",
            get(http::calls::get_one).delete(http::calls::delete_one),
        )
        .route("/api/calls/bulk-delete", post(http::calls::bulk_delete))
        .route("/api/calls/{id}/retry", post(http::calls::retry))
        .route("/api/calls/{id}/audio", get(http::calls::stream_audio))
        // Voicemail.
        .route("/api/voicemail", get(http::voicemail::list))
        .route(
            "/api/voicemail/{id}/listened",
            post(http::voicemail::mark_listened),
        )
        .route(
            "/api/voicemail/{id}/move-to-old",
            post(http::voicemail::move_to_old),
        )
        // Tenants (identity-provider provisioning contract).
        .route(
            "/api/tenants",
            get(http::tenants::list).post(http::tenants::create),
        )
        .route("/api/tenants/{id}", axum::routing::delete(http::tenants::delete))
        // Tenant configuration.
        .route(
            "/api/tenants/{tenant_id}/config/{domain}",
            get(http::config_api::get_domain).patch(http::config_api::patch_domain),
        )
        .route("/api/test-connection", post(http::config_api::test_connection))
        // Scheduler.
        .route("/api/sync/{source}", post(http::sync::sync_now))
        .route("/api/sync/{source}/state", get(http::sync::state))
        // Metrics samples.
        .route("/api/metrics/samples", get(http::metrics::samples))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.config.server.body_limit_bytes));

    if !state.config.server.cors_origins.is_empty() {
        let origins: Vec<_> = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router = router.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    }

    router.with_state(state)
}
