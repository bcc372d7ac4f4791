use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    let db_ok = state.store.list_tenants().is_ok();
    Json(json!({
        "ok": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
