//! One-shot timestamp reconciliation.
//!
//! Historical deployments wrote `external_created_at` from a naive local
//! clock, leaving rows off by a fixed UTC offset. This tool shifts them
//! once, explicitly, instead of guessing at read time. Dry run is the
//! default; `--apply` writes.

use std::sync::Arc;

use chrono::Duration;

use callscope_store::CallStore;

pub fn run(
    store: &Arc<CallStore>,
    tenant: Option<&str>,
    offset_minutes: i64,
    apply: bool,
) -> anyhow::Result<()> {
    let offset = Duration::minutes(offset_minutes);
    let affected = store.reconcile_external_timestamps(tenant, offset, apply)?;

    let scope = tenant.unwrap_or("all tenants");
    if apply {
        println!("shifted external_created_at by {offset_minutes} minutes on {affected} call(s) ({scope})");
    } else {
        println!(
            "dry run: {affected} call(s) ({scope}) would shift by {offset_minutes} minutes; rerun with --apply"
        );
    }
    Ok(())
}
