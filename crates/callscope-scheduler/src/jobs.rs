//! Job bodies for the per-tenant discovery ticks. Each returns a short
//! result string recorded in `sync_state.last_result`; errors are folded
//! into that string so a failing source never takes the tick loop down.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use callscope_core::config::EngineConfig;
use callscope_core::types::CallSource;
use callscope_core::CoreError;
use callscope_freepbx::archive::ArchiveClient;
use callscope_freepbx::cdr::CdrClient;
use callscope_freepbx::voicemail;
use callscope_remotefs::{RemoteFs, SshTarget};
use callscope_store::{CallStore, Tenant, VoicemailSeen};

fn tenant_tz(tenant: &Tenant) -> Tz {
    tenant.timezone.parse().unwrap_or(chrono_tz::UTC)
}

#[instrument(skip(store, config), fields(tenant_id = %tenant.id))]
pub async fn cdr_sync(store: &Arc<CallStore>, tenant: &Tenant, config: &EngineConfig) -> String {
    match run_cdr(store, tenant, config).await {
        Ok(None) => "disabled".to_string(),
        Ok(Some(inserted)) => {
            if inserted > 0 {
                info!(inserted, "cdr sync complete");
            }
            format!("synced:{inserted}")
        }
        Err(e) => {
            let short = e.to_short_string();
            warn!(error = %short, "cdr sync failed");
            format!("error:{short}")
        }
    }
}

async fn run_cdr(
    store: &Arc<CallStore>,
    tenant: &Tenant,
    config: &EngineConfig,
) -> Result<Option<usize>, CoreError> {
    let settings = store.freepbx_settings(&tenant.id)?;
    if !settings.enabled || settings.cdr_host.as_deref().unwrap_or("").is_empty() {
        return Ok(None);
    }
    let client = CdrClient::new(settings, tenant_tz(tenant))?;
    let since = store.latest_external_created(&tenant.id, CallSource::FreepbxCdr)?;
    let legs = client.fetch_legs(since, config.cdr_fetch_limit).await?;
    let calls = client.discover(legs);

    let mut inserted = 0;
    for call in calls {
        if store.upsert_discovered(&tenant.id, &call)? {
            inserted += 1;
        }
    }
    Ok(Some(inserted))
}

#[instrument(skip(store), fields(tenant_id = %tenant.id))]
pub async fn archive_sync(store: &Arc<CallStore>, tenant: &Tenant) -> String {
    match run_archive(store, tenant).await {
        Ok(None) => "disabled".to_string(),
        Ok(Some(inserted)) => format!("synced:{inserted}"),
        Err(e) => {
            let short = e.to_short_string();
            warn!(error = %short, "archive sync failed");
            format!("error:{short}")
        }
    }
}

async fn run_archive(store: &Arc<CallStore>, tenant: &Tenant) -> Result<Option<usize>, CoreError> {
    let settings = store.freepbx_settings(&tenant.id)?;
    if !settings.enabled || settings.rest_host.as_deref().unwrap_or("").is_empty() {
        return Ok(None);
    }
    let client = ArchiveClient::new(settings)?;
    let since = store.latest_external_created(&tenant.id, CallSource::FreepbxArchive)?;
    let entries = client.list(since).await?;
    let calls = client.discover(entries);

    let mut inserted = 0;
    for call in calls {
        if store.upsert_discovered(&tenant.id, &call)? {
            inserted += 1;
        }
    }
    Ok(Some(inserted))
}

#[instrument(skip(store), fields(tenant_id = %tenant.id))]
pub async fn voicemail_discovery(store: &Arc<CallStore>, tenant: &Tenant) -> String {
    match run_voicemail_discovery(store, tenant).await {
        Ok(None) => "disabled".to_string(),
        Ok(Some(seen)) => format!("synced:{seen}"),
        Err(e) => {
            let short = e.to_short_string();
            warn!(error = %short, "voicemail discovery failed");
            format!("error:{short}")
        }
    }
}

async fn run_voicemail_discovery(
    store: &Arc<CallStore>,
    tenant: &Tenant,
) -> Result<Option<usize>, CoreError> {
    let settings = store.freepbx_settings(&tenant.id)?;
    if !settings.enabled || !settings.voicemail_enabled {
        return Ok(None);
    }
    let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);
    let sync_start = Utc::now();
    let messages = voicemail::discover(
        &fs,
        &settings.voicemail_base_path,
        &settings.voicemail_context,
        &settings.voicemail_folders,
    )
    .await?;

    let seen = messages.len();
    for message in messages {
        store.upsert_voicemail_seen(
            &tenant.id,
            &VoicemailSeen {
                mailbox: message.mailbox.clone(),
                context: message.context.clone(),
                folder: message.folder.clone(),
                msg_id: message.msg_id.clone(),
                pbx_identity: message.pbx_identity(),
                received_at: message.received_at(),
                caller_id: message.caller_id.clone(),
                duration_seconds: message.duration_seconds,
                recording_path: message.recording_path.clone(),
                metadata_path: Some(message.metadata_path.clone()),
            },
            sync_start,
        )?;
    }
    // Anything not seen by this pass was deleted on the PBX.
    store.delete_voicemail_stale(&tenant.id, &settings.voicemail_context, sync_start)?;
    Ok(Some(seen))
}

#[instrument(skip(store), fields(tenant_id = %tenant.id))]
pub async fn pbx_status(store: &Arc<CallStore>, tenant: &Tenant) -> String {
    match run_pbx_status(store, tenant).await {
        Ok(None) => "disabled".to_string(),
        Ok(Some(stats)) => stats,
        Err(e) => {
            let short = e.to_short_string();
            warn!(error = %short, "pbx status refresh failed");
            format!("error:{short}")
        }
    }
}

async fn run_pbx_status(
    store: &Arc<CallStore>,
    tenant: &Tenant,
) -> Result<Option<String>, CoreError> {
    let settings = store.freepbx_settings(&tenant.id)?;
    if !settings.enabled || settings.ssh_host.as_deref().unwrap_or("").is_empty() {
        return Ok(None);
    }
    let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);
    let stats = fs.stats(&settings.ssh_base_path).await?;
    Ok(Some(
        serde_json::to_string(&stats).unwrap_or_else(|_| "{}".to_string()),
    ))
}
