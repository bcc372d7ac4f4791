//! Daily retention sweeps.
//!
//! Once per day at the tenant-local `retentionRunTime`, the recording tree
//! keeps its most recent `retentionDays` calendar days (in the tenant's
//! timezone) and every older `YYYY/MM/DD` directory is deleted. Call rows
//! whose recording resolved under a deleted day are marked; transcripts and
//! analyses stay.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{info, instrument, warn};

use callscope_core::settings::parse_run_time;
use callscope_core::types::RecordingDeletedReason;
use callscope_core::CoreError;
use callscope_remotefs::{day_prefix_of, resolve_path, RemoteFs, SshTarget};
use callscope_store::{CallStore, Tenant};

/// First day to keep: `today - retention_days + 1`, so `retention_days`
/// calendar days survive (today included).
pub fn keep_from_day(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today - Duration::days(retention_days.max(1) as i64 - 1)
}

/// Whether the daily run is due: we are past today's tenant-local run time
/// and the last run happened before it. `None` run times never fire.
pub fn retention_due(
    now: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    tz: Tz,
    run_time: &str,
) -> bool {
    let Some((hour, minute)) = parse_run_time(run_time) else {
        return false;
    };
    let local_now = now.with_timezone(&tz);
    let Some(todays_run_local) = local_now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
    else {
        return false;
    };
    let todays_run = todays_run_local.with_timezone(&Utc);
    if now < todays_run {
        return false;
    }
    match last_run_at {
        Some(last) => last < todays_run,
        None => true,
    }
}

#[instrument(skip(store), fields(tenant_id = %tenant.id))]
pub async fn run_retention(store: &Arc<CallStore>, tenant: &Tenant) -> String {
    match sweep(store, tenant).await {
        Ok(None) => "disabled".to_string(),
        Ok(Some((swept, marked))) => {
            info!(swept, marked, "retention sweep complete");
            format!("swept:{swept} marked:{marked}")
        }
        Err(e) => {
            let short = e.to_short_string();
            warn!(error = %short, "retention sweep failed");
            format!("error:{short}")
        }
    }
}

async fn sweep(
    store: &Arc<CallStore>,
    tenant: &Tenant,
) -> Result<Option<(usize, usize)>, CoreError> {
    let settings = store.freepbx_settings(&tenant.id)?;
    if !settings.enabled || !settings.retention_enabled {
        return Ok(None);
    }
    let tz: Tz = tenant.timezone.parse().unwrap_or(chrono_tz::UTC);
    let today = Utc::now().with_timezone(&tz).date_naive();
    let keep_from = keep_from_day(today, settings.retention_days);

    let fs = RemoteFs::new(SshTarget::from_freepbx(&settings)?);
    let deleted_days = fs
        .sweep_older_than_day(&settings.ssh_base_path, keep_from)
        .await?;

    // Mark every call whose recording resolves under a pre-cutoff day, not
    // just the days this sweep deleted: an earlier partial sweep may have
    // removed files without marking rows.
    let mut stale_ids = Vec::new();
    for (id, recording_ref) in store.calls_with_recordings(&tenant.id)? {
        let path = resolve_path(&recording_ref, &settings.ssh_base_path);
        let Some(prefix) = day_prefix_of(&path, &settings.ssh_base_path) else {
            continue;
        };
        let Ok(day) = NaiveDate::parse_from_str(&prefix, "%Y/%m/%d") else {
            continue;
        };
        if day < keep_from {
            stale_ids.push(id);
        }
    }
    let marked = store.mark_recordings_deleted(&stale_ids, RecordingDeletedReason::Retention)?;

    Ok(Some((deleted_days.len(), marked)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_from_keeps_n_days() {
        // retentionDays=7 on 2025-02-10 keeps 02-04..02-10.
        let today = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        assert_eq!(
            keep_from_day(today, 7),
            NaiveDate::from_ymd_opt(2025, 2, 4).unwrap()
        );
        assert_eq!(keep_from_day(today, 1), today);
    }

    #[test]
    fn due_only_after_local_run_time_once_per_day() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 02:30 local == 07:30 UTC in winter.
        let before = Utc.with_ymd_and_hms(2025, 2, 10, 7, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 2, 10, 8, 0, 0).unwrap();

        assert!(!retention_due(before, None, tz, "02:30"));
        assert!(retention_due(after, None, tz, "02:30"));

        // Already ran after today's boundary: not due again.
        let ran = Utc.with_ymd_and_hms(2025, 2, 10, 7, 45, 0).unwrap();
        assert!(!retention_due(after, Some(ran), tz, "02:30"));

        // Ran yesterday: due again today.
        let yesterday = Utc.with_ymd_and_hms(2025, 2, 9, 7, 45, 0).unwrap();
        assert!(retention_due(after, Some(yesterday), tz, "02:30"));
    }

    #[test]
    fn malformed_run_time_never_fires() {
        let tz = chrono_tz::UTC;
        let now = Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap();
        assert!(!retention_due(now, None, tz, "25:99"));
        assert!(!retention_due(now, None, tz, "oops"));
    }
}
