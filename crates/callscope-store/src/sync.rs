//! Per-(tenant, source) sync bookkeeping.
//!
//! The `in_progress` flag is the per-source mutex: `try_begin_sync` is a
//! single guarded upsert, so two schedulers (or a scheduler and a manual
//! `syncNow`) can never both claim the same run. A crashed run is preempted
//! once `started_at` is older than twice the source's interval.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::warn;

use callscope_core::types::SyncKind;

use crate::error::{Result, StoreError};
use crate::{fmt_ts, parse_ts_opt, CallStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub tenant_id: String,
    pub source: SyncKind,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl CallStore {
    /// Try to claim a sync run. Returns `false` when another run holds the
    /// flag and is not yet stale. Stale means `started_at` older than
    /// `2 × interval` — a crashed run the next tick may preempt.
    pub fn try_begin_sync(
        &self,
        tenant_id: &str,
        kind: SyncKind,
        interval: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let stale_cutoff = fmt_ts(now - interval * 2);
        let now_str = fmt_ts(now);
        let db = self.lock();
        let claimed = db.execute(
            "INSERT INTO sync_state (tenant_id, source, in_progress, started_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(tenant_id, source) DO UPDATE SET
                in_progress = 1, started_at = excluded.started_at
             WHERE sync_state.in_progress = 0
                OR sync_state.started_at IS NULL
                OR sync_state.started_at <= ?4",
            params![tenant_id, kind.as_str(), now_str, stale_cutoff],
        )?;
        if claimed == 0 {
            return Ok(false);
        }
        Ok(true)
    }

    /// Release a run, recording the outcome and when the next one is due.
    pub fn finish_sync(
        &self,
        tenant_id: &str,
        kind: SyncKind,
        result: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE sync_state SET in_progress = 0, last_run_at = ?1,
                 last_result = ?2, next_run_at = ?3
             WHERE tenant_id = ?4 AND source = ?5",
            params![
                now,
                result,
                next_run_at.map(fmt_ts),
                tenant_id,
                kind.as_str()
            ],
        )?;
        if n == 0 {
            warn!(tenant_id, source = %kind, "finish_sync without a claimed run");
            return Err(StoreError::NotFound {
                entity: "sync_state",
                id: format!("{tenant_id}/{kind}"),
            });
        }
        Ok(())
    }

    pub fn get_sync_state(&self, tenant_id: &str, kind: SyncKind) -> Result<Option<SyncState>> {
        let db = self.lock();
        match db.query_row(
            "SELECT tenant_id, source, last_run_at, last_result, next_run_at,
                    in_progress, started_at
             FROM sync_state WHERE tenant_id = ?1 AND source = ?2",
            params![tenant_id, kind.as_str()],
            |row| {
                let source: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    source,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        ) {
            Ok((tenant, source, last_run, last_result, next_run, in_progress, started)) => {
                Ok(Some(SyncState {
                    tenant_id: tenant,
                    source: source.parse().map_err(|_| StoreError::Corrupt {
                        column: "sync_state.source",
                        detail: source.clone(),
                    })?,
                    last_run_at: parse_ts_opt(last_run),
                    last_result,
                    next_run_at: parse_ts_opt(next_run),
                    in_progress: in_progress != 0,
                    started_at: parse_ts_opt(started),
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store_with_tenant;

    #[test]
    fn second_claim_is_rejected_while_in_progress() {
        let (s, tenant) = store_with_tenant();
        let interval = Duration::minutes(5);
        assert!(s.try_begin_sync(&tenant, SyncKind::Cdr, interval).unwrap());
        assert!(!s.try_begin_sync(&tenant, SyncKind::Cdr, interval).unwrap());

        // A different source is independent.
        assert!(s.try_begin_sync(&tenant, SyncKind::Archive, interval).unwrap());

        s.finish_sync(&tenant, SyncKind::Cdr, "synced:3", None).unwrap();
        assert!(s.try_begin_sync(&tenant, SyncKind::Cdr, interval).unwrap());
    }

    #[test]
    fn stale_run_is_preempted() {
        let (s, tenant) = store_with_tenant();
        // A zero interval makes any held claim immediately stale.
        assert!(s.try_begin_sync(&tenant, SyncKind::Cdr, Duration::zero()).unwrap());
        assert!(s.try_begin_sync(&tenant, SyncKind::Cdr, Duration::zero()).unwrap());
    }

    #[test]
    fn finish_records_result_and_next_run() {
        let (s, tenant) = store_with_tenant();
        let interval = Duration::minutes(5);
        s.try_begin_sync(&tenant, SyncKind::VoicemailDiscovery, interval)
            .unwrap();
        let next = Utc::now() + interval;
        s.finish_sync(&tenant, SyncKind::VoicemailDiscovery, "synced:2", Some(next))
            .unwrap();

        let state = s
            .get_sync_state(&tenant, SyncKind::VoicemailDiscovery)
            .unwrap()
            .unwrap();
        assert!(!state.in_progress);
        assert_eq!(state.last_result.as_deref(), Some("synced:2"));
        assert!(state.next_run_at.is_some());
        assert!(state.last_run_at.is_some());
    }
}
