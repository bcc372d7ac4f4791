//! Call rows: discovery upserts, the processing claim, commits, redaction
//! state, retries, and the listing surface the HTTP collaborator consumes.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use callscope_core::types::{
    Booking, CallSource, CallStatus, DiscoveredCall, Direction, RecordingDeletedReason,
    RedactionStatus, Sentiment,
};

use crate::error::{Result, StoreError};
use crate::{fmt_ts, parse_ts_opt, CallStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: String,
    pub tenant_id: String,
    pub source: CallSource,
    pub external_id: String,
    pub direction: Option<Direction>,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub callee_number: Option<String>,
    pub callee_name: Option<String>,
    pub duration_seconds: Option<i64>,
    pub recording_ref: Option<String>,
    pub recording_deleted_at: Option<DateTime<Utc>>,
    pub recording_deleted_reason: Option<RecordingDeletedReason>,
    pub transcript: Option<String>,
    pub analysis: Option<String>,
    pub status: CallStatus,
    pub redaction_status: RedactionStatus,
    pub redacted: bool,
    pub redacted_segments: Option<serde_json::Value>,
    pub redacted_at: Option<DateTime<Utc>>,
    pub gpt_model: Option<String>,
    pub gpt_input_tokens: Option<i64>,
    pub gpt_output_tokens: Option<i64>,
    pub gpt_total_tokens: Option<i64>,
    pub whisper_requests: i64,
    pub whisper_requested_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub external_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub source_metadata: Option<serde_json::Value>,
}

/// Everything the pipeline writes when a call completes.
#[derive(Debug, Clone)]
pub struct CallCommit {
    pub transcript: String,
    pub analysis: String,
    pub duration_seconds: Option<i64>,
    pub gpt_model: Option<String>,
    pub gpt_input_tokens: Option<i64>,
    pub gpt_output_tokens: Option<i64>,
    pub gpt_total_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RedactionUpdate {
    pub status: RedactionStatus,
    pub redacted: bool,
    pub segments: Option<serde_json::Value>,
}

/// Structured analysis fields, 1:1 with a completed call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    pub call_id: String,
    pub summary: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub action_items: Vec<String>,
    pub urgent_topics: Option<String>,
    pub booking: Option<Booking>,
}

#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub tenant_id: Option<String>,
    pub status: Option<CallStatus>,
    pub direction: Option<Direction>,
    pub source: Option<CallSource>,
    /// Substring match on caller/callee number.
    pub number: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPage {
    pub items: Vec<Call>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

const CALL_COLUMNS: &str = "id, tenant_id, source, external_id, direction, caller_number, \
     caller_name, callee_number, callee_name, duration_seconds, recording_ref, \
     recording_deleted_at, recording_deleted_reason, transcript, analysis, status, \
     redaction_status, redacted, redacted_segments, redacted_at, gpt_model, \
     gpt_input_tokens, gpt_output_tokens, gpt_total_tokens, whisper_requests, \
     whisper_requested_at, last_error, external_created_at, created_at, updated_at, \
     processed_at, synced_at, source_metadata";

impl CallStore {
    /// Insert a newly discovered call, or refresh `synced_at` when the
    /// `(source, external_id)` pair already exists. Returns whether a new
    /// row was created; re-discovery is a no-op by design.
    pub fn upsert_discovered(&self, tenant_id: &str, call: &DiscoveredCall) -> Result<bool> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO calls
             (id, tenant_id, source, external_id, direction, caller_number, caller_name,
              callee_number, callee_name, duration_seconds, recording_ref,
              external_created_at, created_at, updated_at, synced_at, source_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13, ?14)",
            params![
                Uuid::new_v4().to_string(),
                tenant_id,
                call.source.as_str(),
                call.external_id,
                call.direction.map(|d| d.as_str()),
                call.caller_number,
                call.caller_name,
                call.callee_number,
                call.callee_name,
                call.duration_seconds,
                call.recording_ref,
                call.external_created_at.map(fmt_ts),
                now,
                call.source_metadata.as_ref().map(|m| m.to_string()),
            ],
        )?;
        if inserted == 0 {
            db.execute(
                "UPDATE calls SET synced_at = ?1 WHERE source = ?2 AND external_id = ?3",
                params![now, call.source.as_str(), call.external_id],
            )?;
            debug!(external_id = %call.external_id, source = %call.source, "re-discovered, refreshed synced_at");
            return Ok(false);
        }
        info!(external_id = %call.external_id, source = %call.source, "call discovered");
        Ok(true)
    }

    /// Claim the oldest pending call: a guarded single-statement update that
    /// flips `pending → processing`. Returns the claimed row, or `None` when
    /// nothing is pending.
    pub fn claim_next_pending_call(&self) -> Result<Option<Call>> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let candidate: Option<String> = match db.query_row(
            "SELECT id FROM calls WHERE status = 'pending' ORDER BY created_at LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(id) => Some(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(StoreError::Database(e)),
        };
        let Some(id) = candidate else {
            return Ok(None);
        };
        let claimed = db.execute(
            "UPDATE calls SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        db.query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
            params![id],
            row_to_call,
        )
        .map(Some)
        .map_err(StoreError::Database)
    }

    /// Record a successful run. Only a `processing` row may complete.
    pub fn complete_call(&self, id: &str, commit: &CallCommit) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE calls SET
                status = 'completed', transcript = ?1, analysis = ?2,
                duration_seconds = COALESCE(?3, duration_seconds),
                gpt_model = ?4, gpt_input_tokens = ?5, gpt_output_tokens = ?6,
                gpt_total_tokens = ?7, last_error = NULL,
                processed_at = ?8, updated_at = ?8
             WHERE id = ?9 AND status = 'processing'",
            params![
                commit.transcript,
                commit.analysis,
                commit.duration_seconds,
                commit.gpt_model,
                commit.gpt_input_tokens,
                commit.gpt_output_tokens,
                commit.gpt_total_tokens,
                now,
                id,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::IllegalTransition {
                entity: "call",
                id: id.to_string(),
                detail: "complete requires processing status".into(),
            });
        }
        Ok(())
    }

    /// Record a failed run with a short operator-visible error.
    pub fn fail_call(&self, id: &str, last_error: &str) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE calls SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![last_error, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::IllegalTransition {
                entity: "call",
                id: id.to_string(),
                detail: "fail requires processing status".into(),
            });
        }
        Ok(())
    }

    /// Operator-requested retry: a terminal row goes back to the pending
    /// queue. The only permitted non-monotonic transition.
    pub fn retry_call(&self, id: &str) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE calls SET status = 'pending', last_error = NULL, updated_at = ?1
             WHERE id = ?2 AND status IN ('failed', 'completed')",
            params![now, id],
        )?;
        if n == 0 {
            let exists: bool = db
                .query_row("SELECT 1 FROM calls WHERE id = ?1", params![id], |_| Ok(true))
                .unwrap_or(false);
            return Err(if exists {
                StoreError::IllegalTransition {
                    entity: "call",
                    id: id.to_string(),
                    detail: "retry requires failed or completed status".into(),
                }
            } else {
                StoreError::NotFound {
                    entity: "call",
                    id: id.to_string(),
                }
            });
        }
        info!(call_id = %id, "call queued for retry");
        Ok(())
    }

    /// Count a transcription attempt before the API call returns, so retries
    /// are billed even when the request later fails.
    pub fn bump_whisper_requests(&self, id: &str) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        db.execute(
            "UPDATE calls SET whisper_requests = whisper_requests + 1,
                 whisper_requested_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn set_call_redaction(&self, id: &str, update: &RedactionUpdate) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let redacted_at = matches!(update.status, RedactionStatus::Completed).then(|| now.clone());
        let db = self.lock();
        db.execute(
            "UPDATE calls SET redaction_status = ?1, redacted = ?2,
                 redacted_segments = ?3, redacted_at = COALESCE(?4, redacted_at),
                 updated_at = ?5
             WHERE id = ?6",
            params![
                update.status.as_str(),
                update.redacted as i64,
                update.segments.as_ref().map(|s| s.to_string()),
                redacted_at,
                now,
                id,
            ],
        )?;
        Ok(())
    }

    /// Update transcript/analysis text without touching status. Used when
    /// redaction sanitized the text but a later stage failed.
    pub fn update_call_text(
        &self,
        id: &str,
        transcript: Option<&str>,
        analysis: Option<&str>,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        db.execute(
            "UPDATE calls SET transcript = COALESCE(?1, transcript),
                 analysis = COALESCE(?2, analysis), updated_at = ?3
             WHERE id = ?4",
            params![transcript, analysis, now, id],
        )?;
        Ok(())
    }

    pub fn get_call(&self, id: &str) -> Result<Option<Call>> {
        let db = self.lock();
        match db.query_row(
            &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
            params![id],
            row_to_call,
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn delete_call(&self, id: &str) -> Result<()> {
        let db = self.lock();
        let n = db.execute("DELETE FROM calls WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "call",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete many calls; returns how many existed.
    pub fn bulk_delete_calls(&self, ids: &[String]) -> Result<usize> {
        let db = self.lock();
        let mut deleted = 0;
        for id in ids {
            deleted += db.execute("DELETE FROM calls WHERE id = ?1", params![id])?;
        }
        Ok(deleted)
    }

    pub fn list_calls(&self, filter: &CallFilter) -> Result<CallPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tenant) = &filter.tenant_id {
            clauses.push(format!("tenant_id = ?{}", args.len() + 1));
            args.push(Box::new(tenant.clone()));
        }
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", args.len() + 1));
            args.push(Box::new(status.as_str().to_string()));
        }
        if let Some(direction) = filter.direction {
            clauses.push(format!("direction = ?{}", args.len() + 1));
            args.push(Box::new(direction.as_str().to_string()));
        }
        if let Some(source) = filter.source {
            clauses.push(format!("source = ?{}", args.len() + 1));
            args.push(Box::new(source.as_str().to_string()));
        }
        if let Some(number) = &filter.number {
            clauses.push(format!(
                "(caller_number LIKE ?{n} OR callee_number LIKE ?{n})",
                n = args.len() + 1
            ));
            args.push(Box::new(format!("%{number}%")));
        }
        if let Some(from) = filter.from {
            clauses.push(format!("external_created_at >= ?{}", args.len() + 1));
            args.push(Box::new(fmt_ts(from)));
        }
        if let Some(to) = filter.to {
            clauses.push(format!("external_created_at < ?{}", args.len() + 1));
            args.push(Box::new(fmt_ts(to)));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let page_size = if filter.page_size == 0 { 50 } else { filter.page_size };
        let offset = filter.page * page_size;

        let db = self.lock();
        let params_ref: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();

        let total: usize = db.query_row(
            &format!("SELECT COUNT(*) FROM calls {where_clause}"),
            params_ref.as_slice(),
            |row| row.get::<_, i64>(0).map(|n| n as usize),
        )?;

        let mut stmt = db.prepare(&format!(
            "SELECT {CALL_COLUMNS} FROM calls {where_clause}
             ORDER BY external_created_at DESC, created_at DESC
             LIMIT {page_size} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(params_ref.as_slice(), row_to_call)?;
        let items = rows.filter_map(|r| r.ok()).collect();

        Ok(CallPage {
            items,
            total,
            page: filter.page,
            page_size,
        })
    }

    /// Newest `external_created_at` for one (tenant, source): the discovery
    /// watermark for the next tick.
    pub fn latest_external_created(
        &self,
        tenant_id: &str,
        source: CallSource,
    ) -> Result<Option<DateTime<Utc>>> {
        let db = self.lock();
        let latest: Option<String> = db.query_row(
            "SELECT MAX(external_created_at) FROM calls
             WHERE tenant_id = ?1 AND source = ?2",
            params![tenant_id, source.as_str()],
            |row| row.get(0),
        )?;
        Ok(crate::parse_ts_opt(latest))
    }

    // ── Retention support ─────────────────────────────────────────────────

    /// Calls whose recording has not already been deleted, as
    /// (id, recording_ref) pairs for retention matching.
    pub fn calls_with_recordings(&self, tenant_id: &str) -> Result<Vec<(String, String)>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT id, recording_ref FROM calls
             WHERE tenant_id = ?1 AND recording_ref IS NOT NULL
               AND recording_deleted_at IS NULL",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Mark recordings as gone; transcripts and analyses stay untouched.
    pub fn mark_recordings_deleted(
        &self,
        ids: &[String],
        reason: RecordingDeletedReason,
    ) -> Result<usize> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let mut marked = 0;
        for id in ids {
            marked += db.execute(
                "UPDATE calls SET recording_deleted_at = ?1,
                     recording_deleted_reason = ?2, updated_at = ?1
                 WHERE id = ?3 AND recording_deleted_at IS NULL",
                params![now, reason.as_str(), id],
            )?;
        }
        Ok(marked)
    }

    /// One-shot repair tool for historical rows whose `external_created_at`
    /// was written from a naive local clock: shift every row by a fixed
    /// offset. Dry runs only count. Returns affected row count.
    pub fn reconcile_external_timestamps(
        &self,
        tenant_id: Option<&str>,
        offset: chrono::Duration,
        apply: bool,
    ) -> Result<usize> {
        let db = self.lock();
        let (query, filter): (String, Option<String>) = match tenant_id {
            Some(tenant) => (
                "SELECT id, external_created_at FROM calls
                 WHERE tenant_id = ?1 AND external_created_at IS NOT NULL"
                    .into(),
                Some(tenant.to_string()),
            ),
            None => (
                "SELECT id, external_created_at FROM calls
                 WHERE external_created_at IS NOT NULL"
                    .into(),
                None,
            ),
        };

        let mut stmt = db.prepare(&query)?;
        let rows: Vec<(String, String)> = match &filter {
            Some(tenant) => stmt
                .query_map(params![tenant], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect(),
        };
        drop(stmt);

        let mut affected = 0;
        for (id, stored) in rows {
            let Some(parsed) = crate::parse_ts(&stored) else {
                continue;
            };
            affected += 1;
            if apply {
                db.execute(
                    "UPDATE calls SET external_created_at = ?1 WHERE id = ?2",
                    params![fmt_ts(parsed + offset), id],
                )?;
            }
        }
        Ok(affected)
    }

    // ── Structured metadata ───────────────────────────────────────────────

    pub fn upsert_call_metadata(&self, meta: &CallMetadata) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO call_metadata
             (call_id, summary, sentiment, action_items, urgent_topics, booking)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(call_id) DO UPDATE SET
                summary = excluded.summary, sentiment = excluded.sentiment,
                action_items = excluded.action_items,
                urgent_topics = excluded.urgent_topics, booking = excluded.booking",
            params![
                meta.call_id,
                meta.summary,
                meta.sentiment.map(|s| s.as_str()),
                serde_json::to_string(&meta.action_items).unwrap_or_else(|_| "[]".into()),
                meta.urgent_topics,
                meta.booking.map(|b| b.as_str()),
            ],
        )?;
        Ok(())
    }

    pub fn get_call_metadata(&self, call_id: &str) -> Result<Option<CallMetadata>> {
        let db = self.lock();
        match db.query_row(
            "SELECT call_id, summary, sentiment, action_items, urgent_topics, booking
             FROM call_metadata WHERE call_id = ?1",
            params![call_id],
            |row| {
                let sentiment: Option<String> = row.get(2)?;
                let action_items: String = row.get(3)?;
                let booking: Option<String> = row.get(5)?;
                Ok(CallMetadata {
                    call_id: row.get(0)?,
                    summary: row.get(1)?,
                    sentiment: sentiment.and_then(|s| match s.as_str() {
                        "positive" => Some(Sentiment::Positive),
                        "neutral" => Some(Sentiment::Neutral),
                        "negative" => Some(Sentiment::Negative),
                        _ => None,
                    }),
                    action_items: serde_json::from_str(&action_items).unwrap_or_default(),
                    urgent_topics: row.get(4)?,
                    booking: booking.and_then(|b| match b.as_str() {
                        "Booked" => Some(Booking::Booked),
                        "Not Booked" => Some(Booking::NotBooked),
                        "Rescheduled" => Some(Booking::Rescheduled),
                        "Canceled" => Some(Booking::Canceled),
                        _ => None,
                    }),
                })
            },
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<Call> {
    let source: String = row.get(2)?;
    let direction: Option<String> = row.get(4)?;
    let deleted_reason: Option<String> = row.get(12)?;
    let status: String = row.get(15)?;
    let redaction: String = row.get(16)?;
    let segments: Option<String> = row.get(18)?;
    let metadata: Option<String> = row.get(32)?;

    Ok(Call {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        source: source.parse().unwrap_or(CallSource::FreepbxCdr),
        external_id: row.get(3)?,
        direction: direction.and_then(|d| d.parse().ok()),
        caller_number: row.get(5)?,
        caller_name: row.get(6)?,
        callee_number: row.get(7)?,
        callee_name: row.get(8)?,
        duration_seconds: row.get(9)?,
        recording_ref: row.get(10)?,
        recording_deleted_at: parse_ts_opt(row.get(11)?),
        recording_deleted_reason: deleted_reason.and_then(|r| match r.as_str() {
            "retention" => Some(RecordingDeletedReason::Retention),
            "manual" => Some(RecordingDeletedReason::Manual),
            _ => None,
        }),
        transcript: row.get(13)?,
        analysis: row.get(14)?,
        status: status.parse().unwrap_or(CallStatus::Pending),
        redaction_status: redaction.parse().unwrap_or(RedactionStatus::NotNeeded),
        redacted: row.get::<_, i64>(17)? != 0,
        redacted_segments: segments.and_then(|s| serde_json::from_str(&s).ok()),
        redacted_at: parse_ts_opt(row.get(19)?),
        gpt_model: row.get(20)?,
        gpt_input_tokens: row.get(21)?,
        gpt_output_tokens: row.get(22)?,
        gpt_total_tokens: row.get(23)?,
        whisper_requests: row.get(24)?,
        whisper_requested_at: parse_ts_opt(row.get(25)?),
        last_error: row.get(26)?,
        external_created_at: parse_ts_opt(row.get(27)?),
        created_at: parse_ts_opt(row.get(28)?).unwrap_or_else(Utc::now),
        updated_at: parse_ts_opt(row.get(29)?).unwrap_or_else(Utc::now),
        processed_at: parse_ts_opt(row.get(30)?),
        synced_at: parse_ts_opt(row.get(31)?),
        source_metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store_with_tenant;

    fn discovered(external_id: &str) -> DiscoveredCall {
        DiscoveredCall {
            source: CallSource::FreepbxCdr,
            external_id: external_id.to_string(),
            direction: Some(Direction::In),
            caller_number: Some("+17175551212".into()),
            caller_name: None,
            callee_number: Some("200".into()),
            callee_name: None,
            duration_seconds: Some(35),
            recording_ref: Some("external-200-+17175551212-20250115-100000-abc.wav".into()),
            external_created_at: Some(Utc::now()),
            source_metadata: Some(serde_json::json!({"disposition": "ANSWERED"})),
        }
    }

    #[test]
    fn discovery_is_idempotent() {
        let (s, tenant) = store_with_tenant();
        assert!(s.upsert_discovered(&tenant, &discovered("U1")).unwrap());
        assert!(!s.upsert_discovered(&tenant, &discovered("U1")).unwrap());

        let page = s.list_calls(&CallFilter::default()).unwrap();
        assert_eq!(page.total, 1);
        // Re-discovery refreshed synced_at.
        assert!(page.items[0].synced_at.is_some());
    }

    #[test]
    fn claim_then_complete() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();

        let claimed = s.claim_next_pending_call().unwrap().unwrap();
        assert_eq!(claimed.status, CallStatus::Processing);
        assert!(s.claim_next_pending_call().unwrap().is_none());

        s.complete_call(
            &claimed.id,
            &CallCommit {
                transcript: "hello".into(),
                analysis: "1. Summary: test".into(),
                duration_seconds: Some(35),
                gpt_model: Some("gpt-4o-mini".into()),
                gpt_input_tokens: Some(100),
                gpt_output_tokens: Some(50),
                gpt_total_tokens: Some(150),
            },
        )
        .unwrap();

        let call = s.get_call(&claimed.id).unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert!(call.transcript.is_some() && call.analysis.is_some());
        assert!(call.processed_at.unwrap() >= call.created_at);
    }

    #[test]
    fn complete_requires_processing() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let id = s.list_calls(&CallFilter::default()).unwrap().items[0].id.clone();
        let commit = CallCommit {
            transcript: "t".into(),
            analysis: "a".into(),
            duration_seconds: None,
            gpt_model: None,
            gpt_input_tokens: None,
            gpt_output_tokens: None,
            gpt_total_tokens: None,
        };
        assert!(matches!(
            s.complete_call(&id, &commit),
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn fail_and_retry_cycle() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let claimed = s.claim_next_pending_call().unwrap().unwrap();
        s.fail_call(&claimed.id, "ConfigError: openai api key is not configured")
            .unwrap();

        let call = s.get_call(&claimed.id).unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Failed);
        assert!(call.last_error.as_deref().unwrap().contains("ConfigError"));
        assert!(call.transcript.is_none());

        s.retry_call(&claimed.id).unwrap();
        let call = s.get_call(&claimed.id).unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Pending);
        assert!(call.last_error.is_none());

        // Pending rows can't be retried again.
        assert!(matches!(
            s.retry_call(&claimed.id),
            Err(StoreError::IllegalTransition { .. })
        ));
        assert!(matches!(
            s.retry_call("missing"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn whisper_counter_increments() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let id = s.list_calls(&CallFilter::default()).unwrap().items[0].id.clone();
        s.bump_whisper_requests(&id).unwrap();
        s.bump_whisper_requests(&id).unwrap();
        let call = s.get_call(&id).unwrap().unwrap();
        assert_eq!(call.whisper_requests, 2);
        assert!(call.whisper_requested_at.is_some());
    }

    #[test]
    fn update_call_text_keeps_fields_passed_as_none() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let id = s.list_calls(&CallFilter::default()).unwrap().items[0].id.clone();

        s.update_call_text(&id, Some("sanitized [REDACTED] transcript"), None)
            .unwrap();
        let call = s.get_call(&id).unwrap().unwrap();
        assert_eq!(
            call.transcript.as_deref(),
            Some("sanitized [REDACTED] transcript")
        );
        assert!(call.analysis.is_none());

        // A later analysis-only update leaves the transcript alone.
        s.update_call_text(&id, None, Some("1. Summary: ok")).unwrap();
        let call = s.get_call(&id).unwrap().unwrap();
        assert_eq!(
            call.transcript.as_deref(),
            Some("sanitized [REDACTED] transcript")
        );
        assert_eq!(call.analysis.as_deref(), Some("1. Summary: ok"));
    }

    #[test]
    fn redaction_fields_round_trip() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let id = s.list_calls(&CallFilter::default()).unwrap().items[0].id.clone();
        let segments = serde_json::json!([
            {"start": 10.5, "end": 14.25, "reason": "card_number"},
            {"start": 20.0, "end": 21.5, "reason": "cvv"}
        ]);
        s.set_call_redaction(
            &id,
            &RedactionUpdate {
                status: RedactionStatus::Completed,
                redacted: true,
                segments: Some(segments.clone()),
            },
        )
        .unwrap();
        let call = s.get_call(&id).unwrap().unwrap();
        assert_eq!(call.redaction_status, RedactionStatus::Completed);
        assert!(call.redacted);
        assert_eq!(call.redacted_segments.unwrap(), segments);
        assert!(call.redacted_at.is_some());
    }

    #[test]
    fn list_filters_by_status_and_number() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let mut other = discovered("U2");
        other.caller_number = Some("+15550001111".into());
        s.upsert_discovered(&tenant, &other).unwrap();

        let page = s
            .list_calls(&CallFilter {
                number: Some("7175551212".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].external_id, "U1");

        let page = s
            .list_calls(&CallFilter {
                status: Some(CallStatus::Completed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn retention_marking_is_one_shot() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let pairs = s.calls_with_recordings(&tenant).unwrap();
        assert_eq!(pairs.len(), 1);

        let ids = vec![pairs[0].0.clone()];
        assert_eq!(
            s.mark_recordings_deleted(&ids, RecordingDeletedReason::Retention)
                .unwrap(),
            1
        );
        // Second sweep over the same rows is a no-op.
        assert_eq!(
            s.mark_recordings_deleted(&ids, RecordingDeletedReason::Retention)
                .unwrap(),
            0
        );
        let call = s.get_call(&ids[0]).unwrap().unwrap();
        assert_eq!(
            call.recording_deleted_reason,
            Some(RecordingDeletedReason::Retention)
        );
        assert!(s.calls_with_recordings(&tenant).unwrap().is_empty());
    }

    #[test]
    fn metadata_upsert_round_trips() {
        let (s, tenant) = store_with_tenant();
        s.upsert_discovered(&tenant, &discovered("U1")).unwrap();
        let id = s.list_calls(&CallFilter::default()).unwrap().items[0].id.clone();
        s.upsert_call_metadata(&CallMetadata {
            call_id: id.clone(),
            summary: Some("Customer booked a visit".into()),
            sentiment: Some(Sentiment::Positive),
            action_items: vec!["Send confirmation".into()],
            urgent_topics: Some("None".into()),
            booking: Some(Booking::Booked),
        })
        .unwrap();
        let meta = s.get_call_metadata(&id).unwrap().unwrap();
        assert_eq!(meta.sentiment, Some(Sentiment::Positive));
        assert_eq!(meta.booking, Some(Booking::Booked));
        assert_eq!(meta.action_items, vec!["Send confirmation".to_string()]);
    }
}
