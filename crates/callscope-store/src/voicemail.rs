//! Voicemail message rows: upsert-on-sight discovery, tombstone
//! reconciliation, and the same claim/commit cycle calls use.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use callscope_core::types::CallStatus;

use crate::error::{Result, StoreError};
use crate::{fmt_ts, parse_ts_opt, CallStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicemailMessage {
    pub id: String,
    pub tenant_id: String,
    pub mailbox: String,
    pub context: String,
    pub folder: String,
    pub msg_id: String,
    /// Stable best-effort key surviving PBX renumbering:
    /// `mailbox|origtime|duration|callerid`.
    pub pbx_identity: String,
    pub received_at: Option<DateTime<Utc>>,
    pub caller_id: Option<String>,
    pub duration_seconds: Option<i64>,
    pub recording_path: Option<String>,
    pub metadata_path: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub transcript: Option<String>,
    pub analysis: Option<String>,
    pub status: CallStatus,
    pub last_error: Option<String>,
    pub listened_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One message observed by a discovery pass.
#[derive(Debug, Clone)]
pub struct VoicemailSeen {
    pub mailbox: String,
    pub context: String,
    pub folder: String,
    pub msg_id: String,
    pub pbx_identity: String,
    pub received_at: Option<DateTime<Utc>>,
    pub caller_id: Option<String>,
    pub duration_seconds: Option<i64>,
    pub recording_path: Option<String>,
    pub metadata_path: Option<String>,
}

const VM_COLUMNS: &str = "id, tenant_id, mailbox, context, folder, msg_id, pbx_identity, \
     received_at, caller_id, duration_seconds, recording_path, metadata_path, \
     last_seen_at, transcript, analysis, status, last_error, listened_at, \
     created_at, updated_at";

impl CallStore {
    /// Upsert one observed message, refreshing `last_seen_at` and the
    /// volatile fields (folder, msg id, paths) that the PBX renumbers.
    pub fn upsert_voicemail_seen(
        &self,
        tenant_id: &str,
        seen: &VoicemailSeen,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let seen_str = fmt_ts(seen_at);
        let db = self.lock();
        db.execute(
            "INSERT INTO voicemail_messages
             (id, tenant_id, mailbox, context, folder, msg_id, pbx_identity,
              received_at, caller_id, duration_seconds, recording_path, metadata_path,
              last_seen_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(tenant_id, context, mailbox, pbx_identity) DO UPDATE SET
                folder = excluded.folder,
                msg_id = excluded.msg_id,
                recording_path = excluded.recording_path,
                metadata_path = excluded.metadata_path,
                last_seen_at = excluded.last_seen_at,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                tenant_id,
                seen.mailbox,
                seen.context,
                seen.folder,
                seen.msg_id,
                seen.pbx_identity,
                seen.received_at.map(fmt_ts),
                seen.caller_id,
                seen.duration_seconds,
                seen.recording_path,
                seen.metadata_path,
                seen_str,
                now,
            ],
        )?;
        Ok(())
    }

    /// Delete rows not seen since `sync_start` (reconciliation tombstones).
    /// Scoped to one tenant and voicemail context.
    pub fn delete_voicemail_stale(
        &self,
        tenant_id: &str,
        context: &str,
        sync_start: DateTime<Utc>,
    ) -> Result<usize> {
        let db = self.lock();
        let n = db.execute(
            "DELETE FROM voicemail_messages
             WHERE tenant_id = ?1 AND context = ?2 AND last_seen_at < ?3",
            params![tenant_id, context, fmt_ts(sync_start)],
        )?;
        if n > 0 {
            info!(tenant_id, context, removed = n, "voicemail tombstones removed");
        }
        Ok(n)
    }

    /// Claim the oldest pending voicemail for processing.
    pub fn claim_next_pending_voicemail(&self) -> Result<Option<VoicemailMessage>> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let candidate: Option<String> = match db.query_row(
            "SELECT id FROM voicemail_messages WHERE status = 'pending'
             ORDER BY received_at, created_at LIMIT 1",
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
            "UPDATE voicemail_messages SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now, id],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        db.query_row(
            &format!("SELECT {VM_COLUMNS} FROM voicemail_messages WHERE id = ?1"),
            params![id],
            row_to_voicemail,
        )
        .map(Some)
        .map_err(StoreError::Database)
    }

    pub fn complete_voicemail(
        &self,
        id: &str,
        transcript: &str,
        analysis: &str,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE voicemail_messages SET status = 'completed', transcript = ?1,
                 analysis = ?2, last_error = NULL, updated_at = ?3
             WHERE id = ?4 AND status = 'processing'",
            params![transcript, analysis, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::IllegalTransition {
                entity: "voicemail",
                id: id.to_string(),
                detail: "complete requires processing status".into(),
            });
        }
        Ok(())
    }

    pub fn fail_voicemail(&self, id: &str, last_error: &str) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE voicemail_messages SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![last_error, now, id],
        )?;
        if n == 0 {
            return Err(StoreError::IllegalTransition {
                entity: "voicemail",
                id: id.to_string(),
                detail: "fail requires processing status".into(),
            });
        }
        Ok(())
    }

    /// Record the folder/path change after a message moved to `Old`.
    pub fn update_voicemail_location(
        &self,
        id: &str,
        folder: &str,
        msg_id: &str,
        recording_path: Option<&str>,
        metadata_path: Option<&str>,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        db.execute(
            "UPDATE voicemail_messages SET folder = ?1, msg_id = ?2,
                 recording_path = ?3, metadata_path = ?4, updated_at = ?5
             WHERE id = ?6",
            params![folder, msg_id, recording_path, metadata_path, now, id],
        )?;
        Ok(())
    }

    pub fn mark_voicemail_listened(&self, id: &str) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        let n = db.execute(
            "UPDATE voicemail_messages SET listened_at = COALESCE(listened_at, ?1),
                 updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "voicemail",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_voicemail(&self, id: &str) -> Result<Option<VoicemailMessage>> {
        let db = self.lock();
        match db.query_row(
            &format!("SELECT {VM_COLUMNS} FROM voicemail_messages WHERE id = ?1"),
            params![id],
            row_to_voicemail,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_voicemail(&self, tenant_id: &str) -> Result<Vec<VoicemailMessage>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {VM_COLUMNS} FROM voicemail_messages
             WHERE tenant_id = ?1 ORDER BY received_at DESC, created_at DESC"
        ))?;
        let rows = stmt.query_map(params![tenant_id], row_to_voicemail)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_voicemail(row: &rusqlite::Row<'_>) -> rusqlite::Result<VoicemailMessage> {
    let status: String = row.get(15)?;
    Ok(VoicemailMessage {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        mailbox: row.get(2)?,
        context: row.get(3)?,
        folder: row.get(4)?,
        msg_id: row.get(5)?,
        pbx_identity: row.get(6)?,
        received_at: parse_ts_opt(row.get(7)?),
        caller_id: row.get(8)?,
        duration_seconds: row.get(9)?,
        recording_path: row.get(10)?,
        metadata_path: row.get(11)?,
        last_seen_at: parse_ts_opt(row.get(12)?).unwrap_or_else(Utc::now),
        transcript: row.get(13)?,
        analysis: row.get(14)?,
        status: status.parse().unwrap_or(CallStatus::Pending),
        last_error: row.get(16)?,
        listened_at: parse_ts_opt(row.get(17)?),
        created_at: parse_ts_opt(row.get(18)?).unwrap_or_else(Utc::now),
        updated_at: parse_ts_opt(row.get(19)?).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store_with_tenant;
    use chrono::Duration;

    fn seen(mailbox: &str, identity: &str, folder: &str) -> VoicemailSeen {
        VoicemailSeen {
            mailbox: mailbox.to_string(),
            context: "default".to_string(),
            folder: folder.to_string(),
            msg_id: "msg0000".to_string(),
            pbx_identity: identity.to_string(),
            received_at: Some(Utc::now() - Duration::hours(1)),
            caller_id: Some("\"Ann\" <+15550001111>".to_string()),
            duration_seconds: Some(22),
            recording_path: Some(format!("/vm/default/{mailbox}/{folder}/msg0000.wav")),
            metadata_path: Some(format!("/vm/default/{mailbox}/{folder}/msg0000.txt")),
        }
    }

    #[test]
    fn reconciliation_deletes_tombstones_and_tracks_moves() {
        let (s, tenant) = store_with_tenant();

        // First sync: two INBOX messages.
        let first_start = Utc::now();
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1736930400|22|ann", "INBOX"), first_start)
            .unwrap();
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1736934000|9|bob", "INBOX"), first_start)
            .unwrap();
        assert_eq!(s.list_voicemail(&tenant).unwrap().len(), 2);

        // Second sync: first message deleted on the PBX, second moved to Old.
        let second_start = Utc::now() + Duration::seconds(1);
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1736934000|9|bob", "Old"), second_start)
            .unwrap();
        let removed = s
            .delete_voicemail_stale(&tenant, "default", second_start)
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = s.list_voicemail(&tenant).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pbx_identity, "200|1736934000|9|bob");
        assert_eq!(remaining[0].folder, "Old");
        assert!(remaining[0].last_seen_at >= second_start);
    }

    #[test]
    fn surviving_rows_keep_transcript_across_syncs() {
        let (s, tenant) = store_with_tenant();
        let start = Utc::now();
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1|5|x", "INBOX"), start)
            .unwrap();
        let vm = s.claim_next_pending_voicemail().unwrap().unwrap();
        s.complete_voicemail(&vm.id, "transcribed", "analyzed").unwrap();

        // Another discovery pass must not reset processing results.
        let later = Utc::now() + Duration::seconds(1);
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1|5|x", "INBOX"), later)
            .unwrap();
        let vm = s.get_voicemail(&vm.id).unwrap().unwrap();
        assert_eq!(vm.status, CallStatus::Completed);
        assert_eq!(vm.transcript.as_deref(), Some("transcribed"));
        assert!(vm.last_seen_at >= later);
    }

    #[test]
    fn claim_orders_by_received_time() {
        let (s, tenant) = store_with_tenant();
        let start = Utc::now();
        let mut newer = seen("200", "200|2|5|b", "INBOX");
        newer.received_at = Some(Utc::now());
        let mut older = seen("200", "200|1|5|a", "INBOX");
        older.received_at = Some(Utc::now() - Duration::hours(2));
        s.upsert_voicemail_seen(&tenant, &newer, start).unwrap();
        s.upsert_voicemail_seen(&tenant, &older, start).unwrap();

        let claimed = s.claim_next_pending_voicemail().unwrap().unwrap();
        assert_eq!(claimed.pbx_identity, "200|1|5|a");
    }

    #[test]
    fn listened_is_sticky() {
        let (s, tenant) = store_with_tenant();
        s.upsert_voicemail_seen(&tenant, &seen("200", "200|1|5|x", "INBOX"), Utc::now())
            .unwrap();
        let vm = &s.list_voicemail(&tenant).unwrap()[0];
        s.mark_voicemail_listened(&vm.id).unwrap();
        let first = s.get_voicemail(&vm.id).unwrap().unwrap().listened_at.unwrap();
        s.mark_voicemail_listened(&vm.id).unwrap();
        let second = s.get_voicemail(&vm.id).unwrap().unwrap().listened_at.unwrap();
        assert_eq!(first, second);
    }
}
