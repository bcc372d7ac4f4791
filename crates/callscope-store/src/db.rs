use rusqlite::{Connection, Result};

/// Initialise all tables and indexes. Safe to call on every startup
/// (idempotent). Timestamps are RFC3339 UTC strings throughout; no column
/// ever holds a naive local time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_tenants_table(conn)?;
    create_calls_table(conn)?;
    create_call_metadata_table(conn)?;
    create_voicemail_table(conn)?;
    create_metrics_table(conn)?;
    create_sync_state_table(conn)?;
    Ok(())
}

fn create_tenants_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tenants (
            id                      TEXT PRIMARY KEY,
            email                   TEXT NOT NULL UNIQUE,
            role                    TEXT NOT NULL DEFAULT 'user',
            timezone                TEXT NOT NULL DEFAULT 'UTC',
            can_use_app             INTEGER NOT NULL DEFAULT 1,
            can_use_freepbx_manager INTEGER NOT NULL DEFAULT 0,
            analysis_prompt         TEXT,
            twilio_settings         TEXT NOT NULL DEFAULT '{}',
            freepbx_settings        TEXT NOT NULL DEFAULT '{}',
            openai_settings         TEXT NOT NULL DEFAULT '{}',
            billing_settings        TEXT NOT NULL DEFAULT '{}',
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );",
    )
}

fn create_calls_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS calls (
            id                       TEXT PRIMARY KEY,
            tenant_id                TEXT NOT NULL
                                     REFERENCES tenants(id) ON DELETE CASCADE,
            source                   TEXT NOT NULL,
            external_id              TEXT NOT NULL,
            direction                TEXT,
            caller_number            TEXT,
            caller_name              TEXT,
            callee_number            TEXT,
            callee_name              TEXT,
            duration_seconds         INTEGER,
            recording_ref            TEXT,
            recording_deleted_at     TEXT,
            recording_deleted_reason TEXT,
            transcript               TEXT,
            analysis                 TEXT,
            status                   TEXT NOT NULL DEFAULT 'pending',
            redaction_status         TEXT NOT NULL DEFAULT 'not_needed',
            redacted                 INTEGER NOT NULL DEFAULT 0,
            redacted_segments        TEXT,
            redacted_at              TEXT,
            gpt_model                TEXT,
            gpt_input_tokens         INTEGER,
            gpt_output_tokens        INTEGER,
            gpt_total_tokens         INTEGER,
            whisper_requests         INTEGER NOT NULL DEFAULT 0,
            whisper_requested_at     TEXT,
            last_error               TEXT,
            external_created_at      TEXT,
            created_at               TEXT NOT NULL,
            updated_at               TEXT NOT NULL,
            processed_at             TEXT,
            synced_at                TEXT,
            source_metadata          TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_calls_source_external
            ON calls(source, external_id);
        CREATE INDEX IF NOT EXISTS idx_calls_tenant_created
            ON calls(tenant_id, external_created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_calls_redaction
            ON calls(redaction_status);
        CREATE INDEX IF NOT EXISTS idx_calls_status
            ON calls(status, created_at);",
    )
}

fn create_call_metadata_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS call_metadata (
            call_id       TEXT PRIMARY KEY
                          REFERENCES calls(id) ON DELETE CASCADE,
            summary       TEXT,
            sentiment     TEXT,
            action_items  TEXT NOT NULL DEFAULT '[]',
            urgent_topics TEXT,
            booking       TEXT
        );",
    )
}

fn create_voicemail_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS voicemail_messages (
            id               TEXT PRIMARY KEY,
            tenant_id        TEXT NOT NULL
                             REFERENCES tenants(id) ON DELETE CASCADE,
            mailbox          TEXT NOT NULL,
            context          TEXT NOT NULL,
            folder           TEXT NOT NULL,
            msg_id           TEXT NOT NULL,
            pbx_identity     TEXT NOT NULL,
            received_at      TEXT,
            caller_id        TEXT,
            duration_seconds INTEGER,
            recording_path   TEXT,
            metadata_path    TEXT,
            last_seen_at     TEXT NOT NULL,
            transcript       TEXT,
            analysis         TEXT,
            status           TEXT NOT NULL DEFAULT 'pending',
            last_error       TEXT,
            listened_at      TEXT,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL,
            UNIQUE(tenant_id, context, mailbox, pbx_identity)
        );
        CREATE INDEX IF NOT EXISTS idx_vm_tenant_seen
            ON voicemail_messages(tenant_id, last_seen_at DESC);
        CREATE INDEX IF NOT EXISTS idx_vm_status
            ON voicemail_messages(status, received_at);",
    )
}

fn create_metrics_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS system_metrics_samples (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            recorded_at    TEXT NOT NULL,
            cpu_percent    REAL NOT NULL,
            memory_percent REAL NOT NULL,
            disk_percent   REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_metrics_recorded
            ON system_metrics_samples(recorded_at DESC);",
    )
}

fn create_sync_state_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_state (
            tenant_id   TEXT NOT NULL
                        REFERENCES tenants(id) ON DELETE CASCADE,
            source      TEXT NOT NULL,
            last_run_at TEXT,
            last_result TEXT,
            next_run_at TEXT,
            in_progress INTEGER NOT NULL DEFAULT 0,
            started_at  TEXT,
            PRIMARY KEY (tenant_id, source)
        );",
    )
}
