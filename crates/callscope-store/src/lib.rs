//! Persistent record of tenants, calls, voicemails, metrics samples, and
//! scheduler sync state.
//!
//! One SQLite connection behind a `Mutex`; every public method is a single
//! lock acquisition, so document merges and status claims are atomic at the
//! store level. All timestamps are RFC3339 UTC strings in the database and
//! `DateTime<Utc>` in process.

mod calls;
mod db;
mod error;
mod metrics;
mod sync;
mod tenants;
mod voicemail;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use callscope_secrets::SecretStore;

pub use calls::{Call, CallCommit, CallFilter, CallMetadata, CallPage, RedactionUpdate};
pub use error::{Result, StoreError};
pub use metrics::SystemSample;
pub use sync::SyncState;
pub use tenants::{EffectiveOpenAi, Tenant};
pub use voicemail::{VoicemailMessage, VoicemailSeen};

pub struct CallStore {
    db: Mutex<Connection>,
    secrets: SecretStore,
    /// Email of the platform-super tenant; its OpenAI credentials and
    /// analysis prompt are the platform defaults.
    super_email: Option<String>,
}

impl CallStore {
    pub fn open(path: &str, secrets: SecretStore, super_email: Option<String>) -> Result<Self> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let conn = Connection::open(path)?;
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            secrets,
            super_email,
        })
    }

    pub fn open_in_memory(secrets: SecretStore, super_email: Option<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            secrets,
            super_email,
        })
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap()
    }

    pub(crate) fn secrets(&self) -> &SecretStore {
        &self.secrets
    }
}

/// RFC3339 with UTC offset, the only on-disk timestamp form.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().and_then(parse_ts)
}
