//! Tenant rows and the per-tenant settings documents (ConfigService).
//!
//! Settings live in four JSON sidecar columns. Reads deserialize into the
//! typed structs from `callscope_core::settings` with credentials decrypted;
//! writes are document-level merges performed under the connection lock so
//! concurrent operator updates and scheduler reads never lose fields.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use callscope_core::settings::{
    merge_documents, public_projection, FreePbxSettings, OpenAiSettings, SettingsDomain,
    TwilioSettings,
};
use callscope_core::types::TenantRole;
use callscope_secrets::SecretStore;

use crate::error::{Result, StoreError};
use crate::{fmt_ts, parse_ts, CallStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub email: String,
    pub role: TenantRole,
    pub timezone: String,
    pub can_use_app: bool,
    pub can_use_freepbx_manager: bool,
    pub analysis_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Merged view of the OpenAI configuration the pipeline actually uses: the
/// API key comes exclusively from the platform super tenant, models and
/// prompt prefer the tenant's own settings.
#[derive(Debug, Clone)]
pub struct EffectiveOpenAi {
    pub api_key: Option<String>,
    pub whisper_model: String,
    pub gpt_model: String,
    pub analysis_prompt: Option<String>,
}

const TENANT_COLUMNS: &str = "id, email, role, timezone, can_use_app, \
     can_use_freepbx_manager, analysis_prompt, created_at, updated_at";

impl CallStore {
    /// Create a tenant with default capabilities, mirroring the identity
    /// provider's insert trigger. When the email matches the configured
    /// platform-super address the row is promoted to `super` with all
    /// capabilities enabled.
    pub fn create_tenant(&self, email: &str, timezone: &str) -> Result<Tenant> {
        let is_super = self
            .super_email
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(email));
        let (role, can_manage) = if is_super {
            (TenantRole::Super, true)
        } else {
            (TenantRole::User, false)
        };

        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(Utc::now());
        let db = self.lock();
        db.execute(
            "INSERT INTO tenants
             (id, email, role, timezone, can_use_app, can_use_freepbx_manager,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)",
            params![id, email, role.as_str(), timezone, can_manage as i64, now],
        )?;
        info!(tenant_id = %id, %email, role = role.as_str(), "tenant created");

        db.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![id],
            row_to_tenant,
        )
        .map_err(StoreError::Database)
    }

    pub fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let db = self.lock();
        match db.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1"),
            params![id],
            row_to_tenant,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn get_tenant_by_email(&self, email: &str) -> Result<Option<Tenant>> {
        let db = self.lock();
        match db.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE email = ?1 COLLATE NOCASE"),
            params![email],
            row_to_tenant,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let db = self.lock();
        let mut stmt =
            db.prepare(&format!("SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_tenant)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Delete a tenant; calls, voicemail, and sync state cascade.
    pub fn delete_tenant(&self, id: &str) -> Result<()> {
        let db = self.lock();
        let n = db.execute("DELETE FROM tenants WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "tenant",
                id: id.to_string(),
            });
        }
        info!(tenant_id = %id, "tenant deleted");
        Ok(())
    }

    pub fn set_analysis_prompt(&self, id: &str, prompt: Option<&str>) -> Result<()> {
        let db = self.lock();
        let n = db.execute(
            "UPDATE tenants SET analysis_prompt = ?1, updated_at = ?2 WHERE id = ?3",
            params![prompt, fmt_ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "tenant",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Settings documents ────────────────────────────────────────────────

    /// Raw stored document for one domain (credentials still encrypted).
    pub fn settings_doc(&self, tenant_id: &str, domain: SettingsDomain) -> Result<serde_json::Value> {
        let db = self.lock();
        settings_doc_locked(&db, tenant_id, domain)
    }

    /// Merge a partial document into one settings domain and return the
    /// public projection of the result. New plaintext credential values are
    /// encrypted before the document is written back; the read-merge-write
    /// happens entirely under the connection lock.
    pub fn merge_settings(
        &self,
        tenant_id: &str,
        domain: SettingsDomain,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let db = self.lock();
        let mut doc = settings_doc_locked(&db, tenant_id, domain)?;
        merge_documents(&mut doc, patch);
        encrypt_secret_fields(self.secrets(), domain, &mut doc)?;

        let n = db.execute(
            &format!(
                "UPDATE tenants SET {} = ?1, updated_at = ?2 WHERE id = ?3",
                domain.column()
            ),
            params![doc.to_string(), fmt_ts(Utc::now()), tenant_id],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                entity: "tenant",
                id: tenant_id.to_string(),
            });
        }
        Ok(public_projection(domain, &doc))
    }

    /// Public projection (secrets replaced by `has*` booleans) of one domain.
    pub fn public_settings(
        &self,
        tenant_id: &str,
        domain: SettingsDomain,
    ) -> Result<serde_json::Value> {
        Ok(public_projection(domain, &self.settings_doc(tenant_id, domain)?))
    }

    pub fn twilio_settings(&self, tenant_id: &str) -> Result<TwilioSettings> {
        let doc = self.decrypted_doc(tenant_id, SettingsDomain::Twilio)?;
        let settings: TwilioSettings =
            serde_json::from_value(doc).map_err(|e| StoreError::Corrupt {
                column: "twilio_settings",
                detail: e.to_string(),
            })?;
        Ok(settings.normalized())
    }

    pub fn freepbx_settings(&self, tenant_id: &str) -> Result<FreePbxSettings> {
        let doc = self.decrypted_doc(tenant_id, SettingsDomain::Freepbx)?;
        let settings: FreePbxSettings =
            serde_json::from_value(doc).map_err(|e| StoreError::Corrupt {
                column: "freepbx_settings",
                detail: e.to_string(),
            })?;
        Ok(settings.normalized())
    }

    pub fn openai_settings(&self, tenant_id: &str) -> Result<OpenAiSettings> {
        let doc = self.decrypted_doc(tenant_id, SettingsDomain::Openai)?;
        serde_json::from_value(doc).map_err(|e| StoreError::Corrupt {
            column: "openai_settings",
            detail: e.to_string(),
        })
    }

    pub fn super_tenant(&self) -> Result<Option<Tenant>> {
        match self.super_email.as_deref() {
            Some(email) => self.get_tenant_by_email(email),
            None => Ok(None),
        }
    }

    /// OpenAI configuration the pipeline uses for one tenant. The API key is
    /// taken exclusively from the platform super tenant; models and the
    /// analysis prompt prefer the tenant's own settings and fall back to the
    /// super tenant's.
    pub fn effective_openai(&self, tenant_id: &str) -> Result<EffectiveOpenAi> {
        let own = self.openai_settings(tenant_id)?;
        let own_prompt = own
            .analysis_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| {
                self.get_tenant(tenant_id)
                    .ok()
                    .flatten()
                    .and_then(|t| t.analysis_prompt)
            });

        let super_settings = match self.super_tenant()? {
            Some(super_tenant) => Some((
                self.openai_settings(&super_tenant.id)?,
                super_tenant.analysis_prompt,
            )),
            None => None,
        };

        let api_key = super_settings
            .as_ref()
            .and_then(|(s, _)| s.api_key.clone())
            .filter(|k| !k.trim().is_empty());
        let analysis_prompt = own_prompt.or_else(|| {
            super_settings.as_ref().and_then(|(s, prompt)| {
                s.analysis_prompt
                    .clone()
                    .filter(|p| !p.trim().is_empty())
                    .or_else(|| prompt.clone())
            })
        });

        Ok(EffectiveOpenAi {
            api_key,
            whisper_model: own.whisper_model,
            gpt_model: own.gpt_model,
            analysis_prompt,
        })
    }

    fn decrypted_doc(&self, tenant_id: &str, domain: SettingsDomain) -> Result<serde_json::Value> {
        let mut doc = self.settings_doc(tenant_id, domain)?;
        if let serde_json::Value::Object(map) = &mut doc {
            for key in domain.secret_keys() {
                if let Some(serde_json::Value::String(value)) = map.get(*key) {
                    if SecretStore::is_encrypted(value) {
                        let plain = self.secrets().decrypt(value)?;
                        map.insert((*key).to_string(), serde_json::Value::String(plain));
                    }
                }
            }
        }
        Ok(doc)
    }
}

fn settings_doc_locked(
    db: &rusqlite::Connection,
    tenant_id: &str,
    domain: SettingsDomain,
) -> Result<serde_json::Value> {
    let raw: String = db
        .query_row(
            &format!("SELECT {} FROM tenants WHERE id = ?1", domain.column()),
            params![tenant_id],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "tenant",
                id: tenant_id.to_string(),
            },
            other => StoreError::Database(other),
        })?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
        column: domain.column(),
        detail: e.to_string(),
    })
}

/// Encrypt plaintext credential values in place. Values already in wire form
/// are left alone; empty strings clear the credential.
fn encrypt_secret_fields(
    secrets: &SecretStore,
    domain: SettingsDomain,
    doc: &mut serde_json::Value,
) -> Result<()> {
    let serde_json::Value::Object(map) = doc else {
        return Ok(());
    };
    for key in domain.secret_keys() {
        match map.get(*key) {
            Some(serde_json::Value::String(value)) if value.is_empty() => {
                map.remove(*key);
            }
            Some(serde_json::Value::String(value)) if !SecretStore::is_encrypted(value) => {
                let token = secrets.encrypt(value)?;
                map.insert((*key).to_string(), serde_json::Value::String(token));
            }
            _ => {}
        }
    }
    Ok(())
}

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tenant> {
    let role: String = row.get(2)?;
    let created: String = row.get(7)?;
    let updated: String = row.get(8)?;
    Ok(Tenant {
        id: row.get(0)?,
        email: row.get(1)?,
        role: role.parse().unwrap_or(callscope_core::types::TenantRole::User),
        timezone: row.get(3)?,
        can_use_app: row.get::<_, i64>(4)? != 0,
        can_use_freepbx_manager: row.get::<_, i64>(5)? != 0,
        analysis_prompt: row.get(6)?,
        created_at: parse_ts(&created).unwrap_or_else(Utc::now),
        updated_at: parse_ts(&updated).unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store;
    use callscope_core::types::TenantRole;
    use serde_json::json;

    #[test]
    fn create_applies_default_capabilities() {
        let s = store();
        let t = s.create_tenant("user@example.com", "UTC").unwrap();
        assert_eq!(t.role, TenantRole::User);
        assert!(t.can_use_app);
        assert!(!t.can_use_freepbx_manager);
    }

    #[test]
    fn super_email_is_promoted() {
        let s = store();
        let t = s.create_tenant("Super@Example.com", "UTC").unwrap();
        assert_eq!(t.role, TenantRole::Super);
        assert!(t.can_use_freepbx_manager);
        assert_eq!(s.super_tenant().unwrap().unwrap().id, t.id);
    }

    #[test]
    fn merge_encrypts_credentials_and_projects_booleans() {
        let s = store();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        let public = s
            .merge_settings(
                &t.id,
                SettingsDomain::Freepbx,
                &json!({"sshHost": "pbx.local", "sshUser": "root", "sshPassword": "hunter2"}),
            )
            .unwrap();
        assert_eq!(public["hasSshPassword"], json!(true));
        assert!(public.get("sshPassword").is_none());

        // On disk the credential is ciphertext.
        let raw = s.settings_doc(&t.id, SettingsDomain::Freepbx).unwrap();
        let stored = raw["sshPassword"].as_str().unwrap();
        assert!(stored.starts_with("v1:"));
        assert_ne!(stored, "hunter2");

        // Typed load decrypts.
        let settings = s.freepbx_settings(&t.id).unwrap();
        assert_eq!(settings.ssh_password.as_deref(), Some("hunter2"));
        assert_eq!(settings.ssh_host.as_deref(), Some("pbx.local"));
    }

    #[test]
    fn merge_preserves_unrelated_fields() {
        let s = store();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        s.merge_settings(
            &t.id,
            SettingsDomain::Freepbx,
            &json!({"sshHost": "a", "retentionDays": 14}),
        )
        .unwrap();
        s.merge_settings(&t.id, SettingsDomain::Freepbx, &json!({"sshHost": "b"}))
            .unwrap();
        let settings = s.freepbx_settings(&t.id).unwrap();
        assert_eq!(settings.ssh_host.as_deref(), Some("b"));
        assert_eq!(settings.retention_days, 14);
    }

    #[test]
    fn re_merging_projection_does_not_double_encrypt() {
        let s = store();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        s.merge_settings(
            &t.id,
            SettingsDomain::Openai,
            &json!({"apiKey": "sk-test", "gptModel": "gpt-4o"}),
        )
        .unwrap();
        // Patch that carries the already-encrypted value back (e.g. an
        // operator round trip) must not re-wrap it.
        let raw = s.settings_doc(&t.id, SettingsDomain::Openai).unwrap();
        s.merge_settings(&t.id, SettingsDomain::Openai, &raw).unwrap();
        assert_eq!(
            s.openai_settings(&t.id).unwrap().api_key.as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn api_key_comes_only_from_super_tenant() {
        let s = store();
        let sup = s.create_tenant("super@example.com", "UTC").unwrap();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        s.merge_settings(
            &sup.id,
            SettingsDomain::Openai,
            &json!({"apiKey": "sk-platform", "analysisPrompt": "platform prompt"}),
        )
        .unwrap();
        s.merge_settings(
            &t.id,
            SettingsDomain::Openai,
            &json!({"apiKey": "sk-tenant", "gptModel": "gpt-4.1"}),
        )
        .unwrap();

        let eff = s.effective_openai(&t.id).unwrap();
        assert_eq!(eff.api_key.as_deref(), Some("sk-platform"));
        assert_eq!(eff.gpt_model, "gpt-4.1");
        assert_eq!(eff.analysis_prompt.as_deref(), Some("platform prompt"));
    }

    #[test]
    fn missing_super_key_yields_none() {
        let s = store();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        let eff = s.effective_openai(&t.id).unwrap();
        assert!(eff.api_key.is_none());
    }

    #[test]
    fn delete_cascades() {
        let s = store();
        let t = s.create_tenant("ops@example.com", "UTC").unwrap();
        s.delete_tenant(&t.id).unwrap();
        assert!(s.get_tenant(&t.id).unwrap().is_none());
        assert!(matches!(
            s.delete_tenant(&t.id),
            Err(StoreError::NotFound { .. })
        ));
    }
}
