//! Per-tenant settings documents.
//!
//! Each domain (twilio / freepbx / openai / billing) is persisted as a JSON
//! sidecar column on the tenant row. The in-process representation is the
//! typed structs below with defaults applied on load; unknown keys in the
//! stored document survive merges but are ignored by the typed view.
//! Credential fields are encrypted at rest by the store and never appear in
//! the public projection, which exposes `has*` booleans instead.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The four JSON sidecar columns on a tenant row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsDomain {
    Twilio,
    Freepbx,
    Openai,
    Billing,
}

impl SettingsDomain {
    pub fn column(&self) -> &'static str {
        match self {
            SettingsDomain::Twilio => "twilio_settings",
            SettingsDomain::Freepbx => "freepbx_settings",
            SettingsDomain::Openai => "openai_settings",
            SettingsDomain::Billing => "billing_settings",
        }
    }

    /// JSON keys within this domain holding credentials. These are encrypted
    /// on write and replaced by `has<Field>` booleans in the public view.
    pub fn secret_keys(&self) -> &'static [&'static str] {
        match self {
            SettingsDomain::Twilio => &["authToken"],
            SettingsDomain::Freepbx => {
                &["restPassword", "cdrPassword", "sshPassword", "sshPrivateKey"]
            }
            SettingsDomain::Openai => &["apiKey"],
            SettingsDomain::Billing => &[],
        }
    }
}

impl FromStr for SettingsDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twilio" => Ok(SettingsDomain::Twilio),
            "freepbx" => Ok(SettingsDomain::Freepbx),
            "openai" => Ok(SettingsDomain::Openai),
            "billing" => Ok(SettingsDomain::Billing),
            other => Err(format!("unknown settings domain: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordMode {
    #[default]
    Answer,
    Ring,
    None,
}

/// Twilio voice-leg behaviour plus API credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TwilioSettings {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub forwarding_enabled: bool,
    pub forward_number: Option<String>,
    pub record_enabled: bool,
    pub ring_seconds: u32,
    pub greeting: Option<String>,
    pub beep: bool,
    pub max_record_seconds: u32,
    pub finish_key: String,
    pub record_mode: RecordMode,
}

impl Default for TwilioSettings {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            forwarding_enabled: false,
            forward_number: None,
            record_enabled: false,
            ring_seconds: 20,
            greeting: None,
            beep: true,
            max_record_seconds: 3600,
            finish_key: "#".to_string(),
            record_mode: RecordMode::Answer,
        }
    }
}

impl TwilioSettings {
    /// Apply the documented bounds; out-of-range values from the stored JSON
    /// are pulled back instead of rejected.
    pub fn normalized(mut self) -> Self {
        self.ring_seconds = self.ring_seconds.clamp(5, 600);
        self.max_record_seconds = self.max_record_seconds.clamp(60, 14_400);
        if !matches!(self.finish_key.as_str(), "#" | "*" | "0" | "1") {
            self.finish_key = "#".to_string();
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreePbxFilters {
    pub include_inbound: bool,
    pub include_outbound: bool,
    pub include_internal: bool,
    pub excluded_inbound_ext: Vec<String>,
    pub excluded_outbound_ext: Vec<String>,
    pub excluded_internal_ext: Vec<String>,
}

impl Default for FreePbxFilters {
    fn default() -> Self {
        Self {
            include_inbound: true,
            include_outbound: true,
            include_internal: false,
            excluded_inbound_ext: Vec::new(),
            excluded_outbound_ext: Vec::new(),
            excluded_internal_ext: Vec::new(),
        }
    }
}

/// Per-extension recording toggles, keyed by extension number.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingOverride {
    pub in_external: bool,
    pub out_external: bool,
    pub in_internal: bool,
    pub out_internal: bool,
}

/// Everything needed to talk to one FreePBX deployment: REST API, the CDR
/// MySQL database, and SSH/SFTP to the recording and voicemail spools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreePbxSettings {
    pub enabled: bool,
    pub rest_host: Option<String>,
    pub rest_port: u16,
    pub rest_user: Option<String>,
    pub rest_password: Option<String>,
    pub tls: bool,
    pub reject_unauthorized: bool,
    pub cdr_host: Option<String>,
    pub cdr_port: u16,
    pub cdr_user: Option<String>,
    pub cdr_password: Option<String>,
    pub cdr_database: String,
    pub ssh_host: Option<String>,
    pub ssh_port: u16,
    pub ssh_user: Option<String>,
    pub ssh_password: Option<String>,
    pub ssh_private_key: Option<String>,
    pub ssh_base_path: String,
    pub retention_enabled: bool,
    pub retention_days: u32,
    /// Tenant-local HH:MM at which the daily retention sweep runs.
    pub retention_run_time: String,
    pub voicemail_enabled: bool,
    pub voicemail_base_path: String,
    pub voicemail_context: String,
    pub voicemail_folders: Vec<String>,
    pub voicemail_interval_minutes: u32,
    pub filters: FreePbxFilters,
    pub recording_overrides: BTreeMap<String, RecordingOverride>,
}

impl Default for FreePbxSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            rest_host: None,
            rest_port: 443,
            rest_user: None,
            rest_password: None,
            tls: true,
            reject_unauthorized: true,
            cdr_host: None,
            cdr_port: 3306,
            cdr_user: None,
            cdr_password: None,
            cdr_database: "asteriskcdrdb".to_string(),
            ssh_host: None,
            ssh_port: 22,
            ssh_user: None,
            ssh_password: None,
            ssh_private_key: None,
            ssh_base_path: "/var/spool/asterisk/monitor".to_string(),
            retention_enabled: false,
            retention_days: 30,
            retention_run_time: "02:30".to_string(),
            voicemail_enabled: false,
            voicemail_base_path: "/var/spool/asterisk/voicemail".to_string(),
            voicemail_context: "default".to_string(),
            voicemail_folders: vec!["INBOX".to_string(), "Old".to_string()],
            voicemail_interval_minutes: 5,
            filters: FreePbxFilters::default(),
            recording_overrides: BTreeMap::new(),
        }
    }
}

impl FreePbxSettings {
    pub fn normalized(mut self) -> Self {
        self.retention_days = self.retention_days.max(1);
        self.voicemail_interval_minutes = self.voicemail_interval_minutes.clamp(1, 1440);
        if parse_run_time(&self.retention_run_time).is_none() {
            self.retention_run_time = "02:30".to_string();
        }
        if self.voicemail_folders.is_empty() {
            self.voicemail_folders = vec!["INBOX".to_string(), "Old".to_string()];
        }
        self
    }
}

/// Parse "HH:MM" into (hour, minute). Returns None for anything malformed.
pub fn parse_run_time(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenAiSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub whisper_model: String,
    pub gpt_model: String,
    pub analysis_prompt: Option<String>,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            whisper_model: "whisper-1".to_string(),
            gpt_model: "gpt-4o-mini".to_string(),
            analysis_prompt: None,
        }
    }
}

/// Deep-merge `patch` into `base`. Objects merge recursively; a `null` in the
/// patch deletes the key; everything else replaces. This is the only merge
/// the ConfigService performs, always under the store's document lock.
pub fn merge_documents(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    base_map.remove(key);
                } else if let Some(existing) = base_map.get_mut(key) {
                    if existing.is_object() && value.is_object() {
                        merge_documents(existing, value);
                    } else {
                        *existing = value.clone();
                    }
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// Public projection of one settings document: secret keys removed, replaced
/// by `has<Key>` booleans (e.g. `sshPassword` → `hasSshPassword`).
pub fn public_projection(domain: SettingsDomain, doc: &serde_json::Value) -> serde_json::Value {
    let mut out = doc.clone();
    if let serde_json::Value::Object(map) = &mut out {
        for key in domain.secret_keys() {
            let present = map
                .get(*key)
                .map(|v| match v {
                    serde_json::Value::String(s) => !s.is_empty(),
                    serde_json::Value::Null => false,
                    _ => true,
                })
                .unwrap_or(false);
            map.remove(*key);
            map.insert(has_key_name(key), serde_json::Value::Bool(present));
        }
    }
    out
}

fn has_key_name(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => format!("has{}{}", first.to_uppercase(), chars.as_str()),
        None => "has".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn twilio_defaults_and_clamps() {
        let s: TwilioSettings = serde_json::from_value::<TwilioSettings>(json!({
            "ringSeconds": 2,
            "maxRecordSeconds": 999999,
            "finishKey": "9"
        }))
        .unwrap()
        .normalized();
        assert_eq!(s.ring_seconds, 5);
        assert_eq!(s.max_record_seconds, 14_400);
        assert_eq!(s.finish_key, "#");
        assert!(!s.forwarding_enabled);
        assert!(s.beep);
    }

    #[test]
    fn freepbx_unknown_keys_are_tolerated() {
        let s: FreePbxSettings = serde_json::from_value(json!({
            "enabled": true,
            "sshHost": "pbx.example.com",
            "someFutureKey": {"nested": true}
        }))
        .unwrap();
        assert!(s.enabled);
        assert_eq!(s.ssh_host.as_deref(), Some("pbx.example.com"));
        assert_eq!(s.cdr_database, "asteriskcdrdb");
    }

    #[test]
    fn run_time_parsing() {
        assert_eq!(parse_run_time("02:30"), Some((2, 30)));
        assert_eq!(parse_run_time("23:59"), Some((23, 59)));
        assert_eq!(parse_run_time("24:00"), None);
        assert_eq!(parse_run_time("2"), None);
        assert_eq!(parse_run_time("aa:bb"), None);
    }

    #[test]
    fn merge_is_recursive_and_null_deletes() {
        let mut base = json!({
            "enabled": true,
            "filters": {"includeInbound": true, "excludedInboundExt": ["100"]},
            "sshHost": "old.example.com"
        });
        let patch = json!({
            "filters": {"includeInbound": false},
            "sshHost": null,
            "restPort": 8443
        });
        merge_documents(&mut base, &patch);
        assert_eq!(base["filters"]["includeInbound"], json!(false));
        assert_eq!(base["filters"]["excludedInboundExt"], json!(["100"]));
        assert!(base.get("sshHost").is_none());
        assert_eq!(base["restPort"], json!(8443));
    }

    #[test]
    fn projection_hides_secrets() {
        let doc = json!({
            "sshHost": "pbx",
            "sshPassword": "v1:abc",
            "restPassword": "",
            "cdrPassword": "v1:def"
        });
        let public = public_projection(SettingsDomain::Freepbx, &doc);
        assert!(public.get("sshPassword").is_none());
        assert!(public.get("cdrPassword").is_none());
        assert_eq!(public["hasSshPassword"], json!(true));
        assert_eq!(public["hasRestPassword"], json!(false));
        assert_eq!(public["hasCdrPassword"], json!(true));
        assert_eq!(public["hasSshPrivateKey"], json!(false));
        assert_eq!(public["sshHost"], json!("pbx"));
    }
}
