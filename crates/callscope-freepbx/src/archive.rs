//! Archive discovery: list stored recordings through the PBX REST API and
//! recover caller identity from the filename conventions Asterisk uses.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use callscope_core::config::REST_TIMEOUT_SECS;
use callscope_core::settings::FreePbxSettings;
use callscope_core::types::{CallSource, Direction, DiscoveredCall};

use crate::error::{FreePbxError, Result};

/// One recording as listed by the REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

pub struct ArchiveClient {
    settings: FreePbxSettings,
    client: reqwest::Client,
}

impl ArchiveClient {
    pub fn new(settings: FreePbxSettings) -> Result<Self> {
        if settings.rest_host.as_deref().unwrap_or("").is_empty() {
            return Err(FreePbxError::Settings("restHost is not set".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REST_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!settings.reject_unauthorized)
            .build()?;
        Ok(Self { settings, client })
    }

    fn base_url(&self) -> String {
        let scheme = if self.settings.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}",
            self.settings.rest_host.as_deref().unwrap_or_default(),
            self.settings.rest_port
        )
    }

    /// List recordings newer than the watermark, stable-sorted ascending by
    /// creation time.
    #[instrument(skip(self))]
    pub async fn list(&self, since: Option<DateTime<Utc>>) -> Result<Vec<ArchiveEntry>> {
        let url = format!("{}/api/recordings", self.base_url());
        let mut request = self.client.get(&url);
        if let Some(user) = &self.settings.rest_user {
            request = request.basic_auth(user, self.settings.rest_password.as_deref());
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(FreePbxError::RestStatus {
                status: resp.status().as_u16(),
            });
        }
        let entries: Vec<ArchiveEntry> = resp.json().await?;

        let mut entries: Vec<ArchiveEntry> = entries
            .into_iter()
            .filter(|e| match (since, e.created_at) {
                (Some(watermark), Some(created)) => created > watermark,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();
        entries.sort_by_key(|e| e.created_at);
        debug!(count = entries.len(), "archive entries listed");
        Ok(entries)
    }

    pub fn discover(&self, entries: Vec<ArchiveEntry>) -> Vec<DiscoveredCall> {
        entries.into_iter().map(normalize_entry).collect()
    }
}

pub fn normalize_entry(entry: ArchiveEntry) -> DiscoveredCall {
    DiscoveredCall {
        source: CallSource::FreepbxArchive,
        external_id: entry.name.clone(),
        direction: direction_from_filename(&entry.name),
        caller_number: caller_from_filename(&entry.name),
        caller_name: None,
        callee_number: None,
        callee_name: None,
        duration_seconds: None,
        recording_ref: Some(entry.name.clone()),
        external_created_at: entry.created_at,
        source_metadata: Some(json!({
            "name": entry.name,
            "format": entry.format,
        })),
    }
}

pub fn direction_from_filename(name: &str) -> Option<Direction> {
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.starts_with("external-") {
        Some(Direction::In)
    } else if base.starts_with("out-") {
        Some(Direction::Out)
    } else if base.starts_with("internal-") {
        Some(Direction::Internal)
    } else {
        None
    }
}

/// Caller identity from the filename:
///   `external-<ext>-<caller>-YYYYMMDD-…` → caller,
///   `out-<dest>-<ext>-YYYYMMDD-…`       → originating extension,
///   `internal-<a>-<b>-YYYYMMDD-…`       → a.
pub fn caller_from_filename(name: &str) -> Option<String> {
    let base = name.rsplit('/').next().unwrap_or(name);
    let parts: Vec<&str> = base.split('-').collect();
    let candidate = match parts.first()? {
        &"external" | &"out" => parts.get(2),
        &"internal" => parts.get(1),
        _ => None,
    }?;
    (!candidate.is_empty()).then(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_extraction_per_convention() {
        assert_eq!(
            caller_from_filename("external-200-+17175551212-20250115-100000-abc.wav"),
            Some("+17175551212".into())
        );
        assert_eq!(
            caller_from_filename("out-7175551212-201-20250115-100000-abc.wav"),
            Some("201".into())
        );
        assert_eq!(
            caller_from_filename("internal-201-202-20250115-100000-abc.wav"),
            Some("201".into())
        );
        assert_eq!(caller_from_filename("unrelated.wav"), None);
        // Path prefixes don't confuse the parser.
        assert_eq!(
            caller_from_filename("2025/01/15/external-200-+1717-20250115-1-a.wav"),
            Some("+1717".into())
        );
    }

    #[test]
    fn direction_from_prefix() {
        assert_eq!(
            direction_from_filename("external-200-x-20250115-1-a.wav"),
            Some(Direction::In)
        );
        assert_eq!(
            direction_from_filename("out-x-200-20250115-1-a.wav"),
            Some(Direction::Out)
        );
        assert_eq!(
            direction_from_filename("internal-200-201-20250115-1-a.wav"),
            Some(Direction::Internal)
        );
        assert_eq!(direction_from_filename("g722-call.wav"), None);
    }

    #[test]
    fn normalize_keeps_name_as_external_id_and_ref() {
        let call = normalize_entry(ArchiveEntry {
            name: "external-200-+1717-20250115-100000-a.wav".into(),
            format: Some("wav".into()),
            created_at: None,
        });
        assert_eq!(call.source, CallSource::FreepbxArchive);
        assert_eq!(call.external_id, call.recording_ref.clone().unwrap());
        assert_eq!(call.caller_number.as_deref(), Some("+1717"));
    }
}
