use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a call record was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSource {
    Twilio,
    FreepbxArchive,
    FreepbxCdr,
}

impl CallSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallSource::Twilio => "twilio",
            CallSource::FreepbxArchive => "freepbx_archive",
            CallSource::FreepbxCdr => "freepbx_cdr",
        }
    }
}

impl fmt::Display for CallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twilio" => Ok(CallSource::Twilio),
            "freepbx_archive" => Ok(CallSource::FreepbxArchive),
            "freepbx_cdr" => Ok(CallSource::FreepbxCdr),
            other => Err(format!("unknown call source: {other}")),
        }
    }
}

/// Processing state of a call or voicemail row.
///
/// Transitions are monotonic (pending → processing → completed | failed)
/// except the operator-requested retry which resets a terminal row so the
/// engine can claim it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Processing => "processing",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CallStatus::Pending),
            "processing" => Ok(CallStatus::Processing),
            "completed" => Ok(CallStatus::Completed),
            "failed" => Ok(CallStatus::Failed),
            other => Err(format!("unknown call status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionStatus {
    NotNeeded,
    Processing,
    Completed,
    Failed,
}

impl RedactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionStatus::NotNeeded => "not_needed",
            RedactionStatus::Processing => "processing",
            RedactionStatus::Completed => "completed",
            RedactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for RedactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_needed" => Ok(RedactionStatus::NotNeeded),
            "processing" => Ok(RedactionStatus::Processing),
            "completed" => Ok(RedactionStatus::Completed),
            "failed" => Ok(RedactionStatus::Failed),
            other => Err(format!("unknown redaction status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    Internal,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Internal => "internal",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "internal" => Ok(Direction::Internal),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingDeletedReason {
    Retention,
    Manual,
}

impl RecordingDeletedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingDeletedReason::Retention => "retention",
            RecordingDeletedReason::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

/// Booking outcome extracted from the analysis report. Closed set; anything
/// the model says outside it is treated as absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Booking {
    Booked,
    NotBooked,
    Rescheduled,
    Canceled,
}

impl Booking {
    pub fn as_str(&self) -> &'static str {
        match self {
            Booking::Booked => "Booked",
            Booking::NotBooked => "Not Booked",
            Booking::Rescheduled => "Rescheduled",
            Booking::Canceled => "Canceled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Super,
    Manager,
    User,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Super => "super",
            TenantRole::Manager => "manager",
            TenantRole::User => "user",
        }
    }
}

impl FromStr for TenantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super" => Ok(TenantRole::Super),
            "manager" => Ok(TenantRole::Manager),
            "user" => Ok(TenantRole::User),
            other => Err(format!("unknown tenant role: {other}")),
        }
    }
}

/// A single transcribed word with its position in the audio, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A candidate call produced by a discovery source, before it exists in the
/// store. `(source, external_id)` is the idempotency key.
#[derive(Debug, Clone)]
pub struct DiscoveredCall {
    pub source: CallSource,
    pub external_id: String,
    pub direction: Option<Direction>,
    pub caller_number: Option<String>,
    pub caller_name: Option<String>,
    pub callee_number: Option<String>,
    pub callee_name: Option<String>,
    pub duration_seconds: Option<i64>,
    pub recording_ref: Option<String>,
    pub external_created_at: Option<DateTime<Utc>>,
    pub source_metadata: Option<serde_json::Value>,
}

/// The periodic jobs the scheduler owns, one sync-state row per
/// (tenant, kind). Also the `syncNow` routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
    Cdr,
    Archive,
    VoicemailDiscovery,
    VoicemailProcessing,
    CallProcessing,
    Retention,
    PbxStatus,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Cdr => "cdr",
            SyncKind::Archive => "archive",
            SyncKind::VoicemailDiscovery => "voicemail-discovery",
            SyncKind::VoicemailProcessing => "voicemail-processing",
            SyncKind::CallProcessing => "call-processing",
            SyncKind::Retention => "retention",
            SyncKind::PbxStatus => "pbx-status",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cdr" => Ok(SyncKind::Cdr),
            "archive" => Ok(SyncKind::Archive),
            "voicemail-discovery" => Ok(SyncKind::VoicemailDiscovery),
            "voicemail-processing" => Ok(SyncKind::VoicemailProcessing),
            "call-processing" => Ok(SyncKind::CallProcessing),
            "retention" => Ok(SyncKind::Retention),
            "pbx-status" => Ok(SyncKind::PbxStatus),
            other => Err(format!("unknown sync kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips_through_str() {
        for s in [CallSource::Twilio, CallSource::FreepbxArchive, CallSource::FreepbxCdr] {
            assert_eq!(s.as_str().parse::<CallSource>().unwrap(), s);
        }
        for s in [
            CallStatus::Pending,
            CallStatus::Processing,
            CallStatus::Completed,
            CallStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<CallStatus>().unwrap(), s);
        }
        for k in [
            SyncKind::Cdr,
            SyncKind::Archive,
            SyncKind::VoicemailDiscovery,
            SyncKind::VoicemailProcessing,
            SyncKind::CallProcessing,
            SyncKind::Retention,
            SyncKind::PbxStatus,
        ] {
            assert_eq!(k.as_str().parse::<SyncKind>().unwrap(), k);
        }
    }

    #[test]
    fn booking_display_matches_report_wording() {
        assert_eq!(Booking::NotBooked.as_str(), "Not Booked");
    }
}
