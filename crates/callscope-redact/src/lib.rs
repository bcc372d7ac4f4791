//! PCI/PII redaction: timestamped span detection over word-level
//! transcripts, text sanitization, and audio muting.
//!
//! The pipeline drives the three pieces: `detect_spans` + `sanitize_text`
//! are pure, `mute_audio` shells out to ffmpeg, and the remote replace is
//! the caller's concern (it owns the RemoteFS handle). Sanitization always
//! runs, even when the transcriber returned no word timestamps; in that
//! case audio is left alone and the call is still marked redacted on any
//! text change.

mod audio;
mod detect;
mod sanitize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use audio::{mute_audio, MuteOutcome};
pub use detect::{detect_spans, DEFAULT_PAD_SECS, DOB_PAD_SECS};
pub use sanitize::sanitize_text;

/// Why a span was muted. Serialized into `redacted_segments`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanReason {
    CardNumber,
    Cvv,
    Expiry,
    Dob,
    CardNumberSequence,
    Ssn,
    Email,
    PasswordOrPin,
    Address,
}

/// A half-open `[start, end)` interval in seconds within the audio,
/// carrying the rule that produced it and the word indices it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub start: f64,
    pub end: f64,
    pub reason: SpanReason,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub word_indices: Vec<usize>,
}

#[derive(Debug, Error)]
pub enum RedactError {
    #[error("ffmpeg not found on PATH")]
    FfmpegMissing,

    #[error("ffmpeg failed ({status}): {stderr}")]
    FfmpegFailed { status: i32, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RedactError> for callscope_core::CoreError {
    fn from(e: RedactError) -> Self {
        callscope_core::CoreError::Internal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RedactError>;

/// Sanitized text plus the spans to mute, computed in one pass so the
/// pipeline has a single decision point.
#[derive(Debug, Clone)]
pub struct RedactionPlan {
    pub spans: Vec<Span>,
    pub sanitized_transcript: String,
    /// True when either spans were found or sanitization changed the text.
    pub any_redaction: bool,
}

pub fn plan(transcript: &str, words: &[callscope_core::types::Word]) -> RedactionPlan {
    let spans = detect_spans(words, DEFAULT_PAD_SECS);
    let sanitized = sanitize_text(transcript);
    let any_redaction = !spans.is_empty() || sanitized != transcript;
    RedactionPlan {
        spans,
        sanitized_transcript: sanitized,
        any_redaction,
    }
}
