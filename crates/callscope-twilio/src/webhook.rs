//! Decoded webhook payloads. Twilio posts
//! `application/x-www-form-urlencoded` bodies with PascalCase keys; the
//! server keeps the raw pair list for signature validation and reads the
//! typed view from it.

use callscope_core::types::{CallSource, DiscoveredCall, Direction};
use chrono::Utc;
use serde_json::json;

/// Key/value view over a decoded form body.
#[derive(Debug, Clone, Default)]
pub struct WebhookParams(pub Vec<(String, String)>);

impl WebhookParams {
    /// Parse a URL-encoded body. Tolerates empty bodies and stray pairs.
    pub fn parse(body: &str) -> Self {
        let pairs = body
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                (url_decode(k), url_decode(v))
            })
            .collect();
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.get("CallSid")
    }

    pub fn from_number(&self) -> Option<&str> {
        self.get("From")
    }

    pub fn to_number(&self) -> Option<&str> {
        self.get("To")
    }

    pub fn dial_status(&self) -> &str {
        self.get("DialCallStatus").unwrap_or("completed")
    }

    /// Build the pending call for a `recording-status` event, or `None`
    /// when the payload lacks the recording fields.
    pub fn to_discovered_recording(&self) -> Option<DiscoveredCall> {
        let sid = self.get("RecordingSid")?;
        let url = self.get("RecordingUrl")?;
        let duration = self
            .get("RecordingDuration")
            .and_then(|d| d.parse::<i64>().ok());
        Some(DiscoveredCall {
            source: CallSource::Twilio,
            external_id: sid.to_string(),
            direction: Some(Direction::In),
            caller_number: self.from_number().map(str::to_string),
            caller_name: self.get("CallerName").map(str::to_string),
            callee_number: self.to_number().map(str::to_string),
            callee_name: None,
            duration_seconds: duration,
            recording_ref: Some(url.to_string()),
            external_created_at: Some(Utc::now()),
            source_metadata: Some(json!({
                "callSid": self.call_sid(),
                "recordingSid": sid,
                "recordingStatus": self.get("RecordingStatus"),
            })),
        })
    }
}

/// Percent-decoding for form bodies (`+` is a space). Malformed escapes
/// pass through literally.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_form_body_with_encoding() {
        let params = WebhookParams::parse(
            "CallSid=CA123&From=%2B15550001111&To=%2B15550002222&Caller+Name=Jane%20Doe",
        );
        assert_eq!(params.call_sid(), Some("CA123"));
        assert_eq!(params.from_number(), Some("+15550001111"));
        assert_eq!(params.get("Caller Name"), Some("Jane Doe"));
    }

    #[test]
    fn recording_event_becomes_pending_call() {
        let params = WebhookParams::parse(
            "CallSid=CA123&From=%2B15550001111&To=%2B15550002222\
             &RecordingSid=RE456&RecordingUrl=https%3A%2F%2Fapi.twilio.com%2Frec%2FRE456\
             &RecordingDuration=42&RecordingStatus=completed",
        );
        let call = params.to_discovered_recording().unwrap();
        assert_eq!(call.source, CallSource::Twilio);
        assert_eq!(call.external_id, "RE456");
        assert_eq!(
            call.recording_ref.as_deref(),
            Some("https://api.twilio.com/rec/RE456")
        );
        assert_eq!(call.duration_seconds, Some(42));
        assert_eq!(call.caller_number.as_deref(), Some("+15550001111"));
    }

    #[test]
    fn missing_recording_fields_yield_none() {
        let params = WebhookParams::parse("CallSid=CA123");
        assert!(params.to_discovered_recording().is_none());
    }

    #[test]
    fn empty_body_is_fine() {
        let params = WebhookParams::parse("");
        assert!(params.0.is_empty());
        assert_eq!(params.dial_status(), "completed");
    }
}
