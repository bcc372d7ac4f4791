//! TwiML synthesis for the voice webhooks.
//!
//! Responses are derived entirely from the tenant's Twilio settings. Every
//! string that reaches the document is XML-escaped, and every handler path
//! (including errors) must end in a TwiML document so the carrier never
//! sees JSON.

use callscope_core::settings::{RecordMode, TwilioSettings};

/// Minimal TwiML document builder. Verbs render in insertion order inside
/// the mandatory `<Response>` root.
#[derive(Debug, Default)]
pub struct TwiML {
    body: String,
}

impl TwiML {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: &str) -> Self {
        self.body
            .push_str(&format!("<Say>{}</Say>", xml_escape(text)));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.body.push_str(&format!("<Pause length=\"{seconds}\"/>"));
        self
    }

    pub fn dial(
        mut self,
        number: &str,
        timeout_secs: u32,
        caller_id: &str,
        record: Option<&str>,
        recording_callback: Option<&str>,
    ) -> Self {
        let mut attrs = format!(
            " timeout=\"{timeout_secs}\" callerId=\"{}\"",
            xml_escape(caller_id)
        );
        if let Some(mode) = record {
            attrs.push_str(&format!(" record=\"{}\"", xml_escape(mode)));
        }
        if let Some(url) = recording_callback {
            attrs.push_str(&format!(
                " recordingStatusCallback=\"{}\"",
                xml_escape(url)
            ));
        }
        self.body
            .push_str(&format!("<Dial{attrs}>{}</Dial>", xml_escape(number)));
        self
    }

    pub fn record(
        mut self,
        max_length_secs: u32,
        finish_key: &str,
        play_beep: bool,
        recording_callback: Option<&str>,
    ) -> Self {
        let mut attrs = format!(
            " maxLength=\"{max_length_secs}\" finishOnKey=\"{}\" playBeep=\"{play_beep}\"",
            xml_escape(finish_key)
        );
        if let Some(url) = recording_callback {
            attrs.push_str(&format!(
                " recordingStatusCallback=\"{}\"",
                xml_escape(url)
            ));
        }
        self.body.push_str(&format!("<Record{attrs}/>"));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.body.push_str("<Hangup/>");
        self
    }

    pub fn render(self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>{}</Response>",
            self.body
        )
    }
}

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn record_mode_attr(mode: RecordMode) -> Option<&'static str> {
    match mode {
        RecordMode::Answer => Some("record-from-answer"),
        RecordMode::Ring => Some("record-from-ringing"),
        RecordMode::None => None,
    }
}

/// Response for the initial voice leg. Forwarding wins when configured;
/// otherwise greet and optionally record a message.
pub fn voice_response(
    settings: &TwilioSettings,
    call_sid: &str,
    recording_callback: Option<&str>,
) -> String {
    let forward_to = settings
        .forward_number
        .as_deref()
        .filter(|n| !n.is_empty());

    if settings.forwarding_enabled {
        if let Some(number) = forward_to {
            let record = settings
                .record_enabled
                .then(|| record_mode_attr(settings.record_mode))
                .flatten();
            return TwiML::new()
                .dial(
                    number,
                    settings.ring_seconds,
                    call_sid,
                    record,
                    record.and(recording_callback),
                )
                .render();
        }
    }

    voicemail_leg(settings, recording_callback)
}

/// After an unanswered or failed `<Dial>`, fall back to voicemail when
/// recording is on; otherwise just hang up.
pub fn dial_complete_response(
    settings: &TwilioSettings,
    dial_status: &str,
    recording_callback: Option<&str>,
) -> String {
    let answered = dial_status.eq_ignore_ascii_case("completed")
        || dial_status.eq_ignore_ascii_case("answered");
    if answered || !settings.record_enabled {
        return TwiML::new().hangup().render();
    }
    voicemail_leg(settings, recording_callback)
}

fn voicemail_leg(settings: &TwilioSettings, recording_callback: Option<&str>) -> String {
    let mut twiml = TwiML::new();
    if let Some(greeting) = settings.greeting.as_deref().filter(|g| !g.is_empty()) {
        twiml = twiml.say(greeting);
    }
    if settings.record_enabled {
        twiml = twiml.record(
            settings.max_record_seconds,
            &settings.finish_key,
            settings.beep,
            recording_callback,
        );
    }
    twiml.hangup().render()
}

/// Neutral error document. Webhook handlers answer with this on any
/// internal failure so the carrier gets playable TwiML instead of JSON.
pub fn error_response() -> String {
    TwiML::new()
        .say("We are sorry, an error occurred. Please try again later.")
        .hangup()
        .render()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TwilioSettings {
        TwilioSettings {
            forwarding_enabled: true,
            forward_number: Some("+15550009999".into()),
            record_enabled: true,
            ring_seconds: 25,
            greeting: Some("You have reached Acme & Sons".into()),
            beep: true,
            max_record_seconds: 120,
            finish_key: "#".into(),
            record_mode: RecordMode::Answer,
            ..TwilioSettings::default()
        }
    }

    #[test]
    fn forwarding_emits_dial_with_configured_limits() {
        let xml = voice_response(&settings(), "CA123", Some("https://cb.example/rec"));
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response>"));
        assert!(xml.contains("<Dial timeout=\"25\" callerId=\"CA123\""));
        assert!(xml.contains("record=\"record-from-answer\""));
        assert!(xml.contains("recordingStatusCallback=\"https://cb.example/rec\""));
        assert!(xml.contains(">+15550009999</Dial>"));
    }

    #[test]
    fn no_forward_number_falls_through_to_voicemail() {
        let mut s = settings();
        s.forward_number = None;
        let xml = voice_response(&s, "CA123", None);
        assert!(!xml.contains("<Dial"));
        assert!(xml.contains("<Say>You have reached Acme &amp; Sons</Say>"));
        assert!(xml.contains("<Record maxLength=\"120\" finishOnKey=\"#\" playBeep=\"true\""));
        assert!(xml.ends_with("<Hangup/></Response>"));
    }

    #[test]
    fn recording_disabled_greets_and_hangs_up() {
        let mut s = settings();
        s.forwarding_enabled = false;
        s.record_enabled = false;
        let xml = voice_response(&s, "CA123", None);
        assert!(xml.contains("<Say>"));
        assert!(!xml.contains("<Record"));
        assert!(xml.ends_with("<Hangup/></Response>"));
    }

    #[test]
    fn dial_complete_routes_on_status() {
        let s = settings();
        let answered = dial_complete_response(&s, "completed", None);
        assert!(!answered.contains("<Record"));
        assert!(answered.contains("<Hangup/>"));

        let missed = dial_complete_response(&s, "no-answer", None);
        assert!(missed.contains("<Record"));
    }

    #[test]
    fn everything_is_escaped() {
        let mut s = settings();
        s.greeting = Some("Press <1> & \"listen\"".into());
        s.forwarding_enabled = false;
        let xml = voice_response(&s, "CA123", None);
        assert!(xml.contains("Press &lt;1&gt; &amp; &quot;listen&quot;"));
        assert!(!xml.contains("<1>"));
    }

    #[test]
    fn error_response_is_twiml() {
        let xml = error_response();
        assert!(xml.contains("<Response>"));
        assert!(xml.contains("<Say>"));
        assert!(xml.ends_with("<Hangup/></Response>"));
    }
}
