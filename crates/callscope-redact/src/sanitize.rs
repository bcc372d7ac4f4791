//! String-only sanitization, independent of word timestamps.
//!
//! Applied to transcripts and analysis text before they are persisted, and
//! it must hold its own: when the transcriber returns no word timestamps
//! this is the only redaction the call gets. Every sensitive substring is
//! replaced with the literal `[REDACTED]`, so running the sanitizer twice
//! is a no-op.

use std::sync::OnceLock;

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";

struct Patterns {
    card_run: Regex,
    ssn: Regex,
    email: Regex,
    keyword_digits: Regex,
    expiry: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // 12-19 digits, optionally separated by single spaces or dashes.
        card_run: Regex::new(r"\b\d(?:[ -]?\d){11,18}\b").unwrap(),
        ssn: Regex::new(r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b").unwrap(),
        email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap(),
        // "CVV 123", "pin is 4455", "security code: 0071"
        keyword_digits: Regex::new(
            r"(?i)\b(?:cvv|cvc|pin|passcode|password|security code|verification code)\b\D{0,12}\d{3,8}",
        )
        .unwrap(),
        // "expires 12/29", "expiry 03/2027", "valid thru 1/26"
        expiry: Regex::new(r"(?i)\b(?:expires?|expiry|expiration|valid\s+(?:thru|until))\b\D{0,10}\d{1,2}\s*/\s*\d{2,4}")
            .unwrap(),
    })
}

/// Replace sensitive substrings with `[REDACTED]`. Order matters: the long
/// card-number runs go first so the SSN pattern cannot chew a hole in the
/// middle of one.
pub fn sanitize_text(text: &str) -> String {
    let p = patterns();
    let mut out = p.card_run.replace_all(text, REDACTED).into_owned();
    out = p.ssn.replace_all(&out, REDACTED).into_owned();
    out = p.email.replace_all(&out, REDACTED).into_owned();
    out = p.keyword_digits.replace_all(&out, REDACTED).into_owned();
    out = p.expiry.replace_all(&out, REDACTED).into_owned();
    out
}
