//! Timestamped span detection over word-level transcripts.
//!
//! Every rule works on normalized tokens (lowercased, punctuation stripped)
//! and produces index ranges; ranges become padded time spans at the end
//! and overlapping spans are merged. Word-timestamp drift in transcription
//! output is why spans are padded at all; DOB spans get a tighter pad so a
//! spoken birthday does not swallow the surrounding sentence.

use callscope_core::types::Word;

use crate::{Span, SpanReason};

/// Default timestamp padding on each side of a detected range.
pub const DEFAULT_PAD_SECS: f64 = 0.5;
/// Tighter padding for date-of-birth spans.
pub const DOB_PAD_SECS: f64 = 0.15;

const CARD_KEYWORDS: &[&str] = &[
    "credit", "card", "visa", "mastercard", "amex", "discover", "debit", "payment", "number",
];
const CVV_KEYWORDS: &[&str] = &["cvv", "cvc", "security", "verification", "code"];
const SSN_KEYWORDS: &[&str] = &["ssn"];
const PIN_KEYWORDS: &[&str] = &["password", "passcode", "pin", "pincode"];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "sept", "oct", "nov", "dec",
];
const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
    "tenth", "eleventh", "twelfth", "thirteenth", "fourteenth", "fifteenth", "sixteenth",
    "seventeenth", "eighteenth", "nineteenth", "twentieth", "thirtieth",
];
const STREET_SUFFIXES: &[&str] = &[
    "street", "st", "avenue", "ave", "road", "rd", "drive", "dr", "lane", "ln", "boulevard",
    "blvd", "court", "ct", "circle", "cir", "way", "place", "pl", "terrace", "ter", "highway",
    "hwy",
];
const SPOKEN_TLDS: &[&str] = &["com", "net", "org", "edu", "gov", "io", "co", "us", "biz"];

struct Token {
    norm: String,
    digits: usize,
    start: f64,
    end: f64,
}

/// An index range [first, last] plus the rule that found it.
struct Hit {
    first: usize,
    last: usize,
    reason: SpanReason,
}

/// Detect sensitive spans in a word-timestamped transcript. `pad` is the
/// default padding applied to each side; DOB spans are padded with at most
/// [`DOB_PAD_SECS`]. Overlapping spans are merged, earliest reason wins.
pub fn detect_spans(words: &[Word], pad: f64) -> Vec<Span> {
    if words.is_empty() {
        return Vec::new();
    }
    let tokens: Vec<Token> = words.iter().map(tokenize).collect();

    let mut hits = Vec::new();
    keyword_digit_rule(&tokens, CARD_KEYWORDS, 15, SpanReason::CardNumber, &mut hits);
    keyword_digit_rule(&tokens, CVV_KEYWORDS, 10, SpanReason::Cvv, &mut hits);
    expiry_rule(&tokens, &mut hits);
    dob_rule(&tokens, &mut hits);
    digit_run_rule(&tokens, &mut hits);
    ssn_rule(&tokens, &mut hits);
    email_rule(&tokens, words, &mut hits);
    pin_rule(&tokens, &mut hits);
    address_rule(&tokens, &mut hits);

    let mut spans: Vec<Span> = hits
        .into_iter()
        .map(|hit| {
            let hit_pad = if hit.reason == SpanReason::Dob {
                pad.min(DOB_PAD_SECS)
            } else {
                pad
            };
            Span {
                start: (tokens[hit.first].start - hit_pad).max(0.0),
                end: tokens[hit.last].end + hit_pad,
                reason: hit.reason,
                word_indices: (hit.first..=hit.last).collect(),
            }
        })
        .collect();

    merge_spans(&mut spans);
    spans
}

fn tokenize(word: &Word) -> Token {
    let norm: String = word
        .word
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let digits = word.word.chars().filter(|c| c.is_ascii_digit()).count();
    Token {
        norm,
        digits,
        start: word.start,
        end: word.end,
    }
}

/// Generic keyword rule: a keyword followed by a digit-bearing token within
/// the lookahead window produces a span from the keyword through the end of
/// that contiguous digit run. The run may continue past the window (a card
/// number read slowly), but it must start inside it.
fn keyword_digit_rule(
    tokens: &[Token],
    keywords: &[&str],
    window: usize,
    reason: SpanReason,
    hits: &mut Vec<Hit>,
) {
    for (i, token) in tokens.iter().enumerate() {
        if !keywords.contains(&token.norm.as_str()) {
            continue;
        }
        if let Some(last) = digit_run_after(tokens, i, window) {
            hits.push(Hit {
                first: i,
                last,
                reason,
            });
        }
    }
}

/// Index of the last token of the first contiguous digit run starting
/// within `window` tokens after `i`, if any.
fn digit_run_after(tokens: &[Token], i: usize, window: usize) -> Option<usize> {
    let limit = (i + window).min(tokens.len() - 1);
    let first = (i + 1..=limit).find(|&j| tokens[j].digits > 0)?;
    let mut last = first;
    while last + 1 < tokens.len() && tokens[last + 1].digits > 0 {
        last += 1;
    }
    Some(last)
}

/// `expir…`, `exp`, `valid…` + digits within 10 tokens.
fn expiry_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    for (i, token) in tokens.iter().enumerate() {
        let norm = token.norm.as_str();
        if !(norm.starts_with("expir") || norm == "exp" || norm.starts_with("valid")) {
            continue;
        }
        if let Some(last) = digit_run_after(tokens, i, 10) {
            hits.push(Hit {
                first: i,
                last,
                reason: SpanReason::Expiry,
            });
        }
    }
}

fn is_date_like(token: &Token) -> bool {
    token.digits > 0
        || MONTHS.contains(&token.norm.as_str())
        || ORDINALS.contains(&token.norm.as_str())
}

/// DOB keyword (including the spoken phrases) + date-like tokens within 12.
/// Only the date-like range itself is muted, with tighter padding.
fn dob_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    for i in 0..tokens.len() {
        let is_keyword = matches!(tokens[i].norm.as_str(), "dob" | "birthday")
            || phrase_at(tokens, i, &["date", "of", "birth"])
            || phrase_at(tokens, i, &["birth", "date"]);
        if !is_keyword {
            continue;
        }
        let limit = (i + 12).min(tokens.len() - 1);
        let date_like: Vec<usize> = (i + 1..=limit)
            .filter(|&j| is_date_like(&tokens[j]))
            .collect();
        if let (Some(&first), Some(&last)) = (date_like.first(), date_like.last()) {
            hits.push(Hit {
                first,
                last,
                reason: SpanReason::Dob,
            });
        }
    }
}

fn phrase_at(tokens: &[Token], i: usize, phrase: &[&str]) -> bool {
    tokens.len() >= i + phrase.len()
        && phrase
            .iter()
            .enumerate()
            .all(|(k, word)| tokens[i + k].norm == *word)
}

/// Keyword-free catch: a run of consecutive digit-bearing tokens carrying
/// 12–19 digits in total (a spoken card number) within at most 10 tokens.
fn digit_run_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].digits == 0 {
            i += 1;
            continue;
        }
        let mut j = i;
        let mut total = 0;
        while j < tokens.len() && tokens[j].digits > 0 && j - i < 10 {
            total += tokens[j].digits;
            j += 1;
        }
        if (12..=19).contains(&total) {
            hits.push(Hit {
                first: i,
                last: j - 1,
                reason: SpanReason::CardNumberSequence,
            });
        }
        i = j;
    }
}

/// A lone 9-digit token (`123-45-6789`, `123456789`) or an SSN keyword
/// followed by digits within 20 tokens.
fn ssn_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    for (i, token) in tokens.iter().enumerate() {
        if token.digits == 9 && token.norm.len() == 9 {
            hits.push(Hit {
                first: i,
                last: i,
                reason: SpanReason::Ssn,
            });
        }
    }
    for i in 0..tokens.len() {
        let is_keyword = SSN_KEYWORDS.contains(&tokens[i].norm.as_str())
            || phrase_at(tokens, i, &["social", "security"]);
        if !is_keyword {
            continue;
        }
        if let Some(last) = digit_run_after(tokens, i, 20) {
            hits.push(Hit {
                first: i,
                last,
                reason: SpanReason::Ssn,
            });
        }
    }
}

/// Literal `user@host` tokens, or the spoken `<name> at <host> dot <tld>`
/// form. Either way the span covers the phrase plus two tokens of slack.
fn email_rule(tokens: &[Token], words: &[Word], hits: &mut Vec<Hit>) {
    for (i, word) in words.iter().enumerate() {
        if looks_like_email(&word.word) {
            hits.push(Hit {
                first: i.saturating_sub(2),
                last: (i + 2).min(tokens.len() - 1),
                reason: SpanReason::Email,
            });
        }
    }
    for i in 1..tokens.len() {
        if tokens[i].norm != "at" {
            continue;
        }
        let limit = (i + 8).min(tokens.len().saturating_sub(1));
        for j in i + 1..limit {
            if tokens[j].norm == "dot"
                && j + 1 < tokens.len()
                && SPOKEN_TLDS.contains(&tokens[j + 1].norm.as_str())
            {
                hits.push(Hit {
                    first: i.saturating_sub(3),
                    last: (j + 3).min(tokens.len() - 1),
                    reason: SpanReason::Email,
                });
                break;
            }
        }
    }
}

fn looks_like_email(raw: &str) -> bool {
    let Some(at) = raw.find('@') else {
        return false;
    };
    let (local, host) = raw.split_at(at);
    let host = &host[1..];
    !local.is_empty()
        && host.contains('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && !host.ends_with('.')
}

/// `password` / `pin` keyword mutes the next 10 tokens regardless of content.
fn pin_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    for (i, token) in tokens.iter().enumerate() {
        if PIN_KEYWORDS.contains(&token.norm.as_str()) {
            hits.push(Hit {
                first: i,
                last: (i + 10).min(tokens.len() - 1),
                reason: SpanReason::PasswordOrPin,
            });
        }
    }
}

/// `address` keyword mutes the next 25 tokens; a house number followed by a
/// street suffix within 6 tokens mutes through the suffix plus 6.
fn address_rule(tokens: &[Token], hits: &mut Vec<Hit>) {
    for (i, token) in tokens.iter().enumerate() {
        if token.norm == "address" {
            hits.push(Hit {
                first: i,
                last: (i + 25).min(tokens.len() - 1),
                reason: SpanReason::Address,
            });
        }
    }
    for i in 0..tokens.len() {
        let t = &tokens[i];
        let is_house_number = t.digits > 0 && t.digits <= 5 && t.norm.len() == t.digits;
        if !is_house_number {
            continue;
        }
        let limit = (i + 6).min(tokens.len().saturating_sub(1));
        for j in i + 1..=limit {
            if STREET_SUFFIXES.contains(&tokens[j].norm.as_str()) {
                hits.push(Hit {
                    first: i,
                    last: (j + 6).min(tokens.len() - 1),
                    reason: SpanReason::Address,
                });
                break;
            }
        }
    }
}

/// Sort by start time and coalesce strictly overlapping spans. Spans that
/// merely touch at a boundary stay separate (intervals are half-open). The
/// earliest span's reason is kept; covered word indices are unioned.
fn merge_spans(spans: &mut Vec<Span>) {
    spans.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans.drain(..) {
        match merged.last_mut() {
            Some(last) if span.start < last.end => {
                last.end = last.end.max(span.end);
                for idx in span.word_indices {
                    if !last.word_indices.contains(&idx) {
                        last.word_indices.push(idx);
                    }
                }
                last.word_indices.sort_unstable();
            }
            _ => merged.push(span),
        }
    }
    *spans = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(text: &str) -> Vec<Word> {
        text.split_whitespace()
            .enumerate()
            .map(|(i, w)| Word {
                word: w.to_string(),
                start: i as f64 * 2.0,
                end: i as f64 * 2.0 + 1.0,
            })
            .collect()
    }

    #[test]
    fn card_cvv_expiry_utterance() {
        let w = words("my card number is 4111 1111 1111 1111, expires 12/29, CVV 123");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert!(spans.len() >= 2, "expected merged card+expiry+cvv spans, got {spans:?}");
        // The card span starts at (or before) the "card" keyword and runs
        // through the last digit group.
        let first = &spans[0];
        assert!(first.start <= 2.0 + DEFAULT_PAD_SECS);
        assert!(first.end >= 15.0);
        // Every span is well formed.
        for span in &spans {
            assert!(span.end > span.start && span.start >= 0.0);
        }
    }

    #[test]
    fn digit_run_without_keyword() {
        let w = words("okay it is 4111 1111 1111 1111 thanks");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::CardNumberSequence);
        // Covers tokens 3..=6.
        assert_eq!(spans[0].word_indices, vec![3, 4, 5, 6]);
    }

    #[test]
    fn short_and_long_digit_runs_are_ignored() {
        // 10 digits: a phone number, not a card.
        assert!(detect_spans(&words("call me on 717 555 1212 1 today"), 0.5).is_empty());
        // 20+ digits: a reference number.
        assert!(detect_spans(&words("ref 12345 67890 12345 67890 okay"), 0.5).is_empty());
    }

    #[test]
    fn formatted_ssn_token() {
        let w = words("it is 123-45-6789 yes");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Ssn);
        assert_eq!(spans[0].word_indices, vec![2]);
    }

    #[test]
    fn ssn_keyword_with_spoken_digits() {
        let w = words("my social security is 123 45 6789 okay");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Ssn);
        // keyword through the last digit token
        assert!(spans[0].word_indices.contains(&1));
        assert!(spans[0].word_indices.contains(&6));
    }

    #[test]
    fn dob_span_is_tight() {
        let w = words("my date of birth is March fifth 1990 thank you");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Dob);
        // Span covers March..1990 (tokens 5..=7), not the keyword.
        assert_eq!(spans[0].word_indices, vec![5, 6, 7]);
        // Tight padding: token 5 starts at 10.0.
        assert!((spans[0].start - (10.0 - DOB_PAD_SECS)).abs() < 1e-9);
    }

    #[test]
    fn literal_and_spoken_email() {
        let w = words("send it to jane.doe@example.com please");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Email);

        let w = words("it is jane doe at gmail dot com thanks a lot");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Email);
    }

    #[test]
    fn plain_at_is_not_an_email() {
        assert!(detect_spans(&words("we met at the park yesterday"), 0.5).is_empty());
    }

    #[test]
    fn password_mutes_next_ten_tokens() {
        let w = words("the password is apple banana seven nine then we talked about weather more");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::PasswordOrPin);
        assert_eq!(*spans[0].word_indices.first().unwrap(), 1);
        assert_eq!(*spans[0].word_indices.last().unwrap(), 11);
    }

    #[test]
    fn address_by_keyword_and_by_shape() {
        let w = words("my address is 123 Main Street in town");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Address);

        let w = words("I live at 4521 Maple Avenue near the school okay");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].reason, SpanReason::Address);
        assert!(spans[0].word_indices.contains(&3));
        assert!(spans[0].word_indices.contains(&5));
    }

    #[test]
    fn overlapping_spans_merge() {
        // "card ... number ... digits" triggers the card rule from two
        // keywords plus the digit-run rule; all overlap into one span.
        let w = words("credit card number 4111 1111 1111 1111 end");
        let spans = detect_spans(&w, DEFAULT_PAD_SECS);
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert!(span.word_indices.contains(&0));
        assert!(span.word_indices.contains(&6));
    }

    #[test]
    fn benign_text_produces_nothing() {
        let w = words("thanks for calling us today how can I help you with the appointment");
        assert!(detect_spans(&w, DEFAULT_PAD_SECS).is_empty());
    }

    #[test]
    fn empty_words_produce_nothing() {
        assert!(detect_spans(&[], DEFAULT_PAD_SECS).is_empty());
    }
}
