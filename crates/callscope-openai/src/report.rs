//! Structured report extraction from the analysis completion.
//!
//! The model is asked for numbered sections `1.`–`6.`; this parser is
//! tolerant of the formatting drift chat models produce (bold headings,
//! `1)` instead of `1.`, label wording changes) because it keys on the
//! leading number alone.

use callscope_core::types::{Booking, Sentiment};

/// Structured fields for the call_metadata row. The raw analysis text is
/// stored alongside; this is the queryable projection.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReport {
    pub summary: Option<String>,
    pub action_items: Vec<String>,
    pub sentiment: Option<Sentiment>,
    pub urgent_topics: Option<String>,
    pub booking: Option<Booking>,
}

pub fn parse_report(analysis: &str) -> CallReport {
    let mut sections: [Vec<String>; 6] = Default::default();
    let mut current: Option<usize> = None;

    for line in analysis.lines() {
        if let Some((number, rest)) = heading(line) {
            current = Some(number - 1);
            if !rest.is_empty() {
                sections[number - 1].push(rest.to_string());
            }
            continue;
        }
        if let Some(idx) = current {
            sections[idx].push(line.trim().to_string());
        }
    }

    let joined = |idx: usize| -> Option<String> {
        let text = sections[idx]
            .iter()
            .filter(|l| !l.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
        (!text.is_empty()).then_some(text)
    };

    CallReport {
        summary: joined(0),
        action_items: parse_action_items(&sections[1]),
        sentiment: joined(2).as_deref().and_then(normalize_sentiment),
        urgent_topics: joined(3).or_else(|| Some("None".to_string())),
        booking: joined(4).as_deref().and_then(normalize_booking),
    }
}

/// Match `1. Heading: content`, `2) ...`, `**3.** ...`; returns the section
/// number and any content after the heading label.
fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim().trim_start_matches('*').trim_start_matches('#').trim();
    let mut chars = trimmed.char_indices();
    let (_, first) = chars.next()?;
    let number = first.to_digit(10)? as usize;
    if !(1..=6).contains(&number) {
        return None;
    }
    let rest = &trimmed[1..];
    let rest = rest.strip_prefix(['.', ')'])?;
    // Drop the label up to a colon ("Summary:"), keep inline content.
    let content = match rest.split_once(':') {
        Some((_, after)) => after,
        None => rest,
    };
    Some((number, content.trim().trim_matches('*').trim()))
}

fn parse_action_items(lines: &[String]) -> Vec<String> {
    let items: Vec<String> = lines
        .iter()
        .map(|l| {
            l.trim_start_matches(['-', '*', '•'])
                .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                .trim()
                .to_string()
        })
        .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("none"))
        .collect();
    items
}

fn normalize_sentiment(text: &str) -> Option<Sentiment> {
    let lower = text.to_lowercase();
    if lower.contains("positive") || lower.contains("satisfied") || lower.contains("happy") {
        Some(Sentiment::Positive)
    } else if lower.contains("negative")
        || lower.contains("frustrated")
        || lower.contains("angry")
        || lower.contains("upset")
    {
        Some(Sentiment::Negative)
    } else if lower.contains("neutral") || lower.contains("mixed") {
        Some(Sentiment::Neutral)
    } else {
        None
    }
}

/// Booking is a closed set; wording outside it maps to `None`. Order
/// matters: "not booked" must win over the bare "booked" substring.
fn normalize_booking(text: &str) -> Option<Booking> {
    let lower = text.to_lowercase();
    if lower.contains("reschedul") {
        Some(Booking::Rescheduled)
    } else if lower.contains("cancel") {
        Some(Booking::Canceled)
    } else if lower.contains("not booked") || lower.contains("no booking") {
        Some(Booking::NotBooked)
    } else if lower.contains("booked") {
        Some(Booking::Booked)
    } else {
        None
    }
}
