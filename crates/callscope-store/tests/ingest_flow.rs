//! End-to-end flows over the store with real source normalization and
//! redaction, minus the network: CDR legs come in as fixture rows, audio
//! and LLM stages are represented by their outputs.

use chrono::NaiveDate;
use chrono_tz::Tz;

use callscope_core::types::{
    CallSource, CallStatus, Direction, RecordingDeletedReason, RedactionStatus, Word,
};
use callscope_freepbx::cdr::{normalize_leg, select_best_legs, CdrLeg};
use callscope_redact::{detect_spans, sanitize_text, DEFAULT_PAD_SECS};
use callscope_remotefs::{day_prefix_of, resolve_path};
use callscope_secrets::SecretStore;
use callscope_store::{CallCommit, CallFilter, CallStore, RedactionUpdate};

const KEY: &str = "6f1d0e7b3a9c5d2e8f4a6b1c7d3e9f0a2b4c6d8e0f1a3b5c7d9e1f2a4b6c8d0e";
const BASE: &str = "/var/spool/asterisk/monitor";

fn store_with_tenant() -> (CallStore, String) {
    let store = CallStore::open_in_memory(
        SecretStore::from_hex_key(KEY).unwrap(),
        Some("super@example.com".into()),
    )
    .unwrap();
    let tenant = store
        .create_tenant("ops@example.com", "America/New_York")
        .unwrap();
    (store, tenant.id)
}

fn cdr_leg(uniqueid: &str, sequence: i64, disposition: &str, recording: &str) -> CdrLeg {
    CdrLeg {
        calldate: NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
        src: "+17175551212".into(),
        dst: "200".into(),
        cnum: "+17175551212".into(),
        channel: "SIP/trunk-pri-00000a1".into(),
        dstchannel: "SIP/200-00000a2".into(),
        disposition: disposition.into(),
        duration: 45,
        billsec: 35,
        uniqueid: uniqueid.into(),
        linkedid: uniqueid.into(),
        recordingfile: recording.into(),
        sequence,
    }
}

/// Scenario: a CDR row is ingested, processed, and redacted; the resulting
/// row satisfies every completed-call invariant.
#[test]
fn cdr_ingest_with_redaction() {
    let (store, tenant) = store_with_tenant();
    let tz: Tz = "America/New_York".parse().unwrap();

    let leg = cdr_leg(
        "U1",
        1,
        "ANSWERED",
        "external-200-+17175551212-20250115-100000-abc.wav",
    );
    let call = normalize_leg(&leg, &tz);
    assert_eq!(call.direction, Some(Direction::In));
    assert!(store.upsert_discovered(&tenant, &call).unwrap());

    let claimed = store.claim_next_pending_call().unwrap().unwrap();
    assert_eq!(claimed.external_id, "U1");
    assert_eq!(claimed.duration_seconds, Some(35));

    // Transcription output for the sensitive utterance.
    let transcript = "my card number is 4111 1111 1111 1111, expires 12/29, CVV 123";
    let words: Vec<Word> = transcript
        .split_whitespace()
        .enumerate()
        .map(|(i, w)| Word {
            word: w.to_string(),
            start: i as f64 * 2.5,
            end: i as f64 * 2.5 + 1.0,
        })
        .collect();

    let spans = detect_spans(&words, DEFAULT_PAD_SECS);
    assert!(spans.len() >= 2, "card + expiry + cvv spans expected: {spans:?}");
    for span in &spans {
        assert!(span.end > span.start && span.start >= 0.0);
    }

    let sanitized = sanitize_text(transcript);
    assert!(sanitized.contains("[REDACTED]"));
    assert!(!sanitized.contains("4111 1111 1111 1111"));

    store.bump_whisper_requests(&claimed.id).unwrap();
    store
        .set_call_redaction(
            &claimed.id,
            &RedactionUpdate {
                status: RedactionStatus::Completed,
                redacted: true,
                segments: serde_json::to_value(&spans).ok(),
            },
        )
        .unwrap();
    store
        .complete_call(
            &claimed.id,
            &CallCommit {
                transcript: sanitized.clone(),
                analysis: "1. Summary: payment call\n3. Sentiment: neutral".into(),
                duration_seconds: Some(35),
                gpt_model: Some("gpt-4o-mini".into()),
                gpt_input_tokens: Some(400),
                gpt_output_tokens: Some(120),
                gpt_total_tokens: Some(520),
            },
        )
        .unwrap();

    let done = store.get_call(&claimed.id).unwrap().unwrap();
    assert_eq!(done.status, CallStatus::Completed);
    assert!(done.transcript.is_some() && done.analysis.is_some());
    assert!(done.processed_at.unwrap() >= done.created_at);
    assert_eq!(done.redaction_status, RedactionStatus::Completed);
    assert!(done.redacted);
    assert!(done.whisper_requests >= 1);

    // Segments persisted as a well-formed list with end > start >= 0.
    let segments = done.redacted_segments.unwrap();
    let list = segments.as_array().unwrap();
    assert!(list.len() >= 2);
    for seg in list {
        let start = seg["start"].as_f64().unwrap();
        let end = seg["end"].as_f64().unwrap();
        assert!(end > start && start >= 0.0);
    }
}

/// Scenario: two discovery ticks over the same PBX snapshot of three legs
/// sharing one uniqueid insert exactly one row.
#[test]
fn duplicate_discovery_is_idempotent() {
    let (store, tenant) = store_with_tenant();
    let tz: Tz = "UTC".parse().unwrap();

    let snapshot = || {
        vec![
            cdr_leg("U2", 1, "NO ANSWER", ""),
            cdr_leg(
                "U2",
                2,
                "ANSWERED",
                "external-200-+17175551212-20250115-100000-u2.wav",
            ),
            cdr_leg("U2", 3, "BUSY", ""),
        ]
    };

    let mut inserted_total = 0;
    for _tick in 0..2 {
        let best = select_best_legs(snapshot());
        assert_eq!(best.len(), 1);
        for leg in best {
            let call = normalize_leg(&leg, &tz);
            if store.upsert_discovered(&tenant, &call).unwrap() {
                inserted_total += 1;
            }
        }
    }
    assert_eq!(inserted_total, 1);

    let page = store.list_calls(&CallFilter::default()).unwrap();
    assert_eq!(page.total, 1);
    // The answered, recorded leg won.
    assert!(page.items[0].recording_ref.is_some());
    assert_eq!(page.items[0].source, CallSource::FreepbxCdr);
}

/// Scenario: retention marks rows whose recordings resolve under deleted
/// days; transcripts stay.
#[test]
fn retention_marks_only_old_recordings() {
    let (store, tenant) = store_with_tenant();
    let tz: Tz = "UTC".parse().unwrap();

    // Ten days of recordings, 2025-02-01 through 2025-02-10.
    for day in 1..=10 {
        let mut leg = cdr_leg(
            &format!("R{day}"),
            1,
            "ANSWERED",
            &format!("external-200-+1717-202502{day:02}-100000-r{day}.wav"),
        );
        leg.calldate = NaiveDate::from_ymd_opt(2025, 2, day)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        store
            .upsert_discovered(&tenant, &normalize_leg(&leg, &tz))
            .unwrap();
    }

    // retentionDays=7 on 2025-02-10: keep 02-04 onward.
    let keep_from = NaiveDate::from_ymd_opt(2025, 2, 4).unwrap();
    let mut stale = Vec::new();
    for (id, recording_ref) in store.calls_with_recordings(&tenant).unwrap() {
        let path = resolve_path(&recording_ref, BASE);
        let day = day_prefix_of(&path, BASE)
            .and_then(|p| NaiveDate::parse_from_str(&p, "%Y/%m/%d").ok())
            .unwrap();
        if day < keep_from {
            stale.push(id);
        }
    }
    assert_eq!(stale.len(), 3);

    let marked = store
        .mark_recordings_deleted(&stale, RecordingDeletedReason::Retention)
        .unwrap();
    assert_eq!(marked, 3);

    // Idempotent: nothing left to mark.
    assert_eq!(
        store
            .mark_recordings_deleted(&stale, RecordingDeletedReason::Retention)
            .unwrap(),
        0
    );

    let page = store.list_calls(&CallFilter::default()).unwrap();
    let deleted: Vec<_> = page
        .items
        .iter()
        .filter(|c| c.recording_deleted_at.is_some())
        .collect();
    assert_eq!(deleted.len(), 3);
    for call in deleted {
        assert_eq!(
            call.recording_deleted_reason,
            Some(RecordingDeletedReason::Retention)
        );
    }
}

/// Scenario: a missing platform LLM key fails the call with a config error
/// and leaves no partial transcript behind.
#[test]
fn missing_llm_key_fails_cleanly() {
    let (store, tenant) = store_with_tenant();
    let tz: Tz = "UTC".parse().unwrap();
    let leg = cdr_leg(
        "U4",
        1,
        "ANSWERED",
        "external-200-+1717-20250115-100000-u4.wav",
    );
    store
        .upsert_discovered(&tenant, &normalize_leg(&leg, &tz))
        .unwrap();

    // No super tenant exists, so there is no platform key.
    let effective = store.effective_openai(&tenant).unwrap();
    assert!(effective.api_key.is_none());

    let claimed = store.claim_next_pending_call().unwrap().unwrap();
    store
        .fail_call(
            &claimed.id,
            "ConfigError: openai api key is not configured",
        )
        .unwrap();

    let failed = store.get_call(&claimed.id).unwrap().unwrap();
    assert_eq!(failed.status, CallStatus::Failed);
    assert!(failed.last_error.unwrap().contains("ConfigError"));
    assert!(failed.transcript.is_none());
    // Caller metadata still shows.
    assert_eq!(failed.caller_number.as_deref(), Some("+17175551212"));
}

/// Scenario: a failed atomic replace marks redaction failed while the
/// sanitized text is still committed and the call completes.
#[test]
fn failed_audio_redaction_does_not_block_completion() {
    let (store, tenant) = store_with_tenant();
    let tz: Tz = "UTC".parse().unwrap();
    let leg = cdr_leg(
        "U6",
        1,
        "ANSWERED",
        "external-200-+1717-20250115-100000-u6.wav",
    );
    store
        .upsert_discovered(&tenant, &normalize_leg(&leg, &tz))
        .unwrap();
    let claimed = store.claim_next_pending_call().unwrap().unwrap();

    let sanitized = sanitize_text("ssn is 123-45-6789 thanks");
    store
        .set_call_redaction(
            &claimed.id,
            &RedactionUpdate {
                status: RedactionStatus::Failed,
                redacted: false,
                segments: serde_json::json!([{ "start": 1.0, "end": 3.0, "reason": "ssn" }]).into(),
            },
        )
        .unwrap();
    store
        .complete_call(
            &claimed.id,
            &CallCommit {
                transcript: sanitized,
                analysis: "1. Summary: identity call".into(),
                duration_seconds: Some(35),
                gpt_model: None,
                gpt_input_tokens: None,
                gpt_output_tokens: None,
                gpt_total_tokens: None,
            },
        )
        .unwrap();

    let done = store.get_call(&claimed.id).unwrap().unwrap();
    assert_eq!(done.status, CallStatus::Completed);
    assert_eq!(done.redaction_status, RedactionStatus::Failed);
    assert!(!done.transcript.unwrap().contains("123-45-6789"));
}
