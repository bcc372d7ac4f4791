//! CDR discovery: query the PBX call-detail-record database for new dialed
//! legs and pick the best leg per call.
//!
//! The CDR table stores `calldate` as naive local time in the PBX's (and
//! tenant's) timezone, so the UTC watermark is shifted into that zone
//! before the comparison. Ring groups produce several legs sharing one
//! `uniqueid`; exactly one row per id is emitted, scored by answer state,
//! recording presence, and capped talk time.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool, Row};
use serde_json::json;
use tracing::{debug, instrument};

use callscope_core::settings::{FreePbxFilters, FreePbxSettings};
use callscope_core::types::{CallSource, Direction, DiscoveredCall};

use crate::error::{FreePbxError, Result};

const DATE_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// One leg from the CDR table.
#[derive(Debug, Clone)]
pub struct CdrLeg {
    pub calldate: NaiveDateTime,
    pub src: String,
    pub dst: String,
    pub cnum: String,
    pub channel: String,
    pub dstchannel: String,
    pub disposition: String,
    pub duration: i64,
    pub billsec: i64,
    pub uniqueid: String,
    pub linkedid: String,
    pub recordingfile: String,
    pub sequence: i64,
}

pub struct CdrClient {
    settings: FreePbxSettings,
    tz: Tz,
}

impl CdrClient {
    pub fn new(settings: FreePbxSettings, tz: Tz) -> Result<Self> {
        if settings.cdr_host.as_deref().unwrap_or("").is_empty() {
            return Err(FreePbxError::Settings("cdrHost is not set".into()));
        }
        if settings.cdr_user.as_deref().unwrap_or("").is_empty() {
            return Err(FreePbxError::Settings("cdrUser is not set".into()));
        }
        Ok(Self { settings, tz })
    }

    /// Fetch dialed legs newer than the watermark, newest first, capped at
    /// `limit`. The pool lives for exactly one fetch.
    #[instrument(skip(self), fields(limit))]
    pub async fn fetch_legs(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CdrLeg>> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(self.settings.cdr_host.clone().unwrap_or_default())
            .tcp_port(self.settings.cdr_port)
            .user(self.settings.cdr_user.clone())
            .pass(self.settings.cdr_password.clone())
            .db_name(Some(self.settings.cdr_database.clone()));
        let pool = Pool::new(opts);

        let result = self.fetch_with_pool(&pool, since, limit).await;
        // The pool must not outlive the tick regardless of the outcome.
        let _ = pool.disconnect().await;
        result
    }

    async fn fetch_with_pool(
        &self,
        pool: &Pool,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CdrLeg>> {
        let mut conn = pool.get_conn().await?;

        let base = "SELECT DATE_FORMAT(calldate, '%Y-%m-%d %H:%i:%s') AS calldate,
                    src, dst, cnum, channel, dstchannel, disposition,
                    duration, billsec, uniqueid, linkedid, recordingfile, sequence
             FROM cdr
             WHERE dstchannel <> '' AND lastapp = 'Dial'";

        let rows: Vec<Row> = match since {
            Some(watermark) => {
                // CDR stores naive local time; shift the UTC watermark into
                // the tenant zone before comparing.
                let local = watermark.with_timezone(&self.tz).naive_local();
                let query = format!(
                    "{base} AND calldate > :since ORDER BY calldate DESC LIMIT :limit"
                );
                conn.exec(
                    query,
                    mysql_async::params! {
                        "since" => local.format(DATE_FMT).to_string(),
                        "limit" => limit as u64,
                    },
                )
                .await?
            }
            None => {
                let query = format!("{base} ORDER BY calldate DESC LIMIT :limit");
                conn.exec(query, mysql_async::params! { "limit" => limit as u64 })
                    .await?
            }
        };

        drop(conn);

        let legs: Vec<CdrLeg> = rows.into_iter().filter_map(row_to_leg).collect();
        debug!(fetched = legs.len(), "cdr legs fetched");
        Ok(legs)
    }

    /// Credential probe for the settings screen: opens a connection and
    /// runs `SELECT 1`.
    pub async fn test_connection(&self) -> Result<bool> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(self.settings.cdr_host.clone().unwrap_or_default())
            .tcp_port(self.settings.cdr_port)
            .user(self.settings.cdr_user.clone())
            .pass(self.settings.cdr_password.clone())
            .db_name(Some(self.settings.cdr_database.clone()));
        let pool = Pool::new(opts);
        let probe = async {
            let mut conn = pool.get_conn().await?;
            let one: Option<i64> = conn.query_first("SELECT 1").await?;
            Ok::<_, FreePbxError>(one == Some(1))
        }
        .await;
        let _ = pool.disconnect().await;
        probe
    }

    /// Best leg per uniqueid, normalized and filtered, oldest first.
    pub fn discover(&self, legs: Vec<CdrLeg>) -> Vec<DiscoveredCall> {
        let mut best = select_best_legs(legs);
        best.sort_by(|a, b| a.calldate.cmp(&b.calldate));
        best.into_iter()
            .filter_map(|leg| {
                let call = normalize_leg(&leg, &self.tz);
                passes_filters(&call, &leg, &self.settings.filters).then_some(call)
            })
            .collect()
    }
}

fn row_to_leg(row: Row) -> Option<CdrLeg> {
    let calldate: String = row.get("calldate")?;
    let calldate = NaiveDateTime::parse_from_str(&calldate, DATE_FMT).ok()?;
    Some(CdrLeg {
        calldate,
        src: row.get("src").unwrap_or_default(),
        dst: row.get("dst").unwrap_or_default(),
        cnum: row.get("cnum").unwrap_or_default(),
        channel: row.get("channel").unwrap_or_default(),
        dstchannel: row.get("dstchannel").unwrap_or_default(),
        disposition: row.get("disposition").unwrap_or_default(),
        duration: row.get("duration").unwrap_or_default(),
        billsec: row.get("billsec").unwrap_or_default(),
        uniqueid: row.get("uniqueid")?,
        linkedid: row.get("linkedid").unwrap_or_default(),
        recordingfile: row.get("recordingfile").unwrap_or_default(),
        sequence: row.get("sequence").unwrap_or_default(),
    })
}

/// Leg preference: answered beats everything, then having a recording, then
/// talk time capped at a minute so marathon calls don't dominate. Ties go to
/// the lower sequence, then the earlier calldate.
fn leg_score(leg: &CdrLeg) -> i64 {
    let mut score = 0;
    if leg.disposition.eq_ignore_ascii_case("ANSWERED") {
        score += 1000;
    }
    if !leg.recordingfile.is_empty() {
        score += 100;
    }
    score + leg.billsec.min(60)
}

pub fn select_best_legs(legs: Vec<CdrLeg>) -> Vec<CdrLeg> {
    let mut by_id: HashMap<String, CdrLeg> = HashMap::new();
    for leg in legs {
        match by_id.get(&leg.uniqueid) {
            Some(current) if !beats(&leg, current) => {}
            _ => {
                by_id.insert(leg.uniqueid.clone(), leg);
            }
        }
    }
    by_id.into_values().collect()
}

fn beats(challenger: &CdrLeg, incumbent: &CdrLeg) -> bool {
    let (a, b) = (leg_score(challenger), leg_score(incumbent));
    if a != b {
        return a > b;
    }
    if challenger.sequence != incumbent.sequence {
        return challenger.sequence < incumbent.sequence;
    }
    challenger.calldate < incumbent.calldate
}

pub fn normalize_leg(leg: &CdrLeg, tz: &Tz) -> DiscoveredCall {
    let caller = if leg.cnum.is_empty() {
        leg.src.clone()
    } else {
        leg.cnum.clone()
    };
    let external_created_at = tz
        .from_local_datetime(&leg.calldate)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc));

    DiscoveredCall {
        source: CallSource::FreepbxCdr,
        external_id: leg.uniqueid.clone(),
        direction: infer_direction(&leg.channel, &leg.recordingfile),
        caller_number: (!caller.is_empty()).then_some(caller),
        caller_name: None,
        callee_number: (!leg.dst.is_empty()).then_some(leg.dst.clone()),
        callee_name: None,
        duration_seconds: Some(leg.billsec),
        recording_ref: (!leg.recordingfile.is_empty()).then(|| leg.recordingfile.clone()),
        external_created_at,
        source_metadata: Some(json!({
            "calldate": leg.calldate.format(DATE_FMT).to_string(),
            "src": leg.src,
            "dst": leg.dst,
            "cnum": leg.cnum,
            "channel": leg.channel,
            "dstchannel": leg.dstchannel,
            "disposition": leg.disposition,
            "duration": leg.duration,
            "billsec": leg.billsec,
            "uniqueid": leg.uniqueid,
            "linkedid": leg.linkedid,
            "recordingfile": leg.recordingfile,
            "sequence": leg.sequence,
        })),
    }
}

/// Direction from the recording filename prefix when present, otherwise
/// from the originating channel's peer: a non-numeric peer is a trunk, so
/// the call came in from outside.
pub fn infer_direction(channel: &str, recordingfile: &str) -> Option<Direction> {
    let name = recordingfile.rsplit('/').next().unwrap_or(recordingfile);
    if name.starts_with("external-") {
        return Some(Direction::In);
    }
    if name.starts_with("out-") {
        return Some(Direction::Out);
    }
    if name.starts_with("internal-") {
        return Some(Direction::Internal);
    }
    let peer = channel
        .split('/')
        .nth(1)
        .and_then(|s| s.split('-').next())
        .unwrap_or("");
    if peer.is_empty() {
        None
    } else if peer.bytes().all(|b| b.is_ascii_digit()) {
        None
    } else {
        Some(Direction::In)
    }
}

fn passes_filters(call: &DiscoveredCall, leg: &CdrLeg, filters: &FreePbxFilters) -> bool {
    match call.direction {
        Some(Direction::In) => {
            filters.include_inbound && !filters.excluded_inbound_ext.contains(&leg.dst)
        }
        Some(Direction::Out) => {
            let ext = if leg.cnum.is_empty() { &leg.src } else { &leg.cnum };
            filters.include_outbound && !filters.excluded_outbound_ext.contains(ext)
        }
        Some(Direction::Internal) => {
            filters.include_internal
                && !filters.excluded_internal_ext.contains(&leg.src)
                && !filters.excluded_internal_ext.contains(&leg.dst)
        }
        // Unknown direction is kept; the operator can filter later.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn leg(uniqueid: &str, sequence: i64, disposition: &str, recording: &str, billsec: i64) -> CdrLeg {
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
            duration: billsec + 10,
            billsec,
            uniqueid: uniqueid.into(),
            linkedid: uniqueid.into(),
            recordingfile: recording.into(),
            sequence,
        }
    }

    #[test]
    fn answered_recorded_leg_wins_ring_group() {
        let legs = vec![
            leg("U2", 1, "NO ANSWER", "", 0),
            leg("U2", 2, "ANSWERED", "external-200-+17175551212-20250115-100000-U2.wav", 35),
            leg("U2", 3, "NO ANSWER", "", 0),
        ];
        let best = select_best_legs(legs);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].sequence, 2);
        assert!(!best[0].recordingfile.is_empty());
    }

    #[test]
    fn ties_break_on_sequence_then_calldate() {
        let mut early = leg("U3", 5, "ANSWERED", "", 30);
        early.calldate = early.calldate - chrono::Duration::seconds(30);
        let legs = vec![leg("U3", 7, "ANSWERED", "", 30), early.clone(), leg("U3", 5, "ANSWERED", "", 30)];
        let best = select_best_legs(legs);
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].sequence, 5);
        assert_eq!(best[0].calldate, early.calldate);
    }

    #[test]
    fn billsec_is_capped_in_score() {
        // A 2-hour unanswered leg must not outrank an answered one.
        let legs = vec![
            leg("U4", 1, "NO ANSWER", "", 7200),
            leg("U4", 2, "ANSWERED", "", 5),
        ];
        let best = select_best_legs(legs);
        assert_eq!(best[0].sequence, 2);
    }

    #[test]
    fn normalization_maps_fields_and_timezone() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let call = normalize_leg(
            &leg("U1", 1, "ANSWERED", "external-200-+17175551212-20250115-100000-abc.wav", 35),
            &tz,
        );
        assert_eq!(call.external_id, "U1");
        assert_eq!(call.direction, Some(Direction::In));
        assert_eq!(call.caller_number.as_deref(), Some("+17175551212"));
        assert_eq!(call.callee_number.as_deref(), Some("200"));
        assert_eq!(call.duration_seconds, Some(35));
        // 10:00 EST == 15:00 UTC.
        assert_eq!(
            call.external_created_at.unwrap().format("%H:%M").to_string(),
            "15:00"
        );
        let meta = call.source_metadata.unwrap();
        assert_eq!(meta["disposition"], "ANSWERED");
        assert_eq!(meta["billsec"], 35);
    }

    #[test]
    fn direction_inference() {
        assert_eq!(
            infer_direction("SIP/200-x", "out-7175551212-200-20250115-100000-a.wav"),
            Some(Direction::Out)
        );
        assert_eq!(
            infer_direction("SIP/201-x", "internal-201-202-20250115-100000-a.wav"),
            Some(Direction::Internal)
        );
        assert_eq!(
            infer_direction("SIP/trunk-pri-x", ""),
            Some(Direction::In)
        );
        assert_eq!(infer_direction("SIP/200-x", ""), None);
    }

    #[test]
    fn filters_exclude_directions_and_extensions() {
        let mut filters = FreePbxFilters::default();
        let tz: Tz = "UTC".parse().unwrap();
        let the_leg = leg("U1", 1, "ANSWERED", "external-200-+1-20250115-100000-a.wav", 10);
        let call = normalize_leg(&the_leg, &tz);

        assert!(passes_filters(&call, &the_leg, &filters));
        filters.excluded_inbound_ext.push("200".into());
        assert!(!passes_filters(&call, &the_leg, &filters));
        filters.excluded_inbound_ext.clear();
        filters.include_inbound = false;
        assert!(!passes_filters(&call, &the_leg, &filters));
    }
}
