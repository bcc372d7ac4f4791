//! Host metrics samples with rolling retention.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::{fmt_ts, parse_ts, CallStore};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSample {
    pub recorded_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl CallStore {
    pub fn insert_system_sample(&self, sample: &SystemSample) -> Result<()> {
        let db = self.lock();
        db.execute(
            "INSERT INTO system_metrics_samples
             (recorded_at, cpu_percent, memory_percent, disk_percent)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                fmt_ts(sample.recorded_at),
                sample.cpu_percent,
                sample.memory_percent,
                sample.disk_percent,
            ],
        )?;
        Ok(())
    }

    /// Drop samples older than the cutoff; returns how many were removed.
    pub fn prune_system_samples(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let db = self.lock();
        let n = db.execute(
            "DELETE FROM system_metrics_samples WHERE recorded_at < ?1",
            params![fmt_ts(cutoff)],
        )?;
        Ok(n)
    }

    pub fn list_system_samples(&self, since: DateTime<Utc>) -> Result<Vec<SystemSample>> {
        let db = self.lock();
        let mut stmt = db.prepare(
            "SELECT recorded_at, cpu_percent, memory_percent, disk_percent
             FROM system_metrics_samples
             WHERE recorded_at >= ?1 ORDER BY recorded_at",
        )?;
        let rows = stmt.query_map(params![fmt_ts(since)], |row| {
            let recorded: String = row.get(0)?;
            Ok((recorded, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(recorded, cpu, memory, disk)| {
                Some(SystemSample {
                    recorded_at: parse_ts(&recorded)?,
                    cpu_percent: cpu,
                    memory_percent: memory,
                    disk_percent: disk,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::store;
    use chrono::Duration;

    #[test]
    fn retention_prunes_only_old_samples() {
        let s = store();
        let now = Utc::now();
        for days_ago in [40, 20, 1, 0] {
            s.insert_system_sample(&SystemSample {
                recorded_at: now - Duration::days(days_ago),
                cpu_percent: 12.5,
                memory_percent: 40.0,
                disk_percent: 71.0,
            })
            .unwrap();
        }

        let removed = s.prune_system_samples(now - Duration::days(30)).unwrap();
        assert_eq!(removed, 1);

        let samples = s.list_system_samples(now - Duration::days(90)).unwrap();
        assert_eq!(samples.len(), 3);
        // Ascending order.
        assert!(samples.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }
}
