//! Host CPU/memory/disk sampling aligned to wall-clock boundaries.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info};

use callscope_store::{CallStore, SystemSample};

pub struct MetricsSampler {
    store: Arc<CallStore>,
    sample_minutes: u64,
    retention_days: i64,
}

impl MetricsSampler {
    pub fn new(store: Arc<CallStore>, sample_minutes: u64, retention_days: i64) -> Self {
        Self {
            store,
            sample_minutes: sample_minutes.max(1),
            retention_days: retention_days.max(1),
        }
    }

    /// Sample at every wall-clock boundary (e.g. :00, :10, :20 for a
    /// 10-minute cadence) until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(every_minutes = self.sample_minutes, "metrics sampler started");
        loop {
            let wait = seconds_until_next_boundary(Utc::now(), self.sample_minutes);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("metrics sampler shutting down");
                        return;
                    }
                }
            }

            match collect_sample().await {
                Some(sample) => {
                    debug!(
                        cpu = sample.cpu_percent,
                        memory = sample.memory_percent,
                        disk = sample.disk_percent,
                        "system sample recorded"
                    );
                    if let Err(e) = self.store.insert_system_sample(&sample) {
                        error!(error = %e, "sample insert failed");
                    }
                }
                None => error!("system sample collection failed"),
            }

            let cutoff = Utc::now() - chrono::Duration::days(self.retention_days);
            if let Err(e) = self.store.prune_system_samples(cutoff) {
                error!(error = %e, "sample prune failed");
            }
        }
    }
}

/// Seconds until the next multiple of `minutes` past the hour, never zero.
pub fn seconds_until_next_boundary(now: DateTime<Utc>, minutes: u64) -> u64 {
    let minutes = minutes.max(1);
    let seconds_into_hour = (now.minute() as u64) * 60 + now.second() as u64;
    let period = minutes * 60;
    let elapsed_in_period = seconds_into_hour % period;
    let wait = period - elapsed_in_period;
    if wait == 0 {
        period
    } else {
        wait
    }
}

/// CPU needs two refreshes a beat apart for a meaningful usage figure, so
/// the whole collection runs on the blocking pool.
async fn collect_sample() -> Option<SystemSample> {
    tokio::task::spawn_blocking(|| {
        use sysinfo::{Disks, System};

        let mut sys = System::new();
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_usage() as f64;
        let memory_percent = if sys.total_memory() > 0 {
            sys.used_memory() as f64 / sys.total_memory() as f64 * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let used = d.total_space().saturating_sub(d.available_space());
                used as f64 / d.total_space() as f64 * 100.0
            })
            .fold(0.0_f64, f64::max);

        SystemSample {
            recorded_at: Utc::now(),
            cpu_percent,
            memory_percent,
            disk_percent,
        }
    })
    .await
    .ok()
}
