use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use callscope_core::config::EngineConfig;
use callscope_core::types::SyncKind;
use callscope_pipeline::ProcessingEngine;
use callscope_store::{CallStore, SyncState, Tenant};

use crate::jobs;
use crate::retention::{retention_due, run_retention};

/// Cadence of the due-check pass over all tenants. Actual job cadence is
/// governed by each sync-state row's `next_run_at`.
const DISPATCH_TICK_SECS: u64 = 5;
const PBX_STATUS_INTERVAL_SECS: i64 = 600;

/// An operator-requested immediate run, sent from the HTTP surface.
#[derive(Debug, Clone)]
pub struct SyncCommand {
    pub tenant_id: String,
    pub kind: SyncKind,
}

/// Cheap cloneable handle for enqueueing [`SyncCommand`]s while the engine
/// loop runs.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SchedulerHandle {
    /// Enqueue a run and return immediately. `false` means the engine is
    /// gone (shutdown) or the queue is full.
    pub fn sync_now(&self, tenant_id: &str, kind: SyncKind) -> bool {
        self.tx
            .try_send(SyncCommand {
                tenant_id: tenant_id.to_string(),
                kind,
            })
            .is_ok()
    }
}

pub struct SchedulerEngine {
    store: Arc<CallStore>,
    pipeline: Arc<ProcessingEngine>,
    config: EngineConfig,
    /// In-process tick guard, one entry per running job. The sync-state row
    /// is the cross-process guard; this avoids even claiming when the task
    /// is still draining locally.
    inflight: Arc<DashMap<String, ()>>,
    commands: mpsc::Receiver<SyncCommand>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<CallStore>,
        pipeline: Arc<ProcessingEngine>,
        config: EngineConfig,
    ) -> (Self, SchedulerHandle) {
        let (tx, commands) = mpsc::channel(64);
        (
            Self {
                store,
                pipeline,
                config,
                inflight: Arc::new(DashMap::new()),
                commands,
            },
            SchedulerHandle { tx },
        )
    }

    /// Main loop: dispatch due jobs until `shutdown` flips, then drain
    /// in-flight tasks so every claimed row reaches a persisted state.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut dispatch = tokio::time::interval(StdDuration::from_secs(DISPATCH_TICK_SECS));
        let mut call_proc =
            tokio::time::interval(StdDuration::from_secs(self.config.processing_tick_seconds.max(1)));
        let mut vm_proc = tokio::time::interval(StdDuration::from_secs(
            self.config.voicemail_processing_tick_seconds.max(1),
        ));
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = dispatch.tick() => {
                    // Operator syncNow commands ride the dispatch beat.
                    while let Ok(command) = self.commands.try_recv() {
                        self.handle_command(command, &mut tasks);
                    }
                    self.dispatch_discovery(&mut tasks);
                }
                _ = call_proc.tick() => self.dispatch_processing(&mut tasks, SyncKind::CallProcessing),
                _ = vm_proc.tick() => self.dispatch_processing(&mut tasks, SyncKind::VoicemailProcessing),
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "scheduler stopping, draining in-flight work");
        while tasks.join_next().await.is_some() {}
        info!("scheduler engine stopped");
    }

    fn dispatch_discovery(&self, tasks: &mut JoinSet<()>) {
        let tenants = match self.store.list_tenants() {
            Ok(tenants) => tenants,
            Err(e) => {
                error!(error = %e, "tenant listing failed");
                return;
            }
        };

        let now = Utc::now();
        for tenant in tenants {
            let settings = match self.store.freepbx_settings(&tenant.id) {
                Ok(s) => s,
                Err(e) => {
                    error!(tenant_id = %tenant.id, error = %e, "settings load failed");
                    continue;
                }
            };

            let vm_interval = Duration::minutes(settings.voicemail_interval_minutes as i64);
            let plans = [
                (
                    SyncKind::Cdr,
                    Duration::seconds(self.config.cdr_tick_seconds as i64),
                ),
                (
                    SyncKind::Archive,
                    Duration::seconds(self.config.archive_tick_seconds as i64),
                ),
                (SyncKind::VoicemailDiscovery, vm_interval),
                (SyncKind::PbxStatus, Duration::seconds(PBX_STATUS_INTERVAL_SECS)),
            ];

            for (kind, interval) in plans {
                let state = self.store.get_sync_state(&tenant.id, kind).ok().flatten();
                if !interval_due(&state, now) {
                    continue;
                }
                self.spawn_sync(tasks, &tenant, kind, interval);
            }

            // Retention fires once per day at the tenant-local run time, so
            // its due check reads the clock differently.
            if settings.retention_enabled {
                let tz: Tz = tenant.timezone.parse().unwrap_or(chrono_tz::UTC);
                let state = self
                    .store
                    .get_sync_state(&tenant.id, SyncKind::Retention)
                    .ok()
                    .flatten();
                let last_run = state.as_ref().and_then(|s| s.last_run_at);
                let held = state.as_ref().map(|s| s.in_progress).unwrap_or(false);
                if !held && retention_due(now, last_run, tz, &settings.retention_run_time) {
                    self.spawn_sync(tasks, &tenant, SyncKind::Retention, Duration::hours(1));
                }
            }
        }
    }

    /// Claim and spawn one sync job. `interval` is both the claim staleness
    /// window and the delay until the next run.
    fn spawn_sync(
        &self,
        tasks: &mut JoinSet<()>,
        tenant: &Tenant,
        kind: SyncKind,
        interval: Duration,
    ) {
        let key = format!("{}/{}", tenant.id, kind);
        if self.inflight.contains_key(&key) {
            debug!(tenant_id = %tenant.id, source = %kind, reason = "in-progress", "tick dropped");
            return;
        }
        match self.store.try_begin_sync(&tenant.id, kind, interval) {
            Ok(true) => {}
            Ok(false) => {
                info!(tenant_id = %tenant.id, source = %kind, reason = "in-progress", "tick dropped");
                return;
            }
            Err(e) => {
                error!(tenant_id = %tenant.id, source = %kind, error = %e, "sync claim failed");
                return;
            }
        }

        self.inflight.insert(key.clone(), ());
        let store = self.store.clone();
        let inflight = self.inflight.clone();
        let config = self.config.clone();
        let tenant = tenant.clone();

        tasks.spawn(async move {
            let result = match kind {
                SyncKind::Cdr => jobs::cdr_sync(&store, &tenant, &config).await,
                SyncKind::Archive => jobs::archive_sync(&store, &tenant).await,
                SyncKind::VoicemailDiscovery => jobs::voicemail_discovery(&store, &tenant).await,
                SyncKind::Retention => run_retention(&store, &tenant).await,
                SyncKind::PbxStatus => jobs::pbx_status(&store, &tenant).await,
                // Processing kinds never reach spawn_sync.
                SyncKind::CallProcessing | SyncKind::VoicemailProcessing => String::new(),
            };
            // The next run is scheduled regardless of the outcome.
            let next_run = Utc::now() + interval;
            if let Err(e) = store.finish_sync(&tenant.id, kind, &result, Some(next_run)) {
                error!(tenant_id = %tenant.id, source = %kind, error = %e, "sync release failed");
            }
            inflight.remove(&key);
        });
    }

    /// Processing drains the global pending queue with one worker per
    /// concurrency slot; the pipeline semaphore is the real bound, the
    /// per-worker guard only prevents piling up drain loops across ticks.
    fn dispatch_processing(&self, tasks: &mut JoinSet<()>, kind: SyncKind) {
        for worker in 0..self.config.effective_concurrency() {
            let key = format!("global/{kind}/{worker}");
            if self.inflight.contains_key(&key) {
                debug!(source = %kind, worker, reason = "in-progress", "processing tick dropped");
                continue;
            }
            self.inflight.insert(key.clone(), ());
            let pipeline = self.pipeline.clone();
            let inflight = self.inflight.clone();

            tasks.spawn(async move {
                loop {
                    let processed = match kind {
                        SyncKind::CallProcessing => pipeline.process_next_call().await,
                        _ => pipeline.process_next_voicemail().await,
                    };
                    if processed.is_none() {
                        break;
                    }
                }
                inflight.remove(&key);
            });
        }
    }

    /// Run one source immediately for `syncNow`. Drops are logged exactly
    /// like timed ticks (`in-progress`); the caller already got its 202.
    fn handle_command(&self, command: SyncCommand, tasks: &mut JoinSet<()>) {
        if matches!(
            command.kind,
            SyncKind::CallProcessing | SyncKind::VoicemailProcessing
        ) {
            self.dispatch_processing(tasks, command.kind);
            return;
        }

        let tenant = match self.store.get_tenant(&command.tenant_id) {
            Ok(Some(tenant)) => tenant,
            Ok(None) => {
                warn!(tenant_id = %command.tenant_id, "syncNow for unknown tenant");
                return;
            }
            Err(e) => {
                error!(tenant_id = %command.tenant_id, error = %e, "syncNow tenant lookup failed");
                return;
            }
        };

        let interval = match command.kind {
            SyncKind::Cdr => Duration::seconds(self.config.cdr_tick_seconds as i64),
            SyncKind::Archive => Duration::seconds(self.config.archive_tick_seconds as i64),
            SyncKind::VoicemailDiscovery => Duration::minutes(1),
            SyncKind::Retention => Duration::hours(1),
            _ => Duration::seconds(PBX_STATUS_INTERVAL_SECS),
        };
        self.spawn_sync(tasks, &tenant, command.kind, interval);
    }
}

/// A sync row is due when it has never run, its `next_run_at` has passed,
/// and no run currently holds the claim.
fn interval_due(state: &Option<SyncState>, now: chrono::DateTime<Utc>) -> bool {
    match state {
        None => true,
        Some(s) if s.in_progress => false,
        Some(s) => s.next_run_at.map_or(true, |next| next <= now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(in_progress: bool, next_in_secs: Option<i64>) -> Option<SyncState> {
        Some(SyncState {
            tenant_id: "t".into(),
            source: SyncKind::Cdr,
            last_run_at: None,
            last_result: None,
            next_run_at: next_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
            in_progress,
            started_at: None,
        })
    }

    #[test]
    fn due_logic() {
        let now = Utc::now();
        assert!(interval_due(&None, now));
        assert!(interval_due(&state(false, Some(-5)), now));
        assert!(interval_due(&state(false, None), now));
        assert!(!interval_due(&state(false, Some(60)), now));
        assert!(!interval_due(&state(true, Some(-5)), now));
    }
}
