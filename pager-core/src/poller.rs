use crate::incident::{CachedIncident, Incident, IncidentFilters, IncidentStatus};
use crate::pagerduty::IncidentSource;
use crate::repository::{Repository, SETTING_ASSIGNED_ONLY, SETTING_REDIRECT_ENABLED};
use crate::snapshot::SnapshotStore;
use chrono::Utc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
const RESOLVED_FETCH_WINDOW_HOURS: i64 = 24;
const CACHE_RETENTION_HOURS: i64 = 48;

pub trait EventSink: Send + Sync + 'static {
    fn emit_json(&self, event: &str, payload: serde_json::Value);
}

pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit_json(&self, _event: &str, _payload: serde_json::Value) {}
}

/// Fire-and-forget alert capabilities. Implementations never surface errors
/// to the poller; a missing speaker or browser is not a tick failure.
pub trait AlertSink: Send + Sync + 'static {
    fn play_sound(&self);
    fn open_browser(&self, url: &str);
}

struct Partitions {
    triggered: Vec<Incident>,
    acknowledged: Vec<Incident>,
    resolved: Vec<Incident>,
}

/// One tick worth of work: settings read, partition fan-out, diff, cache
/// write, side-effect dispatch. Owned by the scheduler thread; tests drive
/// `tick` directly.
pub struct PollWorker {
    source: Arc<dyn IncidentSource>,
    repository: Repository,
    alerts: Arc<dyn AlertSink>,
    sink: Arc<dyn EventSink>,
    snapshot: SnapshotStore,
}

impl PollWorker {
    pub fn new(
        source: Arc<dyn IncidentSource>,
        repository: Repository,
        alerts: Arc<dyn AlertSink>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        PollWorker {
            source,
            repository,
            alerts,
            sink,
            snapshot: SnapshotStore::new(),
        }
    }

    pub fn tick(&self) {
        // Settings are read fresh every tick so changes apply without restart.
        let assigned_only = self
            .repository
            .get_bool_setting(SETTING_ASSIGNED_ONLY)
            .unwrap_or_default();
        let redirect_enabled = self
            .repository
            .get_bool_setting(SETTING_REDIRECT_ENABLED)
            .unwrap_or_default();

        let service_ids = match self.repository.enabled_service_ids() {
            Ok(ids) => ids,
            Err(err) => {
                error!("failed to read enabled services: {err}");
                return;
            }
        };
        if service_ids.is_empty() {
            // Nothing enabled: no fetch, no cache write, no event.
            return;
        }

        let partitions = self.fetch_partitions(&service_ids, assigned_only);
        let triggered_count = partitions.triggered.len();
        let acknowledged_count = partitions.acknowledged.len();
        let resolved_count = partitions.resolved.len();

        let merged = merge_partitions(partitions);
        let total_count = merged.len();
        let new_incidents = self.snapshot.diff_and_replace(&merged);

        for incident in &merged {
            if let Err(err) = self
                .repository
                .upsert_incident(&CachedIncident::from_remote(incident))
            {
                warn!(incident_id = %incident.id, "failed to cache incident: {err}");
            }
        }
        if let Err(err) = self
            .repository
            .clean_old_incidents(Utc::now() - chrono::Duration::hours(CACHE_RETENTION_HOURS))
        {
            warn!("failed to prune resolved incidents: {err}");
        }

        for incident in &new_incidents {
            if incident.status == IncidentStatus::Triggered {
                self.alerts.play_sound();
                if redirect_enabled && !incident.html_url.is_empty() {
                    self.alerts.open_browser(&incident.html_url);
                }
            }
        }

        self.sink.emit_json(
            "incidents:updated",
            serde_json::json!({
                "incidents": merged,
                "newIncidents": new_incidents,
                "totalCount": total_count,
                "triggeredCount": triggered_count,
                "acknowledgedCount": acknowledged_count,
                "resolvedCount": resolved_count,
            }),
        );
    }

    /// Fan-out of the three status partitions. Each fetch can fail on its
    /// own; a failed partition is logged and contributes nothing while the
    /// other two proceed.
    fn fetch_partitions(&self, service_ids: &[String], assigned_only: bool) -> Partitions {
        let fetch = |status: IncidentStatus, since: Option<chrono::DateTime<Utc>>| {
            let filters = IncidentFilters {
                statuses: vec![status],
                service_ids: service_ids.to_vec(),
                assigned_to_me: assigned_only,
                since,
            };
            match self.source.fetch_incidents(&filters) {
                Ok(incidents) => incidents,
                Err(err) => {
                    error!("failed to fetch {} incidents: {err}", status.as_str());
                    Vec::new()
                }
            }
        };

        let resolved_since = Utc::now() - chrono::Duration::hours(RESOLVED_FETCH_WINDOW_HOURS);
        std::thread::scope(|scope| {
            let triggered = scope.spawn(|| fetch(IncidentStatus::Triggered, None));
            let acknowledged = scope.spawn(|| fetch(IncidentStatus::Acknowledged, None));
            let resolved = scope.spawn(|| fetch(IncidentStatus::Resolved, Some(resolved_since)));

            Partitions {
                triggered: triggered.join().unwrap_or_default(),
                acknowledged: acknowledged.join().unwrap_or_default(),
                resolved: resolved.join().unwrap_or_default(),
            }
        })
    }
}

/// Concatenates the partitions in triggered, acknowledged, resolved order.
/// Under correct status filtering ids never repeat across partitions, but a
/// remote transition racing the fetch can produce one; the candidate with
/// the later `updated_at` wins and first-appearance order is kept.
fn merge_partitions(partitions: Partitions) -> Vec<Incident> {
    let mut merged: Vec<Incident> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    let all = partitions
        .triggered
        .into_iter()
        .chain(partitions.acknowledged)
        .chain(partitions.resolved);

    for incident in all {
        match index.get(&incident.id).copied() {
            Some(at) => {
                if incident.updated_at > merged[at].updated_at {
                    merged[at] = incident;
                }
            }
            None => {
                index.insert(incident.id.clone(), merged.len());
                merged.push(incident);
            }
        }
    }

    merged
}

/// Handle to the background polling thread. The loop runs one immediate tick
/// and then one tick per interval; ticks never overlap because the same
/// thread runs them all, a slow tick simply delays the next wakeup.
///
/// `stop` consumes the handle, so stopping twice is unrepresentable. Dropping
/// the handle without calling `stop` also terminates the loop at its next
/// wakeup, without joining.
pub struct IncidentPoller {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl IncidentPoller {
    pub fn start(worker: PollWorker) -> Self {
        Self::start_with_interval(worker, POLL_INTERVAL)
    }

    pub fn start_with_interval(worker: PollWorker, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            worker.tick();
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => worker.tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        IncidentPoller {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signals the loop and joins the worker thread. An in-flight tick runs
    /// to completion; no tick starts after this returns.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
