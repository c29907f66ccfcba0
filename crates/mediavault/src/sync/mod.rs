//! Status synchronizer: an owner-scoped, eventually-consistent view of the
//! active job set, plus the liveness backstop for stuck jobs.
//!
//! One instance per observing session; nothing here is process-global. The
//! view is reconciled by polling the ledger while jobs are in flight and by
//! applying change events as they arrive. Either source alone satisfies the
//! contract; together they keep latency low without idle polling.
//!
//! There is no out-of-band orphan sweep: per-request cleanup plus the
//! timeout backstop are the only reclamation paths.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::{JobChangeBroadcaster, JobChangeEvent};
use crate::config::IngestConfig;
use crate::ledger::{job_repo, Database, FailureKind, JobRecord, JobStatus};

/// Client-facing snapshot of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: String,
    pub original_name: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl JobView {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.clone(),
            original_name: record.original_name.clone(),
            status: record.status,
            progress: record.progress,
            error_detail: record.error_detail.clone(),
        }
    }

    fn from_event(event: &JobChangeEvent) -> Self {
        Self {
            job_id: event.job_id.clone(),
            original_name: event.original_name.clone(),
            status: event.status,
            progress: event.progress,
            error_detail: event.error_detail.clone(),
        }
    }
}

/// Client-facing summary: counts per non-terminal status plus the full
/// tracked list (terminal entries still inside their grace window included).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub uploading: usize,
    pub processing: usize,
    pub pending: usize,
    pub ai_processing: usize,
    pub jobs: Vec<JobView>,
}

struct TrackedJob {
    view: JobView,
    /// Ordering key for the client list.
    created_at: DateTime<Utc>,
    /// Set when the job was first observed terminal; drives grace eviction.
    terminal_since: Option<DateTime<Utc>>,
}

pub struct StatusSynchronizer {
    db: Database,
    owner_id: String,
    events: JobChangeBroadcaster,
    config: std::sync::Arc<IngestConfig>,
    tracked: RwLock<HashMap<String, TrackedJob>>,
}

impl StatusSynchronizer {
    pub fn new(
        db: Database,
        owner_id: &str,
        events: JobChangeBroadcaster,
        config: std::sync::Arc<IngestConfig>,
    ) -> Self {
        Self {
            db,
            owner_id: owner_id.to_string(),
            events,
            config,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn read_tracked(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TrackedJob>> {
        match self.tracked.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Synchronizer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_tracked(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TrackedJob>> {
        match self.tracked.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Synchronizer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Whether anything is being tracked, including terminal entries still
    /// inside their grace window. Drives poll suppression.
    pub fn has_tracked(&self) -> bool {
        !self.read_tracked().is_empty()
    }

    /// The tracked jobs, newest first.
    pub fn views(&self) -> Vec<JobView> {
        let tracked = self.read_tracked();
        let mut entries: Vec<(&DateTime<Utc>, &JobView)> = tracked
            .values()
            .map(|t| (&t.created_at, &t.view))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(a.0));
        entries.into_iter().map(|(_, view)| view.clone()).collect()
    }

    pub fn summary(&self) -> StatusSummary {
        let mut uploading = 0;
        let mut processing = 0;
        let mut pending = 0;
        let mut ai_processing = 0;
        {
            let tracked = self.read_tracked();
            for entry in tracked.values() {
                match entry.view.status {
                    JobStatus::Uploading => uploading += 1,
                    JobStatus::Processing => processing += 1,
                    JobStatus::Pending => pending += 1,
                    JobStatus::AiProcessing => ai_processing += 1,
                    JobStatus::Completed | JobStatus::Failed => {}
                }
            }
        }

        StatusSummary {
            uploading,
            processing,
            pending,
            ai_processing,
            jobs: self.views(),
        }
    }

    /// Applies one change event to the tracked view. Events for other
    /// owners are ignored; duplicates overwrite idempotently.
    pub fn apply_event(&self, event: &JobChangeEvent) {
        if event.owner_id != self.owner_id {
            return;
        }

        let now = Utc::now();
        let mut tracked = self.write_tracked();
        let entry = tracked
            .entry(event.job_id.clone())
            .or_insert_with(|| TrackedJob {
                view: JobView::from_event(event),
                created_at: event.timestamp,
                terminal_since: None,
            });
        entry.view = JobView::from_event(event);
        if event.status.is_terminal() {
            entry.terminal_since.get_or_insert(now);
        } else {
            entry.terminal_since = None;
        }
    }

    /// One reconciliation pass: refresh from the ledger, force-fail stuck
    /// jobs, resolve jobs that left the active set, and evict terminal
    /// entries past their grace window.
    ///
    /// Never fatal: a ledger error is logged and the pass retried on the
    /// next interval.
    pub fn reconcile(&self) {
        let rows = match job_repo::query_active(&self.db, &self.owner_id) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Synchronizer query failed, will retry: {}", e);
                return;
            }
        };

        let now = Utc::now();
        let stuck_timeout = self.config.stuck_timeout();

        let mut active = Vec::new();
        for row in rows {
            let is_stuck = (now - row.created_at)
                .to_std()
                .map(|age| age > stuck_timeout)
                .unwrap_or(false);
            if is_stuck {
                self.force_timeout(row, now);
            } else {
                active.push(row);
            }
        }

        // Tracked jobs that vanished from the active set finished between
        // passes; fetch their terminal state before evicting.
        let missing: Vec<String> = {
            let tracked = self.read_tracked();
            tracked
                .keys()
                .filter(|id| {
                    !active.iter().any(|row| &row.id == *id)
                        && tracked[*id].terminal_since.is_none()
                })
                .cloned()
                .collect()
        };
        let mut resolved = Vec::new();
        for id in &missing {
            match job_repo::find_owned(&self.db, &self.owner_id, id) {
                Ok(Some(record)) => resolved.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Synchronizer lookup for job {} failed: {}", id, e),
            }
        }

        let grace = self.config.eviction_grace();
        let mut tracked = self.write_tracked();

        for row in &active {
            let entry = tracked.entry(row.id.clone()).or_insert_with(|| TrackedJob {
                view: JobView::from_record(row),
                created_at: row.created_at,
                terminal_since: None,
            });
            entry.view = JobView::from_record(row);
            entry.terminal_since = None;
        }

        for record in &resolved {
            if let Some(entry) = tracked.get_mut(&record.id) {
                entry.view = JobView::from_record(record);
                if record.status.is_terminal() {
                    entry.terminal_since.get_or_insert(now);
                }
            }
        }
        for id in &missing {
            // Row disappeared entirely: drop it from the view.
            if !resolved.iter().any(|r| &r.id == id) {
                tracked.remove(id);
            }
        }

        tracked.retain(|_, entry| match entry.terminal_since {
            Some(since) => (now - since)
                .to_std()
                .map(|elapsed| elapsed < grace)
                .unwrap_or(true),
            None => true,
        });
    }

    /// Force-fails one over-age job and reflects the result. Racing a
    /// still-live executor is fine: the conditional update only touches
    /// non-terminal rows, and both writers converge on a terminal state.
    fn force_timeout(&self, row: JobRecord, now: DateTime<Utc>) {
        let reason = format!(
            "no terminal state within {}s",
            self.config.stuck_timeout_secs
        );
        match job_repo::force_fail_if_active(&self.db, &row.id, FailureKind::Timeout, &reason) {
            Ok(true) => {
                log::warn!("Force-failed stuck job {} ({})", row.id, row.original_name);
                let mut failed = row;
                failed.status = JobStatus::Failed;
                failed.error_detail = Some(FailureKind::Timeout.detail(&reason));
                failed.updated_at = now;
                self.events.send(JobChangeEvent::from_record(&failed));

                let mut tracked = self.write_tracked();
                let entry = tracked.entry(failed.id.clone()).or_insert_with(|| TrackedJob {
                    view: JobView::from_record(&failed),
                    created_at: failed.created_at,
                    terminal_since: None,
                });
                entry.view = JobView::from_record(&failed);
                entry.terminal_since.get_or_insert(now);
            }
            // Someone else reached a terminal state first; the regular
            // reconcile flow will pick it up.
            Ok(false) => {}
            Err(e) => log::warn!("Force-fail of job {} failed, will retry: {}", row.id, e),
        }
    }

    /// Manual backstop: force every active job for this owner to `failed`
    /// immediately, bypassing the timeout. Returns how many rows changed.
    pub fn clear_stuck(&self) -> u64 {
        let changed = match job_repo::force_fail_all_active(
            &self.db,
            &self.owner_id,
            FailureKind::Timeout,
            "cleared by user",
        ) {
            Ok(changed) => changed,
            Err(e) => {
                log::warn!("Clear-stuck failed, will retry on next pass: {}", e);
                return 0;
            }
        };

        let now = Utc::now();
        let detail = FailureKind::Timeout.detail("cleared by user");
        let mut tracked = self.write_tracked();
        for entry in tracked.values_mut() {
            if !entry.view.status.is_terminal() {
                entry.view.status = JobStatus::Failed;
                entry.view.error_detail = Some(detail.clone());
                entry.terminal_since.get_or_insert(now);
            }
        }

        changed
    }

    /// Drives the synchronizer until the change channel closes. Polls only
    /// while something is tracked; otherwise blocks on change events.
    pub async fn run(&self) {
        let mut rx = self.events.subscribe();
        loop {
            if self.has_tracked() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval()) => {
                        self.reconcile();
                    }
                    received = rx.recv() => {
                        if !self.handle_recv(received) {
                            break;
                        }
                    }
                }
            } else if !self.handle_recv(rx.recv().await) {
                break;
            }
        }
    }

    fn handle_recv(&self, received: Result<JobChangeEvent, RecvError>) -> bool {
        match received {
            Ok(event) => {
                self.apply_event(&event);
                true
            }
            Err(RecvError::Lagged(n)) => {
                log::warn!("Synchronizer lagged, missed {} events; reconciling", n);
                self.reconcile();
                true
            }
            Err(RecvError::Closed) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn synchronizer(config: IngestConfig) -> (StatusSynchronizer, Database, JobChangeBroadcaster) {
        let db = Database::open_in_memory().unwrap();
        let events = JobChangeBroadcaster::default();
        let sync = StatusSynchronizer::new(db.clone(), "owner-1", events.clone(), Arc::new(config));
        (sync, db, events)
    }

    fn insert_with_age(db: &Database, status: JobStatus, age_secs: i64) -> JobRecord {
        let mut job = JobRecord::new("owner-1", "photo.jpg", "image/jpeg", 1024, None);
        job.status = status;
        job.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
        job.progress = match status {
            JobStatus::Processing => 50,
            JobStatus::Pending => 90,
            _ => 0,
        };
        job_repo::insert(db, &job).unwrap();
        job
    }

    #[test]
    fn test_reconcile_tracks_active_jobs() {
        let (sync, db, _events) = synchronizer(IngestConfig::default());
        insert_with_age(&db, JobStatus::Processing, 5);
        insert_with_age(&db, JobStatus::Pending, 3);

        sync.reconcile();

        let summary = sync.summary();
        assert_eq!(summary.processing, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.jobs.len(), 2);
    }

    #[test]
    fn test_reconcile_force_fails_stuck_job() {
        let (sync, db, _events) = synchronizer(IngestConfig {
            stuck_timeout_secs: 300,
            ..Default::default()
        });
        let job = insert_with_age(&db, JobStatus::Processing, 600);

        sync.reconcile();

        let row = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.failed_with(FailureKind::Timeout));
        // Progress is left where the executor last put it.
        assert_eq!(row.progress, 50);

        let views = sync.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, JobStatus::Failed);
    }

    #[test]
    fn test_force_fail_skips_terminal_jobs() {
        let (sync, db, _events) = synchronizer(IngestConfig {
            stuck_timeout_secs: 300,
            ..Default::default()
        });
        let mut job = JobRecord::new("owner-1", "done.jpg", "image/jpeg", 1, None);
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.created_at = Utc::now() - chrono::Duration::seconds(900);
        job_repo::insert(&db, &job).unwrap();

        sync.reconcile();
        sync.reconcile();

        let row = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.progress, 100);
        assert!(row.error_detail.is_none());
    }

    #[test]
    fn test_fresh_jobs_are_not_forced() {
        let (sync, db, _events) = synchronizer(IngestConfig::default());
        let job = insert_with_age(&db, JobStatus::Processing, 10);

        sync.reconcile();

        let row = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Processing);
    }

    #[test]
    fn test_apply_event_filters_other_owners() {
        let (sync, _db, _events) = synchronizer(IngestConfig::default());

        let other = JobRecord::new("owner-2", "other.jpg", "image/jpeg", 1, None);
        sync.apply_event(&JobChangeEvent::from_record(&other));
        assert!(!sync.has_tracked());

        let mine = JobRecord::new("owner-1", "mine.jpg", "image/jpeg", 1, None);
        sync.apply_event(&JobChangeEvent::from_record(&mine));
        assert!(sync.has_tracked());
        assert_eq!(sync.summary().uploading, 1);
    }

    #[test]
    fn test_terminal_jobs_survive_grace_then_evict() {
        let (sync, _db, _events) = synchronizer(IngestConfig {
            eviction_grace_ms: 0,
            ..Default::default()
        });

        let mut job = JobRecord::new("owner-1", "done.jpg", "image/jpeg", 1, None);
        job.status = JobStatus::Completed;
        job.progress = 100;
        sync.apply_event(&JobChangeEvent::from_record(&job));

        // Visible right after the terminal event.
        assert_eq!(sync.views().len(), 1);
        assert_eq!(sync.views()[0].status, JobStatus::Completed);

        // Grace of zero: the next pass evicts it.
        sync.reconcile();
        assert!(sync.views().is_empty());
        assert!(!sync.has_tracked());
    }

    #[test]
    fn test_terminal_jobs_within_grace_are_kept() {
        let (sync, _db, _events) = synchronizer(IngestConfig {
            eviction_grace_ms: 60_000,
            ..Default::default()
        });

        let mut job = JobRecord::new("owner-1", "done.jpg", "image/jpeg", 1, None);
        job.status = JobStatus::Failed;
        job.error_detail = Some(FailureKind::Analysis.detail("boom"));
        sync.apply_event(&JobChangeEvent::from_record(&job));

        sync.reconcile();
        let views = sync.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, JobStatus::Failed);
    }

    #[test]
    fn test_vanished_jobs_resolve_to_terminal_state() {
        let (sync, db, _events) = synchronizer(IngestConfig {
            eviction_grace_ms: 60_000,
            ..Default::default()
        });
        let job = insert_with_age(&db, JobStatus::Processing, 5);
        sync.reconcile();
        assert_eq!(sync.summary().processing, 1);

        // The executor finishes between passes.
        job_repo::apply(
            &db,
            &job.id,
            &crate::ledger::JobPatch::status(JobStatus::Completed).with_progress(100),
        )
        .unwrap();

        sync.reconcile();
        let views = sync.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, JobStatus::Completed);
        assert_eq!(views[0].progress, 100);
    }

    #[test]
    fn test_clear_stuck_forces_everything_active() {
        let (sync, db, _events) = synchronizer(IngestConfig::default());
        let young = insert_with_age(&db, JobStatus::Uploading, 1);
        let old = insert_with_age(&db, JobStatus::Pending, 30);
        sync.reconcile();

        let changed = sync.clear_stuck();
        assert_eq!(changed, 2);

        for id in [&young.id, &old.id] {
            let row = job_repo::find_by_id(&db, id).unwrap().unwrap();
            assert_eq!(row.status, JobStatus::Failed);
            assert!(row.failed_with(FailureKind::Timeout));
        }
        assert!(sync
            .views()
            .iter()
            .all(|view| view.status == JobStatus::Failed));
    }

    #[test]
    fn test_summary_counts_by_status() {
        let (sync, db, _events) = synchronizer(IngestConfig::default());
        insert_with_age(&db, JobStatus::Uploading, 1);
        insert_with_age(&db, JobStatus::Processing, 1);
        insert_with_age(&db, JobStatus::Processing, 2);
        insert_with_age(&db, JobStatus::AiProcessing, 1);

        sync.reconcile();

        let summary = sync.summary();
        assert_eq!(summary.uploading, 1);
        assert_eq!(summary.processing, 2);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.ai_processing, 1);
        assert_eq!(summary.jobs.len(), 4);
    }

    #[tokio::test]
    async fn test_run_applies_events_reactively() {
        let (sync, _db, events) = synchronizer(IngestConfig::default());
        let sync = Arc::new(sync);

        let runner = Arc::clone(&sync);
        let handle = tokio::spawn(async move { runner.run().await });

        let job = JobRecord::new("owner-1", "live.jpg", "image/jpeg", 1, None);
        events.send(JobChangeEvent::from_record(&job));

        // Give the loop a moment to pick the event up.
        for _ in 0..50 {
            if sync.has_tracked() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(sync.has_tracked());

        handle.abort();
    }
}
