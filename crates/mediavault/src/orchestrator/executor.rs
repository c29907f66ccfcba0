//! Job executor: drives a single job through the ingestion state machine.
//!
//! Each ledger write is made durable before the next stage runs and is
//! followed by a change-notification event. A ledger write failure aborts
//! the executor; the synchronizer's timeout backstop reclaims the row.

use std::sync::Arc;

use crate::analysis::AnalysisClient;
use crate::broadcast::{JobChangeBroadcaster, JobChangeEvent};
use crate::config::IngestConfig;
use crate::error::TransformError;
use crate::ledger::{job_repo, Database, DatabaseError, FailureKind, JobPatch, JobRecord, JobStatus};
use crate::store::ArtifactStore;
use crate::transform;

use super::ArtifactPaths;

pub(crate) struct JobExecutor {
    db: Database,
    store: Arc<dyn ArtifactStore>,
    analysis: Arc<dyn AnalysisClient>,
    events: JobChangeBroadcaster,
    config: Arc<IngestConfig>,
}

impl JobExecutor {
    pub(crate) fn new(
        db: Database,
        store: Arc<dyn ArtifactStore>,
        analysis: Arc<dyn AnalysisClient>,
        events: JobChangeBroadcaster,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            db,
            store,
            analysis,
            events,
            config,
        }
    }

    /// Writes a patch to the ledger, mirrors it onto the in-memory record,
    /// and notifies subscribers. The row is durable before anyone hears
    /// about the change.
    pub(crate) async fn advance(
        &self,
        job: &mut JobRecord,
        patch: JobPatch,
    ) -> Result<(), DatabaseError> {
        job_repo::apply(&self.db, &job.id, &patch)?;
        patch.apply_to(job, chrono::Utc::now());
        self.events.send(JobChangeEvent::from_record(job));
        Ok(())
    }

    async fn fail(
        &self,
        job: &mut JobRecord,
        kind: FailureKind,
        reason: impl std::fmt::Display,
        progress: u8,
    ) {
        log::warn!("Job {} failed: {}", job.id, kind.detail(&reason));
        if let Err(e) = self
            .advance(job, JobPatch::failure(kind, reason, progress))
            .await
        {
            log::error!("Failed to record failure for job {}: {}", job.id, e);
        }
    }

    /// Runs the full pipeline for one job: transform, store, analyze.
    pub(crate) async fn run(&self, mut job: JobRecord, bytes: Vec<u8>, paths: ArtifactPaths) {
        // uploading -> processing: the bytes are in hand.
        if let Err(e) = self
            .advance(&mut job, JobPatch::status(JobStatus::Processing))
            .await
        {
            log::error!("Job {}: ledger write failed, aborting executor: {}", job.id, e);
            return;
        }

        // Decode and probe; CPU-bound, so off the async workers.
        let decode = tokio::task::spawn_blocking(move || {
            let decoded = transform::decode(&bytes)?;
            Ok::<_, TransformError>((bytes, decoded))
        })
        .await;
        let (bytes, decoded) = match flatten_join(decode) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(&mut job, FailureKind::Validation, e, 0).await;
                return;
            }
        };
        if self
            .advance(&mut job, JobPatch::progress(30))
            .await
            .is_err()
        {
            return;
        }

        let max_dim = self.config.thumbnail_max_dim;
        let render = tokio::task::spawn_blocking(move || {
            let thumb = transform::render_thumbnail(&decoded, max_dim)?;
            Ok::<_, TransformError>((bytes, thumb))
        })
        .await;
        let (bytes, thumb) = match flatten_join(render) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(&mut job, FailureKind::Validation, e, 0).await;
                return;
            }
        };
        if self
            .advance(&mut job, JobPatch::progress(50))
            .await
            .is_err()
        {
            return;
        }

        // Store the original. Nothing was written yet, so a failure here
        // needs no cleanup.
        if let Err(e) = self
            .store
            .put(&paths.original, &bytes, &job.mime_type)
            .await
        {
            self.fail(&mut job, FailureKind::StorageWrite, e, 0).await;
            return;
        }
        if self
            .advance(
                &mut job,
                JobPatch {
                    progress: Some(70),
                    stored_artifact_path: Some(paths.original.clone()),
                    ..Default::default()
                },
            )
            .await
            .is_err()
        {
            return;
        }

        // Store the thumbnail; on failure the original must not be left
        // behind as an orphan.
        if let Err(e) = self
            .store
            .put(
                &paths.thumbnail,
                &thumb.bytes,
                transform::THUMBNAIL_CONTENT_TYPE,
            )
            .await
        {
            if let Err(cleanup) = self
                .store
                .remove(std::slice::from_ref(&paths.original))
                .await
            {
                log::error!(
                    "Job {}: {}",
                    job.id,
                    FailureKind::StorageCleanup.detail(cleanup)
                );
            }
            self.fail(&mut job, FailureKind::StorageWrite, e, 0).await;
            return;
        }
        if self
            .advance(
                &mut job,
                JobPatch {
                    progress: Some(90),
                    thumbnail_artifact_path: Some(paths.thumbnail.clone()),
                    thumb_width: Some(thumb.width),
                    thumb_height: Some(thumb.height),
                    ..Default::default()
                },
            )
            .await
            .is_err()
        {
            return;
        }

        // The job is durable from here: whatever analysis does, the upload
        // itself has succeeded.
        if self
            .advance(&mut job, JobPatch::status(JobStatus::Pending))
            .await
            .is_err()
        {
            return;
        }

        let stored_path = paths.original;
        self.analyze_and_finish(&mut job, &stored_path, true).await;
    }

    /// Analysis stage, shared by the first run and the explicit retry.
    ///
    /// `fresh_run` advances progress to 95/100; the retry path leaves the
    /// already-held progress value untouched so it never regresses.
    pub(crate) async fn analyze_and_finish(
        &self,
        job: &mut JobRecord,
        stored_path: &str,
        fresh_run: bool,
    ) {
        let held_progress = job.progress;
        let ai_patch = if fresh_run {
            JobPatch::status(JobStatus::AiProcessing).with_progress(95)
        } else {
            JobPatch::status(JobStatus::AiProcessing)
        };
        if self.advance(job, ai_patch).await.is_err() {
            return;
        }

        let url = match self
            .store
            .read_url(stored_path, self.config.read_url_ttl())
            .await
        {
            Ok(url) => url,
            Err(e) => {
                let progress = if fresh_run { 100 } else { held_progress };
                self.fail(job, FailureKind::Analysis, e, progress).await;
                return;
            }
        };

        match self.analysis.analyze(&url).await {
            Ok(analysis) => {
                let patch = JobPatch {
                    status: Some(JobStatus::Completed),
                    progress: Some(100),
                    tags: Some(analysis.tags),
                    description: Some(analysis.description),
                    dominant_colors: Some(analysis.dominant_colors),
                    error_detail: Some(None),
                    analyzed_at: Some(chrono::Utc::now()),
                    ..Default::default()
                };
                if let Err(e) = self.advance(job, patch).await {
                    log::error!("Failed to record completion for job {}: {}", job.id, e);
                }
            }
            Err(e) => {
                // The upload is not undone; artifacts stay retrievable.
                let progress = if fresh_run { 100 } else { held_progress };
                self.fail(job, FailureKind::Analysis, e, progress).await;
            }
        }
    }
}

fn flatten_join<T>(
    joined: Result<Result<T, TransformError>, tokio::task::JoinError>,
) -> Result<T, TransformError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(TransformError::Decode(format!("transform task failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StubAnalysis;
    use crate::store::MemoryArtifactStore;

    fn executor_with(
        store: Arc<MemoryArtifactStore>,
        analysis: Arc<StubAnalysis>,
    ) -> (JobExecutor, Database, JobChangeBroadcaster) {
        let db = Database::open_in_memory().unwrap();
        let events = JobChangeBroadcaster::default();
        let executor = JobExecutor::new(
            db.clone(),
            store,
            analysis,
            events.clone(),
            Arc::new(IngestConfig::default()),
        );
        (executor, db, events)
    }

    fn jpeg_fixture() -> Vec<u8> {
        use image::{DynamicImage, ImageFormat, RgbImage};
        let img = RgbImage::from_pixel(64, 48, image::Rgb([200, 100, 50]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    fn insert_job(db: &Database, bytes: &[u8]) -> (JobRecord, ArtifactPaths) {
        let job = JobRecord::new("owner-1", "photo.jpg", "image/jpeg", bytes.len() as u64, None);
        job_repo::insert(db, &job).unwrap();
        let paths = ArtifactPaths::generate(&job.owner_id, &job.id, &job.mime_type);
        (job, paths)
    }

    #[tokio::test]
    async fn test_happy_path_reaches_completed() {
        let store = Arc::new(MemoryArtifactStore::new());
        let analysis = Arc::new(StubAnalysis::new());
        let (executor, db, _events) = executor_with(Arc::clone(&store), analysis);

        let bytes = jpeg_fixture();
        let (job, paths) = insert_job(&db, &bytes);
        let id = job.id.clone();

        executor.run(job, bytes, paths.clone()).await;

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.progress, 100);
        assert_eq!(row.stored_artifact_path.as_deref(), Some(paths.original.as_str()));
        assert_eq!(
            row.thumbnail_artifact_path.as_deref(),
            Some(paths.thumbnail.as_str())
        );
        assert!(row.thumb_width.is_some());
        assert!(row.tags.is_some());
        assert!(row.analyzed_at.is_some());
        assert!(store.contains(&paths.original));
        assert!(store.contains(&paths.thumbnail));
    }

    #[tokio::test]
    async fn test_undecodable_bytes_fail_without_artifacts() {
        let store = Arc::new(MemoryArtifactStore::new());
        let analysis = Arc::new(StubAnalysis::new());
        let (executor, db, _events) = executor_with(Arc::clone(&store), analysis);

        let bytes = b"not an image".to_vec();
        let (job, paths) = insert_job(&db, &bytes);
        let id = job.id.clone();

        executor.run(job, bytes, paths).await;

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.progress, 0);
        assert!(row.failed_with(FailureKind::Validation));
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_original_write_failure_needs_no_cleanup() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.fail_puts_matching("owner-1/");
        let analysis = Arc::new(StubAnalysis::new());
        let (executor, db, _events) = executor_with(Arc::clone(&store), analysis);

        let bytes = jpeg_fixture();
        let (job, paths) = insert_job(&db, &bytes);
        let id = job.id.clone();

        executor.run(job, bytes, paths).await;

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.progress, 0);
        assert!(row.failed_with(FailureKind::StorageWrite));
        assert!(row.stored_artifact_path.is_none());
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_thumbnail_write_failure_removes_original() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.fail_puts_matching("thumbnails/");
        let analysis = Arc::new(StubAnalysis::new());
        let (executor, db, _events) = executor_with(Arc::clone(&store), analysis);

        let bytes = jpeg_fixture();
        let (job, paths) = insert_job(&db, &bytes);
        let id = job.id.clone();

        executor.run(job, bytes, paths.clone()).await;

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.progress, 0);
        assert!(row.failed_with(FailureKind::StorageWrite));
        // The stored original was cleaned up; no orphan remains.
        assert!(!store.contains(&paths.original));
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_analysis_failure_keeps_artifacts_at_full_progress() {
        let store = Arc::new(MemoryArtifactStore::new());
        let analysis = Arc::new(StubAnalysis::new());
        analysis.push_err(crate::analysis::AnalysisError::Quota("monthly cap".into()));
        let (executor, db, _events) = executor_with(Arc::clone(&store), analysis);

        let bytes = jpeg_fixture();
        let (job, paths) = insert_job(&db, &bytes);
        let id = job.id.clone();

        executor.run(job, bytes, paths.clone()).await;

        let row = job_repo::find_by_id(&db, &id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.progress, 100);
        assert!(row.failed_with(FailureKind::Analysis));
        assert!(row.tags.is_none());
        // The upload itself succeeded; both blobs stay retrievable.
        assert!(store.contains(&paths.original));
        assert!(store.contains(&paths.thumbnail));
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_visits_handoff_states() {
        let store = Arc::new(MemoryArtifactStore::new());
        let analysis = Arc::new(StubAnalysis::new());
        let (executor, db, events) = executor_with(store, analysis);
        let mut rx = events.subscribe();

        let bytes = jpeg_fixture();
        let (job, paths) = insert_job(&db, &bytes);

        executor.run(job, bytes, paths).await;

        let mut statuses = Vec::new();
        let mut last_progress = 0u8;
        while let Ok(event) = rx.try_recv() {
            assert!(
                event.progress >= last_progress,
                "progress regressed: {} -> {}",
                last_progress,
                event.progress
            );
            last_progress = event.progress;
            statuses.push(event.status);
        }

        assert_eq!(last_progress, 100);
        assert!(statuses.contains(&JobStatus::Pending));
        assert!(statuses.contains(&JobStatus::AiProcessing));
        assert_eq!(statuses.last(), Some(&JobStatus::Completed));
    }
}
