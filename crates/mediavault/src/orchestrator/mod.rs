//! Ingestion orchestrator: batch intake, validation, and dispatch.
//!
//! The orchestrator creates one ledger row per accepted file and spawns one
//! executor task per row, returning to the caller without waiting for any of
//! them. Everything after the acknowledgement lands on the job row, never
//! back at the caller.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::analysis::AnalysisClient;
use crate::broadcast::{JobChangeBroadcaster, JobChangeEvent};
use crate::config::IngestConfig;
use crate::error::RetryError;
use crate::ledger::{job_repo, Database, FailureKind, JobPatch, JobRecord, JobStatus};
use crate::store::{self, ArtifactStore};

mod executor;

pub(crate) use executor::JobExecutor;

/// One file in a submission batch.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub byte_size: u64,
}

impl MediaUpload {
    /// Builds an upload whose declared size matches its payload.
    pub fn from_bytes(bytes: Vec<u8>, file_name: &str, mime_type: &str) -> Self {
        let byte_size = bytes.len() as u64;
        Self {
            bytes,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            byte_size,
        }
    }
}

/// A per-file rejection. These never created a row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedUpload {
    pub file_name: String,
    pub reason: String,
}

/// Outcome of a batch submission. Partial success is the normal case and is
/// reported per file, never as a batch failure.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    /// Ids of the jobs created, in submission order.
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedUpload>,
}

/// Blob paths generated at job creation. Persisted onto the row only once
/// the corresponding blob was actually written.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactPaths {
    pub original: String,
    pub thumbnail: String,
}

impl ArtifactPaths {
    pub(crate) fn generate(owner_id: &str, job_id: &str, mime_type: &str) -> Self {
        let ext = extension_for_mime(mime_type);
        Self {
            original: store::artifact_path(owner_id, &format!("{}.{}", job_id, ext)),
            thumbnail: store::thumbnail_path(owner_id, &format!("{}.jpg", job_id)),
        }
    }
}

fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_guess::get_mime_extensions_str(mime_type) {
        Some(exts) if !exts.is_empty() => {
            for preferred in ["jpg", "png", "gif", "webp", "bmp", "tiff"] {
                if exts.contains(&preferred) {
                    return preferred;
                }
            }
            exts[0]
        }
        _ => "bin",
    }
}

pub struct Orchestrator {
    db: Database,
    artifact_store: Arc<dyn ArtifactStore>,
    analysis: Arc<dyn AnalysisClient>,
    events: JobChangeBroadcaster,
    config: Arc<IngestConfig>,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        artifact_store: Arc<dyn ArtifactStore>,
        analysis: Arc<dyn AnalysisClient>,
        events: JobChangeBroadcaster,
        config: Arc<IngestConfig>,
    ) -> Self {
        Self {
            db,
            artifact_store,
            analysis,
            events,
            config,
        }
    }

    /// The change-notification channel fed by this orchestrator's executors.
    pub fn events(&self) -> &JobChangeBroadcaster {
        &self.events
    }

    /// Submits a batch of files for background ingestion.
    ///
    /// Returns once every accepted file has a durable ledger row and a
    /// spawned executor. Rejected files are reported per file with a
    /// `validation_error` reason and create nothing.
    pub async fn submit(
        &self,
        owner_id: &str,
        uploads: Vec<MediaUpload>,
        caption: Option<String>,
    ) -> BatchReceipt {
        let _span = info_span!("submit", owner = %owner_id, files = uploads.len()).entered();

        let mut receipt = BatchReceipt::default();

        for upload in uploads {
            // Empty declared type: fall back to detection from the name.
            let mime_type = if upload.mime_type.is_empty() {
                mime_guess::from_path(&upload.file_name)
                    .first()
                    .map(|m| m.to_string())
                    .unwrap_or_default()
            } else {
                upload.mime_type.clone()
            };

            if let Err(reason) = self.validate(&mime_type, upload.byte_size) {
                log::debug!("Rejecting '{}': {}", upload.file_name, reason);
                receipt.rejected.push(RejectedUpload {
                    file_name: upload.file_name,
                    reason,
                });
                continue;
            }

            let job = JobRecord::new(
                owner_id,
                &upload.file_name,
                &mime_type,
                upload.byte_size,
                caption.clone(),
            );
            let paths = ArtifactPaths::generate(owner_id, &job.id, &mime_type);

            if let Err(e) = job_repo::insert(&self.db, &job) {
                log::error!("Failed to create ledger row for '{}': {}", upload.file_name, e);
                receipt.rejected.push(RejectedUpload {
                    file_name: upload.file_name,
                    reason: format!("ledger error: {}", e),
                });
                continue;
            }
            self.events.send(JobChangeEvent::from_record(&job));

            let executor = self.executor();
            let span = info_span!("job", job_id = %job.id, owner = %owner_id);
            let job_id = job.id.clone();
            tokio::spawn(
                async move {
                    executor.run(job, upload.bytes, paths).await;
                }
                .instrument(span),
            );

            receipt.accepted.push(job_id);
        }

        receipt
    }

    /// Re-runs the analysis stage of a failed job without touching its
    /// stored artifacts. Only jobs that failed during analysis qualify.
    pub async fn reanalyze(&self, owner_id: &str, job_id: &str) -> crate::error::Result<()> {
        let record = job_repo::find_owned(&self.db, owner_id, job_id)?.ok_or_else(|| {
            RetryError::NotFound {
                job_id: job_id.to_string(),
            }
        })?;

        if record.status != JobStatus::Failed {
            return Err(RetryError::NotRetryable {
                job_id: job_id.to_string(),
                status: record.status.to_string(),
            }
            .into());
        }
        if !record.failed_with(FailureKind::Analysis) {
            return Err(RetryError::NotAnalysisFailure {
                job_id: job_id.to_string(),
            }
            .into());
        }
        let stored_path = record.stored_artifact_path.clone().ok_or_else(|| {
            RetryError::MissingArtifact {
                job_id: job_id.to_string(),
            }
        })?;

        // Reflect activity immediately, then hand off to the background.
        let executor = self.executor();
        let mut job = record;
        executor
            .advance(&mut job, JobPatch::status(JobStatus::Processing))
            .await
            .map_err(crate::error::MediavaultError::from)?;

        let span = info_span!("reanalyze", job_id = %job.id, owner = %owner_id);
        tokio::spawn(
            async move {
                executor.analyze_and_finish(&mut job, &stored_path, false).await;
            }
            .instrument(span),
        );

        Ok(())
    }

    fn validate(&self, mime_type: &str, byte_size: u64) -> Result<(), String> {
        if !mime_type.starts_with("image/") {
            return Err(FailureKind::Validation.detail(format!(
                "unsupported media type '{}'",
                if mime_type.is_empty() { "unknown" } else { mime_type }
            )));
        }
        if byte_size > self.config.max_file_bytes {
            return Err(FailureKind::Validation.detail(format!(
                "file size {} exceeds the {} byte ceiling",
                byte_size, self.config.max_file_bytes
            )));
        }
        Ok(())
    }

    fn executor(&self) -> JobExecutor {
        JobExecutor::new(
            self.db.clone(),
            Arc::clone(&self.artifact_store),
            Arc::clone(&self.analysis),
            self.events.clone(),
            Arc::clone(&self.config),
        )
    }
}
