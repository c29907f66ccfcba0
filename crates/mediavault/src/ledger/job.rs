//! Job record, status machine vocabulary, and partial-update patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a job inside the ingestion pipeline.
///
/// Transitions only move forward through the pipeline, except the failure
/// edge from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploading,
    Processing,
    Pending,
    AiProcessing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Non-terminal statuses, in pipeline order. Drives the active-set query.
    pub const ACTIVE: [JobStatus; 4] = [
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::Pending,
        JobStatus::AiProcessing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Pending => "pending",
            JobStatus::AiProcessing => "ai_processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a stored status string. Unknown values default to `processing`
/// (non-terminal) so the timeout backstop can still reclaim the job.
pub(crate) fn parse_status(s: &str, job_id: &str) -> JobStatus {
    match s {
        "uploading" => JobStatus::Uploading,
        "processing" => JobStatus::Processing,
        "pending" => JobStatus::Pending,
        "ai_processing" => JobStatus::AiProcessing,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        other => {
            log::warn!(
                "Unknown job status '{}' for job {}, defaulting to processing",
                other,
                job_id
            );
            JobStatus::Processing
        }
    }
}

/// Failure taxonomy recorded in `error_detail` as `<kind>: <reason>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    StorageWrite,
    StorageCleanup,
    Analysis,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation_error",
            FailureKind::StorageWrite => "storage_write_error",
            FailureKind::StorageCleanup => "storage_cleanup_error",
            FailureKind::Analysis => "analysis_error",
            FailureKind::Timeout => "timeout_error",
        }
    }

    /// Renders an `error_detail` value.
    pub fn detail(&self, reason: impl std::fmt::Display) -> String {
        format!("{}: {}", self.as_str(), reason)
    }

    /// Whether a stored `error_detail` was recorded under this kind.
    pub fn matches(&self, detail: &str) -> bool {
        detail.starts_with(self.as_str())
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `jobs` table.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub stored_artifact_path: Option<String>,
    pub thumbnail_artifact_path: Option<String>,
    pub thumb_width: Option<u32>,
    pub thumb_height: Option<u32>,
    pub caption: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub dominant_colors: Option<Vec<String>>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a fresh record in the initial `uploading` state.
    pub fn new(
        owner_id: &str,
        original_name: &str,
        mime_type: &str,
        byte_size: u64,
        caption: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            byte_size,
            stored_artifact_path: None,
            thumbnail_artifact_path: None,
            thumb_width: None,
            thumb_height: None,
            caption,
            status: JobStatus::Uploading,
            progress: 0,
            tags: None,
            description: None,
            dominant_colors: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
            analyzed_at: None,
        }
    }

    /// Age of the job relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Whether the stored failure was recorded under the given kind.
    pub fn failed_with(&self, kind: FailureKind) -> bool {
        self.status == JobStatus::Failed
            && self
                .error_detail
                .as_deref()
                .is_some_and(|detail| kind.matches(detail))
    }
}

/// A partial update applied to a single row. Only set fields are written;
/// `error_detail` distinguishes "leave" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub stored_artifact_path: Option<String>,
    pub thumbnail_artifact_path: Option<String>,
    pub thumb_width: Option<u32>,
    pub thumb_height: Option<u32>,
    pub tags: Option<Vec<String>>,
    pub description: Option<String>,
    pub dominant_colors: Option<Vec<String>>,
    pub error_detail: Option<Option<String>>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// A terminal failure patch.
    pub fn failure(kind: FailureKind, reason: impl std::fmt::Display, progress: u8) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(progress),
            error_detail: Some(Some(kind.detail(reason))),
            ..Default::default()
        }
    }

    /// Applies the patch to an in-memory record, mirroring what the
    /// repository writes to the row.
    pub fn apply_to(&self, record: &mut JobRecord, updated_at: DateTime<Utc>) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(progress) = self.progress {
            record.progress = progress;
        }
        if let Some(ref path) = self.stored_artifact_path {
            record.stored_artifact_path = Some(path.clone());
        }
        if let Some(ref path) = self.thumbnail_artifact_path {
            record.thumbnail_artifact_path = Some(path.clone());
        }
        if let Some(width) = self.thumb_width {
            record.thumb_width = Some(width);
        }
        if let Some(height) = self.thumb_height {
            record.thumb_height = Some(height);
        }
        if let Some(ref tags) = self.tags {
            record.tags = Some(tags.clone());
        }
        if let Some(ref description) = self.description {
            record.description = Some(description.clone());
        }
        if let Some(ref colors) = self.dominant_colors {
            record.dominant_colors = Some(colors.clone());
        }
        if let Some(ref detail) = self.error_detail {
            record.error_detail = detail.clone();
        }
        if let Some(analyzed_at) = self.analyzed_at {
            record.analyzed_at = Some(analyzed_at);
        }
        record.updated_at = updated_at;
    }
}
