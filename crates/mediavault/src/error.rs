use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediavaultError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] crate::analysis::AnalysisError),

    #[error("Retry error: {0}")]
    Retry(#[from] RetryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::ledger::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Empty media payload")]
    EmptyInput,

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode thumbnail: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid artifact path '{path}'")]
    InvalidPath { path: String },

    #[error("Failed to write blob '{path}': {reason}")]
    WriteBlob { path: String, reason: String },

    #[error("Failed to remove blobs: {}", .failed.join(", "))]
    RemoveBlobs { failed: Vec<String> },

    #[error("Blob not found: {path}")]
    NotFound { path: String },
}

/// Errors from the explicit re-analysis path. These are caller errors —
/// executor failures never surface here, they land on the job row.
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("Job {job_id} is {status} and cannot be re-analyzed")]
    NotRetryable { job_id: String, status: String },

    #[error("Job {job_id} did not fail during analysis")]
    NotAnalysisFailure { job_id: String },

    #[error("Job {job_id} has no stored artifact to analyze")]
    MissingArtifact { job_id: String },
}

pub type Result<T> = std::result::Result<T, MediavaultError>;
