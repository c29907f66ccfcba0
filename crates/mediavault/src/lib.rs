pub mod analysis;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod transform;

pub use analysis::{AnalysisClient, HttpAnalysisClient, ImageAnalysis, StubAnalysis};
pub use broadcast::{JobChangeBroadcaster, JobChangeEvent};
pub use config::{AnalysisConfig, IngestConfig};
pub use error::{ConfigError, MediavaultError, Result, RetryError, StorageError, TransformError};
pub use ledger::{Database, DatabaseError, FailureKind, JobPatch, JobRecord, JobStatus};
pub use orchestrator::{BatchReceipt, MediaUpload, Orchestrator, RejectedUpload};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use sync::{JobView, StatusSummary, StatusSynchronizer};
