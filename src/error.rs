//! Structured error types for the metrics calculation service.
//!
//! Mirrors the split in `dog-queue`'s error module: a top-level service error
//! enum for everything the public API can reject outright, distinct from the
//! free-form failure strings recorded on individual jobs and tasks (those can
//! originate from arbitrary worker exceptions and are not typed here).

use thiserror::Error;

use crate::types::JobId;

/// Convenience result alias for fallible service operations.
pub type McsResult<T> = Result<T, McsError>;

/// Errors the service API (`submit_job`, `job_status`, `start_cluster`, ...) can
/// return directly. Corresponds to the error kinds in SPEC_FULL.md §7.
#[derive(Debug, Error)]
pub enum McsError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("dependency export failed for table `{table}`: {message}")]
    DependencyExportFailed { table: String, message: String },

    #[error("task `{task_id}` failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("task `{task_id}` was cancelled")]
    TaskCancelled { task_id: String },

    #[error("import failed: {0}")]
    ImportFailed(String),

    #[error("job not found: {0}")]
    NotFound(JobId),
}

impl McsError {
    /// Machine-readable cause string, stable across versions, used as the `cause`
    /// recorded on a failed job (§7 "every terminal state carries a machine-readable
    /// cause").
    pub fn cause_code(&self) -> &'static str {
        match self {
            McsError::Configuration(_) => "configuration",
            McsError::ClusterUnavailable(_) => "cluster-unavailable",
            McsError::DependencyExportFailed { .. } => "dependency-export-failed",
            McsError::TaskFailed { .. } => "task-failed",
            McsError::TaskCancelled { .. } => "task-cancelled",
            McsError::ImportFailed(_) => "import-failed",
            McsError::NotFound(_) => "not-found",
        }
    }
}
