//! Job, task, and job-update-event types (§3 "Job", "Task", "Job Status",
//! "Job Update Event").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::export::ColumnsDefinition;
use super::ids::{JobId, TaskId};

/// The opaque descriptor echoed to the worker alongside each task (§4.1 "a `ref`
/// descriptor"). The core never interprets its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefDescriptor {
    pub entity_type: String,
    pub window: Option<i64>,
    pub unit: Option<String>,
    pub time_aggregation: Option<String>,
}

/// A job submission request (§4.1, §6 "Submit-job request (wire)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub query_str: String,
    pub source_dialect: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Per-batch window size, in days.
    pub batch_size_days: u32,
    pub columns: ColumnsDefinition,
    #[serde(rename = "ref")]
    pub ref_descriptor: RefDescriptor,
    pub locals: HashMap<String, serde_json::Value>,
    /// `logical-name -> actual-warehouse-name`.
    pub dependent_tables_map: HashMap<String, String>,
    pub retries: Option<u32>,
    /// Virtual "now" used for deterministic rendering; does not change during
    /// the job's lifetime.
    pub execution_time: DateTime<Utc>,
}

/// Per-task status (§3 "Task").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Cancelled
        )
    }
}

/// A single batch's task record (§3 "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub batch_index: u32,
    pub output_path: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(task_id: TaskId, batch_index: u32, output_path: String) -> Self {
        Self {
            task_id,
            batch_index,
            output_path,
            status: TaskStatus::Pending,
        }
    }
}

/// Job-level status lattice: `pending <= running <= {completed, failed}` (§8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed { cause: String },
}

impl JobStatus {
    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

/// What changed, at either job or task scope (§3 "Job Update Event").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobUpdateKind {
    JobPending,
    JobRunning,
    JobCompleted,
    JobFailed { cause: String },
    TaskRunning { task_id: TaskId },
    TaskSucceeded { task_id: TaskId },
    TaskFailed { task_id: TaskId, message: String },
    TaskCancelled { task_id: TaskId },
}

/// One append-only entry in a job's updates-log (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdateEvent {
    pub job_id: JobId,
    pub at: DateTime<Utc>,
    pub kind: JobUpdateKind,
}

/// Progress counters for a status response (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
}

/// The full in-memory record the Job State Store owns for one job (§3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
    pub request: SubmitRequest,
    pub batch_count: u32,
    pub tasks: HashMap<TaskId, Task>,
    pub status: JobStatus,
    pub last_update: DateTime<Utc>,
    pub updates_log: Vec<JobUpdateEvent>,
}

impl JobRecord {
    pub fn new(job_id: JobId, request: SubmitRequest, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            created_at: now,
            request,
            batch_count: 0,
            tasks: HashMap::new(),
            status: JobStatus::Pending,
            last_update: now,
            updates_log: Vec::new(),
        }
    }

    pub fn progress(&self) -> Progress {
        let completed = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count() as u32;
        Progress {
            completed,
            total: self.tasks.len() as u32,
        }
    }

    /// Derive duration stats from the updates-log on demand (§4.4, §9a).
    ///
    /// Only the stat pair matching the job's actual terminal path is populated;
    /// a job that failed before ever running leaves `running_to_*` unset.
    pub fn derive_stats(&self) -> HashMap<String, f64> {
        let mut stats = HashMap::new();

        let first_pending = self
            .updates_log
            .iter()
            .find(|e| matches!(e.kind, JobUpdateKind::JobPending))
            .map(|e| e.at);
        let first_running = self
            .updates_log
            .iter()
            .find(|e| matches!(e.kind, JobUpdateKind::JobRunning))
            .map(|e| e.at);
        let terminal_completed = self
            .updates_log
            .iter()
            .find(|e| matches!(e.kind, JobUpdateKind::JobCompleted))
            .map(|e| e.at);
        let terminal_failed = self
            .updates_log
            .iter()
            .find(|e| matches!(e.kind, JobUpdateKind::JobFailed { .. }))
            .map(|e| e.at);

        if let (Some(p), Some(r)) = (first_pending, first_running) {
            stats.insert(
                "pending_to_running_seconds".to_string(),
                (r - p).num_milliseconds() as f64 / 1000.0,
            );
        }
        if let (Some(r), Some(c)) = (first_running, terminal_completed) {
            stats.insert(
                "running_to_completed_seconds".to_string(),
                (c - r).num_milliseconds() as f64 / 1000.0,
            );
        }
        if let (Some(r), Some(f)) = (first_running, terminal_failed) {
            stats.insert(
                "running_to_failed_seconds".to_string(),
                (f - r).num_milliseconds() as f64 / 1000.0,
            );
        }

        stats
    }
}

/// Snapshot returned by `JobStatus` (§6 "Job-status response").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: Progress,
    pub stats: Option<HashMap<String, f64>>,
}

impl JobStatusResponse {
    pub fn from_record(record: &JobRecord, include_stats: bool) -> Self {
        Self {
            job_id: record.job_id.clone(),
            created_at: record.created_at,
            updated_at: record.last_update,
            status: record.status.clone(),
            progress: record.progress(),
            stats: include_stats.then(|| record.derive_stats()),
        }
    }
}
