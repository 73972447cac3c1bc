//! Job State Store (§2.D, §4.4).
//!
//! Owns every job's lifetime, its per-task status, and its append-only
//! updates-log. Grounded in `dog-queue/src/types/record.rs`'s
//! `JobRecord`/`JobStatus` transition methods, generalized from a single
//! terminal-status field to the task-aggregate lattice this service needs,
//! and in `dog-queue/src/backend/memory/storage.rs`'s pattern of mutating
//! under a lock then broadcasting an event after the lock is released.
//!
//! Locking discipline (§5): exactly one lock guards the job map. Broadcast
//! sends happen after the lock is dropped, using events already cloned out
//! of the critical section, so subscribers never observe a state that
//! predates the event that described it.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::instrument;

use crate::error::{McsError, McsResult};
use crate::types::{
    JobId, JobRecord, JobStatus, JobStatusResponse, JobUpdateEvent, JobUpdateKind, SubmitRequest,
    Task, TaskId, TaskStatus,
};

/// Bounded per-channel buffer (Design Notes §9: "per-job channels with
/// bounded buffers").
const UPDATE_CHANNEL_CAPACITY: usize = 256;

struct JobEntry {
    record: JobRecord,
    update_tx: broadcast::Sender<JobUpdateEvent>,
}

/// In-memory map of job-id → state machine, with push-style update events
/// (§2.D, §4.4).
pub struct JobStateStore {
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    any_job_tx: broadcast::Sender<JobUpdateEvent>,
}

impl JobStateStore {
    pub fn new() -> Self {
        let (any_job_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            any_job_tx,
        }
    }

    /// Record a freshly submitted job in `pending` (§4.1 Submit algorithm, step 2).
    #[instrument(skip(self, request))]
    pub fn create_job(&self, job_id: JobId, request: SubmitRequest) -> JobRecord {
        let now = Utc::now();
        let record = JobRecord::new(job_id.clone(), request, now);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let snapshot = record.clone();
        self.jobs.lock().insert(
            job_id.clone(),
            JobEntry {
                record,
                update_tx,
            },
        );
        self.emit(&job_id, JobUpdateKind::JobPending);
        snapshot
    }

    /// Attach the generated tasks once batches are known. Internal
    /// bookkeeping only: §3/§4.4 define events for job/task *status*
    /// transitions, not for batch-count determination, so this does not
    /// append to the updates-log.
    pub fn set_tasks(&self, job_id: &JobId, tasks: Vec<Task>, batch_count: u32) -> McsResult<()> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| McsError::NotFound(job_id.clone()))?;
        entry.record.batch_count = batch_count;
        entry.record.tasks = tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), t))
            .collect();
        Ok(())
    }

    /// The first task entering `running` also transitions the job
    /// `pending -> running` (§4.1 "Task dispatch").
    pub fn mark_task_running(&self, job_id: &JobId, task_id: &TaskId) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            let mut kinds = Vec::new();
            if record.status == JobStatus::Pending {
                record.status = JobStatus::Running;
                kinds.push(JobUpdateKind::JobRunning);
            }
            if let Some(task) = record.tasks.get_mut(task_id) {
                task.status = TaskStatus::Running;
            }
            kinds.push(JobUpdateKind::TaskRunning {
                task_id: task_id.clone(),
            });
            kinds
        })
    }

    pub fn mark_task_succeeded(&self, job_id: &JobId, task_id: &TaskId) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            if let Some(task) = record.tasks.get_mut(task_id) {
                task.status = TaskStatus::Succeeded;
            }
            vec![JobUpdateKind::TaskSucceeded {
                task_id: task_id.clone(),
            }]
        })
    }

    pub fn mark_task_failed(
        &self,
        job_id: &JobId,
        task_id: &TaskId,
        message: String,
    ) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            if let Some(task) = record.tasks.get_mut(task_id) {
                task.status = TaskStatus::Failed {
                    message: message.clone(),
                };
            }
            vec![JobUpdateKind::TaskFailed {
                task_id: task_id.clone(),
                message,
            }]
        })
    }

    pub fn mark_task_cancelled(&self, job_id: &JobId, task_id: &TaskId) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            if let Some(task) = record.tasks.get_mut(task_id) {
                task.status = TaskStatus::Cancelled;
            }
            vec![JobUpdateKind::TaskCancelled {
                task_id: task_id.clone(),
            }]
        })
    }

    /// `completed` iff every task succeeded and the final import succeeded
    /// (§4.1 "Completion policy"). Also covers the zero-batch boundary case,
    /// where the job goes `pending -> completed` directly.
    pub fn complete_job(&self, job_id: &JobId) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            record.status = JobStatus::Completed;
            vec![JobUpdateKind::JobCompleted]
        })
    }

    pub fn fail_job(&self, job_id: &JobId, cause: String) -> McsResult<()> {
        self.mutate_and_emit(job_id, |record| {
            record.status = JobStatus::Failed {
                cause: cause.clone(),
            };
            vec![JobUpdateKind::JobFailed { cause }]
        })
    }

    /// Snapshot for `JobStatus(job-id, include-stats?)` (§4.1, §6).
    pub fn job_status(&self, job_id: &JobId, include_stats: bool) -> McsResult<JobStatusResponse> {
        let jobs = self.jobs.lock();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| McsError::NotFound(job_id.clone()))?;
        Ok(JobStatusResponse::from_record(&entry.record, include_stats))
    }

    /// Full snapshot of a job's record, mainly for tests and diagnostics.
    pub fn job_record(&self, job_id: &JobId) -> McsResult<JobRecord> {
        let jobs = self.jobs.lock();
        jobs.get(job_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| McsError::NotFound(job_id.clone()))
    }

    /// `SubscribeJobUpdates(job-id, handler) -> unsubscribe` (§4.1): returns a
    /// receiver whose future events are this job's own, in append order
    /// (§5 "Ordering guarantees").
    pub fn subscribe_job(&self, job_id: &JobId) -> McsResult<broadcast::Receiver<JobUpdateEvent>> {
        let jobs = self.jobs.lock();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| McsError::NotFound(job_id.clone()))?;
        Ok(entry.update_tx.subscribe())
    }

    /// The broadcast channel keyed "any job" (§4.4).
    pub fn subscribe_any(&self) -> broadcast::Receiver<JobUpdateEvent> {
        self.any_job_tx.subscribe()
    }

    /// Mutate a job's record under the single store lock, collecting the
    /// `JobUpdateKind`s the mutation produced, then emit each as an event
    /// after the lock is released.
    fn mutate_and_emit<F>(&self, job_id: &JobId, mutate: F) -> McsResult<()>
    where
        F: FnOnce(&mut JobRecord) -> Vec<JobUpdateKind>,
    {
        let now = Utc::now();
        let (events, update_tx) = {
            let mut jobs = self.jobs.lock();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| McsError::NotFound(job_id.clone()))?;
            let kinds = mutate(&mut entry.record);
            let mut events = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let event = JobUpdateEvent {
                    job_id: job_id.clone(),
                    at: now,
                    kind,
                };
                entry.record.updates_log.push(event.clone());
                events.push(event);
            }
            entry.record.last_update = now;
            (events, entry.update_tx.clone())
        };
        for event in events {
            let _ = self.any_job_tx.send(event.clone());
            let _ = update_tx.send(event);
        }
        Ok(())
    }

    fn emit(&self, job_id: &JobId, kind: JobUpdateKind) {
        let now = Utc::now();
        let (event, update_tx) = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(job_id) else {
                return;
            };
            let event = JobUpdateEvent {
                job_id: job_id.clone(),
                at: now,
                kind,
            };
            entry.record.updates_log.push(event.clone());
            entry.record.last_update = now;
            (event, entry.update_tx.clone())
        };
        let _ = self.any_job_tx.send(event.clone());
        let _ = update_tx.send(event);
    }
}

impl Default for JobStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnsDefinition, RefDescriptor};
    use std::collections::HashMap as StdHashMap;

    fn request() -> SubmitRequest {
        SubmitRequest {
            query_str: "select 1".to_string(),
            source_dialect: "duckdb".to_string(),
            start: Utc::now(),
            end: Utc::now(),
            batch_size_days: 1,
            columns: ColumnsDefinition::new(vec![], "duckdb"),
            ref_descriptor: RefDescriptor {
                entity_type: "artifact".to_string(),
                window: None,
                unit: None,
                time_aggregation: None,
            },
            locals: StdHashMap::new(),
            dependent_tables_map: StdHashMap::new(),
            retries: None,
            execution_time: Utc::now(),
        }
    }

    #[test]
    fn unknown_job_status_is_not_found() {
        let store = JobStateStore::new();
        let result = store.job_status(&JobId::from("does-not-exist"), false);
        assert!(matches!(result, Err(McsError::NotFound(_))));
    }

    #[test]
    fn first_task_running_transitions_job_to_running() {
        let store = JobStateStore::new();
        let job_id = JobId::new();
        store.create_job(job_id.clone(), request());
        let task_id = TaskId::for_batch(&job_id, 0);
        store
            .set_tasks(
                &job_id,
                vec![Task::new(task_id.clone(), 0, "0.parquet".to_string())],
                1,
            )
            .unwrap();

        store.mark_task_running(&job_id, &task_id).unwrap();
        let status = store.job_status(&job_id, false).unwrap();
        assert_eq!(status.status.name(), "running");
    }

    #[tokio::test]
    async fn subscriber_observes_monotonic_prefix_of_updates_log() {
        let store = JobStateStore::new();
        let job_id = JobId::new();
        store.create_job(job_id.clone(), request());
        let mut rx = store.subscribe_job(&job_id).unwrap();

        let task_id = TaskId::for_batch(&job_id, 0);
        store
            .set_tasks(
                &job_id,
                vec![Task::new(task_id.clone(), 0, "0.parquet".to_string())],
                1,
            )
            .unwrap();
        store.mark_task_running(&job_id, &task_id).unwrap();
        store.mark_task_succeeded(&job_id, &task_id).unwrap();
        store.complete_job(&job_id).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(matches!(kinds[0], JobUpdateKind::JobRunning));
        assert!(matches!(kinds[1], JobUpdateKind::TaskRunning { .. }));
        assert!(matches!(kinds[2], JobUpdateKind::TaskSucceeded { .. }));
        assert!(matches!(kinds[3], JobUpdateKind::JobCompleted));
    }

    #[test]
    fn zero_batch_job_completes_directly_from_pending() {
        let store = JobStateStore::new();
        let job_id = JobId::new();
        store.create_job(job_id.clone(), request());
        store.set_tasks(&job_id, vec![], 0).unwrap();
        store.complete_job(&job_id).unwrap();

        let status = store.job_status(&job_id, false).unwrap();
        assert_eq!(status.status.name(), "completed");
        assert_eq!(status.progress.total, 0);
    }
}
