//! Cluster Manager (§2.A, §4.3).
//!
//! Owns the elastic worker pool's client handle and readiness state.
//! Provisioning, scaling, and health of the pool itself are delegated to the
//! `WorkerPool` the manager is constructed with — an external collaborator,
//! same as `dog-queue/src/adapter.rs`'s `QueueAdapter` treats its `backend`
//! as an opaque `Arc<B>` it forwards calls to rather than reimplementing.
//! `wait_for_ready`/`client` use a `tokio::sync::watch` the way
//! `WorkerHandle`'s shutdown `oneshot` gates worker lifecycle in the same
//! file.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::instrument;

use crate::error::McsResult;
use crate::objectstore::ObjectStore;
use crate::types::{JobId, RefDescriptor, TaskId};

/// The opaque worker RPC (§2 "The worker runtime ... treated as an opaque
/// `execute(batch, dependencies, output_path)` RPC", §4.1 "Task dispatch").
#[derive(Debug, Clone)]
pub struct TaskExecutionRequest {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub output_path: String,
    pub rendered_query: String,
    pub exported_dependent_tables: std::collections::HashMap<String, String>,
    pub ref_descriptor: RefDescriptor,
    pub retries: u32,
}

/// A worker pool: something the Cluster Manager can start and submit
/// `execute` calls to. Task-level retries on worker loss are the pool's
/// responsibility, not the Cluster Manager's (§4.3).
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Provision (or validate) the pool at the given floor/ceiling. Called
    /// once per `StartCluster`.
    async fn start(&self, min_workers: u32, max_workers: u32) -> McsResult<()>;

    /// Run one batch to completion (including the pool's own retries).
    /// Resolves once with the task's final outcome.
    async fn execute(&self, request: TaskExecutionRequest) -> McsResult<()>;

    /// Current number of healthy workers, for `Status()`.
    fn healthy_worker_count(&self) -> u32;
}

/// `StartCluster`/`ClusterStatus` response (§4.1, §4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub min_workers: u32,
    pub max_workers: u32,
    pub healthy_workers: u32,
    pub ready: bool,
}

/// Owns the elastic worker pool's client handle: create, scale, health,
/// shutdown (§2.A).
pub struct ClusterManager<P: WorkerPool> {
    pool: Arc<P>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    min_workers: AtomicU32,
    max_workers: AtomicU32,
    closed: AtomicBool,
}

impl<P: WorkerPool + 'static> ClusterManager<P> {
    pub fn new(pool: Arc<P>) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            pool,
            ready_tx,
            ready_rx,
            min_workers: AtomicU32::new(0),
            max_workers: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    #[instrument(skip(self))]
    pub async fn start_cluster(&self, min_workers: u32, max_workers: u32) -> McsResult<ClusterStatus> {
        self.pool.start(min_workers, max_workers).await?;
        self.min_workers.store(min_workers, Ordering::SeqCst);
        self.max_workers.store(max_workers, Ordering::SeqCst);
        let _ = self.ready_tx.send(true);
        Ok(self.status())
    }

    /// Suspends until a usable worker client exists (§4.3 `WaitForReady`).
    pub async fn wait_for_ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// The worker client handle, suspending until the cluster is ready
    /// (§4.3 `Client()`, §3 "Ownership").
    pub async fn client(&self) -> Arc<P> {
        self.wait_for_ready().await;
        Arc::clone(&self.pool)
    }

    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            min_workers: self.min_workers.load(Ordering::SeqCst),
            max_workers: self.max_workers.load(Ordering::SeqCst),
            healthy_workers: self.pool.healthy_worker_count(),
            ready: *self.ready_rx.borrow() && !self.closed.load(Ordering::SeqCst),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.ready_tx.send(false);
    }
}

/// In-memory worker pool for tests and local runs: "executes" a batch by
/// recording it and returning a pre-configured outcome, standing in for the
/// embedded analytical engine (§2 "The worker runtime").
pub struct InMemoryWorkerPool {
    healthy_workers: AtomicU32,
    fail_task_ids: std::sync::Mutex<std::collections::HashSet<String>>,
    executed: std::sync::Mutex<Vec<TaskExecutionRequest>>,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl InMemoryWorkerPool {
    pub fn new() -> Self {
        Self {
            healthy_workers: AtomicU32::new(0),
            fail_task_ids: std::sync::Mutex::new(std::collections::HashSet::new()),
            executed: std::sync::Mutex::new(Vec::new()),
            object_store: None,
        }
    }

    /// Stage a (zero-byte, test-only) parquet file under `output_path` on
    /// every successful `execute`, standing in for the embedded analytical
    /// engine actually writing its result (§6 "Staged output layout").
    pub fn with_object_store(mut self, object_store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(object_store);
        self
    }

    /// Test hook: make `execute` fail for a specific task id.
    pub fn fail_task(&self, task_id: &TaskId) {
        self.fail_task_ids
            .lock()
            .unwrap()
            .insert(task_id.as_str().to_string());
    }

    pub fn executed_task_ids(&self) -> Vec<TaskId> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.task_id.clone())
            .collect()
    }
}

impl Default for InMemoryWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerPool for InMemoryWorkerPool {
    async fn start(&self, _min_workers: u32, max_workers: u32) -> McsResult<()> {
        self.healthy_workers.store(max_workers.max(1), Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, request: TaskExecutionRequest) -> McsResult<()> {
        let should_fail = self
            .fail_task_ids
            .lock()
            .unwrap()
            .contains(request.task_id.as_str());
        self.executed.lock().unwrap().push(request.clone());
        if should_fail {
            return Err(crate::error::McsError::TaskFailed {
                task_id: request.task_id.as_str().to_string(),
                message: "simulated worker failure".to_string(),
            });
        }
        if let Some(store) = &self.object_store {
            store.put(&request.output_path, Vec::new()).await?;
        }
        Ok(())
    }

    fn healthy_worker_count(&self) -> u32 {
        self.healthy_workers.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_suspends_until_cluster_is_ready() {
        let pool = Arc::new(InMemoryWorkerPool::new());
        let manager = Arc::new(ClusterManager::new(pool));

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.client().await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        manager.start_cluster(1, 3).await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_ready_after_start_and_not_after_close() {
        let pool = Arc::new(InMemoryWorkerPool::new());
        let manager = ClusterManager::new(pool);
        assert!(!manager.status().ready);

        manager.start_cluster(2, 5).await.unwrap();
        assert!(manager.status().ready);
        assert_eq!(manager.status().healthy_workers, 5);

        manager.close();
        assert!(!manager.status().ready);
    }
}
