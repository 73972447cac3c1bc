//! Scheduler (§2.E, §4.1): orchestrates the Cluster Manager, Export Cache,
//! Batch Generator, and Job State Store, and drives the final import.
//!
//! Grounded in `original_source/warehouse/metrics_tools/compute/service.py`'s
//! `MetricsCalculationService`, restructured around this crate's
//! adapter/engine split the way `dog-queue/src/adapter.rs`'s `QueueAdapter`
//! is generic over its backend: the Scheduler is generic over a
//! `WorkerPool`, an `ExportBackend`, and an `ImportAdapter`, constructed once
//! and shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use crate::batch::{batch_count, generate_query_batches};
use crate::cache::{ExportBackend, ExportCache};
use crate::cluster::{ClusterManager, ClusterStatus, TaskExecutionRequest, WorkerPool};
use crate::config::AppConfig;
use crate::error::{McsError, McsResult};
use crate::import::ImportAdapter;
use crate::observability::ServiceMetrics;
use crate::state::JobStateStore;
use crate::types::{
    ExportReference, ExportType, JobId, JobStatusResponse, JobUpdateEvent, SubmitRequest, Task,
    TaskId,
};

/// A live subscription returned by `subscribe_job_updates`; dropping or
/// calling `unsubscribe` stops the forwarding task (Design Notes §9:
/// "unsubscribe returns a handle that drops the subscription").
pub struct SubscriptionHandle {
    forward_task: tokio::task::JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.forward_task.abort();
    }
}

/// Orchestrates Cluster Manager (A), Export Cache (B), Batch Generator (C),
/// and Job State Store (D); invokes the Import Adapter (F) (§2.E).
pub struct Scheduler<P: WorkerPool, B: ExportBackend, I: ImportAdapter> {
    config: Arc<AppConfig>,
    cluster: Arc<ClusterManager<P>>,
    cache: Arc<ExportCache<B>>,
    state: Arc<JobStateStore>,
    import_adapter: Arc<I>,
    metrics: Arc<ServiceMetrics>,
}

impl<P, B, I> Scheduler<P, B, I>
where
    P: WorkerPool + 'static,
    B: ExportBackend + 'static,
    I: ImportAdapter + 'static,
{
    pub fn new(
        config: Arc<AppConfig>,
        cluster: Arc<ClusterManager<P>>,
        cache: Arc<ExportCache<B>>,
        import_adapter: Arc<I>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cluster,
            cache,
            state: Arc::new(JobStateStore::new()),
            import_adapter,
            metrics: Arc::new(ServiceMetrics::new()),
        })
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// `StartCluster(min, max) -> ClusterStatus` (§4.1).
    pub async fn start_cluster(&self, min_workers: u32, max_workers: u32) -> McsResult<ClusterStatus> {
        self.cluster.start_cluster(min_workers, max_workers).await
    }

    /// `ClusterStatus() -> ClusterStatus` (§4.1).
    pub fn cluster_status(&self) -> ClusterStatus {
        self.cluster.status()
    }

    /// `JobStatus(job-id, include-stats?) -> JobStatusResponse` (§4.1).
    pub fn job_status(&self, job_id: &JobId, include_stats: bool) -> McsResult<JobStatusResponse> {
        self.state.job_status(job_id, include_stats)
    }

    /// `SubscribeJobUpdates(job-id, handler) -> unsubscribe` (§4.1).
    ///
    /// The handler runs on a dedicated forwarding task, never inline with
    /// the state store's mutator (§4.1 contract, §5 "not suspension
    /// points").
    pub fn subscribe_job_updates<F>(&self, job_id: &JobId, mut handler: F) -> McsResult<SubscriptionHandle>
    where
        F: FnMut(JobUpdateEvent) + Send + 'static,
    {
        let mut rx = self.state.subscribe_job(job_id)?;
        let forward_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(SubscriptionHandle { forward_task })
    }

    /// `SubmitJob(request) -> (job-id, final-export-reference)` (§4.1).
    ///
    /// Non-blocking: returns as soon as the job is recorded `pending`. The
    /// rest of the job's lifecycle runs on a spawned task.
    #[instrument(skip(self, request))]
    pub async fn submit_job(
        self: &Arc<Self>,
        request: SubmitRequest,
    ) -> McsResult<(JobId, ExportReference)> {
        let job_id = JobId::new();
        let result_path_base = format!(
            "{}/{}/{}",
            self.config.service.results_path_prefix,
            request.execution_time.format("%Y/%m/%d/%H"),
            job_id.as_str(),
        );
        let calculation_export = ExportReference {
            catalog_name: None,
            schema_name: None,
            table_name: job_id.as_str().to_string(),
            export_type: ExportType::ObjectStoreBlobSet,
            columns: request.columns.clone(),
            payload: format!(
                "{}/{}/*.parquet",
                self.config.object_store.bucket_name, result_path_base
            ),
        };

        // Translated, not created: the core never issues DDL here (§4.1 step 1).
        let final_export_reference = self
            .import_adapter
            .translate_reference(&calculation_export)
            .await?;

        self.state.create_job(job_id.clone(), request.clone());
        self.metrics.record_job_submitted();

        let this = Arc::clone(self);
        let spawned_job_id = job_id.clone();
        let spawned_final_export = final_export_reference.clone();
        tokio::spawn(async move {
            this.run_job(
                spawned_job_id,
                result_path_base,
                request,
                calculation_export,
                spawned_final_export,
            )
            .await;
        });

        Ok((job_id, final_export_reference))
    }

    /// The async job handler (§4.1 step 3). Any error this returns was
    /// raised *before* the job reached a terminal state on its own (cluster
    /// unavailable, dependency export failed); every other terminal path is
    /// driven from inside `run_job_inner` directly so each job reaches
    /// exactly one terminal transition.
    async fn run_job(
        self: Arc<Self>,
        job_id: JobId,
        result_path_base: String,
        request: SubmitRequest,
        calculation_export: ExportReference,
        final_export: ExportReference,
    ) {
        if let Err(err) = self
            .run_job_inner(&job_id, &result_path_base, &request, &calculation_export, &final_export)
            .await
        {
            let cause = format!("{}: {}", err.cause_code(), err);
            warn!(job_id = %job_id, cause = %cause, "job failed before any task was dispatched");
            let _ = self.state.fail_job(&job_id, cause);
            self.metrics.record_job_failed();
        }
    }

    async fn run_job_inner(
        &self,
        job_id: &JobId,
        result_path_base: &str,
        request: &SubmitRequest,
        calculation_export: &ExportReference,
        final_export: &ExportReference,
    ) -> McsResult<()> {
        self.cluster.wait_for_ready().await;
        if !self.cluster.status().ready {
            return Err(McsError::ClusterUnavailable(
                "cluster closed before becoming ready".to_string(),
            ));
        }

        let exported_dependent_tables = self.resolve_dependent_tables(request).await?;
        let resolved_table_refs: HashMap<String, String> = exported_dependent_tables
            .iter()
            .map(|(logical, reference)| (logical.clone(), reference.payload.clone()))
            .collect();

        let requested_batch_count = batch_count(request);
        let stream = generate_query_batches(request.clone(), resolved_table_refs);
        tokio::pin!(stream);
        let batches: Vec<_> = stream.collect().await;
        let actual_batch_count = batches.len() as u32;
        if actual_batch_count != requested_batch_count {
            warn!(
                job_id = %job_id,
                requested = requested_batch_count,
                actual = actual_batch_count,
                "batch count mismatch; proceeding with the generator's actual count"
            );
        }

        let tasks: Vec<Task> = batches
            .iter()
            .map(|batch| {
                let task_id = TaskId::for_batch(job_id, batch.batch_index);
                let output_path = format!("{}/{}.parquet", result_path_base, batch.batch_index);
                Task::new(task_id, batch.batch_index, output_path)
            })
            .collect();
        self.state.set_tasks(job_id, tasks.clone(), actual_batch_count)?;

        let client = self.cluster.client().await;
        let retries = request.retries.unwrap_or(3);
        let mut dispatches = Vec::with_capacity(tasks.len());
        for (batch, task) in batches.iter().zip(tasks.iter()) {
            dispatches.push(self.dispatch_task(
                Arc::clone(&client),
                job_id.clone(),
                task.task_id.clone(),
                task.output_path.clone(),
                batch.rendered_query.clone(),
                exported_dependent_tables.clone(),
                request.ref_descriptor.clone(),
                retries,
            ));
        }
        let outcomes: Vec<Option<String>> = futures::future::join_all(dispatches).await;
        let failures: Vec<String> = outcomes.into_iter().flatten().collect();

        if !failures.is_empty() {
            let cause = format!(
                "{} task(s) failed: {}",
                failures.len(),
                failures.join("; ")
            );
            self.state.fail_job(job_id, cause)?;
            self.metrics.record_job_failed();
            return Ok(());
        }

        info!(job_id = %job_id, "importing final result into the warehouse");
        if let Err(err) = self
            .import_adapter
            .import_reference(calculation_export, final_export)
            .await
        {
            self.state
                .fail_job(job_id, format!("import: {}", err))?;
            self.metrics.record_job_failed();
            return Ok(());
        }

        self.state.complete_job(job_id)?;
        self.metrics.record_job_completed();
        Ok(())
    }

    /// Run one task to its final outcome and record it on the state store.
    /// Returns `Some(failure message)` on failure/cancellation, `None` on
    /// success — the Scheduler awaits exactly one future per task and has no
    /// retry loop of its own (§9a "Retry-then-cancel interaction").
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_task(
        &self,
        client: Arc<P>,
        job_id: JobId,
        task_id: TaskId,
        output_path: String,
        rendered_query: String,
        exported_dependent_tables: HashMap<String, ExportReference>,
        ref_descriptor: crate::types::RefDescriptor,
        retries: u32,
    ) -> Option<String> {
        self.state
            .mark_task_running(&job_id, &task_id)
            .ok();

        let exported_dependent_tables = exported_dependent_tables
            .into_iter()
            .map(|(logical, reference)| (logical, reference.payload))
            .collect();

        let request = TaskExecutionRequest {
            job_id: job_id.clone(),
            task_id: task_id.clone(),
            output_path,
            rendered_query,
            exported_dependent_tables,
            ref_descriptor,
            retries,
        };

        match client.execute(request).await {
            Ok(()) => {
                info!(job_id = %job_id, task_id = %task_id, "task completed");
                let _ = self.state.mark_task_succeeded(&job_id, &task_id);
                self.metrics.record_task_succeeded();
                None
            }
            Err(McsError::TaskCancelled { .. }) => {
                warn!(job_id = %job_id, task_id = %task_id, "task cancelled");
                let _ = self.state.mark_task_cancelled(&job_id, &task_id);
                self.metrics.record_task_cancelled();
                Some(format!("{}: cancelled", task_id))
            }
            Err(err) => {
                warn!(job_id = %job_id, task_id = %task_id, error = %err, "task failed");
                let message = err.to_string();
                let _ = self
                    .state
                    .mark_task_failed(&job_id, &task_id, message.clone());
                self.metrics.record_task_failed();
                Some(format!("{}: {}", task_id, message))
            }
        }
    }

    /// Reverse/forward dependency remap (§4.2 supplemented paragraph, §9a).
    ///
    /// The cache is keyed by *actual* warehouse table name, not the job's
    /// logical reference name, so the actual names are resolved first and
    /// the result is remapped back to logical names before batch rendering.
    async fn resolve_dependent_tables(
        &self,
        request: &SubmitRequest,
    ) -> McsResult<HashMap<String, ExportReference>> {
        let actual_to_logical: HashMap<String, String> = request
            .dependent_tables_map
            .iter()
            .map(|(logical, actual)| (actual.clone(), logical.clone()))
            .collect();
        let actual_names: Vec<String> = request.dependent_tables_map.values().cloned().collect();

        let resolved_by_actual = self
            .cache
            .resolve_export_references(&actual_names, request.execution_time)
            .await?;

        Ok(resolved_by_actual
            .into_iter()
            .filter_map(|(actual_name, reference)| {
                actual_to_logical
                    .get(&actual_name)
                    .map(|logical_name| (logical_name.clone(), reference))
            })
            .collect())
    }
}
