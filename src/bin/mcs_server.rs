//! Process entry point: load configuration, start tracing, stand up the
//! cluster, and keep the scheduler alive while jobs are submitted through
//! whatever transport wraps it.
//!
//! This binary wires the core up to the in-memory collaborators
//! ([`InMemoryWorkerPool`], [`InMemoryObjectStore`], [`InMemoryImportAdapter`])
//! since the real worker RPC, export backend, and warehouse client are
//! external collaborators outside this crate's scope (DESIGN.md). A
//! deployment swapping in real backends only needs to provide its own
//! `WorkerPool`/`ExportBackend`/`ImportAdapter` impls and call
//! `Scheduler::new` the same way.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use metrics_calc_service::cache::{ExportBackend, ExportCache};
use metrics_calc_service::cluster::{ClusterManager, InMemoryWorkerPool};
use metrics_calc_service::config::AppConfig;
use metrics_calc_service::import::InMemoryImportAdapter;
use metrics_calc_service::objectstore::InMemoryObjectStore;
use metrics_calc_service::scheduler::Scheduler;
use metrics_calc_service::types::{ColumnsDefinition, ExportReference, ExportType};
use metrics_calc_service::McsResult;

/// Placeholder export backend for local runs: stages an empty table at a
/// deterministic path rather than issuing a real warehouse export. Swap for
/// a real `ExportBackend` impl in a production deployment.
struct LocalExportBackend {
    bucket_name: String,
}

#[async_trait]
impl ExportBackend for LocalExportBackend {
    async fn export_table(
        &self,
        table_name: &str,
        day_bucket: chrono::NaiveDate,
    ) -> McsResult<ExportReference> {
        Ok(ExportReference {
            catalog_name: None,
            schema_name: None,
            table_name: table_name.to_string(),
            export_type: ExportType::ObjectStoreBlobSet,
            columns: ColumnsDefinition::new(vec![], "duckdb"),
            payload: format!(
                "s3://{}/exports/{}/{}/*.parquet",
                self.bucket_name, table_name, day_bucket
            ),
        })
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() -> McsResult<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Arc::new(AppConfig::load(config_path.as_deref())?);
    info!(bucket = %config.object_store.bucket_name, "loaded configuration");

    let object_store = Arc::new(InMemoryObjectStore::new());
    let pool = Arc::new(InMemoryWorkerPool::new().with_object_store(object_store));
    let cluster = Arc::new(ClusterManager::new(pool));
    cluster
        .start_cluster(config.cluster.min_workers, config.cluster.max_workers)
        .await?;
    info!(
        min = config.cluster.min_workers,
        max = config.cluster.max_workers,
        "cluster ready"
    );

    let export_backend = Arc::new(LocalExportBackend {
        bucket_name: config.object_store.bucket_name.clone(),
    });
    let cache = Arc::new(ExportCache::new(export_backend));

    let import_adapter = Arc::new(InMemoryImportAdapter::new(
        config.export_backend.export_catalog.clone(),
        config.export_backend.export_schema.clone(),
    ));

    let _scheduler = Scheduler::new(config, cluster, cache, import_adapter);
    info!("scheduler started; awaiting submissions");

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    info!("shutdown signal received");

    Ok(())
}
