//! Export Cache (§2.B, §4.2).
//!
//! Single-flight, deduplicated export of every upstream warehouse table a job
//! references. Grounded in `dog-queue/src/backend/memory/storage.rs`'s
//! combination of a lock-protected map plus a broadcast/notify signal for
//! in-flight work, adapted from "lease a job" to "await a table export".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::instrument;

use crate::error::{McsError, McsResult};
use crate::types::ExportReference;

/// Performs the actual materialization of a warehouse table into object
/// storage. The cache drives at most one of these per table name at a time.
#[async_trait]
pub trait ExportBackend: Send + Sync {
    async fn export_table(
        &self,
        table_name: &str,
        day_bucket: chrono::NaiveDate,
    ) -> McsResult<ExportReference>;
}

enum Slot {
    Exporting(Arc<Notify>),
    Ready(ExportReference),
    Failed(String),
}

/// `ResolveExportReferences` / `AddExportTableReferences` / `InspectExportTableReferences` (§4.2).
pub struct ExportCache<B: ExportBackend> {
    backend: Arc<B>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl<B: ExportBackend + 'static> ExportCache<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve every requested table name to its (possibly newly exported)
    /// reference. At most one export task runs per table name at a time,
    /// regardless of how many concurrent callers request it (§4.2 invariant a).
    #[instrument(skip(self))]
    pub async fn resolve_export_references(
        self: &Arc<Self>,
        table_names: &[String],
        execution_time: DateTime<Utc>,
    ) -> McsResult<HashMap<String, ExportReference>> {
        let day_bucket = execution_time.date_naive();
        let mut waiters: Vec<(String, Arc<Notify>)> = Vec::new();
        let mut ready: HashMap<String, ExportReference> = HashMap::new();

        for name in table_names {
            let mut slots = self.slots.lock();
            match slots.get(name) {
                Some(Slot::Ready(reference)) => {
                    ready.insert(name.clone(), reference.clone());
                }
                Some(Slot::Exporting(notify)) => {
                    waiters.push((name.clone(), notify.clone()));
                }
                Some(Slot::Failed(_)) | None => {
                    let notify = Arc::new(Notify::new());
                    slots.insert(name.clone(), Slot::Exporting(notify.clone()));
                    drop(slots);
                    self.spawn_export(name.clone(), day_bucket, notify.clone());
                    waiters.push((name.clone(), notify));
                }
            }
        }

        for (name, notify) in waiters {
            loop {
                let current = {
                    let slots = self.slots.lock();
                    match slots.get(&name) {
                        Some(Slot::Ready(reference)) => Some(Ok(reference.clone())),
                        Some(Slot::Failed(message)) => Some(Err(message.clone())),
                        _ => None,
                    }
                };
                match current {
                    Some(Ok(reference)) => {
                        ready.insert(name, reference);
                        break;
                    }
                    Some(Err(message)) => {
                        return Err(McsError::DependencyExportFailed {
                            table: name,
                            message,
                        });
                    }
                    None => notify.notified().await,
                }
            }
        }

        Ok(ready)
    }

    fn spawn_export(
        self: &Arc<Self>,
        table_name: String,
        day_bucket: chrono::NaiveDate,
        notify: Arc<Notify>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.backend.export_table(&table_name, day_bucket).await;
            let mut slots = this.slots.lock();
            match outcome {
                Ok(reference) => {
                    slots.insert(table_name, Slot::Ready(reference));
                }
                Err(err) => {
                    slots.insert(table_name, Slot::Failed(err.to_string()));
                }
            }
            drop(slots);
            notify.notify_waiters();
        });
    }

    /// Test/seed hook: publish a ready reference directly, bypassing export (§4.2).
    pub fn add_export_table_references(&self, references: HashMap<String, ExportReference>) {
        let mut slots = self.slots.lock();
        for (name, reference) in references {
            slots.insert(name, Slot::Ready(reference));
        }
    }

    /// Test/debug hook: snapshot which table names are cached and in what state.
    pub fn inspect_export_table_references(&self) -> HashMap<String, String> {
        self.slots
            .lock()
            .iter()
            .map(|(name, slot)| {
                let state = match slot {
                    Slot::Exporting(_) => "exporting",
                    Slot::Ready(_) => "ready",
                    Slot::Failed(_) => "failed",
                };
                (name.clone(), state.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnsDefinition;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingBackend {
        calls: AtomicU32,
        delay: Duration,
        fail_names: Vec<String>,
    }

    #[async_trait]
    impl ExportBackend for CountingBackend {
        async fn export_table(
            &self,
            table_name: &str,
            _day_bucket: chrono::NaiveDate,
        ) -> McsResult<ExportReference> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_names.contains(&table_name.to_string()) {
                return Err(McsError::DependencyExportFailed {
                    table: table_name.to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(ExportReference {
                catalog_name: None,
                schema_name: None,
                table_name: table_name.to_string(),
                export_type: crate::types::ExportType::ObjectStoreBlobSet,
                columns: ColumnsDefinition::new(vec![], "duckdb"),
                payload: format!("s3://bucket/{}/*.parquet", table_name),
            })
        }
    }

    #[tokio::test]
    async fn concurrent_resolves_single_flight_one_export() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(50),
            fail_names: vec![],
        });
        let cache = Arc::new(ExportCache::new(backend.clone()));

        let now = Utc::now();
        let names = vec!["actual_x".to_string()];
        let c1 = Arc::clone(&cache);
        let c2 = Arc::clone(&cache);
        let n1 = names.clone();
        let n2 = names.clone();
        let (r1, r2) = tokio::join!(
            c1.resolve_export_references(&n1, now),
            c2.resolve_export_references(&n2, now)
        );

        let r1 = r1.unwrap();
        let r2 = r2.unwrap();
        assert_eq!(r1["actual_x"].payload, r2["actual_x"].payload);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_reference_is_stable_across_calls() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(1),
            fail_names: vec![],
        });
        let cache = Arc::new(ExportCache::new(backend));
        let now = Utc::now();
        let names = vec!["actual_y".to_string()];

        let first = cache
            .resolve_export_references(&names, now)
            .await
            .unwrap();
        let second = cache
            .resolve_export_references(&names, now)
            .await
            .unwrap();
        assert_eq!(first["actual_y"], second["actual_y"]);
    }

    #[tokio::test]
    async fn failed_export_fails_resolve() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(1),
            fail_names: vec!["actual_z".to_string()],
        });
        let cache = Arc::new(ExportCache::new(backend));
        let now = Utc::now();
        let names = vec!["actual_z".to_string()];

        let result = cache.resolve_export_references(&names, now).await;
        assert!(matches!(
            result,
            Err(McsError::DependencyExportFailed { table, .. }) if table == "actual_z"
        ));
    }
}
