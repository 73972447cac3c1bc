//! Import Adapter interface (§4.5).
//!
//! Trait shape grounded in `examples/other_examples/.../import.rs`'s
//! `Importer` trait; the two operations themselves (`translate_reference`,
//! `import_reference`) follow `original_source/.../service.py`'s use of
//! `self.import_adapter`.

use async_trait::async_trait;

use crate::error::McsResult;
use crate::types::ExportReference;

/// Translates a staged export into a final warehouse table and performs the
/// actual promotion. The core calls `translate_reference` synchronously
/// inside `submit_job` (§4.1 step 1) and `import_reference` exactly once per
/// successful job (§4.5).
#[async_trait]
pub trait ImportAdapter: Send + Sync {
    /// Pure and deterministic: same `staged` in, same `final` reference out,
    /// across calls (§8 "Round-trips"). Must not touch the warehouse.
    async fn translate_reference(&self, staged: &ExportReference) -> McsResult<ExportReference>;

    /// Idempotent with respect to `final_ref`: overwrites the destination
    /// table atomically from everything staged under `staged`'s prefix.
    /// Returns only once the promotion is durable.
    async fn import_reference(
        &self,
        staged: &ExportReference,
        final_ref: &ExportReference,
    ) -> McsResult<()>;
}

/// A deterministic in-memory adapter suitable for tests and local runs: it
/// derives the final table name from the staged payload and records imports
/// in memory rather than touching a real warehouse.
pub struct InMemoryImportAdapter {
    export_catalog: String,
    export_schema: String,
    imports: parking_lot::Mutex<Vec<(ExportReference, ExportReference)>>,
    fail_import: std::sync::atomic::AtomicBool,
}

impl InMemoryImportAdapter {
    pub fn new(export_catalog: impl Into<String>, export_schema: impl Into<String>) -> Self {
        Self {
            export_catalog: export_catalog.into(),
            export_schema: export_schema.into(),
            imports: parking_lot::Mutex::new(Vec::new()),
            fail_import: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Test hook: make the next and all subsequent `import_reference` calls fail.
    pub fn set_fail_import(&self, fail: bool) {
        self.fail_import
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn recorded_imports(&self) -> Vec<(ExportReference, ExportReference)> {
        self.imports.lock().clone()
    }
}

#[async_trait]
impl ImportAdapter for InMemoryImportAdapter {
    async fn translate_reference(&self, staged: &ExportReference) -> McsResult<ExportReference> {
        Ok(ExportReference {
            catalog_name: Some(self.export_catalog.clone()),
            schema_name: Some(self.export_schema.clone()),
            table_name: staged.table_name.clone(),
            export_type: crate::types::ExportType::WarehouseNative,
            columns: staged.columns.clone(),
            payload: format!(
                "{}.{}.{}",
                self.export_catalog, self.export_schema, staged.table_name
            ),
        })
    }

    async fn import_reference(
        &self,
        staged: &ExportReference,
        final_ref: &ExportReference,
    ) -> McsResult<()> {
        if self.fail_import.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::McsError::ImportFailed(
                "import backend unavailable".to_string(),
            ));
        }
        self.imports
            .lock()
            .push((staged.clone(), final_ref.clone()));
        Ok(())
    }
}
