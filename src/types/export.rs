//! Export reference and columns definition types (§3 "Export Reference").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where a staged dataset physically lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportType {
    /// A set of blobs in object storage, addressed by a URI pattern with a
    /// wildcard (e.g. `s3://bucket/prefix/*.parquet`).
    ObjectStoreBlobSet,
    /// A table that already lives natively in the warehouse.
    WarehouseNative,
    /// A path on local disk (debug/test use only).
    LocalFilesystem,
}

/// One column's name and its type spelled in some source dialect.
pub type ColumnSpec = (String, String);

/// An ordered, dialect-tagged column list.
///
/// Ordering is load-bearing (§3 invariant: "columns ordering is stable") so this
/// wraps a `Vec`, never a `HashMap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsDefinition {
    pub columns: Vec<ColumnSpec>,
    pub dialect: String,
}

impl ColumnsDefinition {
    pub fn new(columns: Vec<ColumnSpec>, dialect: impl Into<String>) -> Self {
        Self {
            columns,
            dialect: dialect.into(),
        }
    }

    /// Render this column list's types as they'd be spelled in `target_dialect`.
    ///
    /// A full implementation would reach for a SQL-dialect type-mapping library;
    /// the core only needs enough of one to keep the round-trip property in
    /// SPEC_FULL.md §8 (`columns_as(source_dialect)` is the identity). Column
    /// names are dialect-independent; types pass through a small known-type
    /// table and otherwise pass through unchanged, matching any dialect the
    /// caller used to declare them in the first place.
    pub fn columns_as(&self, target_dialect: &str) -> Vec<ColumnSpec> {
        if target_dialect.eq_ignore_ascii_case(&self.dialect) {
            return self.columns.clone();
        }
        let table = dialect_type_table();
        self.columns
            .iter()
            .map(|(name, source_type)| {
                let mapped = table
                    .get(&(self.dialect.to_lowercase(), source_type.to_lowercase()))
                    .and_then(|by_target| by_target.get(&target_dialect.to_lowercase()))
                    .cloned()
                    .unwrap_or_else(|| source_type.clone());
                (name.clone(), mapped)
            })
            .collect()
    }
}

type DialectTypeTable = HashMap<(String, String), HashMap<String, String>>;

fn dialect_type_table() -> DialectTypeTable {
    let mut table: DialectTypeTable = HashMap::new();
    table.insert(
        ("duckdb".to_string(), "bigint".to_string()),
        HashMap::from([("trino".to_string(), "bigint".to_string())]),
    );
    table.insert(
        ("trino".to_string(), "bigint".to_string()),
        HashMap::from([("duckdb".to_string(), "bigint".to_string())]),
    );
    table.insert(
        ("duckdb".to_string(), "double".to_string()),
        HashMap::from([("trino".to_string(), "double".to_string())]),
    );
    table
}

/// An immutable descriptor pointing to a staged dataset (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReference {
    pub catalog_name: Option<String>,
    pub schema_name: Option<String>,
    pub table_name: String,
    pub export_type: ExportType,
    pub columns: ColumnsDefinition,
    /// Type-specific locator: an object-store URI pattern for
    /// `ObjectStoreBlobSet`, a fully-qualified name otherwise.
    pub payload: String,
}

impl ExportReference {
    /// Fully-qualified name, joining whichever of catalog/schema/table are set.
    pub fn table_fqn(&self) -> String {
        let mut parts = Vec::new();
        if let Some(c) = &self.catalog_name {
            parts.push(c.clone());
        }
        if let Some(s) = &self.schema_name {
            parts.push(s.clone());
        }
        parts.push(self.table_name.clone());
        parts.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 "Round-trips": `columns_as(source_dialect)` equals the original
    /// column list.
    #[test]
    fn columns_as_source_dialect_is_the_identity() {
        let cols = ColumnsDefinition::new(
            vec![
                ("value".to_string(), "bigint".to_string()),
                ("ratio".to_string(), "double".to_string()),
            ],
            "duckdb",
        );

        assert_eq!(cols.columns_as(&cols.dialect), cols.columns);
        // Case-insensitivity of the dialect match is also part of the identity.
        assert_eq!(cols.columns_as("DuckDB"), cols.columns);
    }

    #[test]
    fn columns_as_maps_known_types_across_dialects() {
        let cols = ColumnsDefinition::new(
            vec![
                ("value".to_string(), "bigint".to_string()),
                ("ratio".to_string(), "double".to_string()),
            ],
            "duckdb",
        );

        let as_trino = cols.columns_as("trino");
        assert_eq!(
            as_trino,
            vec![
                ("value".to_string(), "bigint".to_string()),
                ("ratio".to_string(), "double".to_string()),
            ]
        );
    }

    #[test]
    fn columns_as_passes_through_unknown_types_unchanged() {
        let cols = ColumnsDefinition::new(
            vec![("payload".to_string(), "json".to_string())],
            "duckdb",
        );

        assert_eq!(
            cols.columns_as("trino"),
            vec![("payload".to_string(), "json".to_string())]
        );
    }
}
