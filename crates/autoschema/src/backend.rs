//! The database layer the reconciler talks to.
//!
//! [`SchemaBackend`] is the seam between the engine and the actual
//! database: introspection on one side, structural DDL on the other.
//! Production code uses [`crate::pg::PgBackend`]; tests and dry runs use
//! [`crate::mem::MemoryBackend`].

use crate::Result;
use autoschema_model::{
    ColumnType, FieldConstraints, FieldSpec, IndexSpec, SchemaSnapshot, TableSnapshot, TableSpec,
};
use std::collections::BTreeSet;

/// Introspection and DDL operations against one database.
///
/// Every call reflects the database's state at call time; implementations
/// must not cache snapshots across calls, since the engine re-probes after
/// structural changes.
pub trait SchemaBackend {
    /// List the names of all tables currently present.
    fn list_tables(&self) -> impl Future<Output = Result<BTreeSet<String>>>;

    /// Probe one table: its columns and indexes, or `None` if the table
    /// does not exist.
    fn table_snapshot(&self, table: &str) -> impl Future<Output = Result<Option<TableSnapshot>>>;

    /// Create a table with every column in the spec (and its primary key).
    /// Does not create indexes; those are separate operations.
    fn create_table(&self, spec: &TableSpec) -> impl Future<Output = Result<()>>;

    fn drop_table(&self, table: &str) -> impl Future<Output = Result<()>>;

    fn add_column(&self, table: &str, field: &FieldSpec) -> impl Future<Output = Result<()>>;

    fn remove_column(&self, table: &str, column: &str) -> impl Future<Output = Result<()>>;

    /// Rebuild a column to the given type and constraint set.
    fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: &ColumnType,
        constraints: &FieldConstraints,
    ) -> impl Future<Output = Result<()>>;

    fn add_index(&self, table: &str, index: &IndexSpec) -> impl Future<Output = Result<()>>;

    fn remove_index(&self, table: &str, name: &str) -> impl Future<Output = Result<()>>;
}

/// Take a fresh whole-database snapshot (table names only; per-table
/// detail comes from [`SchemaBackend::table_snapshot`]).
pub async fn probe_schema<B: SchemaBackend>(backend: &B) -> Result<SchemaSnapshot> {
    Ok(SchemaSnapshot {
        tables: backend.list_tables().await?,
    })
}
