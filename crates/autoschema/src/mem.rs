//! In-memory backend for tests and dry runs.
//!
//! Applies structural operations to [`TableSnapshot`] values and records a
//! log of every DDL call. Failure injection hooks simulate per-operation
//! DDL errors and unreachable connections, which is how the engine's
//! degraded modes are exercised without a database.

use crate::backend::SchemaBackend;
use crate::error::Error;
use crate::Result;
use autoschema_model::{
    ColumnType, FieldConstraints, FieldSpec, IndexSpec, LiveColumn, LiveIndex, TableSnapshot,
    TableSpec,
};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    tables: IndexMap<String, TableSnapshot>,
    log: Vec<String>,
    // (operation kind, table) pairs that fail on every call.
    fail_rules: Vec<(String, String)>,
    offline: bool,
}

/// A fake database holding snapshots directly.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent call to `kind` against `table` fails with a DDL
    /// error.
    pub fn fail_when(&self, kind: &str, table: &str) {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.fail_rules.push((kind.to_string(), table.to_string()));
    }

    /// Simulate total connection loss.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().expect("backend state poisoned").offline = offline;
    }

    /// The DDL calls issued so far, in order.
    pub fn ddl_log(&self) -> Vec<String> {
        self.state.lock().expect("backend state poisoned").log.clone()
    }

    /// Directly seed a live table, bypassing the log (test setup).
    pub fn seed_table(&self, name: &str, snapshot: TableSnapshot) {
        let mut state = self.state.lock().expect("backend state poisoned");
        state.tables.insert(name.to_string(), snapshot);
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state
            .lock()
            .expect("backend state poisoned")
            .tables
            .contains_key(name)
    }

    fn live_column(field: &FieldSpec) -> LiveColumn {
        LiveColumn {
            sql_type: Some(field.sql_type()),
            ty: Some(field.ty.clone()),
            limit: field.constraints.effective_limit(),
            precision: field.constraints.precision,
            scale: field.constraints.scale,
            null: field.constraints.effective_null(),
            default: field.constraints.default.clone(),
        }
    }

    fn run(
        &self,
        kind: &str,
        table: &str,
        entry: String,
        f: impl FnOnce(&mut State) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.state.lock().expect("backend state poisoned");
        if state.offline {
            return Err(Error::ConnectionUnavailable("backend offline".to_string()));
        }
        if state
            .fail_rules
            .iter()
            .any(|(k, t)| k == kind && t == table)
        {
            return Err(Error::Ddl {
                table: table.to_string(),
                operation: kind.to_string(),
                message: "injected failure".to_string(),
            });
        }
        f(&mut state)?;
        state.log.push(entry);
        Ok(())
    }
}

impl SchemaBackend for MemoryBackend {
    async fn list_tables(&self) -> Result<BTreeSet<String>> {
        let state = self.state.lock().expect("backend state poisoned");
        if state.offline {
            return Err(Error::ConnectionUnavailable("backend offline".to_string()));
        }
        Ok(state.tables.keys().cloned().collect())
    }

    async fn table_snapshot(&self, table: &str) -> Result<Option<TableSnapshot>> {
        let state = self.state.lock().expect("backend state poisoned");
        if state.offline {
            return Err(Error::ConnectionUnavailable("backend offline".to_string()));
        }
        if state
            .fail_rules
            .iter()
            .any(|(k, t)| k == "table_snapshot" && t == table)
        {
            return Err(Error::ConnectionUnavailable(format!(
                "probe of {table} failed"
            )));
        }
        Ok(state.tables.get(table).cloned())
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        let name = spec.table_name.clone();
        let mut snapshot = TableSnapshot::default();
        for field in spec.fields.values() {
            snapshot
                .columns
                .insert(field.name.clone(), Self::live_column(field));
        }
        self.run(
            "create_table",
            &name,
            format!("create_table {}", name),
            |state| {
                // Postgres fails creation of an existing relation; so do we.
                if state.tables.contains_key(&name) {
                    return Err(Error::Ddl {
                        table: name.clone(),
                        operation: "create_table".to_string(),
                        message: format!("relation {:?} already exists", name),
                    });
                }
                state.tables.insert(name.clone(), snapshot);
                Ok(())
            },
        )
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.run("drop_table", table, format!("drop_table {}", table), |state| {
            state.tables.shift_remove(table);
            Ok(())
        })
    }

    async fn add_column(&self, table: &str, field: &FieldSpec) -> Result<()> {
        let column = Self::live_column(field);
        let name = field.name.clone();
        self.run(
            "add_column",
            table,
            format!("add_column {}.{}", table, name),
            |state| {
                if let Some(snapshot) = state.tables.get_mut(table) {
                    snapshot.columns.insert(name.clone(), column);
                }
                Ok(())
            },
        )
    }

    async fn remove_column(&self, table: &str, column: &str) -> Result<()> {
        self.run(
            "remove_column",
            table,
            format!("remove_column {}.{}", table, column),
            |state| {
                if let Some(snapshot) = state.tables.get_mut(table) {
                    snapshot.columns.shift_remove(column);
                }
                Ok(())
            },
        )
    }

    async fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: &ColumnType,
        constraints: &FieldConstraints,
    ) -> Result<()> {
        let rebuilt = Self::live_column(&FieldSpec::with_constraints(
            column,
            ty.clone(),
            constraints.clone(),
        ));
        let column = column.to_string();
        self.run(
            "change_column",
            table,
            format!("change_column {}.{}", table, column),
            |state| {
                if let Some(snapshot) = state.tables.get_mut(table) {
                    snapshot.columns.insert(column.clone(), rebuilt);
                }
                Ok(())
            },
        )
    }

    async fn add_index(&self, table: &str, index: &IndexSpec) -> Result<()> {
        let live = LiveIndex {
            columns: index.columns.clone(),
            unique: index.unique,
        };
        let name = index.name.clone();
        self.run(
            "add_index",
            table,
            format!("add_index {} on {}", name, table),
            |state| {
                if let Some(snapshot) = state.tables.get_mut(table) {
                    snapshot.indexes.insert(name.clone(), live);
                }
                Ok(())
            },
        )
    }

    async fn remove_index(&self, table: &str, name: &str) -> Result<()> {
        self.run(
            "remove_index",
            table,
            format!("remove_index {} on {}", name, table),
            |state| {
                if let Some(snapshot) = state.tables.get_mut(table) {
                    snapshot.indexes.shift_remove(name);
                }
                Ok(())
            },
        )
    }
}
