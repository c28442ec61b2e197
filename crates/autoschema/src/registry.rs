//! The registry of tables this system manages.
//!
//! An explicit, injected object rather than process-global state: each
//! [`crate::Reconciler`] is constructed with its own registry, which makes
//! orphan-sweep behavior testable with a fresh registry per test. Only the
//! orchestrator mutates it, and only after a create or drop actually
//! succeeded.
//!
//! The registry lives in memory for the life of the process. `names` /
//! `restore` form the seam for persisting it externally if orphan
//! detection must survive restarts.

use std::collections::BTreeSet;

/// Tables created (and therefore governed) by this system.
#[derive(Debug, Clone, Default)]
pub struct ManagedTableRegistry {
    tables: BTreeSet<String>,
}

impl ManagedTableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from previously saved names.
    pub fn restore(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            tables: names.into_iter().collect(),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Record a table as managed. Called after its creation succeeded.
    pub fn insert(&mut self, table: &str) {
        self.tables.insert(table.to_string());
    }

    /// Forget a table. Called after its drop succeeded.
    pub fn remove(&mut self, table: &str) {
        self.tables.remove(table);
    }

    /// Sorted snapshot of the managed table names.
    pub fn names(&self) -> Vec<String> {
        self.tables.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
