//! Schema diffing - compare a desired [`TableSpec`] against the live table.
//!
//! This module compares the desired shape of one table against a
//! [`TableSnapshot`] introspected from the database and produces an
//! ordered [`ReconciliationPlan`]. Plans are data, not side effects:
//! generation and execution are separate steps, so a plan can be printed
//! or inspected without touching the database.
//!
//! ## Operation ordering
//!
//! Operations are grouped by kind in a fixed order: table create, column
//! removals, column additions, column alterations, index removals, index
//! additions. Column identity must stabilize before index columns can be
//! resolved, and removed columns must vacate their names before a
//! same-named addition. Within a kind, operations are independent.

use autoschema_model::{ColumnType, FieldConstraints, FieldSpec, IndexSpec, TableSnapshot, TableSpec};
use std::fmt;

/// A single structural change.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Create a table with every currently-declared field.
    CreateTable(TableSpec),
    /// Drop a whole table (orphan sweep only).
    DropTable(String),
    /// Create a join table (no primary key).
    CreateJoinTable(TableSpec),
    /// Add a column.
    AddColumn { table: String, field: FieldSpec },
    /// Remove a column.
    RemoveColumn { table: String, column: String },
    /// Rebuild a column to a new type and constraint set.
    ChangeColumn {
        table: String,
        column: String,
        ty: ColumnType,
        constraints: FieldConstraints,
    },
    /// Add an index.
    AddIndex { table: String, index: IndexSpec },
    /// Remove an index by name.
    RemoveIndex { table: String, name: String },
}

impl Operation {
    /// Short operation keyword, used for logging and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateTable(_) => "create_table",
            Operation::DropTable(_) => "drop_table",
            Operation::CreateJoinTable(_) => "create_join_table",
            Operation::AddColumn { .. } => "add_column",
            Operation::RemoveColumn { .. } => "remove_column",
            Operation::ChangeColumn { .. } => "change_column",
            Operation::AddIndex { .. } => "add_index",
            Operation::RemoveIndex { .. } => "remove_index",
        }
    }

    /// The table this operation touches.
    pub fn table(&self) -> &str {
        match self {
            Operation::CreateTable(spec) | Operation::CreateJoinTable(spec) => &spec.table_name,
            Operation::DropTable(table) => table,
            Operation::AddColumn { table, .. }
            | Operation::RemoveColumn { table, .. }
            | Operation::ChangeColumn { table, .. }
            | Operation::AddIndex { table, .. }
            | Operation::RemoveIndex { table, .. } => table,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable(spec) => write!(f, "+ table {}", spec.table_name),
            Operation::DropTable(table) => write!(f, "- table {}", table),
            Operation::CreateJoinTable(spec) => write!(f, "+ join table {}", spec.table_name),
            Operation::AddColumn { field, .. } => {
                write!(f, "+ {}: {}", field.name, field.sql_type())
            }
            Operation::RemoveColumn { column, .. } => write!(f, "- {}", column),
            Operation::ChangeColumn {
                column,
                ty,
                constraints,
                ..
            } => write!(f, "~ {}: {}", column, ty.sql_type(constraints)),
            Operation::AddIndex { index, .. } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                write!(f, "+ {}INDEX {} ({})", unique, index.name, index.columns.join(", "))
            }
            Operation::RemoveIndex { name, .. } => write!(f, "- INDEX {}", name),
        }
    }
}

/// An ordered sequence of operations for one table.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationPlan {
    /// Table name.
    pub table: String,
    /// Operations in application order.
    pub ops: Vec<Operation>,
}

impl ReconciliationPlan {
    /// Returns true if the table already matches its declaration.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether this plan starts by creating the table.
    pub fn creates_table(&self) -> bool {
        matches!(
            self.ops.first(),
            Some(Operation::CreateTable(_) | Operation::CreateJoinTable(_))
        )
    }
}

impl fmt::Display for ReconciliationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "{}: no changes", self.table);
        }
        writeln!(f, "{}:", self.table)?;
        for op in &self.ops {
            writeln!(f, "  {}", op)?;
        }
        Ok(())
    }
}

/// Diff one desired table against its live counterpart.
///
/// `live` is `None` when the table is absent from the database, in which
/// case the plan is a single `CreateTable` carrying every declared field,
/// followed by the index additions (the freshly created table has the
/// exact desired columns, so the column steps are skipped).
pub fn diff_table(spec: &TableSpec, live: Option<&TableSnapshot>) -> ReconciliationPlan {
    let mut ops = Vec::new();

    let Some(live) = live else {
        ops.push(Operation::CreateTable(spec.clone()));
        for index in spec.indexes.values() {
            ops.push(Operation::AddIndex {
                table: spec.table_name.clone(),
                index: index.clone(),
            });
        }
        return ReconciliationPlan {
            table: spec.table_name.clone(),
            ops,
        };
    };

    // Column removal: live columns no longer declared. The primary key
    // column is never removed.
    for name in live.columns.keys() {
        if !spec.fields.contains_key(name) && !spec.is_primary_key(name) {
            ops.push(Operation::RemoveColumn {
                table: spec.table_name.clone(),
                column: name.clone(),
            });
        }
    }

    // Column addition: declared fields with no live counterpart.
    for field in spec.fields.values() {
        if !live.columns.contains_key(&field.name) {
            ops.push(Operation::AddColumn {
                table: spec.table_name.clone(),
                field: field.clone(),
            });
        }
    }

    // Column alteration: fields present on both sides, primary key
    // excluded.
    for field in spec.fields.values() {
        if spec.is_primary_key(&field.name) {
            continue;
        }
        if let Some(live_col) = live.columns.get(&field.name)
            && let Some(op) = diff_column(spec, field, live_col)
        {
            ops.push(op);
        }
    }

    // Index removal: live index names no longer derived from any
    // declaration.
    for name in live.indexes.keys() {
        if !spec.indexes.contains_key(name) {
            ops.push(Operation::RemoveIndex {
                table: spec.table_name.clone(),
                name: name.clone(),
            });
        }
    }

    // Index addition: derived names with no live counterpart.
    for index in spec.indexes.values() {
        if !live.indexes.contains_key(&index.name) {
            ops.push(Operation::AddIndex {
                table: spec.table_name.clone(),
                index: index.clone(),
            });
        }
    }

    ReconciliationPlan {
        table: spec.table_name.clone(),
        ops,
    }
}

/// Build the creation plan for a synthesized join table: the table itself
/// plus its unique composite index.
pub fn join_table_plan(spec: &TableSpec) -> ReconciliationPlan {
    let mut ops = vec![Operation::CreateJoinTable(spec.clone())];
    for index in spec.indexes.values() {
        ops.push(Operation::AddIndex {
            table: spec.table_name.clone(),
            index: index.clone(),
        });
    }
    ReconciliationPlan {
        table: spec.table_name.clone(),
        ops,
    }
}

/// Decide whether a column changed, and if so emit the `ChangeColumn`.
///
/// The type check compares the normalized lowercase native SQL type
/// strings when the live side reports one, and falls back to the logical
/// type otherwise. Independently, the fixed constraint set is compared
/// field by field: limit (a set precision implies the limit), nullability
/// (unset means nullable), and default. `precision` and `scale` are always
/// part of the emitted constraint set, because the database requires both
/// together even if only one changed.
fn diff_column(
    spec: &TableSpec,
    field: &FieldSpec,
    live: &autoschema_model::LiveColumn,
) -> Option<Operation> {
    let mut changed = false;

    let desired_sql = field.sql_type();
    match &live.sql_type {
        Some(live_sql) => {
            if desired_sql != live_sql.to_lowercase() {
                changed = true;
            }
        }
        None => {
            if live.ty.as_ref() != Some(&field.ty) {
                changed = true;
            }
        }
    }

    if field.constraints.effective_limit() != live.limit {
        changed = true;
    }
    if field.constraints.effective_null() != live.null {
        changed = true;
    }
    if field.constraints.default != live.default {
        changed = true;
    }

    if !changed {
        return None;
    }

    // The emitted constraint set is the normalized desired state: the
    // backend rebuilds the column from it, which keeps repeated passes
    // convergent.
    let constraints = FieldConstraints {
        limit: field.constraints.effective_limit(),
        precision: field.constraints.precision,
        scale: field.constraints.scale,
        null: Some(field.constraints.effective_null()),
        default: field.constraints.default.clone(),
    };

    Some(Operation::ChangeColumn {
        table: spec.table_name.clone(),
        column: field.name.clone(),
        ty: field.ty.clone(),
        constraints,
    })
}
