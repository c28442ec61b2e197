//! Plan execution: turn a [`ReconciliationPlan`] into backend calls.
//!
//! Each operation is issued individually (no surrounding transaction). A
//! failed operation is logged and recorded, and execution continues with
//! the next one: partial schema convergence is an accepted, reported
//! outcome. After the structural operations complete, the table is
//! re-probed so callers always see post-change state.

use crate::backend::SchemaBackend;
use crate::diff::{Operation, ReconciliationPlan};
use crate::error::Error;
use autoschema_model::TableSnapshot;

/// What happened while applying one plan.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// Operations that succeeded.
    pub applied: usize,
    /// Per-operation failures, with table and operation context.
    pub failures: Vec<Error>,
    /// The table's state re-probed after the last operation.
    pub snapshot: Option<TableSnapshot>,
}

impl PlanOutcome {
    pub fn fully_applied(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Apply every operation in order, then re-probe the table.
pub async fn apply_plan<B: SchemaBackend>(backend: &B, plan: &ReconciliationPlan) -> PlanOutcome {
    let mut outcome = PlanOutcome::default();

    for op in &plan.ops {
        match apply_op(backend, op).await {
            Ok(()) => {
                tracing::debug!(table = %op.table(), op = op.kind(), "applied");
                outcome.applied += 1;
            }
            Err(err) => {
                tracing::error!(
                    table = %op.table(),
                    op = op.kind(),
                    error = %err,
                    "ddl operation failed, continuing",
                );
                outcome.failures.push(Error::Ddl {
                    table: op.table().to_string(),
                    operation: op.kind().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    // Reflect post-change state for the caller; a probe failure here is
    // reported like any other, the operations above already ran.
    match backend.table_snapshot(&plan.table).await {
        Ok(snapshot) => outcome.snapshot = snapshot,
        Err(err) => outcome.failures.push(err),
    }

    outcome
}

async fn apply_op<B: SchemaBackend>(backend: &B, op: &Operation) -> crate::Result<()> {
    match op {
        Operation::CreateTable(spec) | Operation::CreateJoinTable(spec) => {
            backend.create_table(spec).await
        }
        Operation::DropTable(table) => backend.drop_table(table).await,
        Operation::AddColumn { table, field } => backend.add_column(table, field).await,
        Operation::RemoveColumn { table, column } => backend.remove_column(table, column).await,
        Operation::ChangeColumn {
            table,
            column,
            ty,
            constraints,
        } => backend.change_column(table, column, ty, constraints).await,
        Operation::AddIndex { table, index } => backend.add_index(table, index).await,
        Operation::RemoveIndex { table, name } => backend.remove_index(table, name).await,
    }
}
