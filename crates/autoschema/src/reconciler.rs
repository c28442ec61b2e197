//! The reconciliation pass: entities in, converged schema out.
//!
//! A [`Reconciler`] owns the entity definitions, the managed-table
//! registry, and a backend. Each call to [`Reconciler::reconcile_all`]
//! recomputes every desired table from scratch, diffs it against the live
//! schema, applies the resulting plans, and finally sweeps orphaned
//! managed tables. Passes are idempotent: a second pass over an untouched
//! database produces empty plans.
//!
//! Entities registered as specializations share their root's table. Their
//! declarations are merged into the root's spec depth-first, and the
//! root's table gains the inheritance discriminator column.

use crate::apply::apply_plan;
use crate::backend::{SchemaBackend, probe_schema};
use crate::define::EntityDef;
use crate::diff::{ReconciliationPlan, diff_table, join_table_plan};
use crate::error::Error;
use crate::expand::{expand_associations, expand_inheritance};
use crate::registry::ManagedTableRegistry;
use crate::Result;
use autoschema_model::{AssociationSpec, SchemaSnapshot};
use indexmap::IndexMap;
use std::collections::BTreeSet;

/// What happened to one table during a pass.
#[derive(Debug)]
pub struct TableReport {
    pub table: String,
    /// The plan that was computed (possibly empty).
    pub plan: ReconciliationPlan,
    /// Operations that succeeded.
    pub applied: usize,
    /// Per-operation failures; the rest of the plan still ran.
    pub failures: Vec<Error>,
}

/// An entity whose table could not be reconciled this pass.
#[derive(Debug)]
pub struct SkippedEntity {
    pub entity: String,
    pub reason: String,
}

/// The outcome of one full reconciliation pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub tables: Vec<TableReport>,
    pub skipped: Vec<SkippedEntity>,
    /// Orphaned managed tables dropped by the sweep.
    pub dropped: Vec<String>,
    /// Failures from the orphan sweep itself.
    pub sweep_failures: Vec<Error>,
}

impl PassReport {
    /// True when the pass changed nothing and skipped nothing.
    pub fn is_noop(&self) -> bool {
        self.tables.iter().all(|t| t.plan.is_empty())
            && self.skipped.is_empty()
            && self.dropped.is_empty()
            && self.sweep_failures.is_empty()
    }

    pub fn operations_applied(&self) -> usize {
        self.tables.iter().map(|t| t.applied).sum()
    }
}

/// Drives entity definitions toward a converged database schema.
pub struct Reconciler<B: SchemaBackend> {
    backend: B,
    registry: ManagedTableRegistry,
    defs: IndexMap<String, EntityDef>,
    // child entity name -> parent entity name
    parent_of: IndexMap<String, String>,
}

impl<B: SchemaBackend> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self::with_registry(backend, ManagedTableRegistry::new())
    }

    /// Start from a previously saved registry, so orphan detection covers
    /// tables created by earlier processes.
    pub fn with_registry(backend: B, registry: ManagedTableRegistry) -> Self {
        Self {
            backend,
            registry,
            defs: IndexMap::new(),
            parent_of: IndexMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &ManagedTableRegistry {
        &self.registry
    }

    /// Register an entity. Redefining a name replaces the old definition
    /// entirely.
    pub fn define(&mut self, def: EntityDef) {
        let name = def.name().to_string();
        self.parent_of.shift_remove(&name);
        self.defs.insert(name, def);
    }

    /// Remove an entity definition (and any specialization link). Its
    /// table becomes an orphan-sweep candidate on the next pass if this
    /// system created it.
    pub fn undefine(&mut self, name: &str) {
        self.defs.shift_remove(name);
        self.parent_of.shift_remove(name);
        // Children of a removed parent become roots with their own table.
        self.parent_of.retain(|_, parent| parent != name);
    }

    /// Register an entity as a specialization of `parent`. It shares the
    /// parent's root table; its own declarations are merged into that
    /// table's spec.
    pub fn define_specialization(&mut self, parent: &str, def: EntityDef) {
        let name = def.name().to_string();
        self.parent_of.insert(name.clone(), parent.to_string());
        self.defs.insert(name, def);
    }

    /// Run one full pass. Fails outright only when the initial schema
    /// probe cannot reach the database; per-entity trouble downgrades to a
    /// skip.
    pub async fn reconcile_all(&mut self) -> Result<PassReport> {
        let live = probe_schema(&self.backend).await?;
        let mut report = PassReport::default();
        let mut produced: BTreeSet<String> = BTreeSet::new();

        for (root, descendants) in self.root_entities() {
            let entity = root.name().to_string();
            if let Err(err) = self
                .reconcile_entity(&root, &descendants, &live, &mut produced, &mut report)
                .await
            {
                tracing::warn!(entity = %entity, error = %err, "skipping entity this pass");
                report.skipped.push(SkippedEntity {
                    entity,
                    reason: err.to_string(),
                });
            }
        }

        self.sweep_orphans(&live, &produced, &mut report).await;
        Ok(report)
    }

    /// Roots (entities with no parent) in definition order, each with its
    /// descendants collected depth-first.
    fn root_entities(&self) -> Vec<(EntityDef, Vec<EntityDef>)> {
        let mut children: IndexMap<&str, Vec<&str>> = IndexMap::new();
        for (child, parent) in &self.parent_of {
            children
                .entry(parent.as_str())
                .or_default()
                .push(child.as_str());
        }

        let mut out = Vec::new();
        for (name, def) in &self.defs {
            if self.parent_of.contains_key(name) {
                continue;
            }
            let mut descendants = Vec::new();
            self.collect_descendants(name, &children, &mut descendants);
            out.push((def.clone(), descendants));
        }
        out
    }

    fn collect_descendants(
        &self,
        name: &str,
        children: &IndexMap<&str, Vec<&str>>,
        out: &mut Vec<EntityDef>,
    ) {
        let Some(direct) = children.get(name) else {
            return;
        };
        for child in direct {
            if let Some(def) = self.defs.get(*child) {
                out.push(def.clone());
                self.collect_descendants(child, children, out);
            }
        }
    }

    async fn reconcile_entity(
        &mut self,
        root: &EntityDef,
        descendants: &[EntityDef],
        live: &SchemaSnapshot,
        produced: &mut BTreeSet<String>,
        report: &mut PassReport,
    ) -> Result<()> {
        let mut spec = root.build_table_spec();
        let mut associations: Vec<AssociationSpec> = root.associations().to_vec();

        if !descendants.is_empty() {
            expand_inheritance(&mut spec, root.inheritance_column());
        }
        for child in descendants {
            let mut child = child.clone();
            child.set_table_name(&spec.table_name);
            child.apply_declarations(&mut spec);
            associations.extend_from_slice(child.associations());
        }

        let join_tables = expand_associations(&mut spec, root.name(), &associations, live);

        produced.insert(spec.table_name.clone());
        let snapshot = self.backend.table_snapshot(&spec.table_name).await?;
        let plan = diff_table(&spec, snapshot.as_ref());
        self.run_plan(plan, report).await;

        for join in join_tables {
            // Two entities declaring the same many-to-many both synthesize
            // this join table; only the first sight of it this pass may
            // create it. `insert` returning false means another entity
            // already handled it.
            if !produced.insert(join.spec.table_name.clone()) {
                continue;
            }
            if join.missing {
                self.run_plan(join_table_plan(&join.spec), report).await;
            }
        }

        Ok(())
    }

    /// Apply one plan and fold the outcome into the report. A table whose
    /// creation succeeded becomes managed.
    async fn run_plan(&mut self, plan: ReconciliationPlan, report: &mut PassReport) {
        if plan.is_empty() {
            tracing::debug!(table = %plan.table, "table up to date");
            report.tables.push(TableReport {
                table: plan.table.clone(),
                plan,
                applied: 0,
                failures: Vec::new(),
            });
            return;
        }

        let creating = plan.creates_table();
        let outcome = apply_plan(&self.backend, &plan).await;

        let create_failed = outcome.failures.iter().any(|err| {
            matches!(
                err,
                Error::Ddl { operation, .. }
                    if operation == "create_table" || operation == "create_join_table"
            )
        });
        if creating && !create_failed {
            self.registry.insert(&plan.table);
        }

        tracing::info!(
            table = %plan.table,
            applied = outcome.applied,
            failed = outcome.failures.len(),
            "plan applied",
        );
        report.tables.push(TableReport {
            table: plan.table.clone(),
            plan,
            applied: outcome.applied,
            failures: outcome.failures,
        });
    }

    /// Drop managed tables no longer produced by any definition. Tables
    /// never recorded in the registry are left alone, whatever their
    /// origin.
    async fn sweep_orphans(
        &mut self,
        live: &SchemaSnapshot,
        produced: &BTreeSet<String>,
        report: &mut PassReport,
    ) {
        for table in self.registry.names() {
            if produced.contains(&table) || !live.contains(&table) {
                continue;
            }
            match self.backend.drop_table(&table).await {
                Ok(()) => {
                    self.registry.remove(&table);
                    tracing::info!(table = %table, "dropped orphaned table");
                    report.dropped.push(table);
                }
                Err(err) => {
                    tracing::warn!(table = %table, error = %err, "orphan drop failed");
                    report.sweep_failures.push(Error::Ddl {
                        table,
                        operation: "drop_table".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}
