//! Declarative schema reconciliation for Postgres.
//!
//! Declare entity types with [`EntityDef`] (fields, indexes,
//! relationships), hand them to a [`Reconciler`], and run a pass: the
//! engine probes the live schema, diffs each desired table against it,
//! applies the resulting DDL, and sweeps tables it created that no
//! definition produces anymore. Passes are idempotent and convergent,
//! so the reconciler can run on every application boot.
//!
//! ```no_run
//! use autoschema::{ColumnType, EntityDef, PgBackend, Reconciler};
//!
//! # async fn demo() -> autoschema::Result<()> {
//! let backend = PgBackend::connect("postgres://localhost/app")?;
//! let mut rec = Reconciler::new(backend);
//!
//! let mut article = EntityDef::new("article");
//! article
//!     .field("title", ColumnType::String)
//!     .field("body", ColumnType::Text)
//!     .belongs_to("author")
//!     .many_to_many("tags")
//!     .timestamps();
//! rec.define(article);
//!
//! let report = rec.reconcile_all().await?;
//! println!("applied {} operations", report.operations_applied());
//! # Ok(())
//! # }
//! ```

pub mod apply;
pub mod backend;
pub mod define;
pub mod diff;
pub mod error;
pub mod expand;
pub mod mem;
pub mod pg;
pub mod reconciler;
pub mod registry;

pub use autoschema_model as model;

pub use apply::{PlanOutcome, apply_plan};
pub use backend::{SchemaBackend, probe_schema};
pub use define::{EntityDef, IndexDecl};
pub use diff::{Operation, ReconciliationPlan, diff_table, join_table_plan};
pub use error::Error;
pub use expand::{JoinTable, expand_associations, expand_inheritance};
pub use mem::MemoryBackend;
pub use pg::PgBackend;
pub use reconciler::{PassReport, Reconciler, SkippedEntity, TableReport};
pub use registry::ManagedTableRegistry;

pub use autoschema_model::{
    AssociationKind, AssociationSpec, ColumnType, FieldConstraints, FieldSpec, IndexSpec,
    SchemaSnapshot, TableSnapshot, TableSpec,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
