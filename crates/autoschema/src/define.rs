//! Entity definitions: the imperative declaration surface.
//!
//! An [`EntityDef`] records one entity type's field, index, and
//! relationship declarations. It is a pure description: compiling it into
//! a [`TableSpec`] happens fresh on every reconciliation pass, and
//! redefining an entity in the [`crate::Reconciler`] replaces the old
//! definition entirely, so nothing accumulates across definitions.

use crate::Result;
use autoschema_model::{
    AssociationSpec, ColumnType, FieldConstraints, FieldSpec, IndexSpec, TableSpec, pluralize,
};

/// Inline index request on a field declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IndexDecl {
    /// No index.
    #[default]
    None,
    /// Index the declared column itself.
    On,
    /// Index a different column list instead.
    Columns(Vec<String>),
    /// Full options: column list plus uniqueness.
    Options { columns: Vec<String>, unique: bool },
}

#[derive(Debug, Clone)]
struct FieldDecl {
    names: Vec<String>,
    ty: ColumnType,
    constraints: FieldConstraints,
    index: IndexDecl,
}

#[derive(Debug, Clone)]
struct ExplicitIndex {
    columns: Vec<String>,
    unique: bool,
}

/// One entity type's declarations.
#[derive(Debug, Clone)]
pub struct EntityDef {
    name: String,
    table_name: String,
    primary_key: String,
    inheritance_column: String,
    fields: Vec<FieldDecl>,
    indexes: Vec<ExplicitIndex>,
    associations: Vec<AssociationSpec>,
}

impl EntityDef {
    /// Declare an entity type. The table name defaults to the pluralized
    /// entity name (`article` -> `articles`), the primary key to `id`,
    /// and the inheritance column to `type`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table_name = pluralize(&name);
        Self {
            name,
            table_name,
            primary_key: "id".to_string(),
            inheritance_column: "type".to_string(),
            fields: Vec::new(),
            indexes: Vec::new(),
            associations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub(crate) fn set_table_name(&mut self, table: &str) {
        self.table_name = table.to_string();
    }

    pub fn inheritance_column(&self) -> &str {
        &self.inheritance_column
    }

    /// Override the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Override the primary key column name.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Override the inheritance discriminator column name.
    pub fn discriminator(mut self, name: impl Into<String>) -> Self {
        self.inheritance_column = name.into();
        self
    }

    /// Declare one column.
    pub fn field(&mut self, name: &str, ty: ColumnType) -> &mut Self {
        self.field_full(&[name], ty, FieldConstraints::default(), IndexDecl::None)
    }

    /// Declare one column with constraints.
    pub fn field_with(
        &mut self,
        name: &str,
        ty: ColumnType,
        constraints: FieldConstraints,
    ) -> &mut Self {
        self.field_full(&[name], ty, constraints, IndexDecl::None)
    }

    /// Declare one indexed column.
    pub fn field_indexed(&mut self, name: &str, ty: ColumnType) -> &mut Self {
        self.field_full(&[name], ty, FieldConstraints::default(), IndexDecl::On)
    }

    /// Declare a column from a declaration-layer type keyword. Fails with
    /// [`autoschema_model::UnsupportedType`] for unknown keywords.
    pub fn field_kw(
        &mut self,
        name: &str,
        keyword: &str,
        constraints: FieldConstraints,
    ) -> Result<&mut Self> {
        let ty = ColumnType::parse(keyword)?;
        Ok(self.field_full(&[name], ty, constraints, IndexDecl::None))
    }

    /// The general form: several column names sharing one type, constraint
    /// set, and inline index request.
    pub fn field_full(
        &mut self,
        names: &[&str],
        ty: ColumnType,
        constraints: FieldConstraints,
        index: IndexDecl,
    ) -> &mut Self {
        self.fields.push(FieldDecl {
            names: names.iter().map(|n| n.to_string()).collect(),
            ty,
            constraints,
            index,
        });
        self
    }

    /// Shorthand: `created_at` and `updated_at` datetime columns.
    pub fn timestamps(&mut self) -> &mut Self {
        self.field_full(
            &["created_at", "updated_at"],
            ColumnType::DateTime,
            FieldConstraints::default(),
            IndexDecl::None,
        )
    }

    /// Declare an explicit index over an ordered column list.
    pub fn index(&mut self, columns: &[&str]) -> &mut Self {
        self.indexes.push(ExplicitIndex {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        });
        self
    }

    /// Declare an explicit unique index.
    pub fn unique_index(&mut self, columns: &[&str]) -> &mut Self {
        self.indexes.push(ExplicitIndex {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: true,
        });
        self
    }

    /// Declare a `belongs_to` relationship.
    pub fn belongs_to(&mut self, name: &str) -> &mut Self {
        self.associations.push(AssociationSpec::belongs_to(name));
        self
    }

    /// `belongs_to` with an explicit foreign key column.
    pub fn belongs_to_with_key(&mut self, name: &str, foreign_key: &str) -> &mut Self {
        self.associations.push(AssociationSpec {
            foreign_key: Some(foreign_key.to_string()),
            ..AssociationSpec::belongs_to(name)
        });
        self
    }

    /// Polymorphic `belongs_to`: implies both `<name>_id` and
    /// `<name>_type` columns with one composite index.
    pub fn belongs_to_polymorphic(&mut self, name: &str) -> &mut Self {
        self.associations.push(AssociationSpec {
            polymorphic: true,
            ..AssociationSpec::belongs_to(name)
        });
        self
    }

    /// Declare a many-to-many relationship (association name is the
    /// target's plural: `tags`).
    pub fn many_to_many(&mut self, name: &str) -> &mut Self {
        self.associations.push(AssociationSpec::many_to_many(name));
        self
    }

    /// Many-to-many with an explicit join table name.
    pub fn many_to_many_via(&mut self, name: &str, join_table: &str) -> &mut Self {
        self.associations.push(AssociationSpec {
            join_table: Some(join_table.to_string()),
            ..AssociationSpec::many_to_many(name)
        });
        self
    }

    pub fn associations(&self) -> &[AssociationSpec] {
        &self.associations
    }

    /// Compile the declarations into a fresh [`TableSpec`]: primary key
    /// column first, then declared fields in order, then indexes.
    pub fn build_table_spec(&self) -> TableSpec {
        let mut spec = TableSpec::new(&self.table_name, Some(&self.primary_key));
        spec.declare_field(FieldSpec::with_constraints(
            &self.primary_key,
            ColumnType::BigInt,
            FieldConstraints::default().not_null(),
        ));
        self.apply_declarations(&mut spec);
        spec
    }

    /// Apply this definition's field and index declarations onto an
    /// existing spec (used when specializations share the root's table).
    pub(crate) fn apply_declarations(&self, spec: &mut TableSpec) {
        for decl in &self.fields {
            for name in &decl.names {
                spec.declare_field(FieldSpec::with_constraints(
                    name,
                    decl.ty.clone(),
                    decl.constraints.clone(),
                ));
                match &decl.index {
                    IndexDecl::None => {}
                    IndexDecl::On => {
                        spec.declare_index(IndexSpec::derived(
                            &self.table_name,
                            &[name.as_str()],
                            false,
                        ));
                    }
                    IndexDecl::Columns(columns) => {
                        spec.declare_index(IndexSpec::derived(&self.table_name, columns, false));
                    }
                    IndexDecl::Options { columns, unique } => {
                        spec.declare_index(IndexSpec::derived(&self.table_name, columns, *unique));
                    }
                }
            }
        }
        for idx in &self.indexes {
            spec.declare_index(IndexSpec::derived(&self.table_name, &idx.columns, idx.unique));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let def = EntityDef::new("article");
        assert_eq!(def.table_name(), "articles");
        let spec = def.build_table_spec();
        assert_eq!(spec.primary_key.as_deref(), Some("id"));
        assert_eq!(spec.fields.len(), 1);
        assert!(spec.fields.contains_key("id"));
    }

    #[test]
    fn test_multi_name_declaration() {
        let mut def = EntityDef::new("article");
        def.timestamps();
        let spec = def.build_table_spec();
        assert!(spec.fields.contains_key("created_at"));
        assert!(spec.fields.contains_key("updated_at"));
        assert_eq!(spec.fields["created_at"].ty, ColumnType::DateTime);
    }

    #[test]
    fn test_inline_index_uses_derivation_rule() {
        let mut def = EntityDef::new("article");
        def.field_indexed("slug", ColumnType::String);
        def.field_full(
            &["state"],
            ColumnType::String,
            FieldConstraints::default(),
            IndexDecl::Options {
                columns: vec!["state".to_string(), "created_at".to_string()],
                unique: true,
            },
        );
        let spec = def.build_table_spec();
        assert!(spec.indexes.contains_key("idx_articles_slug"));
        let composite = &spec.indexes["idx_articles_state_created_at"];
        assert!(composite.unique);
        assert_eq!(composite.columns, vec!["state", "created_at"]);
    }

    #[test]
    fn test_field_kw_rejects_unknown_type() {
        let mut def = EntityDef::new("article");
        let err = def
            .field_kw("legacy", "money2", FieldConstraints::default())
            .unwrap_err();
        assert!(err.to_string().contains("money2"), "got: {err}");
    }

    #[test]
    fn test_build_is_fresh_each_call() {
        let mut def = EntityDef::new("article");
        def.field("title", ColumnType::String);
        let a = def.build_table_spec();
        let b = def.build_table_spec();
        assert_eq!(a, b);
        assert_eq!(a.fields.len(), 2);
    }

    #[test]
    fn test_raw_type_declaration() {
        let mut def = EntityDef::new("person");
        def.field_with(
            "role",
            ColumnType::Raw("ENUM('EMPLOYEE','CLIENT')".to_string()),
            FieldConstraints::default().limit(0),
        );
        let spec = def.build_table_spec();
        assert_eq!(spec.fields["role"].sql_type(), "enum('employee','client')");
    }
}
