//! Relationship expansion: the fields, indexes, and join tables a set of
//! association declarations implies.
//!
//! Expansion mutates the entity's [`TableSpec`] in place. Explicit field
//! declarations always win over relationship-derived ones of the same
//! name: `TableSpec::declare_field` keeps the first declaration, and the
//! builder runs before the expander.

use autoschema_model::{
    AssociationKind, AssociationSpec, ColumnType, FieldSpec, IndexSpec, SchemaSnapshot,
    TableSpec, join_table_name,
};

/// A join table implied by a many-to-many association.
#[derive(Debug, Clone)]
pub struct JoinTable {
    /// The synthesized spec: no primary key, two foreign key columns, one
    /// unique composite index.
    pub spec: TableSpec,
    /// Whether the table was absent from the live snapshot and therefore
    /// needs creating this pass.
    pub missing: bool,
}

/// Expand every association onto `spec`, returning the join tables the
/// many-to-many associations imply.
///
/// `entity_name` is the owning entity's singular name (used for the
/// entity-side join column, `article` -> `article_id`); `live` decides
/// whether each join table still needs creating.
pub fn expand_associations(
    spec: &mut TableSpec,
    entity_name: &str,
    associations: &[AssociationSpec],
    live: &SchemaSnapshot,
) -> Vec<JoinTable> {
    let mut join_tables = Vec::new();

    for assoc in associations {
        match assoc.kind {
            AssociationKind::BelongsTo => expand_belongs_to(spec, assoc),
            AssociationKind::ManyToMany => {
                let join = expand_many_to_many(spec, entity_name, assoc, live);
                join_tables.push(join);
            }
        }
    }

    join_tables
}

fn expand_belongs_to(spec: &mut TableSpec, assoc: &AssociationSpec) {
    let table = spec.table_name.clone();
    let foreign_key = assoc.foreign_key_column();
    spec.declare_field(FieldSpec::new(&foreign_key, ColumnType::Integer));

    if assoc.polymorphic {
        let type_column = assoc.type_column();
        spec.declare_field(FieldSpec::new(&type_column, ColumnType::String));
        // One composite index over both columns, not two single-column
        // indexes.
        spec.declare_index(IndexSpec::derived(
            &table,
            &[foreign_key.as_str(), type_column.as_str()],
            false,
        ));
    } else {
        spec.declare_index(IndexSpec::derived(&table, &[foreign_key.as_str()], false));
    }
}

fn expand_many_to_many(
    spec: &TableSpec,
    entity_name: &str,
    assoc: &AssociationSpec,
    live: &SchemaSnapshot,
) -> JoinTable {
    let table = assoc
        .join_table
        .clone()
        .unwrap_or_else(|| join_table_name(&spec.table_name, &assoc.target_table()));

    let own_key = format!("{}_id", entity_name);
    let target_key = assoc.join_target_column();

    // Sorted column order keeps the synthesized spec (and the derived
    // index name) identical no matter which side declared the
    // association.
    let mut keys = [own_key, target_key];
    keys.sort();

    let mut join = TableSpec::new(&table, None);
    for key in &keys {
        join.declare_field(FieldSpec::new(key, ColumnType::Integer));
    }
    join.declare_index(IndexSpec::derived(
        &table,
        &[keys[0].as_str(), keys[1].as_str()],
        true,
    ));

    JoinTable {
        missing: !live.contains(&table),
        spec: join,
    }
}

/// Ensure the inheritance discriminator column and its (non-unique) index
/// on an entity type with specializations.
pub fn expand_inheritance(spec: &mut TableSpec, inheritance_column: &str) {
    let table = spec.table_name.clone();
    spec.declare_field(FieldSpec::new(inheritance_column, ColumnType::String));
    spec.declare_index(IndexSpec::derived(&table, &[inheritance_column], false));
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoschema_model::{FieldConstraints, MAX_IDENTIFIER_LENGTH};
    use std::collections::BTreeSet;

    fn empty_snapshot() -> SchemaSnapshot {
        SchemaSnapshot::default()
    }

    fn articles_spec() -> TableSpec {
        let mut spec = TableSpec::new("articles", Some("id"));
        spec.declare_field(FieldSpec::new("id", ColumnType::BigInt));
        spec
    }

    #[test]
    fn test_belongs_to_adds_key_and_index() {
        let mut spec = articles_spec();
        expand_associations(
            &mut spec,
            "article",
            &[AssociationSpec::belongs_to("author")],
            &empty_snapshot(),
        );

        assert_eq!(spec.fields["author_id"].ty, ColumnType::Integer);
        let index = &spec.indexes["idx_articles_author_id"];
        assert_eq!(index.columns, vec!["author_id"]);
        assert!(!index.unique);
    }

    #[test]
    fn test_explicit_declaration_wins_over_derived() {
        let mut spec = articles_spec();
        // Explicitly declared as bigint not-null before expansion.
        spec.declare_field(FieldSpec::with_constraints(
            "author_id",
            ColumnType::BigInt,
            FieldConstraints::default().not_null(),
        ));
        expand_associations(
            &mut spec,
            "article",
            &[AssociationSpec::belongs_to("author")],
            &empty_snapshot(),
        );

        let field = &spec.fields["author_id"];
        assert_eq!(field.ty, ColumnType::BigInt);
        assert_eq!(field.constraints.null, Some(false));
        // The index is still ensured.
        assert!(spec.indexes.contains_key("idx_articles_author_id"));
    }

    #[test]
    fn test_polymorphic_yields_single_composite_index() {
        let mut spec = articles_spec();
        expand_associations(
            &mut spec,
            "article",
            &[AssociationSpec {
                polymorphic: true,
                ..AssociationSpec::belongs_to("owner")
            }],
            &empty_snapshot(),
        );

        assert_eq!(spec.fields["owner_id"].ty, ColumnType::Integer);
        assert_eq!(spec.fields["owner_type"].ty, ColumnType::String);
        assert_eq!(spec.indexes.len(), 1, "exactly one index: {:?}", spec.indexes.keys());
        let index = &spec.indexes["idx_articles_owner_id_owner_type"];
        assert_eq!(index.columns, vec!["owner_id", "owner_type"]);
    }

    #[test]
    fn test_many_to_many_synthesizes_join_table() {
        let mut spec = articles_spec();
        let joins = expand_associations(
            &mut spec,
            "article",
            &[AssociationSpec::many_to_many("tags")],
            &empty_snapshot(),
        );

        assert_eq!(joins.len(), 1);
        let join = &joins[0];
        assert!(join.missing);
        assert_eq!(join.spec.table_name, "articles_tags");
        assert_eq!(join.spec.primary_key, None);
        assert_eq!(
            join.spec.fields.keys().collect::<Vec<_>>(),
            vec!["article_id", "tag_id"]
        );
        let index = join.spec.indexes.values().next().unwrap();
        assert!(index.unique);
        assert_eq!(index.columns, vec!["article_id", "tag_id"]);
        // The owning table itself gains no columns.
        assert_eq!(spec.fields.len(), 1);
    }

    #[test]
    fn test_many_to_many_existing_join_table_not_recreated() {
        let mut spec = articles_spec();
        let live = SchemaSnapshot {
            tables: BTreeSet::from(["articles_tags".to_string()]),
        };
        let joins =
            expand_associations(&mut spec, "article", &[AssociationSpec::many_to_many("tags")], &live);
        assert!(!joins[0].missing);
    }

    #[test]
    fn test_join_index_name_truncated() {
        let mut def = TableSpec::new("extraordinarily_long_collection_name_one", Some("id"));
        let joins = expand_associations(
            &mut def,
            "extraordinarily_long_collection_name_one",
            &[AssociationSpec::many_to_many(
                "extraordinarily_long_collection_name_twos",
            )],
            &empty_snapshot(),
        );
        let index = joins[0].spec.indexes.values().next().unwrap();
        assert!(index.name.len() <= MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn test_inheritance_discriminator() {
        let mut spec = articles_spec();
        expand_inheritance(&mut spec, "type");
        assert_eq!(spec.fields["type"].ty, ColumnType::String);
        let index = &spec.indexes["idx_articles_type"];
        assert!(!index.unique);
    }
}
