//! Schema model types for autoschema.
//!
//! This crate contains the types shared between the desired-schema side
//! (entity definitions compiled into a [`TableSpec`]) and the live side
//! (snapshots introspected from the database). It has no database
//! dependency of its own; the engine crate owns all I/O.
//!
//! ## Naming Convention
//!
//! Entity names use singular form (`article`, `tag`); their default table
//! names are the plural (`articles`, `tags`). Join tables for many-to-many
//! relationships join the two table names sorted lexicographically:
//! `articles_tags`.

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Maximum identifier length the database accepts (Postgres: 63 bytes).
///
/// Derived names (indexes in particular) are truncated to this length so
/// that re-deriving the same name is deterministic across passes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use autoschema_model::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes identifiers to avoid issues with reserved keywords like
/// `user`, `order`, `table`, `group`, etc. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Truncate an identifier to [`MAX_IDENTIFIER_LENGTH`], respecting UTF-8
/// boundaries. Identifiers are expected to be ASCII snake_case; the
/// boundary loop only matters for pathological inputs.
pub fn truncate_ident(name: &str) -> String {
    if name.len() <= MAX_IDENTIFIER_LENGTH {
        return name.to_string();
    }
    let mut len = MAX_IDENTIFIER_LENGTH;
    while len > 0 && !name.is_char_boundary(len) {
        len -= 1;
    }
    name[..len].to_string()
}

/// Generate a standard index name for a table and ordered column list.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by
/// underscore, truncated to [`MAX_IDENTIFIER_LENGTH`]. Re-deriving the name
/// for the same column list always yields the same string, which the diff
/// engine relies on.
///
/// # Examples
///
/// ```
/// assert_eq!(autoschema_model::index_name("articles", &["author_id"]), "idx_articles_author_id");
/// assert_eq!(
///     autoschema_model::index_name("articles", &["owner_id", "owner_type"]),
///     "idx_articles_owner_id_owner_type",
/// );
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    truncate_ident(&format!("idx_{}_{}", table, cols.join("_")))
}

/// Default join table name for a many-to-many relationship: the two table
/// names sorted lexicographically and joined by underscore.
pub fn join_table_name(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", first, second)
}

/// Pluralize an entity name into its default table name.
///
/// Covers the common English patterns (`article` -> `articles`,
/// `category` -> `categories`). Irregular plurals are not handled; declare
/// the table name explicitly for those.
pub fn pluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y')
        && !stem.is_empty()
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        return format!("{}ies", stem);
    }
    if name.ends_with('s') {
        return format!("{}es", name);
    }
    format!("{}s", name)
}

/// Singularize a plural association name (`tags` -> `tag`,
/// `categories` -> `category`). Inverse of [`pluralize`] for the patterns
/// it covers; names it cannot reduce are returned unchanged.
pub fn singularize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        return format!("{}y", stem);
    }
    if let Some(stem) = name.strip_suffix("ses") {
        return format!("{}s", stem);
    }
    if let Some(stem) = name.strip_suffix('s') {
        return stem.to_string();
    }
    name.to_string()
}

/// Error for a field declaration whose type keyword is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported column type keyword: {keyword:?}")]
pub struct UnsupportedType {
    /// The keyword as received from the declaration layer.
    pub keyword: String,
}

/// Logical column types.
///
/// A closed set, plus [`ColumnType::Raw`] as the escape hatch for native
/// type strings declared verbatim (e.g. `ENUM('EMPLOYEE','CLIENT')`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Bounded text, `character varying`
    String,
    /// Unbounded text
    Text,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// DOUBLE PRECISION
    Float,
    /// NUMERIC (arbitrary precision)
    Decimal,
    /// BOOLEAN
    Boolean,
    /// DATE
    Date,
    /// TIMESTAMPTZ
    DateTime,
    /// BYTEA
    Binary,
    /// A native type string passed through verbatim.
    Raw(std::string::String),
}

impl ColumnType {
    /// Parse a declaration-layer type keyword.
    ///
    /// Unknown keywords fail with [`UnsupportedType`]; raw native types do
    /// not go through this path (they are declared as [`ColumnType::Raw`]).
    pub fn parse(keyword: &str) -> Result<Self, UnsupportedType> {
        match keyword {
            "string" => Ok(ColumnType::String),
            "text" => Ok(ColumnType::Text),
            "integer" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::BigInt),
            "float" => Ok(ColumnType::Float),
            "decimal" => Ok(ColumnType::Decimal),
            "boolean" => Ok(ColumnType::Boolean),
            "date" => Ok(ColumnType::Date),
            "datetime" => Ok(ColumnType::DateTime),
            "binary" => Ok(ColumnType::Binary),
            other => Err(UnsupportedType {
                keyword: other.to_string(),
            }),
        }
    }

    /// The declaration keyword for this type (`Raw` reports its payload).
    pub fn keyword(&self) -> &str {
        match self {
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Float => "float",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::DateTime => "datetime",
            ColumnType::Binary => "binary",
            ColumnType::Raw(s) => s,
        }
    }

    /// Render the canonical lowercase native SQL type, applying the
    /// relevant constraints (limit for `string`, precision/scale for
    /// `decimal`).
    ///
    /// Both the desired side and the live side render through this function
    /// so that the diff engine can compare type strings byte-for-byte.
    pub fn sql_type(&self, constraints: &FieldConstraints) -> String {
        match self {
            ColumnType::String => match constraints.effective_limit() {
                Some(limit) => format!("character varying({})", limit),
                None => "character varying".to_string(),
            },
            ColumnType::Text => "text".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Float => "double precision".to_string(),
            ColumnType::Decimal => match (constraints.precision, constraints.scale) {
                (Some(p), Some(s)) => format!("numeric({},{})", p, s),
                (Some(p), None) => format!("numeric({})", p),
                _ => "numeric".to_string(),
            },
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Date => "date".to_string(),
            ColumnType::DateTime => "timestamp with time zone".to_string(),
            ColumnType::Binary => "bytea".to_string(),
            ColumnType::Raw(native) => native.to_lowercase(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword())
    }
}

/// The fixed constraint set attached to a field declaration.
///
/// Compared field-by-field by the diff engine; there is deliberately no
/// open-ended attribute map here, so the "changed" predicate stays
/// auditable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldConstraints {
    /// Length for `string`, byte width hints for other types.
    pub limit: Option<u32>,
    /// Total digits for `decimal`.
    pub precision: Option<u32>,
    /// Fractional digits for `decimal`.
    pub scale: Option<u32>,
    /// Tri-state nullability: unset defaults to nullable.
    pub null: Option<bool>,
    /// Default value expression, rendered verbatim.
    pub default: Option<String>,
}

impl FieldConstraints {
    /// The limit to diff and apply: an explicit `limit`, or `precision`
    /// when limit is unset (a set precision implies the limit).
    pub fn effective_limit(&self) -> Option<u32> {
        self.limit.or(self.precision)
    }

    /// Nullability with the unset case resolved: unset means nullable.
    ///
    /// This default applies uniformly at column creation and alteration.
    pub fn effective_null(&self) -> bool {
        self.null.unwrap_or(true)
    }

    /// Builder-style helpers for the common declaration sites.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.null = Some(false);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.null = Some(true);
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// A single desired column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Column name, case-sensitive, unique per table.
    pub name: String,
    /// Logical type.
    pub ty: ColumnType,
    /// Constraint set.
    pub constraints: FieldConstraints,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            constraints: FieldConstraints::default(),
        }
    }

    pub fn with_constraints(
        name: impl Into<String>,
        ty: ColumnType,
        constraints: FieldConstraints,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            constraints,
        }
    }

    /// Canonical lowercase native SQL type for this field.
    pub fn sql_type(&self) -> String {
        self.ty.sql_type(&self.constraints)
    }
}

/// A desired index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Derived (or explicit) index name, already truncated to the
    /// database's identifier limit.
    pub name: String,
    /// Ordered column list; order matters for composite indexes.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
}

impl IndexSpec {
    /// Create an index spec with the name derived from the table and
    /// column list via [`index_name`].
    pub fn derived(table: &str, columns: &[impl AsRef<str>], unique: bool) -> Self {
        Self {
            name: index_name(table, columns),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
            unique,
        }
    }
}

/// The desired shape of one table, built fresh each reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    /// Table name.
    pub table_name: String,
    /// Primary key column name; `None` for join tables.
    pub primary_key: Option<String>,
    /// Columns by name, insertion order preserved.
    pub fields: IndexMap<String, FieldSpec>,
    /// Indexes by derived name, insertion order preserved.
    pub indexes: IndexMap<String, IndexSpec>,
}

impl TableSpec {
    pub fn new(table_name: impl Into<String>, primary_key: Option<&str>) -> Self {
        Self {
            table_name: table_name.into(),
            primary_key: primary_key.map(|s| s.to_string()),
            fields: IndexMap::new(),
            indexes: IndexMap::new(),
        }
    }

    /// Declare a field. The first declaration of a name wins; later
    /// declarations of the same name (typically relationship-derived) are
    /// ignored. Returns whether the field was inserted.
    pub fn declare_field(&mut self, field: FieldSpec) -> bool {
        if self.fields.contains_key(&field.name) {
            return false;
        }
        self.fields.insert(field.name.clone(), field);
        true
    }

    /// Declare an index. Deduplicated by derived name, so redeclaring an
    /// index over the same column list is a no-op.
    pub fn declare_index(&mut self, index: IndexSpec) -> bool {
        if self.indexes.contains_key(&index.name) {
            return false;
        }
        self.indexes.insert(index.name.clone(), index);
        true
    }

    /// Whether `column` is this table's primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.as_deref() == Some(column)
    }
}

/// The set of tables present in the database at probe time.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    pub tables: BTreeSet<String>,
}

impl SchemaSnapshot {
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }
}

/// A live column as introspected from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    /// Native SQL type string, lowercase, with modifiers
    /// (e.g. `character varying(500)`), when the backend reports one.
    pub sql_type: Option<String>,
    /// Logical type when the native type maps onto one.
    pub ty: Option<ColumnType>,
    pub limit: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    /// Live nullability is always known.
    pub null: bool,
    pub default: Option<String>,
}

/// A live index as introspected from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveIndex {
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Everything known about one live table: columns and indexes by name.
///
/// Re-read from the database after structural changes; never patched in
/// place by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSnapshot {
    pub columns: IndexMap<String, LiveColumn>,
    pub indexes: IndexMap<String, LiveIndex>,
}

/// Relationship kinds. A closed set: adding a kind forces every `match`
/// over associations to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    BelongsTo,
    ManyToMany,
}

/// A declared relationship on an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSpec {
    /// Association name: singular for `belongs_to` (`author`), plural for
    /// `many_to_many` (`tags`).
    pub name: String,
    pub kind: AssociationKind,
    /// Explicit foreign key column override.
    pub foreign_key: Option<String>,
    /// Polymorphic `belongs_to`: also implies a `<name>_type` column.
    pub polymorphic: bool,
    /// Explicit join table override for `many_to_many`.
    pub join_table: Option<String>,
}

impl AssociationSpec {
    pub fn belongs_to(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AssociationKind::BelongsTo,
            foreign_key: None,
            polymorphic: false,
            join_table: None,
        }
    }

    pub fn many_to_many(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AssociationKind::ManyToMany,
            foreign_key: None,
            polymorphic: false,
            join_table: None,
        }
    }

    /// Foreign key column: the explicit override, or `<name>_id`.
    pub fn foreign_key_column(&self) -> String {
        self.foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.name))
    }

    /// Foreign key column for the target side of a many-to-many join
    /// table: the explicit override, or the singularized association name
    /// plus `_id` (`tags` -> `tag_id`).
    pub fn join_target_column(&self) -> String {
        self.foreign_key
            .clone()
            .unwrap_or_else(|| format!("{}_id", singularize(&self.name)))
    }

    /// Type discriminator column for polymorphic associations:
    /// `<name>_type`.
    pub fn type_column(&self) -> String {
        format!("{}_type", self.name)
    }

    /// Target table name: the association name pluralized (`author` ->
    /// `authors`), or the name itself for many-to-many (already plural).
    pub fn target_table(&self) -> String {
        match self.kind {
            AssociationKind::BelongsTo => pluralize(&self.name),
            AssociationKind::ManyToMany => self.name.clone(),
        }
    }
}
