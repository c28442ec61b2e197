//! Postgres backend: introspection through `information_schema` and the
//! system catalogs, DDL through plain statements.
//!
//! All queries run through a pooled connection and are logged via
//! `tracing::debug_span!`, so a reconciliation pass can be followed
//! statement by statement at debug level.

use crate::backend::SchemaBackend;
use crate::error::Error;
use crate::Result;
use autoschema_model::{
    ColumnType, FieldConstraints, FieldSpec, IndexSpec, LiveColumn, LiveIndex, TableSnapshot,
    TableSpec, quote_ident,
};
use std::collections::BTreeSet;
use tokio_postgres::types::ToSql;
use tracing::Instrument;

/// Schema backend over a deadpool-managed Postgres pool.
#[derive(Clone)]
pub struct PgBackend {
    pool: deadpool_postgres::Pool,
}

impl PgBackend {
    /// Wrap an existing pool.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a connection URL.
    pub fn connect(url: &str) -> Result<Self> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.to_string());
        let pool = cfg
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| Error::ConnectionUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::ConnectionUnavailable(e.to_string()))
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let conn = self.conn().await?;
        let span = tracing::debug_span!("db.execute", sql = %sql);
        Ok(conn.execute(sql, &[]).instrument(span).await?)
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>> {
        let conn = self.conn().await?;
        let span = tracing::debug_span!("db.query", sql = %sql, params = params.len());
        Ok(conn.query(sql, params).instrument(span).await?)
    }
}

impl SchemaBackend for PgBackend {
    async fn list_tables(&self) -> Result<BTreeSet<String>> {
        let rows = self
            .query(
                "SELECT table_name::text FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn table_snapshot(&self, table: &str) -> Result<Option<TableSnapshot>> {
        let column_rows = self
            .query(
                "SELECT column_name::text, data_type::text, character_maximum_length, \
                        numeric_precision, numeric_scale, is_nullable::text, column_default::text \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;
        if column_rows.is_empty() {
            return Ok(None);
        }

        let mut snapshot = TableSnapshot::default();
        for row in &column_rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let char_len: Option<i32> = row.get(2);
            let num_precision: Option<i32> = row.get(3);
            let num_scale: Option<i32> = row.get(4);
            let is_nullable: String = row.get(5);
            let default: Option<String> = row.get(6);

            snapshot.columns.insert(
                name,
                live_column(
                    &data_type,
                    char_len,
                    num_precision,
                    num_scale,
                    is_nullable == "YES",
                    default,
                ),
            );
        }

        let index_rows = self
            .query(
                "SELECT i.relname::text AS index_name, ix.indisunique, a.attname::text \
                 FROM pg_class t \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS ord(attnum, ordinality) ON true \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ord.attnum \
                 WHERE n.nspname = 'public' AND t.relname = $1 AND NOT ix.indisprimary \
                 ORDER BY index_name, ord.ordinality",
                &[&table],
            )
            .await?;
        for row in &index_rows {
            let name: String = row.get(0);
            let unique: bool = row.get(1);
            let column: String = row.get(2);
            snapshot
                .indexes
                .entry(name)
                .or_insert_with(|| LiveIndex {
                    columns: Vec::new(),
                    unique,
                })
                .columns
                .push(column);
        }

        Ok(Some(snapshot))
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<()> {
        self.execute(&create_table_sql(spec)).await?;
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.execute(&format!("DROP TABLE {};", quote_ident(table)))
            .await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, field: &FieldSpec) -> Result<()> {
        self.execute(&add_column_sql(table, field)).await?;
        Ok(())
    }

    async fn remove_column(&self, table: &str, column: &str) -> Result<()> {
        self.execute(&format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(table),
            quote_ident(column)
        ))
        .await?;
        Ok(())
    }

    async fn change_column(
        &self,
        table: &str,
        column: &str,
        ty: &ColumnType,
        constraints: &FieldConstraints,
    ) -> Result<()> {
        for sql in change_column_sql(table, column, ty, constraints) {
            self.execute(&sql).await?;
        }
        Ok(())
    }

    async fn add_index(&self, table: &str, index: &IndexSpec) -> Result<()> {
        self.execute(&add_index_sql(table, index)).await?;
        Ok(())
    }

    async fn remove_index(&self, _table: &str, name: &str) -> Result<()> {
        self.execute(&format!("DROP INDEX {};", quote_ident(name)))
            .await?;
        Ok(())
    }
}

/// Map one `information_schema.columns` row to a [`LiveColumn`].
///
/// Only `numeric` columns report precision/scale: integer columns also
/// carry a `numeric_precision` in the catalog, but treating it as a
/// declared constraint would diff forever against declarations that never
/// set one.
fn live_column(
    data_type: &str,
    char_len: Option<i32>,
    num_precision: Option<i32>,
    num_scale: Option<i32>,
    null: bool,
    default: Option<String>,
) -> LiveColumn {
    let ty = data_type_to_column_type(data_type);

    let (limit, precision, scale) = match ty {
        Some(ColumnType::String) => (char_len.map(|v| v as u32), None, None),
        Some(ColumnType::Decimal) => {
            let precision = num_precision.map(|v| v as u32);
            (precision, precision, num_scale.map(|v| v as u32))
        }
        _ => (None, None, None),
    };

    let constraints = FieldConstraints {
        limit,
        precision,
        scale,
        null: Some(null),
        default: None,
    };
    let sql_type = ty
        .as_ref()
        .map(|t| t.sql_type(&constraints))
        .unwrap_or_else(|| data_type.to_lowercase());

    LiveColumn {
        sql_type: Some(sql_type),
        ty,
        limit,
        precision,
        scale,
        null,
        default: default.map(normalize_default),
    }
}

/// Only the exact canonical forms of the declared types map to a logical
/// type. Near-misses (`timestamp without time zone`, `real`) stay unmapped
/// so the diff compares their raw `data_type` string and surfaces the
/// drift instead of masking it behind the re-rendered canonical form.
fn data_type_to_column_type(data_type: &str) -> Option<ColumnType> {
    match data_type {
        "character varying" => Some(ColumnType::String),
        "text" => Some(ColumnType::Text),
        "integer" => Some(ColumnType::Integer),
        "bigint" => Some(ColumnType::BigInt),
        "double precision" => Some(ColumnType::Float),
        "numeric" => Some(ColumnType::Decimal),
        "boolean" => Some(ColumnType::Boolean),
        "date" => Some(ColumnType::Date),
        "timestamp with time zone" => Some(ColumnType::DateTime),
        "bytea" => Some(ColumnType::Binary),
        _ => None,
    }
}

/// Postgres re-renders stored defaults with a cast suffix
/// (`'draft'::character varying`); strip it so defaults compare against
/// the declared expression. Suffixes that are part of a larger expression
/// (e.g. `nextval('...'::regclass)`) are left alone.
fn normalize_default(default: String) -> String {
    if let Some(pos) = default.rfind("::") {
        let suffix = &default[pos + 2..];
        if !suffix.is_empty()
            && suffix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_')
        {
            return default[..pos].to_string();
        }
    }
    default
}

/// Render `CREATE TABLE`. The primary key column becomes a `bigserial`;
/// join tables (no primary key) get only their declared columns.
pub fn create_table_sql(spec: &TableSpec) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in spec.fields.values() {
        if spec.is_primary_key(&field.name) {
            parts.push(format!(
                "    {} bigserial PRIMARY KEY",
                quote_ident(&field.name)
            ));
        } else {
            parts.push(format!("    {}", column_sql(field)));
        }
    }
    format!(
        "CREATE TABLE {} (\n{}\n);",
        quote_ident(&spec.table_name),
        parts.join(",\n")
    )
}

fn column_sql(field: &FieldSpec) -> String {
    let mut sql = format!("{} {}", quote_ident(&field.name), field.sql_type());
    // NOT NULL and DEFAULT only when explicitly declared.
    if field.constraints.null == Some(false) {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &field.constraints.default {
        sql.push_str(&format!(" DEFAULT {}", default));
    }
    sql
}

pub fn add_column_sql(table: &str, field: &FieldSpec) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {};",
        quote_ident(table),
        column_sql(field)
    )
}

/// The statements rebuilding a column: type (with a cast), nullability,
/// default. Issued individually, like every other operation.
pub fn change_column_sql(
    table: &str,
    column: &str,
    ty: &ColumnType,
    constraints: &FieldConstraints,
) -> Vec<String> {
    let table = quote_ident(table);
    let column = quote_ident(column);
    let sql_type = ty.sql_type(constraints);

    let mut stmts = vec![format!(
        "ALTER TABLE {table} ALTER COLUMN {column} TYPE {sql_type} USING {column}::{sql_type};"
    )];

    if constraints.effective_null() {
        stmts.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL;"
        ));
    } else {
        stmts.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL;"
        ));
    }

    match &constraints.default {
        Some(default) => stmts.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default};"
        )),
        None => stmts.push(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT;"
        )),
    }

    stmts
}

pub fn add_index_sql(table: &str, index: &IndexSpec) -> String {
    let unique = if index.unique { "UNIQUE " } else { "" };
    let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();
    format!(
        "CREATE {}INDEX {} ON {} ({});",
        unique,
        quote_ident(&index.name),
        quote_ident(table),
        columns.join(", ")
    )
}
