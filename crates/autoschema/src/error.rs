use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// The connection could not be acquired. Skips the affected entity
    /// type's reconciliation; only total loss aborts the whole pass.
    #[error("database connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error(transparent)]
    UnsupportedType(#[from] autoschema_model::UnsupportedType),

    /// A single DDL operation failed. Recorded in the pass report;
    /// execution continues with the next operation.
    #[error("ddl {operation} on {table} failed: {message}")]
    Ddl {
        table: String,
        operation: String,
        message: String,
    },
}
