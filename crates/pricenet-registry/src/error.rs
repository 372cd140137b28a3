//! # Registry Error Types
//!
//! Error types for registry database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  RegistryError (this module) ← Adds context and categorization         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PipelineError / admin API error ← surfaced, never panicked            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use pricenet_core::CoreError;

/// Registry operation errors.
///
/// These wrap sqlx errors and add context for debugging and for the
/// history/log surface.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// Should not surface from upsert paths: they are insert-or-replace
    /// keyed on the natural key.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// An identifier was rejected at a write boundary.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A stored record could not be interpreted during reconciliation.
    ///
    /// Carries the offending raw data; the reconciler logs and skips it.
    #[error("Malformed record {context}: {raw:?}")]
    MalformedRecord { context: String, raw: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal registry error.
    #[error("Internal registry error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        RegistryError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a MalformedRecord error with the offending raw data.
    pub fn malformed(context: impl Into<String>, raw: impl Into<String>) -> Self {
        RegistryError::MalformedRecord {
            context: context.into(),
            raw: raw.into(),
        }
    }
}

/// Convert sqlx errors to RegistryError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → RegistryError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint type
/// sqlx::Error::PoolTimedOut   → RegistryError::PoolExhausted
/// Other                       → RegistryError::Internal
/// ```
impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RegistryError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite constraint messages:
                // UNIQUE: "UNIQUE constraint failed: <table>.<column>"
                // FK:     "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    RegistryError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    RegistryError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else {
                    RegistryError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => RegistryError::PoolExhausted,

            sqlx::Error::PoolClosed => {
                RegistryError::ConnectionFailed("Pool is closed".to_string())
            }

            _ => RegistryError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for RegistryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        RegistryError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for RegistryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::EmptyIdentifier(raw) => RegistryError::InvalidIdentifier(raw),
            other => RegistryError::Internal(other.to_string()),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
