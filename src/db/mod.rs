//! Storage driver boundary.
//!
//! This module provides the database abstraction layer for the engine:
//! - the [`Database`] trait every driver implements (statements, transactions,
//!   id allocation)
//! - the SQLite driver (default) and the PostgreSQL driver (feature
//!   `backend-postgres`)
//! - runtime driver selection through [`DatabaseConfig`]
//! - the [`schema`] submodule: schema definitions, the resolved schema map and
//!   table creation
//!
//! # Type Decisions
//!
//! **Why positional parameters (`&[Value]`) instead of named ones?**
//! Both SQLite (`?N`) and PostgreSQL (`$N`) number their placeholders, and the
//! query builder allocates parameters in emission order. A positional slice
//! maps onto both drivers without renaming.
//!
//! **Why savepoints for nested transactions?**
//! Executors call each other (create calls link, delete calls detach) and each
//! entry point wraps its work in a transaction. Nested `begin` calls become
//! savepoints so that an inner failure can roll back to its own start while
//! the outermost caller still decides the final outcome.

mod backend;
mod config;
#[cfg(feature = "backend-postgres")]
mod postgres;
pub mod schema;
mod sqlite;

pub use backend::{Database, QueryResult, TransactionDepth, ID_TABLE};
pub use config::{DatabaseConfig, PostgresConfig};
#[cfg(feature = "backend-postgres")]
pub use self::postgres::PostgresDatabase;
pub use sqlite::SqliteDatabase;

use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to open database '{path}': {message}")]
    OpenFailed { path: String, message: String },

    #[error("Query failed: {message}")]
    QueryFailed { message: String },

    #[error("Missing column '{name}' in query result")]
    MissingColumn { name: String },

    #[error("Database connection lock was poisoned")]
    Poisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "backend-postgres")]
    #[error(transparent)]
    Postgres(#[from] ::postgres::Error),
}

/// Open an in-memory SQLite database.
pub fn open_mem_db() -> Result<Box<dyn Database>, DbError> {
    Ok(Box::new(SqliteDatabase::open_in_memory()?))
}
