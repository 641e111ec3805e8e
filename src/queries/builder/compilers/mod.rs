//! Driver-specific SQL syntax.
//!
//! The match compiler, the query executor and the migration layer emit SQL
//! through a [`SqlDialect`] so that one query tree compiles to both SQLite
//! and PostgreSQL. Dialects differ in:
//! - parameter placeholders (`?1` vs `$1`)
//! - column types and the row-id column definition
//! - `LIMIT`/`OFFSET` spelling
//! - driver-specific operators such as `contains` on JSON columns

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use super::params::ParamBuilder;
use crate::db::schema::DataType;
use crate::value::Value;

/// Trait for driver-specific SQL compilation.
pub trait SqlDialect: Send + Sync {
    /// Dialect name used in error messages.
    fn name(&self) -> &'static str;

    /// Placeholder for the 1-based parameter `index`.
    fn parameter_placeholder(&self, index: usize) -> String;

    /// Quote a table, column or alias name.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Column type for a schema data type.
    fn column_type(&self, data_type: DataType) -> &'static str;

    /// Type and constraints of the physical row-id column.
    fn row_id_column(&self) -> &'static str;

    /// `LIMIT`/`OFFSET` clause, empty when neither is set.
    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> String {
        let mut out = String::new();
        if let Some(limit) = limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }
        out
    }

    /// Compile a driver-specific operator. `None` means the operator is not
    /// supported by this driver.
    fn compile_custom_operator(
        &self,
        column: &str,
        operator: &str,
        operand: &Value,
        params: &mut ParamBuilder<'_>,
    ) -> Option<String>;
}
