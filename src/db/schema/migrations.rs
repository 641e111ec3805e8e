//! Physical table creation.
//!
//! Creates, for a resolved [`SchemaMap`]:
//! - the `_IDS_` table backing per-record-type id allocation
//! - one table per physical table of the map, with the `_rowId` column,
//!   every member's columns, and an index on every id and endpoint column
//!
//! Every statement uses `IF NOT EXISTS`, so running the DDL against an
//! existing database is safe. Existing tables are never altered.

use tracing::{debug, info};

use crate::db::schema::{ColumnInfo, SchemaMap, ROW_ID};
use crate::db::{Database, ID_TABLE};
use crate::error::Result;
use crate::queries::builder::compilers::SqlDialect;

/// DDL statements for `schema`, in execution order.
pub fn schema_statements(schema: &SchemaMap, dialect: &dyn SqlDialect) -> Vec<String> {
    let q = |name: &str| dialect.quote_identifier(name);
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {} BIGINT NOT NULL)",
        q(ID_TABLE),
        q("name"),
        q("last")
    )];

    for table in schema.tables() {
        let mut columns = vec![format!("{} {}", q(ROW_ID), dialect.row_id_column())];
        columns.extend(
            table
                .columns
                .iter()
                .map(|c: &ColumnInfo| format!("{} {}", q(&c.name), dialect.column_type(c.data_type))),
        );
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            q(&table.name),
            columns.join(", ")
        ));
        for column in table.columns.iter().filter(|c| c.indexed) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                q(&format!("idx_{}_{}", table.name, column.name)),
                q(&table.name),
                q(&column.name)
            ));
        }
    }
    statements
}

/// Create every missing table and index of `schema`.
pub fn create_schema(db: &dyn Database, schema: &SchemaMap) -> Result<()> {
    let statements = schema_statements(schema, db.dialect());
    for statement in &statements {
        debug!(sql = %statement, "ddl");
    }
    db.ensure_schema(&statements)?;
    info!(
        backend = db.backend_name(),
        tables = schema.tables().len(),
        "schema ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_mem_db;
    use crate::queries::builder::compilers::{PostgresDialect, SqliteDialect};
    use crate::test_utils::{full_schema, user_team_schema};

    #[test]
    fn test_statements_cover_every_table() {
        let schema = user_team_schema();
        let statements = schema_statements(&schema, &SqliteDialect);
        assert!(statements[0].contains("\"_IDS_\""));
        for table in schema.tables() {
            let create = format!("CREATE TABLE IF NOT EXISTS \"{}\"", table.name);
            assert!(statements.iter().any(|s| s.starts_with(&create)), "{create}");
        }
        assert!(statements.iter().any(|s| s.contains("\"User_name\" TEXT")));
        assert!(statements.iter().any(|s| s.contains("\"_rowId\" INTEGER PRIMARY KEY AUTOINCREMENT")));
    }

    #[test]
    fn test_postgres_column_types() {
        let schema = user_team_schema();
        let statements = schema_statements(&schema, &PostgresDialect);
        assert!(statements.iter().any(|s| s.contains("\"User_age\" BIGINT")));
        assert!(statements.iter().any(|s| s.contains("\"_rowId\" BIGSERIAL PRIMARY KEY")));
    }

    #[test]
    fn test_create_schema_is_idempotent() {
        let db = open_mem_db().unwrap();
        let schema = full_schema();
        create_schema(db.as_ref(), &schema).unwrap();
        create_schema(db.as_ref(), &schema).unwrap();
        assert!(db.table_exists("User").unwrap());
        assert!(db.table_exists("_IDS_").unwrap());
    }

    #[test]
    fn test_shared_table_is_created_once() {
        let schema = full_schema();
        let statements = schema_statements(&schema, &SqliteDialect);
        let creates = statements
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"User\" "))
            .count();
        assert_eq!(creates, 1);
        assert!(!statements.iter().any(|s| s.contains("TABLE IF NOT EXISTS \"Profile\"")));
    }
}
