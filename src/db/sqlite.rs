//! SQLite driver built on `rusqlite`.

use std::path::Path;
use std::sync::MutexGuard;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

use super::backend::{Database, QueryResult, Session, SessionLock};
use super::DbError;
use crate::queries::builder::compilers::{SqlDialect, SqliteDialect};
use crate::value::Value;

/// SQLite driver. A single connection shared through a [`SessionLock`].
pub struct SqliteDatabase {
    session: SessionLock<Connection>,
    name: &'static str,
}

impl SqliteDatabase {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| DbError::OpenFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), "opened sqlite database");
        Ok(Self::from_connection(conn, "Sqlite"))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(|e| DbError::OpenFailed {
            path: ":memory:".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_connection(conn, "SqliteMem"))
    }

    fn from_connection(conn: Connection, name: &'static str) -> Self {
        Self {
            session: SessionLock::new(conn),
            name,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session<Connection>>, DbError> {
        self.session.acquire()
    }

    /// Run one transaction-control statement and wake waiters when the
    /// outermost level has closed.
    fn control(&self, session: &Session<Connection>, sql: &str) -> Result<(), DbError> {
        let result = session.conn.execute_batch(sql);
        self.session.release(session);
        Ok(result?)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Json(j) => ToSqlOutput::Owned(SqlValue::Text(j.to_string())),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Database for SqliteDatabase {
    fn backend_name(&self) -> &'static str {
        self.name
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &SqliteDialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        debug!(sql, params = params.len(), "sqlite query");
        let session = self.lock()?;
        let mut stmt = session.conn.prepare_cached(sql)?;
        let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = headers.len();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_value_ref(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(QueryResult { headers, rows: out })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DbError> {
        debug!(sql, params = params.len(), "sqlite execute");
        let session = self.lock()?;
        let mut stmt = session.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    fn begin(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.begin();
        session.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.commit()?;
        self.control(&session, &sql)
    }

    fn rollback(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.rollback()?;
        self.control(&session, &sql)
    }

    fn table_exists(&self, name: &str) -> Result<bool, DbError> {
        let session = self.lock()?;
        let count: i64 = session.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn ensure_schema(&self, statements: &[String]) -> Result<(), DbError> {
        let session = self.lock()?;
        for statement in statements {
            debug!(sql = statement.as_str(), "sqlite ddl");
            session.conn.execute_batch(statement)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_query_and_execute_round_trip() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.ensure_schema(&["CREATE TABLE t (a INTEGER, b TEXT, c REAL)".to_string()])
            .unwrap();
        let changed = db
            .execute(
                "INSERT INTO t (a, b, c) VALUES (?1, ?2, ?3)",
                &[Value::Bool(true), Value::Text("x".into()), Value::Float(1.5)],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let result = db.query("SELECT a, b, c FROM t", &[]).unwrap();
        assert_eq!(result.headers, vec!["a", "b", "c"]);
        assert_eq!(
            result.rows,
            vec![vec![Value::Int(1), Value::Text("x".into()), Value::Float(1.5)]]
        );
    }

    #[test]
    fn test_nested_rollback_keeps_outer_work() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.ensure_schema(&["CREATE TABLE t (a INTEGER)".to_string()])
            .unwrap();

        db.begin().unwrap();
        db.execute("INSERT INTO t (a) VALUES (1)", &[]).unwrap();
        db.begin().unwrap();
        db.execute("INSERT INTO t (a) VALUES (2)", &[]).unwrap();
        db.rollback().unwrap();
        db.commit().unwrap();

        let result = db.query("SELECT a FROM t", &[]).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(1)]]);
    }

    #[test]
    fn test_other_thread_waits_for_open_transaction() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.ensure_schema(&["CREATE TABLE t (a INTEGER)".to_string()])
            .unwrap();

        db.begin().unwrap();
        db.execute("INSERT INTO t (a) VALUES (1)", &[]).unwrap();
        thread::scope(|s| {
            let (started, began) = mpsc::channel();
            let db = &db;
            let other = s.spawn(move || {
                db.begin().unwrap();
                started.send(()).unwrap();
                db.execute("INSERT INTO t (a) VALUES (2)", &[]).unwrap();
                db.commit().unwrap();
            });
            assert!(began.recv_timeout(Duration::from_millis(100)).is_err());
            db.rollback().unwrap();
            other.join().unwrap();
        });

        let result = db.query("SELECT a FROM t", &[]).unwrap();
        assert_eq!(result.rows, vec![vec![Value::Int(2)]]);
    }

    #[test]
    fn test_allocate_id_is_per_record() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        db.ensure_schema(&[
            "CREATE TABLE \"_IDS_\" (\"name\" TEXT PRIMARY KEY, \"last\" INTEGER NOT NULL)"
                .to_string(),
        ])
        .unwrap();
        assert_eq!(db.allocate_id("User").unwrap(), 1);
        assert_eq!(db.allocate_id("User").unwrap(), 2);
        assert_eq!(db.allocate_id("Team").unwrap(), 1);
    }

    #[test]
    fn test_table_exists() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        assert!(!db.table_exists("t").unwrap());
        db.ensure_schema(&["CREATE TABLE t (a INTEGER)".to_string()])
            .unwrap();
        assert!(db.table_exists("t").unwrap());
    }

    #[test]
    fn test_open_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(dir.path().join("data.sqlite")).unwrap();
        assert_eq!(db.backend_name(), "Sqlite");
    }
}
