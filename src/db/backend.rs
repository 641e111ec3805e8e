//! Database driver trait for abstracting different storage implementations.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::debug;

use super::DbError;
use crate::queries::builder::compilers::SqlDialect;
use crate::value::Value;

/// Table backing per-record-type id allocation.
pub const ID_TABLE: &str = "_IDS_";

/// Result of a query execution.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Index of a column by header name.
    pub fn column(&self, name: &str) -> Result<usize, DbError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DbError::MissingColumn {
                name: name.to_string(),
            })
    }

    /// First cell of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trait for storage drivers.
///
/// The engine only ever emits parameterized SQL built through the driver's
/// [`SqlDialect`]; the driver owns connections, transactions and the
/// id-allocation primitive.
pub trait Database: Send + Sync {
    /// Get the backend name for logging/debugging.
    fn backend_name(&self) -> &'static str;

    /// Dialect used to compile statements for this driver.
    fn dialect(&self) -> &dyn SqlDialect;

    /// Execute a statement that returns rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError>;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DbError>;

    /// Execute an `INSERT ... RETURNING <int column>` statement.
    fn insert_returning(&self, sql: &str, params: &[Value]) -> Result<i64, DbError> {
        let result = self.query(sql, params)?;
        result
            .scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| DbError::QueryFailed {
                message: format!("statement returned no id: {sql}"),
            })
    }

    /// Begin a transaction, or a savepoint when one is already open.
    fn begin(&self) -> Result<(), DbError>;

    /// Commit the innermost transaction or savepoint.
    fn commit(&self) -> Result<(), DbError>;

    /// Roll back the innermost transaction or savepoint.
    fn rollback(&self) -> Result<(), DbError>;

    /// Check if a table exists.
    fn table_exists(&self, name: &str) -> Result<bool, DbError>;

    /// Allocate the next identifier for a record type.
    ///
    /// Identifiers are monotonically increasing per record type and are
    /// never reused, even when the allocating transaction rolls back on
    /// drivers that keep the counter outside the transaction.
    fn allocate_id(&self, record: &str) -> Result<i64, DbError> {
        let dialect = self.dialect();
        let table = dialect.quote_identifier(ID_TABLE);
        let sql = format!(
            "INSERT INTO {table} (\"name\", \"last\") VALUES ({}, 1) \
             ON CONFLICT (\"name\") DO UPDATE SET \"last\" = {table}.\"last\" + 1 \
             RETURNING \"last\"",
            dialect.parameter_placeholder(1)
        );
        let id = self.insert_returning(&sql, &[Value::Text(record.to_string())])?;
        debug!(record, id, "allocated id");
        Ok(id)
    }

    /// Run DDL statements that create missing tables and indexes.
    fn ensure_schema(&self, statements: &[String]) -> Result<(), DbError> {
        for statement in statements {
            self.execute(statement, &[])?;
        }
        Ok(())
    }
}

/// Nesting counter shared by the drivers.
///
/// Depth 0 means no open transaction. The outermost `begin` issues `BEGIN`
/// and makes the calling thread the owner; every nested one opens a
/// numbered savepoint.
#[derive(Debug, Default)]
pub struct TransactionDepth {
    level: usize,
    owner: Option<ThreadId>,
}

impl TransactionDepth {
    pub fn depth(&self) -> usize {
        self.level
    }

    /// Whether a thread other than the caller has a transaction open.
    pub fn held_elsewhere(&self) -> bool {
        self.owner.is_some_and(|owner| owner != thread::current().id())
    }

    /// Statement opening the next level.
    pub fn begin(&mut self) -> String {
        let sql = if self.level == 0 {
            self.owner = Some(thread::current().id());
            "BEGIN".to_string()
        } else {
            format!("SAVEPOINT sp_{}", self.level)
        };
        self.level += 1;
        sql
    }

    /// Statement closing the current level successfully.
    pub fn commit(&mut self) -> Result<String, DbError> {
        let level = self.leave()?;
        Ok(if level == 0 {
            "COMMIT".to_string()
        } else {
            format!("RELEASE SAVEPOINT sp_{level}")
        })
    }

    /// Statement undoing the current level.
    pub fn rollback(&mut self) -> Result<String, DbError> {
        let level = self.leave()?;
        Ok(if level == 0 {
            "ROLLBACK".to_string()
        } else {
            format!("ROLLBACK TO SAVEPOINT sp_{level}; RELEASE SAVEPOINT sp_{level}")
        })
    }

    fn leave(&mut self) -> Result<usize, DbError> {
        if self.level == 0 {
            return Err(DbError::QueryFailed {
                message: "no active transaction".to_string(),
            });
        }
        self.level -= 1;
        if self.level == 0 {
            self.owner = None;
        }
        Ok(self.level)
    }
}

/// A connection together with its transaction nesting.
pub struct Session<C> {
    pub conn: C,
    pub depth: TransactionDepth,
}

/// Single-connection access shared across threads.
///
/// A thread that opens a transaction keeps the connection to itself until
/// the outermost level closes; other callers wait in [`SessionLock::acquire`].
pub struct SessionLock<C> {
    session: Mutex<Session<C>>,
    released: Condvar,
}

impl<C> SessionLock<C> {
    pub fn new(conn: C) -> Self {
        Self {
            session: Mutex::new(Session {
                conn,
                depth: TransactionDepth::default(),
            }),
            released: Condvar::new(),
        }
    }

    /// Lock the session once no other thread holds an open transaction.
    pub fn acquire(&self) -> Result<MutexGuard<'_, Session<C>>, DbError> {
        let guard = self.session.lock().map_err(|_| DbError::Poisoned)?;
        self.released
            .wait_while(guard, |session| session.depth.held_elsewhere())
            .map_err(|_| DbError::Poisoned)
    }

    /// Wake waiting threads if `session` has no transaction left open.
    pub fn release(&self, session: &Session<C>) {
        if session.depth.depth() == 0 {
            self.released.notify_all();
        }
    }
}
