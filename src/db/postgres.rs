//! PostgreSQL driver built on the synchronous `postgres` client.
//!
//! Values are bound with their natural PostgreSQL types; the column type
//! reported by the server decides the encoding, so an `Int` bound against a
//! `DOUBLE PRECISION` column is sent as a float and `Json` values go out as
//! `JSONB`.

use std::error::Error;
use std::sync::MutexGuard;

use bytes::BytesMut;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, NoTls, Row};
use tracing::{debug, info};

use super::backend::{Database, QueryResult, Session, SessionLock};
use super::DbError;
use crate::queries::builder::compilers::{PostgresDialect, SqlDialect};
use crate::value::Value;

/// PostgreSQL driver.
///
/// `Client` requires `&mut self` for every statement, so the driver holds it
/// in a [`SessionLock`] and serializes access.
pub struct PostgresDatabase {
    session: SessionLock<Client>,
}

impl PostgresDatabase {
    /// Connect using a libpq-style connection string or URL.
    pub fn connect(connection_string: &str) -> Result<Self, DbError> {
        let client =
            Client::connect(connection_string, NoTls).map_err(|e| DbError::OpenFailed {
                path: redact(connection_string),
                message: e.to_string(),
            })?;
        info!(url = %redact(connection_string), "connected to postgres");
        Ok(Self {
            session: SessionLock::new(client),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Session<Client>>, DbError> {
        self.session.acquire()
    }

    /// Run one transaction-control statement and wake waiters when the
    /// outermost level has closed.
    fn control(&self, session: &mut Session<Client>, sql: &str) -> Result<(), DbError> {
        let result = session.conn.batch_execute(sql);
        self.session.release(session);
        Ok(result?)
    }
}

/// Strip the password from a URL-style connection string before logging it.
fn redact(connection_string: &str) -> String {
    match (connection_string.find("://"), connection_string.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let credentials = &connection_string[scheme + 3..at];
            let user = credentials.split(':').next().unwrap_or_default();
            format!(
                "{}{}@{}",
                &connection_string[..scheme + 3],
                user,
                &connection_string[at + 1..]
            )
        }
        _ => connection_string.to_string(),
    }
}

fn is_int(ty: &Type) -> bool {
    *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8
}

fn is_json(ty: &Type) -> bool {
    *ty == Type::JSON || *ty == Type::JSONB
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if is_int(ty) => Value::Int(i64::from(*b)).to_sql(ty, out),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT2 => (*i as i16).to_sql(ty, out),
            Value::Int(i) if *ty == Type::INT4 => (*i as i32).to_sql(ty, out),
            Value::Int(i) if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 => {
                Value::Float(*i as f64).to_sql(ty, out)
            }
            Value::Int(i) if *ty == Type::BOOL => (*i != 0).to_sql(ty, out),
            Value::Int(i) if is_text(ty) => i.to_string().to_sql(ty, out),
            Value::Float(f) if *ty == Type::FLOAT4 => (*f as f32).to_sql(ty, out),
            Value::Int(_) | Value::Float(_) | Value::Text(_) if is_json(ty) => {
                self.to_json().to_sql(ty, out)
            }
            Value::Int(i) => i.to_sql(ty, out),
            Value::Float(f) => f.to_sql(ty, out),
            Value::Text(s) => s.to_sql(ty, out),
            Value::Json(j) if is_text(ty) => j.to_string().to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn read_cell(row: &Row, index: usize) -> Result<Value, DbError> {
    let ty = row.columns()[index].type_();
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)?
            .map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index)?
            .map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index)?.map(Value::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)?
            .map(|v| Value::Float(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index)?.map(Value::Float)
    } else if is_json(ty) {
        row.try_get::<_, Option<serde_json::Value>>(index)?
            .map(Value::Json)
    } else {
        row.try_get::<_, Option<String>>(index)?.map(Value::Text)
    };
    Ok(value.unwrap_or(Value::Null))
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl Database for PostgresDatabase {
    fn backend_name(&self) -> &'static str {
        "Postgres"
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &PostgresDialect
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DbError> {
        debug!(sql, params = params.len(), "postgres query");
        let mut session = self.lock()?;
        let statement = session.conn.prepare(sql)?;
        let headers: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = session.conn.query(&statement, &bind(params))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(headers.len());
            for i in 0..headers.len() {
                values.push(read_cell(row, i)?);
            }
            out.push(values);
        }
        Ok(QueryResult { headers, rows: out })
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, DbError> {
        debug!(sql, params = params.len(), "postgres execute");
        let mut session = self.lock()?;
        Ok(session.conn.execute(sql, &bind(params))? as usize)
    }

    fn begin(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.begin();
        session.conn.batch_execute(&sql)?;
        Ok(())
    }

    fn commit(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.commit()?;
        self.control(&mut session, &sql)
    }

    fn rollback(&self) -> Result<(), DbError> {
        let mut session = self.lock()?;
        let sql = session.depth.rollback()?;
        self.control(&mut session, &sql)
    }

    fn table_exists(&self, name: &str) -> Result<bool, DbError> {
        let mut session = self.lock()?;
        let row = session.conn.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
            &[&name],
        )?;
        Ok(row.try_get(0)?)
    }

    fn ensure_schema(&self, statements: &[String]) -> Result<(), DbError> {
        let mut session = self.lock()?;
        for statement in statements {
            debug!(sql = statement.as_str(), "postgres ddl");
            session.conn.batch_execute(statement)?;
        }
        Ok(())
    }
}
