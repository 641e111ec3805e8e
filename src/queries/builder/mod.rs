//! SQL building infrastructure.
//!
//! This module provides the pieces every statement the engine emits is built
//! from:
//!
//! 1. **Dialects** - the `SqlDialect` trait handles driver-specific syntax
//! 2. **Parameters** - `ParamBuilder` numbers positional parameters
//! 3. **Joins** - `JoinTree` turns attribute paths into aliased LEFT JOINs
//! 4. **Statements** - `SelectQuery` assembles the final SELECT
//!
//! # Example
//!
//! ```ignore
//! let mut params = ParamBuilder::new(db.dialect());
//! let mut joins = JoinTree::new(&schema, db.dialect(), user, "R");
//! let team = joins.resolve(&["teams".to_string()])?;
//! let mut select = SelectQuery::new(joins.from_clause());
//! select.column(joins.id_column(joins.root()));
//! select.joins = joins.join_clauses();
//! let compiled = CompiledQuery::new(select.to_sql(db.dialect()), params.build());
//! ```

pub mod compilers;
pub mod joins;
pub mod params;
pub mod select;

use crate::db::{Database, QueryResult};
use crate::error::Result;
use crate::value::Value;

/// A compiled statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledQuery {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Get the number of parameters in this query.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn query(&self, db: &dyn Database) -> Result<QueryResult> {
        Ok(db.query(&self.sql, &self.params)?)
    }

    pub fn execute(&self, db: &dyn Database) -> Result<usize> {
        Ok(db.execute(&self.sql, &self.params)?)
    }
}
