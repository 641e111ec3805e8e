//! Parameter binding helpers for query building.
//!
//! Collects positional parameters while SQL is being emitted and hands out
//! the dialect's placeholder for each one.

use super::compilers::SqlDialect;
use crate::value::Value;

/// Helper for building query parameters.
///
/// Parameters are numbered in the order they are bound, which matches the
/// order the placeholders appear in the emitted SQL.
pub struct ParamBuilder<'d> {
    dialect: &'d dyn SqlDialect,
    params: Vec<Value>,
}

impl<'d> ParamBuilder<'d> {
    pub fn new(dialect: &'d dyn SqlDialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        self.dialect.parameter_placeholder(self.params.len())
    }

    pub fn dialect(&self) -> &'d dyn SqlDialect {
        self.dialect
    }

    pub fn values(&self) -> &[Value] {
        &self.params
    }

    /// Build the final parameter list.
    pub fn build(self) -> Vec<Value> {
        self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
