//! SQLite dialect.
//!
//! - `?N` numbered placeholders
//! - JSON stored as TEXT, booleans as INTEGER
//! - `contains` implemented with `json_each`

use super::SqlDialect;
use crate::db::schema::DataType;
use crate::queries::builder::params::ParamBuilder;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn parameter_placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn column_type(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::String | DataType::Json => "TEXT",
            DataType::Int | DataType::Bool => "INTEGER",
            DataType::Float => "REAL",
        }
    }

    fn row_id_column(&self) -> &'static str {
        "INTEGER PRIMARY KEY AUTOINCREMENT"
    }

    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> String {
        // SQLite only accepts OFFSET after a LIMIT.
        match (limit, offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (limit, Some(offset)) => {
                let limit = limit.map_or_else(|| "-1".to_string(), |l| l.to_string());
                format!(" LIMIT {limit} OFFSET {offset}")
            }
        }
    }

    fn compile_custom_operator(
        &self,
        column: &str,
        operator: &str,
        operand: &Value,
        params: &mut ParamBuilder<'_>,
    ) -> Option<String> {
        match operator {
            "contains" => {
                let placeholder = params.bind(operand.clone());
                Some(format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = {placeholder})"
                ))
            }
            _ => None,
        }
    }
}
