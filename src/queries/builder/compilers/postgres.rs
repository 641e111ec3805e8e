//! PostgreSQL dialect.
//!
//! - `$N` numbered placeholders
//! - JSON stored as JSONB; `contains` uses `@>`

use serde_json::Value as JsonValue;

use super::SqlDialect;
use crate::db::schema::DataType;
use crate::queries::builder::params::ParamBuilder;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn parameter_placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn column_type(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::String => "TEXT",
            DataType::Int => "BIGINT",
            DataType::Float => "DOUBLE PRECISION",
            DataType::Bool => "BOOLEAN",
            DataType::Json => "JSONB",
        }
    }

    fn row_id_column(&self) -> &'static str {
        "BIGSERIAL PRIMARY KEY"
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
                let needle = JsonValue::Array(vec![operand.to_json()]);
                let placeholder = params.bind(Value::Json(needle));
                Some(format!("{column} @> {placeholder}::jsonb"))
            }
            _ => None,
        }
    }
}
