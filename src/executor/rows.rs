//! Row-level statements shared by the mutation executors.
//!
//! Rows are addressed by the value of one of their id columns; in a shared
//! table every member record has its own id column on the same row.

use crate::db::schema::{LinkSide, RecordId, TableInfo};
use crate::error::{EngineError, Result};
use crate::executor::Executor;
use crate::queries::builder::params::ParamBuilder;
use crate::queries::builder::CompiledQuery;
use crate::value::Value;

impl Executor<'_> {
    fn quote(&self, name: &str) -> String {
        self.db.dialect().quote_identifier(name)
    }

    fn key_list(&self, params: &mut ParamBuilder<'_>, keys: &[i64]) -> String {
        keys.iter()
            .map(|k| params.bind(*k))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn insert_row(&self, table: &str, columns: &[(String, Value)]) -> Result<()> {
        let mut params = ParamBuilder::new(self.db.dialect());
        let names: Vec<String> = columns.iter().map(|(c, _)| self.quote(c)).collect();
        let values: Vec<String> = columns.iter().map(|(_, v)| params.bind(v.clone())).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote(table),
            names.join(", "),
            values.join(", ")
        );
        self.execute(&CompiledQuery::new(sql, params.build()))?;
        Ok(())
    }

    pub(crate) fn update_rows(
        &self,
        table: &str,
        key_column: &str,
        keys: &[i64],
        sets: &[(String, Value)],
    ) -> Result<usize> {
        if keys.is_empty() || sets.is_empty() {
            return Ok(0);
        }
        let mut params = ParamBuilder::new(self.db.dialect());
        let assignments: Vec<String> = sets
            .iter()
            .map(|(column, value)| format!("{} = {}", self.quote(column), params.bind(value.clone())))
            .collect();
        let keys = self.key_list(&mut params, keys);
        let sql = format!(
            "UPDATE {} SET {} WHERE {} IN ({keys})",
            self.quote(table),
            assignments.join(", "),
            self.quote(key_column)
        );
        self.execute(&CompiledQuery::new(sql, params.build()))
    }

    pub(crate) fn delete_rows(&self, table: &str, key_column: &str, keys: &[i64]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut params = ParamBuilder::new(self.db.dialect());
        let keys = self.key_list(&mut params, keys);
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({keys})",
            self.quote(table),
            self.quote(key_column)
        );
        self.execute(&CompiledQuery::new(sql, params.build()))
    }

    /// Raw values of `columns` on the row whose `key_column` is `key`.
    pub(crate) fn read_row(
        &self,
        table: &str,
        key_column: &str,
        key: i64,
        columns: &[String],
    ) -> Result<Option<Vec<Value>>> {
        let mut params = ParamBuilder::new(self.db.dialect());
        let selected: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {}",
            selected.join(", "),
            self.quote(table),
            self.quote(key_column),
            params.bind(key)
        );
        let result = self.query(&CompiledQuery::new(sql, params.build()))?;
        Ok(result.rows.into_iter().next())
    }

    /// Drop rows of a shared table that no longer hold any record.
    pub(crate) fn remove_empty_rows(&self, table: &TableInfo) -> Result<usize> {
        if !table.is_shared() {
            return Ok(0);
        }
        let conditions: Vec<String> = table
            .members
            .iter()
            .map(|&m| format!("{} IS NULL", self.quote(self.schema.record(m).id_column())))
            .collect();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.quote(&table.name),
            conditions.join(" AND ")
        );
        self.execute(&CompiledQuery::new(sql, Vec::new()))
    }

    /// Column of a (non-combined) link table holding the `side` endpoint.
    pub(crate) fn endpoint_column(&self, link: RecordId, side: LinkSide) -> Result<String> {
        let info = self.schema.record(link);
        info.attribute(side.name())
            .and_then(|a| a.as_relation())
            .and_then(|r| r.column.clone())
            .ok_or_else(|| {
                EngineError::InvalidSchema(format!("link '{}' has no {} column", info.name, side.name()))
            })
    }

    /// Columns (id included) of the value attributes of `record`.
    pub(crate) fn value_columns(&self, record: RecordId) -> Vec<String> {
        self.schema
            .record(record)
            .value_attributes()
            .filter_map(|a| a.as_value().map(|v| v.column.clone()))
            .collect()
    }
}
