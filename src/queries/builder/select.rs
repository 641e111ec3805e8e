//! SELECT statement assembly.

use super::compilers::SqlDialect;

/// Sort direction of an `ORDER BY` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// A SELECT statement under construction. Column expressions, joins and
/// conditions are already-rendered SQL fragments.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    pub distinct: bool,
    pub columns: Vec<(String, String)>,
    pub from: String,
    pub joins: String,
    pub conditions: Vec<String>,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SelectQuery {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    /// Add a column and return its label.
    pub fn column(&mut self, expr: impl Into<String>) -> String {
        let label = format!("c{}", self.columns.len());
        self.columns.push((expr.into(), label.clone()));
        label
    }

    pub fn condition(&mut self, condition: impl Into<String>) {
        let condition = condition.into();
        if !condition.is_empty() {
            self.conditions.push(condition);
        }
    }

    pub fn to_sql(&self, dialect: &dyn SqlDialect) -> String {
        let columns = if self.columns.is_empty() {
            "1".to_string()
        } else {
            self.columns
                .iter()
                .map(|(expr, label)| format!("{expr} AS {}", dialect.quote_identifier(label)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {}{columns} FROM {}{}",
            if self.distinct { "DISTINCT " } else { "" },
            self.from,
            self.joins
        );
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|(expr, order)| format!("{expr} {}", order.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        sql.push_str(&dialect.limit_clause(self.limit, self.offset));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::builder::compilers::SqliteDialect;

    #[test]
    fn test_select_assembly() {
        let mut query = SelectQuery::new("\"User\" AS \"R0\"");
        assert_eq!(query.column("\"R0\".\"User_id\""), "c0");
        query.condition("\"R0\".\"User_name\" = ?1");
        query.condition("");
        query.order_by.push(("\"R0\".\"User_id\"".to_string(), Order::Desc));
        query.limit = Some(5);

        assert_eq!(
            query.to_sql(&SqliteDialect),
            "SELECT \"R0\".\"User_id\" AS \"c0\" FROM \"User\" AS \"R0\" \
             WHERE \"R0\".\"User_name\" = ?1 ORDER BY \"R0\".\"User_id\" DESC LIMIT 5"
        );
    }

    #[test]
    fn test_distinct_without_columns() {
        let mut query = SelectQuery::new("\"T\" AS \"M0\"");
        query.distinct = true;
        assert_eq!(query.to_sql(&SqliteDialect), "SELECT DISTINCT 1 FROM \"T\" AS \"M0\"");
    }
}
