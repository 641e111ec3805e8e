//! Match expression to SQL compilation.
//!
//! Compilation runs in three passes over a [`MatchExp`] rooted at a record:
//!
//! 1. **Symmetric expansion** - an atom whose path crosses an undirected
//!    symmetric attribute becomes the OR of its `:source` and `:target`
//!    variants. Each variant binds its own parameters.
//! 2. **Filtered-view rewrite** - for every relation step of an atom's path
//!    that lands on a filtered record (or crosses a filtered link), the
//!    view's own filter is prepared in its own context, re-rooted onto the
//!    step's prefix and AND-ed to the atom. Link filters are re-rooted from
//!    the holder's side: `source.x` on the holder's side becomes the holder's
//!    own `x`, the other endpoint becomes the related record, and anything
//!    else goes through `&`.
//! 3. **Rendering** - paths are resolved through a shared [`JoinTree`] and
//!    atoms become SQL fragments with positional parameters. `exist` atoms
//!    become correlated `EXISTS` subqueries over the related record.
//!
//! Passes 1-2 are exposed as [`MatchCompiler::prepare`] so that callers can
//! decide whether the prepared expression needs joins at all.

use std::cell::Cell;

use crate::db::schema::{AttributeKind, RecordId, RelationAttribute, SchemaMap};
use crate::error::{EngineError, Result};
use crate::queries::builder::compilers::SqlDialect;
use crate::queries::builder::joins::{JoinNode, JoinTree};
use crate::queries::builder::params::ParamBuilder;
use crate::queries::match_exp::{Condition, MatchExp, Operand, Operator};
use crate::value::{Value, ID_ATTR, LINK_KEY};

/// Nesting limit for filtered views whose filters reach other filtered views.
const MAX_FILTER_DEPTH: usize = 16;

pub struct MatchCompiler<'a> {
    schema: &'a SchemaMap,
    dialect: &'a dyn SqlDialect,
    exists: Cell<usize>,
}

impl<'a> MatchCompiler<'a> {
    pub fn new(schema: &'a SchemaMap, dialect: &'a dyn SqlDialect) -> Self {
        Self {
            schema,
            dialect,
            exists: Cell::new(0),
        }
    }

    /// Validate, expand symmetric paths and inline filtered-view conditions.
    pub fn prepare(&self, record: RecordId, exp: &MatchExp) -> Result<MatchExp> {
        self.prepare_at(record, exp, 0)
    }

    /// [`prepare`](Self::prepare) the caller's expression AND-ed with the
    /// record's own filter.
    pub fn prepare_where(&self, record: RecordId, exp: Option<&MatchExp>) -> Result<MatchExp> {
        let info = self.schema.record(record);
        let exp = exp
            .cloned()
            .unwrap_or_else(MatchExp::all)
            .and_option(info.filter.as_ref());
        self.prepare(record, &exp)
    }

    /// Render a prepared expression rooted at the root of `joins`.
    pub fn render_where(
        &self,
        prepared: &MatchExp,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        let root = joins.root().clone();
        let presence = self
            .schema
            .table_of(root.record)
            .is_shared()
            .then(|| format!("{} IS NOT NULL", joins.id_column(&root)));
        if prepared.is_all() {
            return Ok(presence.unwrap_or_else(|| "1 = 1".to_string()));
        }
        let sql = self.render(prepared, joins, params)?;
        Ok(match presence {
            Some(presence) => format!("{presence} AND {sql}"),
            None => sql,
        })
    }

    /// Prepare and render in one go.
    pub fn compile_where(
        &self,
        record: RecordId,
        exp: Option<&MatchExp>,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        let prepared = self.prepare_where(record, exp)?;
        self.render_where(&prepared, joins, params)
    }

    /// `SELECT DISTINCT <id> FROM ... WHERE ...` for the records matching
    /// `exp`, with aliases `{prefix}N`.
    pub fn id_subquery(
        &self,
        record: RecordId,
        exp: Option<&MatchExp>,
        prefix: &str,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        let mut joins = JoinTree::new(self.schema, self.dialect, record, prefix);
        let condition = self.compile_where(record, exp, &mut joins, params)?;
        let id = joins.id_column(&joins.root().clone());
        Ok(format!(
            "SELECT DISTINCT {id} FROM {}{} WHERE {condition}",
            joins.from_clause(),
            joins.join_clauses()
        ))
    }

    fn prepare_at(&self, record: RecordId, exp: &MatchExp, depth: usize) -> Result<MatchExp> {
        if depth > MAX_FILTER_DEPTH {
            return Err(EngineError::InvalidSchema(format!(
                "filtered views reachable from '{}' nest too deeply or form a cycle",
                self.schema.record(record).name
            )));
        }
        exp.validate(self.schema, record)?;
        let expanded = exp.map_atoms(&mut |c: &Condition| self.expand_symmetric(record, c))?;
        expanded.map_atoms(&mut |c: &Condition| self.add_view_filters(record, c, depth))
    }

    fn expand_symmetric(&self, record: RecordId, condition: &Condition) -> Result<MatchExp> {
        match self.schema.symmetric_dual(record, &condition.path)? {
            Some([source, target]) => {
                let variant = |path: Vec<String>| Condition {
                    path,
                    operator: condition.operator.clone(),
                    operand: condition.operand.clone(),
                };
                let source = self.expand_symmetric(record, &variant(source))?;
                let target = self.expand_symmetric(record, &variant(target))?;
                Ok(source.or(target))
            }
            None => Ok(MatchExp::Atom(condition.clone())),
        }
    }

    fn add_view_filters(&self, record: RecordId, condition: &Condition, depth: usize) -> Result<MatchExp> {
        let path = &condition.path;
        let resolved = self.schema.resolve_path(record, path)?;
        let mut out = MatchExp::Atom(condition.clone());

        // The final segment is either a value or an `exist` step; the latter
        // applies the related record's filters inside its own subquery.
        for i in 0..path.len().saturating_sub(1) {
            if path[i] == LINK_KEY {
                continue;
            }
            let attribute = self.schema.attribute(resolved.holders[i], &path[i])?;
            let Some(relation) = attribute.as_relation() else {
                continue;
            };
            let prefix = &path[..=i];

            if let Some(filter) = &self.schema.record(relation.target).filter {
                let prepared = self.prepare_at(relation.target, filter, depth + 1)?;
                out = out.and(prepared.prefix(prefix));
            }
            if relation.endpoint {
                continue;
            }
            if let Some(filter) = &self.schema.record(relation.link).filter {
                let prepared = self.prepare_at(relation.link, filter, depth + 1)?;
                out = out.and(self.link_filter_from_holder(relation, &prepared, prefix)?);
            }
        }
        Ok(out)
    }

    /// Re-root a prepared link filter onto a relation step taken from the
    /// holder's side; `step` is the path up to and including the relation
    /// attribute.
    fn link_filter_from_holder(
        &self,
        relation: &RelationAttribute,
        filter: &MatchExp,
        step: &[String],
    ) -> Result<MatchExp> {
        let side = relation.side.ok_or_else(|| {
            EngineError::InvalidSchema("undirected attribute reached a link filter".to_string())
        })?;
        let holder = &step[..step.len() - 1];
        filter.map_atoms(&mut |c: &Condition| {
            let first = c.path.first().map(String::as_str);
            let rest = &c.path[1..];
            let mut path: Vec<String> = if first == Some(side.name()) {
                holder.to_vec()
            } else if first == Some(side.other().name()) {
                step.to_vec()
            } else {
                let mut path = step.to_vec();
                path.push(LINK_KEY.to_string());
                path.extend(c.path.iter().cloned());
                return Ok(MatchExp::from_path(path, c.operator.clone(), c.operand.clone()));
            };
            if rest.is_empty() {
                // `exist` on an endpoint always holds for a live link.
                return Ok(MatchExp::all());
            }
            path.extend(rest.iter().cloned());
            Ok(MatchExp::from_path(path, c.operator.clone(), c.operand.clone()))
        })
    }

    fn render(
        &self,
        exp: &MatchExp,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        match exp {
            MatchExp::Atom(condition) => self.render_atom(condition, joins, params),
            MatchExp::And(items) => self.render_list(items, " AND ", "1 = 1", joins, params),
            MatchExp::Or(items) => self.render_list(items, " OR ", "1 = 0", joins, params),
            MatchExp::Not(inner) => Ok(format!("NOT ({})", self.render(inner, joins, params)?)),
        }
    }

    fn render_list(
        &self,
        items: &[MatchExp],
        separator: &str,
        empty: &str,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        match items {
            [] => Ok(empty.to_string()),
            [single] => self.render(single, joins, params),
            _ => {
                let parts = items
                    .iter()
                    .map(|item| self.render(item, joins, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("({})", parts.join(separator)))
            }
        }
    }

    fn render_atom(
        &self,
        condition: &Condition,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        let Some((last, holder_path)) = condition.path.split_last() else {
            return Err(EngineError::invalid_match(
                &self.schema.record(joins.root().record).name,
                "empty path",
            ));
        };
        let holder = joins.resolve(holder_path)?;
        let attribute = self.schema.attribute(holder.record, last)?;
        match &attribute.kind {
            AttributeKind::Value(value) => {
                let column = joins.column(&holder.alias, &value.column);
                self.render_value(&column, condition, params)
            }
            AttributeKind::Relation(relation) => self.render_exist(&holder, relation, condition, joins, params),
        }
    }

    fn render_value(&self, column: &str, condition: &Condition, params: &mut ParamBuilder<'_>) -> Result<String> {
        let comparison = |op: &str, value: &Value, params: &mut ParamBuilder<'_>| {
            format!("{column} {op} {}", params.bind(value.clone()))
        };
        Ok(match (&condition.operator, &condition.operand) {
            (Operator::Eq, Operand::Value(Value::Null)) => format!("{column} IS NULL"),
            (Operator::NotEq | Operator::Not, Operand::Value(Value::Null)) => {
                format!("{column} IS NOT NULL")
            }
            (Operator::Eq, Operand::Value(v)) => comparison("=", v, params),
            (Operator::NotEq, Operand::Value(v)) => comparison("<>", v, params),
            (Operator::Not, Operand::Value(v)) => format!("NOT ({})", comparison("=", v, params)),
            (Operator::Gt, Operand::Value(v)) => comparison(">", v, params),
            (Operator::Lt, Operand::Value(v)) => comparison("<", v, params),
            (Operator::Gte, Operand::Value(v)) => comparison(">=", v, params),
            (Operator::Lte, Operand::Value(v)) => comparison("<=", v, params),
            (Operator::Like, Operand::Value(v)) => comparison("LIKE", v, params),
            (Operator::In, Operand::List(values)) if values.is_empty() => "1 = 0".to_string(),
            (Operator::In, Operand::List(values)) => {
                let placeholders: Vec<String> = values.iter().map(|v| params.bind(v.clone())).collect();
                format!("{column} IN ({})", placeholders.join(", "))
            }
            (Operator::Between, Operand::Range(low, high)) => {
                let low = params.bind(low.clone());
                let high = params.bind(high.clone());
                format!("{column} BETWEEN {low} AND {high}")
            }
            (Operator::Custom(op), operand) => {
                let value = match operand {
                    Operand::Value(v) => v.clone(),
                    Operand::List(values) => {
                        Value::Json(values.iter().map(Value::to_json).collect::<Vec<_>>().into())
                    }
                    _ => {
                        return Err(EngineError::invalid_match(
                            &condition.key(),
                            format!("operator '{op}' takes a value or a list"),
                        ));
                    }
                };
                self.dialect
                    .compile_custom_operator(column, op, &value, params)
                    .ok_or_else(|| EngineError::UnsupportedOperator {
                        operator: op.clone(),
                        backend: self.dialect.name(),
                    })?
            }
            (operator, operand) => {
                return Err(EngineError::invalid_match(
                    &condition.key(),
                    format!("operator '{operator}' cannot take {operand:?}"),
                ));
            }
        })
    }

    fn render_exist(
        &self,
        holder: &JoinNode,
        relation: &RelationAttribute,
        condition: &Condition,
        joins: &mut JoinTree<'_>,
        params: &mut ParamBuilder<'_>,
    ) -> Result<String> {
        let n = self.exists.get() + 1;
        self.exists.set(n);

        let sub = match &condition.operand {
            Operand::Match(sub) => (**sub).clone(),
            _ => MatchExp::all(),
        };
        // Ties the related record back to some holder; the correlation
        // below pins it to this holder.
        let mut back = relation.reverse.clone();
        back.push(ID_ATTR.to_string());
        let exp = sub.and(MatchExp::from_path(back, Operator::Not, Operand::Value(Value::Null)));

        let mut inner = JoinTree::new(self.schema, self.dialect, relation.target, &format!("E{n}_"));
        let inner_where = self.compile_where(relation.target, Some(&exp), &mut inner, params)?;
        let back_node = inner.resolve(&relation.reverse)?;
        Ok(format!(
            "EXISTS (SELECT 1 FROM {}{} WHERE {inner_where} AND {} = {})",
            inner.from_clause(),
            inner.join_clauses(),
            inner.id_column(&back_node),
            joins.id_column(holder)
        ))
    }
}
