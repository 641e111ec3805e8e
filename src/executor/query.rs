//! Record retrieval.
//!
//! One SELECT fetches the root records with every joinable relation of the
//! plan; the WHERE clause either renders inline (conditions on the root's
//! own columns) or as `id IN (subquery)` when conditions leave the root, so
//! that joins needed by the match never multiply result rows. Deferred
//! relations are then resolved level by level, one link query and one
//! target query per deferred attribute.

use std::collections::{BTreeSet, HashMap};

use crate::db::schema::{LinkSide, RecordId, RecordInfo};
use crate::db::DbError;
use crate::error::{EngineError, Result};
use crate::executor::{id_in, id_stub, related_id, Executor};
use crate::queries::builder::joins::JoinTree;
use crate::queries::builder::params::ParamBuilder;
use crate::queries::builder::select::SelectQuery;
use crate::queries::builder::CompiledQuery;
use crate::queries::planner::{link_only_target, Deferred, PlanNode, Planner};
use crate::queries::{AttributeQuery, MatchCompiler, MatchExp};
use crate::value::{Field, Record, Value, ID_ATTR, LINK_KEY};

pub use crate::queries::builder::select::Order;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub attribute: String,
    pub order: Order,
}

/// Paging and ordering of a `find`. Results are ordered by id when no
/// order is given, and id breaks ties otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifier {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Vec<OrderBy>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order_by(mut self, attribute: impl Into<String>, order: Order) -> Self {
        self.order_by.push(OrderBy {
            attribute: attribute.into(),
            order,
        });
        self
    }
}

/// Records found at `path` below each of `records`.
fn records_at<'r>(records: &'r mut [Record], path: &[String]) -> Vec<&'r mut Record> {
    let mut current: Vec<&'r mut Record> = records.iter_mut().collect();
    for segment in path {
        current = current
            .into_iter()
            .filter_map(|r| r.get_mut(segment).and_then(Field::as_record_mut))
            .collect();
    }
    current
}

/// Projection used for event snapshots: all values, plus endpoint ids for
/// link records.
pub(crate) fn snapshot_query(info: &RecordInfo) -> AttributeQuery {
    let query = AttributeQuery::all();
    if info.is_relation() {
        query
            .nested(LinkSide::Source.name(), AttributeQuery::new())
            .nested(LinkSide::Target.name(), AttributeQuery::new())
    } else {
        query
    }
}

impl Executor<'_> {
    /// Records of `record` matching `exp`, shaped by `query`.
    pub fn find(
        &self,
        record: RecordId,
        exp: Option<&MatchExp>,
        query: &AttributeQuery,
        modifier: Option<&Modifier>,
    ) -> Result<Vec<Record>> {
        let plan = Planner::new(self.schema).plan(record, query)?;
        let compiled = self.compile_find(record, exp, &plan, modifier)?;
        let result = self.query(&compiled)?;

        let mut records = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let mut cursor = 0;
            if let Some(found) = self.decode(&plan, row, &mut cursor)? {
                records.push(found);
            }
        }
        self.resolve_deferred(&plan, &mut records)?;
        Ok(records)
    }

    /// First record of `record` matching `exp`, or `None`.
    pub fn find_one(
        &self,
        record: RecordId,
        exp: Option<&MatchExp>,
        query: &AttributeQuery,
    ) -> Result<Option<Record>> {
        let modifier = Modifier::new().limit(1);
        Ok(self.find(record, exp, query, Some(&modifier))?.into_iter().next())
    }

    /// Every value attribute of `record` (with endpoint ids for links).
    pub(crate) fn load_record(&self, record: RecordId, id: i64) -> Result<Option<Record>> {
        let query = snapshot_query(self.schema.record(record));
        self.find_one(record, Some(&id_in(&[id])), &query)
    }

    pub(crate) fn ensure_exists(&self, record: RecordId, id: i64) -> Result<()> {
        if self.find_ids(record, Some(&id_in(&[id])))?.is_empty() {
            return Err(EngineError::RecordNotFound {
                record: self.schema.record(record).name.clone(),
                id,
            });
        }
        Ok(())
    }

    fn compile_find(
        &self,
        record: RecordId,
        exp: Option<&MatchExp>,
        plan: &PlanNode,
        modifier: Option<&Modifier>,
    ) -> Result<CompiledQuery> {
        let dialect = self.db.dialect();
        let compiler = MatchCompiler::new(self.schema, dialect);
        let mut params = ParamBuilder::new(dialect);
        let mut joins = JoinTree::new(self.schema, dialect, record, "R");
        let mut select = SelectQuery::new(joins.from_clause());
        self.select_node(plan, &mut joins, &mut select)?;

        let root = joins.root().clone();
        let prepared = compiler.prepare_where(record, exp)?;
        let condition = if prepared.has_related_paths() {
            let subquery = compiler.id_subquery(record, exp, "M", &mut params)?;
            format!("{} IN ({subquery})", joins.id_column(&root))
        } else {
            compiler.render_where(&prepared, &mut joins, &mut params)?
        };
        select.condition(condition);

        let info = self.schema.record(record);
        let mut ordered_by_id = false;
        for term in modifier.map(|m| m.order_by.as_slice()).unwrap_or_default() {
            let attribute = self.schema.attribute(record, &term.attribute)?;
            let value = attribute.as_value().ok_or_else(|| {
                EngineError::invalid_query(
                    &info.name,
                    format!("cannot order by relation '{}'", term.attribute),
                )
            })?;
            ordered_by_id |= attribute.name == ID_ATTR;
            select
                .order_by
                .push((joins.column(&root.alias, &value.column), term.order));
        }
        if !ordered_by_id {
            select.order_by.push((joins.id_column(&root), Order::Asc));
        }
        select.limit = modifier.and_then(|m| m.limit);
        select.offset = modifier.and_then(|m| m.offset);
        select.joins = joins.join_clauses();

        Ok(CompiledQuery::new(select.to_sql(dialect), params.build()))
    }

    /// Add the columns of `node` and its joined children, in decode order.
    fn select_node(
        &self,
        node: &PlanNode,
        joins: &mut JoinTree<'_>,
        select: &mut SelectQuery,
    ) -> Result<()> {
        let join = if node.path.is_empty() {
            joins.root().clone()
        } else {
            joins.resolve(&node.path)?
        };
        for name in &node.values {
            let attribute = self.schema.attribute(node.record, name)?;
            if let Some(value) = attribute.as_value() {
                select.column(joins.column(&join.alias, &value.column));
            }
        }
        for name in &node.endpoint_keys {
            let relation = self
                .schema
                .attribute(node.record, name)?
                .as_relation()
                .ok_or_else(|| EngineError::InvalidSchema(format!("'{name}' is not an endpoint")))?;
            let column = match &relation.column {
                Some(column) => column.clone(),
                None => self.schema.record(relation.target).id_column().to_string(),
            };
            select.column(joins.column(&join.alias, &column));
        }
        if let Some(link) = &node.link {
            self.select_node(link, joins, select)?;
        }
        for (_, child) in &node.joins {
            self.select_node(child, joins, select)?;
        }
        Ok(())
    }

    /// Rebuild the record of `node` from `row`; `None` when the joined
    /// record is absent (null id).
    fn decode(&self, node: &PlanNode, row: &[Value], cursor: &mut usize) -> Result<Option<Record>> {
        let mut take = || -> Result<Value> {
            let value = row.get(*cursor).cloned().ok_or_else(|| DbError::MissingColumn {
                name: format!("c{cursor}"),
            })?;
            *cursor += 1;
            Ok(value)
        };

        let mut record = Record::new();
        for name in &node.values {
            let raw = take()?;
            let data_type = self
                .schema
                .attribute(node.record, name)?
                .as_value()
                .map(|v| v.data_type);
            let value = match data_type {
                Some(data_type) => raw.clone().coerce(data_type).unwrap_or(raw),
                None => raw,
            };
            record.insert(name.clone(), value);
        }
        for name in &node.endpoint_keys {
            let field = match take()?.as_i64() {
                Some(id) => Field::from(id_stub(id)),
                None => Field::null(),
            };
            record.insert(name.clone(), field);
        }
        if let Some(link) = &node.link {
            if let Some(link_record) = self.decode(link, row, cursor)? {
                record.insert(LINK_KEY, link_record);
            }
        }
        for (name, child) in &node.joins {
            let field = self
                .decode(child, row, cursor)?
                .map(Field::from)
                .unwrap_or_else(Field::null);
            record.insert(name.clone(), field);
        }

        let present = record.get_value(ID_ATTR).is_some_and(|v| !v.is_null());
        Ok(present.then_some(record))
    }

    fn resolve_deferred(&self, node: &PlanNode, records: &mut [Record]) -> Result<()> {
        if !node.deferred.is_empty() {
            let mut holders = records_at(records, &node.path);
            for deferred in &node.deferred {
                match deferred {
                    Deferred::Link {
                        attribute,
                        link,
                        side,
                        many,
                        target,
                        query,
                    } => self.resolve_link(attribute, *link, *side, *many, *target, query, &mut holders)?,
                    Deferred::Endpoint {
                        attribute,
                        target,
                        query,
                    } => self.resolve_endpoint(attribute, *target, query, &mut holders)?,
                }
            }
        }
        if let Some(link) = &node.link {
            self.resolve_deferred(link, records)?;
        }
        for (_, child) in &node.joins {
            self.resolve_deferred(child, records)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_link(
        &self,
        attribute: &str,
        link: RecordId,
        side: Option<LinkSide>,
        many: bool,
        target: RecordId,
        query: &AttributeQuery,
        holders: &mut [&mut Record],
    ) -> Result<()> {
        let ids: BTreeSet<i64> = holders.iter().filter_map(|h| h.id()).collect();
        let mut grouped: HashMap<i64, Vec<Record>> = HashMap::new();

        if !ids.is_empty() {
            let id_values: Vec<Value> = ids.iter().copied().map(Value::Int).collect();
            let exp = match side {
                Some(side) => MatchExp::is_in(&format!("{}.{ID_ATTR}", side.name()), id_values),
                None => MatchExp::is_in("source.id", id_values.clone())
                    .or(MatchExp::is_in("target.id", id_values)),
            };
            let requested = query.link.as_deref().cloned().unwrap_or_default();
            let link_query = requested
                .clone()
                .nested(LinkSide::Source.name(), AttributeQuery::new())
                .nested(LinkSide::Target.name(), AttributeQuery::new());

            // (holder, other end, link record), in link id order.
            let mut edges: Vec<(i64, i64, Record)> = Vec::new();
            for mut found in self.find(link, Some(&exp), &link_query, None)? {
                let (Some(source), Some(target_id)) =
                    (related_id(&found, "source"), related_id(&found, "target"))
                else {
                    continue;
                };
                for endpoint in [LinkSide::Source, LinkSide::Target] {
                    if !requested.nested.contains_key(endpoint.name()) {
                        found.remove(endpoint.name());
                    }
                }
                match side {
                    Some(LinkSide::Source) => edges.push((source, target_id, found)),
                    Some(LinkSide::Target) => edges.push((target_id, source, found)),
                    None => {
                        if ids.contains(&target_id) && source != target_id {
                            edges.push((target_id, source, found.clone()));
                        }
                        if ids.contains(&source) {
                            edges.push((source, target_id, found));
                        }
                    }
                }
            }

            let others: Vec<i64> = edges
                .iter()
                .map(|(_, other, _)| *other)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let targets: HashMap<i64, Record> = if others.is_empty() {
                HashMap::new()
            } else if query.only_link && !self.schema.record(target).is_filtered() {
                others.iter().map(|&id| (id, id_stub(id))).collect()
            } else {
                let mut target_query = if query.only_link {
                    link_only_target(query)
                } else {
                    query.clone()
                };
                target_query.link = None;
                self.find(target, Some(&id_in(&others)), &target_query, None)?
                    .into_iter()
                    .filter_map(|r| r.id().map(|id| (id, r)))
                    .collect()
            };

            for (holder, other, link_record) in edges {
                let Some(found) = targets.get(&other) else {
                    continue;
                };
                let mut related = found.clone();
                if query.link.is_some() {
                    related.insert(LINK_KEY, link_record);
                }
                grouped.entry(holder).or_default().push(related);
            }
        }

        for holder in holders.iter_mut() {
            let related = holder
                .id()
                .and_then(|id| grouped.get(&id))
                .cloned()
                .unwrap_or_default();
            let field = if many {
                Field::ToMany(related)
            } else {
                related
                    .into_iter()
                    .next()
                    .map(Field::from)
                    .unwrap_or_else(Field::null)
            };
            holder.insert(attribute, field);
        }
        Ok(())
    }

    fn resolve_endpoint(
        &self,
        attribute: &str,
        target: RecordId,
        query: &AttributeQuery,
        holders: &mut [&mut Record],
    ) -> Result<()> {
        let ids: Vec<i64> = holders
            .iter()
            .filter_map(|h| related_id(h, attribute))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let found: HashMap<i64, Record> = if ids.is_empty() {
            HashMap::new()
        } else {
            self.find(target, Some(&id_in(&ids)), query, None)?
                .into_iter()
                .filter_map(|r| r.id().map(|id| (id, r)))
                .collect()
        };
        for holder in holders.iter_mut() {
            let field = related_id(holder, attribute)
                .and_then(|id| found.get(&id).cloned())
                .map(Field::from)
                .unwrap_or_else(Field::null);
            holder.insert(attribute, field);
        }
        Ok(())
    }
}
