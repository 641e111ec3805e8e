//! Attribute query planning.
//!
//! A [`PlanNode`] tree splits a projection into what one SELECT can fetch
//! and what needs follow-up queries:
//!
//! - x-to-one relations to unfiltered records over unfiltered links are
//!   joined into the main statement;
//! - x-to-many relations, symmetric relations, relations whose target or
//!   link is a filtered view, and relations leading back to a record type
//!   already on the current branch are deferred. Deferred relations are
//!   resolved by one batched query over the link record type followed by
//!   one query over the targets, whatever the number of parents.
//!
//! Link endpoints (`source`/`target`) asked only for their `id` are read
//! straight from the link row.

use crate::db::schema::{LinkSide, RecordId, RelationAttribute, SchemaMap};
use crate::error::{EngineError, Result};
use crate::queries::attribute_query::AttributeQuery;
use crate::value::{ID_ATTR, LINK_KEY};

/// A relation resolved by follow-up queries.
#[derive(Debug, Clone, PartialEq)]
pub enum Deferred {
    /// Relation of an entity, resolved through its link records.
    Link {
        attribute: String,
        link: RecordId,
        /// Side of the link the holder sits on; `None` for an undirected
        /// symmetric attribute.
        side: Option<LinkSide>,
        many: bool,
        target: RecordId,
        query: AttributeQuery,
    },
    /// Endpoint of a link record; the endpoint id is selected as a key and
    /// the target fetched afterwards.
    Endpoint {
        attribute: String,
        target: RecordId,
        query: AttributeQuery,
    },
}

impl Deferred {
    pub fn attribute(&self) -> &str {
        match self {
            Deferred::Link { attribute, .. } | Deferred::Endpoint { attribute, .. } => attribute,
        }
    }
}

/// One record instance of the main statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanNode {
    pub record: RecordId,
    /// Attribute path from the statement root; the join key.
    pub path: Vec<String>,
    /// Value attributes to select; always starts with `id`.
    pub values: Vec<String>,
    pub joins: Vec<(String, PlanNode)>,
    /// Link record of the relation step that reached this node.
    pub link: Option<Box<PlanNode>>,
    /// Endpoint attributes whose id is read from this (link) row.
    pub endpoint_keys: Vec<String>,
    pub deferred: Vec<Deferred>,
}

pub struct Planner<'a> {
    schema: &'a SchemaMap,
}

impl<'a> Planner<'a> {
    pub fn new(schema: &'a SchemaMap) -> Self {
        Self { schema }
    }

    pub fn plan(&self, record: RecordId, query: &AttributeQuery) -> Result<PlanNode> {
        let mut visited = vec![self.schema.record(record).root];
        self.plan_node(record, Vec::new(), query, &mut visited)
    }

    fn plan_node(
        &self,
        record: RecordId,
        path: Vec<String>,
        query: &AttributeQuery,
        visited: &mut Vec<RecordId>,
    ) -> Result<PlanNode> {
        let info = self.schema.record(record);
        let mut node = PlanNode {
            record,
            path,
            values: vec![ID_ATTR.to_string()],
            joins: Vec::new(),
            link: None,
            endpoint_keys: Vec::new(),
            deferred: Vec::new(),
        };

        if query.wants_all_values() {
            node.values.extend(
                info.value_attributes()
                    .map(|a| a.name.clone())
                    .filter(|name| name != ID_ATTR),
            );
        }
        for name in &query.values {
            if name == crate::queries::attribute_query::ALL_VALUES || node.values.contains(name) {
                continue;
            }
            let attribute = self.schema.attribute(record, name)?;
            if !attribute.is_value() {
                return Err(EngineError::invalid_query(
                    &info.name,
                    format!("'{name}' is a relation; request it as a nested projection"),
                ));
            }
            node.values.push(name.clone());
        }

        for (name, sub) in &query.nested {
            let attribute = self.schema.attribute(record, name)?;
            let relation = attribute.as_relation().ok_or_else(|| {
                EngineError::invalid_query(&info.name, format!("'{name}' is a value attribute"))
            })?;
            if relation.endpoint {
                self.plan_endpoint(&mut node, name, relation, sub, visited)?;
            } else {
                self.plan_relation(&mut node, name, relation, sub, visited)?;
            }
        }

        if query.link.is_some() && node.path.is_empty() {
            return Err(EngineError::invalid_query(
                &info.name,
                "'&' is only valid inside a nested projection",
            ));
        }
        Ok(node)
    }

    fn plan_relation(
        &self,
        node: &mut PlanNode,
        name: &str,
        relation: &RelationAttribute,
        sub: &AttributeQuery,
        visited: &mut Vec<RecordId>,
    ) -> Result<()> {
        let target = self.schema.record(relation.target);
        let link = self.schema.record(relation.link);
        let joinable = !relation.many
            && !relation.symmetric
            && !target.is_filtered()
            && !link.is_filtered()
            && !visited.contains(&target.root);

        if !joinable {
            node.deferred.push(Deferred::Link {
                attribute: name.to_string(),
                link: relation.link,
                side: relation.side,
                many: relation.many,
                target: relation.target,
                query: sub.clone(),
            });
            return Ok(());
        }

        let mut path = node.path.clone();
        path.push(name.to_string());
        visited.push(target.root);
        let child = if sub.only_link {
            self.plan_node(relation.target, path.clone(), &link_only_target(sub), visited)
        } else {
            self.plan_node(relation.target, path.clone(), sub, visited)
        };
        visited.pop();
        let mut child = child?;

        if let Some(link_query) = &sub.link {
            let mut link_path = path;
            link_path.push(LINK_KEY.to_string());
            visited.push(link.root);
            let link_node = self.plan_node(relation.link, link_path, link_query, visited);
            visited.pop();
            child.link = Some(Box::new(link_node?));
        }
        node.joins.push((name.to_string(), child));
        Ok(())
    }

    fn plan_endpoint(
        &self,
        node: &mut PlanNode,
        name: &str,
        relation: &RelationAttribute,
        sub: &AttributeQuery,
        visited: &mut Vec<RecordId>,
    ) -> Result<()> {
        let target = self.schema.record(relation.target);
        if sub.link.is_some() {
            return Err(EngineError::invalid_query(
                &self.schema.record(node.record).name,
                format!("endpoint '{name}' has no link data"),
            ));
        }
        let id_only = sub.nested.is_empty()
            && !sub.wants_all_values()
            && sub.values.iter().all(|v| v == ID_ATTR);
        if id_only {
            node.endpoint_keys.push(name.to_string());
            return Ok(());
        }
        if target.is_filtered() || visited.contains(&target.root) {
            node.endpoint_keys.push(name.to_string());
            node.deferred.push(Deferred::Endpoint {
                attribute: name.to_string(),
                target: relation.target,
                query: sub.clone(),
            });
            return Ok(());
        }

        let mut path = node.path.clone();
        path.push(name.to_string());
        visited.push(target.root);
        let child = self.plan_node(relation.target, path, sub, visited);
        visited.pop();
        node.joins.push((name.to_string(), child?));
        Ok(())
    }
}

/// Target projection of an `only_link` request: the id alone, plus the
/// link data.
pub(crate) fn link_only_target(query: &AttributeQuery) -> AttributeQuery {
    AttributeQuery {
        values: std::iter::once(ID_ATTR.to_string()).collect(),
        nested: Default::default(),
        link: query.link.clone(),
        only_link: true,
    }
}
