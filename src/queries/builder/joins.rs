//! Join tree shared by every path of one statement.
//!
//! Paths are resolved from the statement's root record. Each distinct path
//! prefix is joined exactly once, so `teams.name` and `teams.&.role` reuse
//! the same link and target aliases. Relation steps are LEFT JOINs: the
//! link table on the holder's id, then the target table on the link's
//! other endpoint column. Combined relations live in the holder's row and
//! reuse the holder's alias.

use std::collections::HashMap;

use crate::db::schema::{RecordId, RelationAttribute, SchemaMap};
use crate::error::{EngineError, Result};
use crate::queries::builder::compilers::SqlDialect;
use crate::value::LINK_KEY;

/// A joined record instance.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinNode {
    pub alias: String,
    pub record: RecordId,
}

pub struct JoinTree<'s> {
    schema: &'s SchemaMap,
    dialect: &'s dyn SqlDialect,
    prefix: String,
    next: usize,
    root: JoinNode,
    nodes: HashMap<Vec<String>, JoinNode>,
    clauses: Vec<String>,
}

impl<'s> JoinTree<'s> {
    /// Start a tree rooted at `record`; aliases are `{prefix}0`, `{prefix}1`...
    pub fn new(schema: &'s SchemaMap, dialect: &'s dyn SqlDialect, record: RecordId, prefix: &str) -> Self {
        Self {
            schema,
            dialect,
            prefix: prefix.to_string(),
            next: 1,
            root: JoinNode {
                alias: format!("{prefix}0"),
                record,
            },
            nodes: HashMap::new(),
            clauses: Vec::new(),
        }
    }

    pub fn root(&self) -> &JoinNode {
        &self.root
    }

    pub fn has_joins(&self) -> bool {
        !self.clauses.is_empty()
    }

    /// `"table" AS "alias"` for the root record.
    pub fn from_clause(&self) -> String {
        let table = &self.schema.record(self.root.record).table;
        format!(
            "{} AS {}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(&self.root.alias)
        )
    }

    /// All join clauses in creation order, each prefixed with a space.
    pub fn join_clauses(&self) -> String {
        self.clauses.iter().map(|c| format!(" {c}")).collect()
    }

    /// Qualified column reference.
    pub fn column(&self, alias: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_identifier(alias),
            self.dialect.quote_identifier(column)
        )
    }

    /// Qualified id column of a joined node.
    pub fn id_column(&self, node: &JoinNode) -> String {
        self.column(&node.alias, self.schema.record(node.record).id_column())
    }

    /// Resolve (joining as needed) the record reached by `path`.
    ///
    /// Every segment must be a directional relation attribute or the `&`
    /// marker right after one.
    pub fn resolve(&mut self, path: &[String]) -> Result<JoinNode> {
        let schema = self.schema;
        let mut current = self.root.clone();
        for i in 0..path.len() {
            let key = &path[..=i];
            if let Some(node) = self.nodes.get(key) {
                current = node.clone();
                continue;
            }
            let segment = &path[i];
            let root_name = &schema.record(self.root.record).name;
            if segment == LINK_KEY {
                return Err(EngineError::invalid_match(
                    root_name,
                    format!("'&' in '{}' must follow a relation attribute", path.join(".")),
                ));
            }
            let attribute = schema.attribute(current.record, segment)?;
            let relation = attribute.as_relation().ok_or_else(|| {
                EngineError::invalid_match(
                    root_name,
                    format!("'{segment}' in '{}' is not a relation attribute", path.join(".")),
                )
            })?;
            if relation.symmetric {
                return Err(EngineError::invalid_match(
                    root_name,
                    format!("symmetric attribute '{segment}' must be expanded before joining"),
                ));
            }

            let (link, target) = self.join_relation(&current, relation)?;
            if let Some(link) = link {
                let mut link_key = key.to_vec();
                link_key.push(LINK_KEY.to_string());
                self.nodes.insert(link_key, link);
            }
            self.nodes.insert(key.to_vec(), target.clone());
            current = target;
        }
        Ok(current)
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        alias
    }

    fn join_relation(
        &mut self,
        holder: &JoinNode,
        relation: &RelationAttribute,
    ) -> Result<(Option<JoinNode>, JoinNode)> {
        if relation.combined {
            let link = (!relation.endpoint).then(|| JoinNode {
                alias: holder.alias.clone(),
                record: relation.link,
            });
            let target = JoinNode {
                alias: holder.alias.clone(),
                record: relation.target,
            };
            return Ok((link, target));
        }

        let schema = self.schema;
        let target_info = schema.record(relation.target);

        if relation.endpoint {
            let column = relation.column.as_deref().ok_or_else(|| {
                EngineError::InvalidSchema(format!(
                    "endpoint of '{}' has no column",
                    schema.record(relation.link).name
                ))
            })?;
            let alias = self.next_alias();
            let on_left = self.column(&alias, target_info.id_column());
            let on_right = self.column(&holder.alias, column);
            self.push_join(&target_info.table, &alias, &on_left, &on_right);
            return Ok((
                None,
                JoinNode {
                    alias,
                    record: relation.target,
                },
            ));
        }

        let side = relation.side.ok_or_else(|| {
            EngineError::InvalidSchema("undirected relation attribute in join".to_string())
        })?;
        let link_info = schema.record(relation.link);
        let endpoint_column = |name: &str| -> Result<String> {
            link_info
                .attribute(name)
                .and_then(|a| a.as_relation())
                .and_then(|r| r.column.clone())
                .ok_or_else(|| {
                    EngineError::InvalidSchema(format!(
                        "link '{}' has no '{name}' column",
                        link_info.name
                    ))
                })
        };
        let holder_column = endpoint_column(side.name())?;
        let other_column = endpoint_column(side.other().name())?;

        let link_alias = self.next_alias();
        let on_left = self.column(&link_alias, &holder_column);
        let on_right = self.id_column(holder);
        self.push_join(&link_info.table, &link_alias, &on_left, &on_right);

        let target_alias = self.next_alias();
        let on_left = self.column(&target_alias, target_info.id_column());
        let on_right = self.column(&link_alias, &other_column);
        self.push_join(&target_info.table, &target_alias, &on_left, &on_right);

        Ok((
            Some(JoinNode {
                alias: link_alias,
                record: relation.link,
            }),
            JoinNode {
                alias: target_alias,
                record: relation.target,
            },
        ))
    }

    fn push_join(&mut self, table: &str, alias: &str, left: &str, right: &str) {
        self.clauses.push(format!(
            "LEFT JOIN {} AS {} ON {left} = {right}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(alias)
        ));
    }
}
