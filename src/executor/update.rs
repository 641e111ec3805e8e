//! Record update.
//!
//! Value attributes of every matched record are written with one UPDATE.
//! Relation attributes are applied per record: a record (or list) links
//! more, a structured null unlinks everything the attribute holds. The
//! entity's own `update` event never reports relation changes; those come
//! out as `create`/`delete` events of the link record type.

use std::collections::HashMap;

use tracing::debug;

use crate::db::schema::{LinkSide, RecordId, RelationAttribute};
use crate::error::{EngineError, Result};
use crate::executor::query::snapshot_query;
use crate::executor::{id_in, Executor, Mutation, MutationEvent};
use crate::queries::MatchExp;
use crate::value::{Field, Record, Value, ID_ATTR};

impl Executor<'_> {
    pub fn update(&self, record: RecordId, exp: &MatchExp, payload: &Record) -> Result<Mutation> {
        let info = self.schema.record(record);
        if payload.contains(ID_ATTR) {
            return Err(EngineError::invalid_payload(&info.name, "'id' cannot be updated"));
        }
        if info.is_relation()
            && (payload.contains(LinkSide::Source.name()) || payload.contains(LinkSide::Target.name()))
        {
            return Err(EngineError::invalid_payload(
                &info.name,
                "link endpoints cannot be updated; delete and create the link instead",
            ));
        }
        let (values, relations) = self.split_payload(record, payload)?;
        for (name, _) in &relations {
            self.writable_relation(record, name)?;
        }

        let ids = self.find_ids(record, Some(exp))?;
        if ids.is_empty() {
            return Ok(Mutation::default());
        }

        let root = info.root;
        let root_info = self.schema.record(root);
        let query = snapshot_query(root_info);
        let selection = id_in(&ids);

        let before = self.view_membership(root, &ids)?;
        let old = self.find(root, Some(&selection), &query, None)?;

        if !values.is_empty() {
            let sets = values
                .iter()
                .map(|(name, value)| {
                    let column = self
                        .schema
                        .attribute(root, name)?
                        .as_value()
                        .map(|v| v.column.clone())
                        .ok_or_else(|| {
                            EngineError::invalid_payload(&info.name, format!("'{name}' is not a value"))
                        })?;
                    Ok((column, value.clone()))
                })
                .collect::<Result<Vec<(String, Value)>>>()?;
            self.update_rows(&root_info.table, root_info.id_column(), &ids, &sets)?;
        }

        let mut link_events = Vec::new();
        for &id in &ids {
            for (name, field) in &relations {
                self.update_relation(record, id, name, field, &mut link_events)?;
            }
        }

        let new = self.find(root, Some(&selection), &query, None)?;
        let old_by_id: HashMap<i64, Record> =
            old.into_iter().filter_map(|r| r.id().map(|id| (id, r))).collect();
        let mut events = Vec::new();
        let mut snapshots = HashMap::new();
        for record in &new {
            let Some(id) = record.id() else {
                continue;
            };
            // Unchanged rows keep no old snapshot so staying in a view stays silent.
            let previous = old_by_id.get(&id).filter(|previous| *previous != record).cloned();
            if let Some(previous) = &previous {
                events.push(MutationEvent::update(root_info.name.clone(), record.clone(), previous.clone()));
            }
            snapshots.insert(id, (previous, Some(record.clone())));
        }
        let after = self.view_membership(root, &ids)?;
        self.view_events(root, &before, &after, &snapshots, &mut events);
        events.extend(link_events);

        debug!(
            record = %info.name,
            updated = new.len(),
            events = events.len(),
            "updated records"
        );
        Ok(Mutation {
            records: new,
            events,
        })
    }

    fn update_relation(
        &self,
        record: RecordId,
        id: i64,
        name: &str,
        field: &Field,
        events: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        let holder = &self.schema.record(record).name;
        let relation = self.writable_relation(record, name)?;
        match field {
            Field::Value(value) if value.is_null() => self.unlink_all(relation, id, events),
            Field::Value(_) => Err(EngineError::invalid_payload(
                holder,
                format!("relation '{name}' expects a record, a list of records or null"),
            )),
            Field::ToOne(related) => {
                self.relate_one(id, relation, related, events)?;
                Ok(())
            }
            Field::ToMany(list) => {
                if !relation.many {
                    return Err(EngineError::invalid_payload(
                        holder,
                        format!("relation '{name}' holds a single record"),
                    ));
                }
                for related in list {
                    self.relate_one(id, relation, related, events)?;
                }
                Ok(())
            }
        }
    }

    /// Remove every link `relation` holds for record `id`.
    fn unlink_all(
        &self,
        relation: &RelationAttribute,
        id: i64,
        events: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        if !relation.combined {
            let on_side = |side: LinkSide| MatchExp::eq(&format!("{}.{ID_ATTR}", side.name()), id);
            let exp = match relation.side {
                Some(side) => on_side(side),
                None => on_side(LinkSide::Source).or(on_side(LinkSide::Target)),
            };
            self.delete_links_matching(relation.link, &exp, events)?;
            return Ok(());
        }

        let link = self.schema.record(relation.link);
        let side = relation.side.unwrap_or(LinkSide::Source);
        let Some(link_info) = &link.link else {
            return Ok(());
        };
        let holder = self.schema.record(link_info.endpoint(side));
        let other = self.schema.record(relation.target);
        let table = self.schema.table_of(relation.link);
        let current = self
            .read_row(&table.name, holder.id_column(), id, &[other.id_column().to_string()])?
            .and_then(|row| row.into_iter().next())
            .and_then(|v| v.as_i64());
        if let Some(other_id) = current {
            self.extract_member(relation.target, other_id, relation.link, true, events)?;
        }
        Ok(())
    }
}
