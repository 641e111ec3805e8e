//! Record creation.
//!
//! A payload is split into value attributes, written as one new row, and
//! relation attributes, each of which either references an existing record
//! by `id` or carries a nested payload created first. Link rows are written
//! last, with link values taken from the `&` key of the related record.
//!
//! Combined relations have no link table: source, target and link share one
//! row. Attaching a target moves its columns into the source's row; whatever
//! the row held before is moved out to a row of its own, and the superseded
//! link is reported as deleted.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::db::schema::{LinkSide, RecordId, RelationAttribute, TableInfo, INPUT_TYPE_ATTR};
use crate::error::{EngineError, Result};
use crate::executor::{id_stub, Executor, Mutation, MutationEvent};
use crate::queries::MatchExp;
use crate::value::{Field, Record, Value, ID_ATTR, LINK_KEY};

/// Value attributes and relation attributes of a payload.
pub(crate) type SplitPayload = (BTreeMap<String, Value>, Vec<(String, Field)>);

impl Executor<'_> {
    pub fn create(&self, record: RecordId, payload: &Record) -> Result<Mutation> {
        let mut events = Vec::new();
        let created = self.create_record(record, payload, &mut events)?;
        debug!(
            record = %self.schema.record(record).name,
            id = ?created.id(),
            events = events.len(),
            "created record"
        );
        Ok(Mutation {
            records: vec![created],
            events,
        })
    }

    pub(crate) fn create_record(
        &self,
        record: RecordId,
        payload: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let info = self.schema.record(record);
        if info.is_relation() {
            return self.create_link_record(record, payload, events);
        }
        if payload.contains(ID_ATTR) {
            return Err(EngineError::invalid_payload(
                &info.name,
                "'id' is assigned on creation",
            ));
        }

        let root = info.root;
        let (mut values, relations) = self.split_payload(record, payload)?;
        if let Some(input_type) = &info.input_type {
            values.insert(INPUT_TYPE_ATTR.to_string(), Value::from(input_type.as_str()));
        }

        let root_name = &self.schema.record(root).name;
        let id = self.db.allocate_id(root_name)?;
        let mut created = self.write_new_row(root, id, &values, Vec::new())?;
        events.push(MutationEvent::create(root_name.clone(), created.clone()));

        for (name, field) in &relations {
            if let Some(related) = self.relate(record, id, name, field, events)? {
                created.insert(name.clone(), related);
            }
        }
        self.emit_created_views(root, id, &created, events)?;
        Ok(created)
    }

    /// Check a payload against `record` and coerce its values.
    pub(crate) fn split_payload(&self, record: RecordId, payload: &Record) -> Result<SplitPayload> {
        let info = self.schema.record(record);
        let mut values = BTreeMap::new();
        let mut relations = Vec::new();
        for (name, field) in payload.iter() {
            if name == ID_ATTR {
                continue;
            }
            if name == LINK_KEY || name == INPUT_TYPE_ATTR {
                return Err(EngineError::invalid_payload(
                    &info.name,
                    format!("'{name}' is reserved"),
                ));
            }
            let attribute = self.schema.attribute(record, name)?;
            if attribute.hidden {
                return Err(EngineError::invalid_payload(
                    &info.name,
                    format!("'{name}' cannot be written directly"),
                ));
            }
            if let Some(value_attribute) = attribute.as_value() {
                let value = field.as_value().ok_or_else(|| {
                    EngineError::invalid_payload(&info.name, format!("'{name}' is a value attribute"))
                })?;
                let coerced = value.clone().coerce(value_attribute.data_type).ok_or_else(|| {
                    EngineError::invalid_payload(
                        &info.name,
                        format!(
                            "'{name}' expects {}, got {}",
                            value_attribute.data_type.name(),
                            value.type_name()
                        ),
                    )
                })?;
                values.insert(name.clone(), coerced);
            } else {
                relations.push((name.clone(), field.clone()));
            }
        }
        Ok((values, relations))
    }

    /// Column assignments and snapshot of a new row of `record`, defaults
    /// filled in.
    fn row_values(
        &self,
        record: RecordId,
        id: i64,
        values: &BTreeMap<String, Value>,
    ) -> (Vec<(String, Value)>, Record) {
        let mut columns = Vec::new();
        let mut snapshot = Record::new();
        for attribute in self.schema.record(record).value_attributes() {
            let Some(value_attribute) = attribute.as_value() else {
                continue;
            };
            let value = if attribute.name == ID_ATTR {
                Value::Int(id)
            } else {
                values
                    .get(&attribute.name)
                    .cloned()
                    .or_else(|| value_attribute.default.clone())
                    .unwrap_or(Value::Null)
            };
            columns.push((value_attribute.column.clone(), value.clone()));
            snapshot.insert(attribute.name.clone(), value);
        }
        (columns, snapshot)
    }

    fn write_new_row(
        &self,
        record: RecordId,
        id: i64,
        values: &BTreeMap<String, Value>,
        extra: Vec<(String, Value)>,
    ) -> Result<Record> {
        let (mut columns, snapshot) = self.row_values(record, id, values);
        columns.extend(extra);
        self.insert_row(&self.schema.record(record).table, &columns)?;
        Ok(snapshot)
    }

    fn emit_created_views(
        &self,
        root: RecordId,
        id: i64,
        snapshot: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<()> {
        if self.schema.record(root).views.is_empty() {
            return Ok(());
        }
        let after = self.view_membership(root, &[id])?;
        let snapshots = HashMap::from([(id, (None, Some(snapshot.clone())))]);
        self.view_events(root, &HashMap::new(), &after, &snapshots, events);
        Ok(())
    }

    /// Link `holder_id` through relation attribute `name` of `record`.
    pub(crate) fn relate(
        &self,
        record: RecordId,
        holder_id: i64,
        name: &str,
        field: &Field,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Option<Field>> {
        let holder = &self.schema.record(record).name;
        let relation = self.writable_relation(record, name)?;
        match field {
            Field::Value(value) if value.is_null() => Ok(None),
            Field::Value(_) => Err(EngineError::invalid_payload(
                holder,
                format!("relation '{name}' expects a record or a list of records"),
            )),
            Field::ToOne(related) => {
                let linked = self.relate_one(holder_id, relation, related, events)?;
                Ok(Some(Field::from(linked)))
            }
            Field::ToMany(list) => {
                if !relation.many {
                    return Err(EngineError::invalid_payload(
                        holder,
                        format!("relation '{name}' holds a single record"),
                    ));
                }
                let linked = list
                    .iter()
                    .map(|related| self.relate_one(holder_id, relation, related, events))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Field::ToMany(linked)))
            }
        }
    }

    /// Relation attribute `name` of `record`, rejecting filtered links.
    pub(crate) fn writable_relation(&self, record: RecordId, name: &str) -> Result<&RelationAttribute> {
        let holder = &self.schema.record(record).name;
        let relation = self
            .schema
            .attribute(record, name)?
            .as_relation()
            .ok_or_else(|| {
                EngineError::invalid_payload(holder, format!("'{name}' is a value attribute"))
            })?;
        if self.schema.record(relation.link).is_filtered() {
            return Err(EngineError::invalid_payload(
                holder,
                format!("'{name}' is a filtered relation and cannot be written"),
            ));
        }
        Ok(relation)
    }

    /// Create (or reference) one related record and link it to the holder.
    pub(crate) fn relate_one(
        &self,
        holder_id: i64,
        relation: &RelationAttribute,
        related: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let target_name = &self.schema.record(relation.target).name;
        let mut payload = related.clone();
        let link_values = match payload.remove(LINK_KEY) {
            None => None,
            Some(Field::ToOne(values)) => Some(*values),
            Some(Field::Value(value)) if value.is_null() => None,
            Some(_) => {
                return Err(EngineError::invalid_payload(
                    target_name,
                    "'&' must hold the link record's values",
                ));
            }
        };

        let mut linked = match payload.id() {
            Some(id) => {
                self.ensure_exists(relation.target, id)?;
                payload
            }
            None => self.create_record(relation.target, &payload, events)?,
        };
        let other = linked.id().ok_or_else(|| {
            EngineError::invalid_payload(target_name, "related record has no id")
        })?;

        let (source, target) = match relation.side.unwrap_or(LinkSide::Source) {
            LinkSide::Source => (holder_id, other),
            LinkSide::Target => (other, holder_id),
        };
        let link = if relation.combined {
            self.attach_combined(relation.link, source, target, link_values.as_ref(), events)?
        } else {
            self.insert_link(relation.link, source, target, link_values.as_ref(), events)?
        };
        if link_values.is_some() {
            linked.insert(LINK_KEY, link);
        }
        Ok(linked)
    }

    /// Value attributes of a link payload; endpoints are not allowed.
    fn link_values(&self, link: RecordId, values: Option<&Record>) -> Result<BTreeMap<String, Value>> {
        let Some(values) = values else {
            return Ok(BTreeMap::new());
        };
        let (values, relations) = self.split_payload(link, values)?;
        if let Some((name, _)) = relations.first() {
            return Err(EngineError::invalid_payload(
                &self.schema.record(link).name,
                format!("'{name}' cannot be set from link data"),
            ));
        }
        Ok(values)
    }

    /// Insert a row into a link table, first removing links the cardinality
    /// no longer allows.
    pub(crate) fn insert_link(
        &self,
        link: RecordId,
        source: i64,
        target: i64,
        values: Option<&Record>,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let info = self.schema.record(link);
        let link_info = info.link.as_ref().ok_or_else(|| {
            EngineError::InvalidSchema(format!("'{}' is not a relation", info.name))
        })?;
        let values = self.link_values(link, values)?;

        let mut conflicts = Vec::new();
        if !link_info.side_many(LinkSide::Source) {
            conflicts.push(MatchExp::eq("source.id", source));
        }
        if !link_info.side_many(LinkSide::Target) {
            conflicts.push(MatchExp::eq("target.id", target));
        }
        if let Some(exp) = conflicts.into_iter().reduce(|a, b| a.or(b)) {
            self.delete_links_matching(link, &exp, events)?;
        }

        let id = self.db.allocate_id(&info.name)?;
        let endpoints = vec![
            (self.endpoint_column(link, LinkSide::Source)?, Value::Int(source)),
            (self.endpoint_column(link, LinkSide::Target)?, Value::Int(target)),
        ];
        let mut snapshot = self.write_new_row(link, id, &values, endpoints)?;
        snapshot.insert(LinkSide::Source.name(), id_stub(source));
        snapshot.insert(LinkSide::Target.name(), id_stub(target));
        events.push(MutationEvent::create(info.name.clone(), snapshot.clone()));
        self.emit_created_views(link, id, &snapshot, events)?;
        Ok(snapshot)
    }

    /// Create a link record from a payload naming its `source` and `target`.
    fn create_link_record(
        &self,
        link: RecordId,
        payload: &Record,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let info = self.schema.record(link);
        if info.is_filtered() {
            return Err(EngineError::invalid_payload(
                &info.name,
                "filtered relations cannot be written",
            ));
        }
        if payload.contains(ID_ATTR) {
            return Err(EngineError::invalid_payload(
                &info.name,
                "'id' is assigned on creation",
            ));
        }
        let combined = info.link.as_ref().is_some_and(|l| l.combined);

        let mut values = payload.clone();
        let source = self.endpoint_from_payload(link, LinkSide::Source, values.remove("source"), events)?;
        let target = self.endpoint_from_payload(link, LinkSide::Target, values.remove("target"), events)?;
        if combined {
            self.attach_combined(link, source, target, Some(&values), events)
        } else {
            self.insert_link(link, source, target, Some(&values), events)
        }
    }

    fn endpoint_from_payload(
        &self,
        link: RecordId,
        side: LinkSide,
        field: Option<Field>,
        events: &mut Vec<MutationEvent>,
    ) -> Result<i64> {
        let info = self.schema.record(link);
        let endpoint = info
            .link
            .as_ref()
            .map(|l| l.endpoint(side))
            .ok_or_else(|| EngineError::InvalidSchema(format!("'{}' is not a relation", info.name)))?;
        let missing = || {
            EngineError::invalid_payload(
                &info.name,
                format!("'{}' must reference a record", side.name()),
            )
        };
        match field {
            Some(Field::ToOne(related)) => match related.id() {
                Some(id) => {
                    self.ensure_exists(endpoint, id)?;
                    Ok(id)
                }
                None => self.create_record(endpoint, &related, events)?.id().ok_or_else(missing),
            },
            Some(Field::Value(Value::Int(id))) => {
                self.ensure_exists(endpoint, id)?;
                Ok(id)
            }
            _ => Err(missing()),
        }
    }

    /// Tie `target` into the row of `source` through combined relation
    /// `link`.
    pub(crate) fn attach_combined(
        &self,
        link: RecordId,
        source: i64,
        target: i64,
        values: Option<&Record>,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Record> {
        let info = self.schema.record(link);
        let link_info = info.link.as_ref().ok_or_else(|| {
            EngineError::InvalidSchema(format!("'{}' is not a relation", info.name))
        })?;
        let source_info = self.schema.record(link_info.source);
        let target_info = self.schema.record(link_info.target);
        let table = self.schema.table_of(link);
        let values = self.link_values(link, values)?;

        let current = self
            .read_row(
                &table.name,
                source_info.id_column(),
                source,
                &[target_info.id_column().to_string(), info.id_column().to_string()],
            )?
            .ok_or_else(|| EngineError::RecordNotFound {
                record: source_info.name.clone(),
                id: source,
            })?;
        let current_target = current.first().and_then(Value::as_i64);
        let current_link = current.get(1).and_then(Value::as_i64);
        if current_target == Some(target) {
            if let Some(existing) = current_link.map(|id| self.load_record(link, id)).transpose()?.flatten() {
                return Ok(existing);
            }
        }
        if let Some(evicted) = current_target {
            self.extract_member(link_info.target, evicted, link, true, events)?;
        }
        let mut sets = self.extract_member(link_info.target, target, link, false, events)?;

        let id = self.db.allocate_id(&info.name)?;
        let (link_columns, mut snapshot) = self.row_values(link, id, &values);
        sets.extend(link_columns);
        self.update_rows(&table.name, source_info.id_column(), &[source], &sets)?;
        self.remove_empty_rows(table)?;

        snapshot.insert(LinkSide::Source.name(), id_stub(source));
        snapshot.insert(LinkSide::Target.name(), id_stub(target));
        events.push(MutationEvent::create(info.name.clone(), snapshot.clone()));
        Ok(snapshot)
    }

    /// Take the combined cluster of `member` out of its shared row.
    ///
    /// The cluster is every record and combined link reachable from `member`
    /// inside the row without crossing `cut`. Only `cut` is broken, with a
    /// `delete` event; links inside the cluster travel with it. With
    /// `relocate` the cluster moves to a row of its own; otherwise its
    /// column values are returned for the caller to write elsewhere.
    pub(crate) fn extract_member(
        &self,
        member: RecordId,
        id: i64,
        cut: RecordId,
        relocate: bool,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<(String, Value)>> {
        let info = self.schema.record(self.schema.record(member).root);
        let table = self.schema.table_of(info.id);
        let not_found = || EngineError::RecordNotFound {
            record: info.name.clone(),
            id,
        };
        let id_columns: Vec<String> = table
            .members
            .iter()
            .map(|&m| self.schema.record(m).id_column().to_string())
            .collect();
        let row = self
            .read_row(&table.name, info.id_column(), id, &id_columns)?
            .ok_or_else(not_found)?;
        let present: HashMap<RecordId, i64> = table
            .members
            .iter()
            .copied()
            .zip(row)
            .filter_map(|(m, v)| v.as_i64().map(|row_id| (m, row_id)))
            .collect();

        let (cluster, links) = self.row_cluster(table, &present, info.id, cut);
        let columns: Vec<String> = cluster
            .iter()
            .chain(&links)
            .flat_map(|&record| self.value_columns(record))
            .collect();
        let row = self
            .read_row(&table.name, info.id_column(), id, &columns)?
            .ok_or_else(not_found)?;
        let values: Vec<(String, Value)> = columns.into_iter().zip(row).collect();
        let mut cleared: Vec<(String, Value)> =
            values.iter().map(|(column, _)| (column.clone(), Value::Null)).collect();

        if let Some(&cut_id) = present.get(&cut) {
            let cut_info = self.schema.record(cut);
            if let Some(old) = self.load_record(cut, cut_id)? {
                events.push(MutationEvent::delete(cut_info.name.clone(), old));
            }
            cleared.extend(
                self.value_columns(cut)
                    .into_iter()
                    .map(|column| (column, Value::Null)),
            );
        }

        self.update_rows(&table.name, info.id_column(), &[id], &cleared)?;
        if relocate {
            self.insert_row(&table.name, &values)?;
        }
        self.remove_empty_rows(table)?;
        Ok(values)
    }

    /// Records and combined links of one row reachable from `start` without
    /// crossing `cut`, in table order.
    fn row_cluster(
        &self,
        table: &TableInfo,
        present: &HashMap<RecordId, i64>,
        start: RecordId,
        cut: RecordId,
    ) -> (Vec<RecordId>, Vec<RecordId>) {
        let edges: Vec<(RecordId, RecordId, RecordId)> = table
            .members
            .iter()
            .copied()
            .filter(|m| *m != cut && present.contains_key(m))
            .filter_map(|m| {
                let link = self.schema.record(m).link.as_ref()?;
                Some((
                    m,
                    self.schema.record(link.source).root,
                    self.schema.record(link.target).root,
                ))
            })
            .collect();

        let mut cluster = vec![start];
        let mut links = Vec::new();
        let mut next = 0;
        while let Some(&current) = cluster.get(next) {
            for &(link, source, target) in &edges {
                if links.contains(&link) {
                    continue;
                }
                let other = if source == current {
                    target
                } else if target == current {
                    source
                } else {
                    continue;
                };
                links.push(link);
                if present.contains_key(&other) && !cluster.contains(&other) {
                    cluster.push(other);
                }
            }
            next += 1;
        }
        (cluster, links)
    }
}
