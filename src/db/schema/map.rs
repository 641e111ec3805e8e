//! Resolved schema map.
//!
//! The schema map is an arena of [`RecordInfo`] descriptors addressed by
//! [`RecordId`]. Relation attributes store the index of their target and
//! link records, never references, so self-relations and reliance chains
//! need no ownership cycles.
//!
//! Resolution pre-computes everything runtime code needs:
//! - every attribute of every record (value, relation and link endpoints),
//!   with its physical column and the reverse path back to its holder
//! - for filtered records, the root base record and the combined filter
//!   (own AND base's, recursively)
//! - the physical table of every record, merging records tied by combined
//!   relations into one shared row layout
//! - the views (filtered records) of every root record
//!
//! Unknown names and inconsistent definitions fail here, once, instead of
//! per query.

use std::collections::HashMap;

use tracing::info;

use super::definition::{
    Cardinality, DataType, FilteredRelationDef, PropertyDef, RelationDef, SchemaDefinition,
};
use crate::error::{EngineError, Result};
use crate::queries::MatchExp;
use crate::value::{Value, ID_ATTR, LINK_KEY};

pub type RecordId = usize;

/// Process-wide key/value record type backing global values.
pub const DICTIONARY: &str = "_Dictionary_";
/// Discriminator attribute of merged entities.
pub const INPUT_TYPE_ATTR: &str = "__input_type";
/// Physical row identifier column present in every table.
pub const ROW_ID: &str = "_rowId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entity,
    Relation,
}

/// Endpoint of a link record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSide {
    Source,
    Target,
}

impl LinkSide {
    pub fn name(&self) -> &'static str {
        match self {
            LinkSide::Source => "source",
            LinkSide::Target => "target",
        }
    }

    pub fn other(&self) -> LinkSide {
        match self {
            LinkSide::Source => LinkSide::Target,
            LinkSide::Target => LinkSide::Source,
        }
    }
}

/// Relation metadata carried by link records.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub source: RecordId,
    pub target: RecordId,
    pub source_property: String,
    pub target_property: String,
    pub cardinality: Cardinality,
    pub symmetric: bool,
    pub combined: bool,
    pub reliance: bool,
}

impl LinkInfo {
    pub fn endpoint(&self, side: LinkSide) -> RecordId {
        match side {
            LinkSide::Source => self.source,
            LinkSide::Target => self.target,
        }
    }

    /// Whether one record on `side` may take part in many links.
    pub fn side_many(&self, side: LinkSide) -> bool {
        match side {
            LinkSide::Source => self.cardinality.source_many(),
            LinkSide::Target => self.cardinality.target_many(),
        }
    }

    /// Attribute name through which a record on `side` reaches the other end.
    pub fn property(&self, side: LinkSide) -> &str {
        match side {
            LinkSide::Source => &self.source_property,
            LinkSide::Target => &self.target_property,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueAttribute {
    pub data_type: DataType,
    pub column: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RelationAttribute {
    /// Record reached by this attribute.
    pub target: RecordId,
    /// Link record traversed (for endpoint attributes: the holder itself).
    pub link: RecordId,
    /// Holds a collection.
    pub many: bool,
    /// Link endpoint the holder sits on; `None` for an undirected
    /// symmetric attribute.
    pub side: Option<LinkSide>,
    pub symmetric: bool,
    /// `source`/`target` attribute of a link record.
    pub endpoint: bool,
    /// Holder, link and target share one physical row.
    pub combined: bool,
    /// Column on the link table holding the target id (endpoint attributes
    /// of non-combined links only).
    pub column: Option<String>,
    /// Path leading from the target back to the holder.
    pub reverse: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum AttributeKind {
    Value(ValueAttribute),
    Relation(RelationAttribute),
}

#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name: String,
    pub kind: AttributeKind,
    /// Directional variants of symmetric attributes; usable in paths but not
    /// in payloads.
    pub hidden: bool,
}

impl AttributeInfo {
    pub fn is_value(&self) -> bool {
        matches!(self.kind, AttributeKind::Value(_))
    }

    pub fn as_value(&self) -> Option<&ValueAttribute> {
        match &self.kind {
            AttributeKind::Value(v) => Some(v),
            AttributeKind::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationAttribute> {
        match &self.kind {
            AttributeKind::Relation(r) => Some(r),
            AttributeKind::Value(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub id: RecordId,
    pub name: String,
    pub kind: RecordKind,
    attributes: Vec<AttributeInfo>,
    index: HashMap<String, usize>,
    /// Direct base of a filtered record.
    pub base: Option<RecordId>,
    /// Top of the base chain; `root == id` for non-filtered records.
    pub root: RecordId,
    /// Combined filter of a filtered record, rooted at this record.
    pub filter: Option<MatchExp>,
    /// Filtered records whose root is this record.
    pub views: Vec<RecordId>,
    pub table: String,
    pub link: Option<LinkInfo>,
    /// Discriminator value of a merged-entity input.
    pub input_type: Option<String>,
    pub merged_inputs: Vec<RecordId>,
    /// Root link records with an endpoint on this root, with that endpoint.
    pub incident_links: Vec<(RecordId, LinkSide)>,
}

impl RecordInfo {
    fn new(id: RecordId, name: String, kind: RecordKind) -> Self {
        Self {
            id,
            name,
            kind,
            attributes: Vec::new(),
            index: HashMap::new(),
            base: None,
            root: id,
            filter: None,
            views: Vec::new(),
            table: String::new(),
            link: None,
            input_type: None,
            merged_inputs: Vec::new(),
            incident_links: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.index.get(name).map(|&i| &self.attributes[i])
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.attributes.iter()
    }

    pub fn value_attributes(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.attributes.iter().filter(|a| a.is_value())
    }

    pub fn relation_attributes(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.attributes
            .iter()
            .filter(|a| !a.is_value() && !a.hidden)
    }

    pub fn is_filtered(&self) -> bool {
        self.base.is_some()
    }

    pub fn is_relation(&self) -> bool {
        self.kind == RecordKind::Relation
    }

    /// Column holding this record's id.
    pub fn id_column(&self) -> &str {
        self.attribute(ID_ATTR)
            .and_then(AttributeInfo::as_value)
            .map(|v| v.column.as_str())
            .unwrap_or(ID_ATTR)
    }

    fn add(&mut self, attribute: AttributeInfo) -> Result<()> {
        if self.index.contains_key(&attribute.name) {
            return Err(EngineError::InvalidSchema(format!(
                "attribute '{}' is defined twice on '{}'",
                attribute.name, self.name
            )));
        }
        self.index.insert(attribute.name.clone(), self.attributes.len());
        self.attributes.push(attribute);
        Ok(())
    }
}

/// A physical column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    pub indexed: bool,
}

/// A physical table and the root records stored in it.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub members: Vec<RecordId>,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    /// Several records share each row of this table.
    pub fn is_shared(&self) -> bool {
        self.members.len() > 1
    }
}

/// Where a path ends.
#[derive(Debug, Clone, Copy)]
pub enum PathEnd<'a> {
    Value(&'a AttributeInfo),
    Relation(&'a AttributeInfo),
    /// The `&` marker: the link record of the previous relation step.
    Link(RecordId),
}

#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    /// `holders[i]` is the record on which segment `i` is looked up.
    pub holders: Vec<RecordId>,
    pub end: PathEnd<'a>,
}

/// Resolved, immutable schema.
#[derive(Debug, Clone)]
pub struct SchemaMap {
    records: Vec<RecordInfo>,
    by_name: HashMap<String, RecordId>,
    tables: Vec<TableInfo>,
    table_index: HashMap<String, usize>,
}

struct Draft {
    name: String,
    kind: RecordKind,
    base: Option<String>,
    own_filter: Option<MatchExp>,
    properties: Vec<PropertyDef>,
    relation: Option<RelationDef>,
    filtered_relation: Option<FilteredRelationDef>,
    input_type: Option<String>,
}

impl Draft {
    fn new(name: &str, kind: RecordKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            base: None,
            own_filter: None,
            properties: Vec::new(),
            relation: None,
            filtered_relation: None,
            input_type: None,
        }
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidSchema(message.into())
}

fn value_attribute(name: &str, data_type: DataType, column: String, default: Option<Value>) -> AttributeInfo {
    AttributeInfo {
        name: name.to_string(),
        kind: AttributeKind::Value(ValueAttribute {
            data_type,
            column,
            default,
        }),
        hidden: false,
    }
}

fn relation_attribute(name: &str, relation: RelationAttribute, hidden: bool) -> AttributeInfo {
    AttributeInfo {
        name: name.to_string(),
        kind: AttributeKind::Relation(relation),
        hidden,
    }
}

fn check_attribute_name(record: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains(':') || name == LINK_KEY {
        return Err(invalid(format!("'{name}' is not a valid attribute name on '{record}'")));
    }
    Ok(())
}

fn drafts(def: &SchemaDefinition) -> Result<Vec<Draft>> {
    let mut out = Vec::new();

    for entity in &def.entities {
        let mut draft = Draft::new(&entity.name, RecordKind::Entity);
        draft.properties = entity.properties.clone();
        out.push(draft);
    }

    for merged in &def.merged_entities {
        let mut draft = Draft::new(&merged.name, RecordKind::Entity);
        for input in &merged.inputs {
            for property in &input.properties {
                match draft.properties.iter().find(|p| p.name == property.name) {
                    Some(existing) if existing.data_type != property.data_type => {
                        return Err(invalid(format!(
                            "merged entity '{}' has conflicting types for '{}'",
                            merged.name, property.name
                        )));
                    }
                    Some(_) => {}
                    None => draft.properties.push(property.clone()),
                }
            }
        }
        draft
            .properties
            .push(PropertyDef::new(INPUT_TYPE_ATTR, DataType::String));
        out.push(draft);

        for input in &merged.inputs {
            let mut draft = Draft::new(&input.name, RecordKind::Entity);
            draft.base = Some(merged.name.clone());
            draft.own_filter = Some(MatchExp::eq(INPUT_TYPE_ATTR, input.name.as_str()));
            draft.input_type = Some(input.name.clone());
            out.push(draft);
        }
    }

    for relation in &def.relations {
        let mut draft = Draft::new(&relation.link_name(), RecordKind::Relation);
        draft.properties = relation.properties.clone();
        draft.relation = Some(relation.clone());
        out.push(draft);
    }

    for filtered in &def.filtered_entities {
        let mut draft = Draft::new(&filtered.name, RecordKind::Entity);
        draft.base = Some(filtered.base.clone());
        draft.own_filter = Some(filtered.filter.clone());
        out.push(draft);
    }

    for filtered in &def.filtered_relations {
        let mut draft = Draft::new(&filtered.name, RecordKind::Relation);
        draft.base = Some(filtered.base.clone());
        draft.own_filter = Some(filtered.filter.clone());
        draft.filtered_relation = Some(filtered.clone());
        out.push(draft);
    }

    if !out.iter().any(|d| d.name == DICTIONARY) {
        let mut draft = Draft::new(DICTIONARY, RecordKind::Entity);
        draft.properties = vec![
            PropertyDef::new("key", DataType::String),
            PropertyDef::new("value", DataType::Json),
        ];
        out.push(draft);
    }

    Ok(out)
}

/// Union-find over root records, used to group combined records into tables.
struct Groups(Vec<RecordId>);

impl Groups {
    fn find(&mut self, x: RecordId) -> RecordId {
        let parent = self.0[x];
        if parent == x {
            return x;
        }
        let root = self.find(parent);
        self.0[x] = root;
        root
    }

    fn union(&mut self, a: RecordId, b: RecordId) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.0[high] = low;
        true
    }
}

impl SchemaMap {
    /// Resolve a schema definition.
    pub fn build(def: &SchemaDefinition) -> Result<Self> {
        let drafts = drafts(def)?;

        let mut by_name = HashMap::new();
        let mut records = Vec::with_capacity(drafts.len());
        for (id, draft) in drafts.iter().enumerate() {
            if by_name.insert(draft.name.clone(), id).is_some() {
                return Err(invalid(format!("record '{}' is defined twice", draft.name)));
            }
            records.push(RecordInfo::new(id, draft.name.clone(), draft.kind));
        }
        let lookup = |name: &str| -> Result<RecordId> {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| EngineError::UnknownRecord(name.to_string()))
        };

        // Base chains.
        for (id, draft) in drafts.iter().enumerate() {
            if let Some(base) = &draft.base {
                let base_id = lookup(base)?;
                if records[base_id].kind != draft.kind {
                    return Err(invalid(format!(
                        "'{}' and its base '{}' must both be entities or both relations",
                        draft.name, base
                    )));
                }
                records[id].base = Some(base_id);
            }
            records[id].input_type = draft.input_type.clone();
        }
        let mut depth = vec![0usize; records.len()];
        for id in 0..records.len() {
            let mut current = id;
            while let Some(base) = records[current].base {
                depth[id] += 1;
                if depth[id] > records.len() {
                    return Err(invalid(format!(
                        "filter chain of '{}' is cyclic",
                        records[id].name
                    )));
                }
                current = base;
            }
            records[id].root = current;
        }
        let mut by_depth: Vec<RecordId> = (0..records.len()).filter(|&id| depth[id] > 0).collect();
        by_depth.sort_by_key(|&id| depth[id]);

        // Value attributes of root records.
        for (id, draft) in drafts.iter().enumerate() {
            if records[id].base.is_some() {
                continue;
            }
            let prefix = records[id].name.clone();
            records[id].add(value_attribute(ID_ATTR, DataType::Int, format!("{prefix}_{ID_ATTR}"), None))?;
            for property in &draft.properties {
                check_attribute_name(&prefix, &property.name)?;
                if property.name == ID_ATTR
                    || (draft.kind == RecordKind::Relation
                        && (property.name == "source" || property.name == "target"))
                {
                    return Err(invalid(format!("'{}' is reserved on '{prefix}'", property.name)));
                }
                records[id].add(value_attribute(
                    &property.name,
                    property.data_type,
                    format!("{prefix}_{}", property.name),
                    property.default.clone(),
                ))?;
            }
        }

        // Relation attributes.
        for (id, draft) in drafts.iter().enumerate() {
            if let Some(relation) = &draft.relation {
                let source = lookup(&relation.source)?;
                let target = lookup(&relation.target)?;
                Self::add_relation(&mut records, id, source, target, relation)?;
            }
        }
        for (id, draft) in drafts.iter().enumerate() {
            if let Some(filtered) = &draft.filtered_relation {
                Self::add_filtered_relation(&mut records, id, filtered)?;
            }
        }

        // Filtered records inherit their base's attributes and filter.
        for &id in &by_depth {
            let base = records[id].base.unwrap_or(id);
            let inherited: Vec<AttributeInfo> = records[base]
                .attributes
                .iter()
                .filter(|a| records[id].attribute(&a.name).is_none())
                .cloned()
                .collect();
            for attribute in inherited {
                records[id].add(attribute)?;
            }
            if records[id].link.is_none() {
                records[id].link = records[base].link.clone();
            }
            let own = drafts[id].own_filter.clone().unwrap_or_else(MatchExp::all);
            records[id].filter = Some(match &records[base].filter {
                Some(base_filter) => base_filter.clone().and(own),
                None => own,
            });
        }

        // Views, merged inputs and incident links of roots.
        for id in 0..records.len() {
            let root = records[id].root;
            if root != id {
                records[root].views.push(id);
                if records[id].input_type.is_some() {
                    records[root].merged_inputs.push(id);
                }
            }
            if root == id {
                if let Some(link) = records[id].link.clone() {
                    let source_root = records[link.source].root;
                    let target_root = records[link.target].root;
                    records[source_root].incident_links.push((id, LinkSide::Source));
                    records[target_root].incident_links.push((id, LinkSide::Target));
                }
            }
        }

        let tables = Self::layout_tables(&mut records)?;
        let table_index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        let map = SchemaMap {
            records,
            by_name,
            tables,
            table_index,
        };

        for record in &map.records {
            if let Some(filter) = &record.filter {
                filter.validate(&map, record.id)?;
            }
        }

        info!(
            records = map.records.len(),
            tables = map.tables.len(),
            "resolved schema map"
        );
        Ok(map)
    }

    fn add_relation(
        records: &mut [RecordInfo],
        link: RecordId,
        source: RecordId,
        target: RecordId,
        def: &RelationDef,
    ) -> Result<()> {
        let link_name = records[link].name.clone();
        for endpoint in [source, target] {
            if records[endpoint].kind != RecordKind::Entity {
                return Err(invalid(format!(
                    "relation '{link_name}' must connect entities, '{}' is a relation",
                    records[endpoint].name
                )));
            }
        }
        check_attribute_name(&records[source].name, &def.source_property)?;
        check_attribute_name(&records[target].name, &def.target_property)?;

        let symmetric = def.is_symmetric();
        if def.combined {
            if def.cardinality != Cardinality::OneToOne {
                return Err(invalid(format!("combined relation '{link_name}' must be one-to-one")));
            }
            if source == target || records[source].base.is_some() || records[target].base.is_some() {
                return Err(invalid(format!(
                    "combined relation '{link_name}' must connect two distinct non-filtered entities"
                )));
            }
        }

        let info = LinkInfo {
            source,
            target,
            source_property: def.source_property.clone(),
            target_property: def.target_property.clone(),
            cardinality: def.cardinality,
            symmetric,
            combined: def.combined,
            reliance: def.reliance,
        };
        records[link].link = Some(info.clone());
        Self::add_link_attributes(records, link, &info, &def.source_property, &def.target_property)
    }

    fn add_filtered_relation(
        records: &mut [RecordInfo],
        link: RecordId,
        def: &FilteredRelationDef,
    ) -> Result<()> {
        let root = records[link].root;
        let base_info = records[root].link.clone().ok_or_else(|| {
            invalid(format!("filtered relation '{}' has no base relation", def.name))
        })?;
        if base_info.combined {
            return Err(invalid(format!(
                "filtered relation '{}' cannot filter a combined relation",
                def.name
            )));
        }
        if base_info.symmetric && def.source_property != def.target_property {
            return Err(invalid(format!(
                "filtered relation '{}' over a symmetric relation needs one property name",
                def.name
            )));
        }
        check_attribute_name(&records[base_info.source].name, &def.source_property)?;
        check_attribute_name(&records[base_info.target].name, &def.target_property)?;

        let info = LinkInfo {
            source_property: def.source_property.clone(),
            target_property: def.target_property.clone(),
            reliance: false,
            ..base_info
        };
        records[link].link = Some(info.clone());
        Self::add_link_attributes(records, link, &info, &def.source_property, &def.target_property)
    }

    fn add_link_attributes(
        records: &mut [RecordInfo],
        link: RecordId,
        info: &LinkInfo,
        sp: &str,
        tp: &str,
    ) -> Result<()> {
        let root_name = records[records[link].root].name.clone();
        let endpoint_column = |side: LinkSide| {
            (!info.combined).then(|| format!("{root_name}_{}", side.name()))
        };
        let entity_attr = |target: RecordId, many: bool, side: Option<LinkSide>, reverse: &str| {
            RelationAttribute {
                target,
                link,
                many,
                side,
                symmetric: side.is_none(),
                endpoint: false,
                combined: info.combined,
                column: None,
                reverse: vec![reverse.to_string()],
            }
        };

        let (source_back, target_back) = if info.symmetric {
            let directional_source = format!("{sp}:source");
            let directional_target = format!("{sp}:target");
            let source = info.source;
            let many = info.cardinality.source_many() || info.cardinality.target_many();
            records[source].add(relation_attribute(sp, entity_attr(source, many, None, sp), false))?;
            records[source].add(relation_attribute(
                &directional_source,
                entity_attr(source, many, Some(LinkSide::Source), &directional_target),
                true,
            ))?;
            records[source].add(relation_attribute(
                &directional_target,
                entity_attr(source, many, Some(LinkSide::Target), &directional_source),
                true,
            ))?;
            (directional_source, directional_target)
        } else {
            records[info.source].add(relation_attribute(
                sp,
                entity_attr(info.target, info.cardinality.source_many(), Some(LinkSide::Source), tp),
                false,
            ))?;
            records[info.target].add(relation_attribute(
                tp,
                entity_attr(info.source, info.cardinality.target_many(), Some(LinkSide::Target), sp),
                false,
            ))?;
            (sp.to_string(), tp.to_string())
        };

        for (side, back) in [(LinkSide::Source, source_back), (LinkSide::Target, target_back)] {
            let endpoint = RelationAttribute {
                target: info.endpoint(side),
                link,
                many: false,
                side: Some(side),
                symmetric: false,
                endpoint: true,
                combined: info.combined,
                column: endpoint_column(side),
                reverse: vec![back, LINK_KEY.to_string()],
            };
            records[link].add(relation_attribute(side.name(), endpoint, false))?;
        }
        Ok(())
    }

    fn layout_tables(records: &mut [RecordInfo]) -> Result<Vec<TableInfo>> {
        let mut groups = Groups((0..records.len()).collect());
        for id in 0..records.len() {
            if records[id].root != id {
                continue;
            }
            let Some(link) = records[id].link.clone() else {
                continue;
            };
            if !link.combined {
                continue;
            }
            if groups.find(link.source) == groups.find(link.target) {
                return Err(invalid(format!(
                    "combined relation '{}' closes a cycle of combined records",
                    records[id].name
                )));
            }
            groups.union(link.source, id);
            groups.union(link.target, id);
        }

        let mut members: HashMap<RecordId, Vec<RecordId>> = HashMap::new();
        for id in 0..records.len() {
            if records[id].root == id {
                let group = groups.find(id);
                members.entry(group).or_default().push(id);
            }
        }

        let mut tables = Vec::new();
        let mut leaders: Vec<RecordId> = members.keys().copied().collect();
        leaders.sort_unstable();
        for leader in leaders {
            let group = &members[&leader];
            let name = records[leader].name.clone();
            let mut columns = Vec::new();
            for &member in group {
                for attribute in records[member].value_attributes() {
                    if let Some(value) = attribute.as_value() {
                        columns.push(ColumnInfo {
                            name: value.column.clone(),
                            data_type: value.data_type,
                            indexed: attribute.name == ID_ATTR,
                        });
                    }
                }
                for attribute in records[member].relation_attributes() {
                    if let Some(column) = attribute.as_relation().and_then(|r| r.column.clone()) {
                        columns.push(ColumnInfo {
                            name: column,
                            data_type: DataType::Int,
                            indexed: true,
                        });
                    }
                }
            }
            tables.push(TableInfo {
                name,
                members: group.clone(),
                columns,
            });
        }

        for id in 0..records.len() {
            let root = records[id].root;
            let leader = groups.find(root);
            records[id].table = records[leader].name.clone();
        }
        Ok(tables)
    }

    pub fn record(&self, id: RecordId) -> &RecordInfo {
        &self.records[id]
    }

    pub fn record_id(&self, name: &str) -> Result<RecordId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| EngineError::UnknownRecord(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&RecordInfo> {
        Ok(self.record(self.record_id(name)?))
    }

    pub fn records(&self) -> impl Iterator<Item = &RecordInfo> {
        self.records.iter()
    }

    pub fn attribute(&self, record: RecordId, name: &str) -> Result<&AttributeInfo> {
        let info = self.record(record);
        info.attribute(name).ok_or_else(|| EngineError::UnknownAttribute {
            record: info.name.clone(),
            attribute: name.to_string(),
        })
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn table_of(&self, record: RecordId) -> &TableInfo {
        let name = &self.record(record).table;
        &self.tables[self.table_index[name]]
    }

    pub fn dictionary(&self) -> Result<RecordId> {
        self.record_id(DICTIONARY)
    }

    /// Walk a path from `record`, checking every segment.
    pub fn resolve_path(&self, record: RecordId, path: &[String]) -> Result<ResolvedPath<'_>> {
        let root_name = &self.record(record).name;
        let mut holders = Vec::with_capacity(path.len());
        let mut current = record;
        let mut previous_link: Option<RecordId> = None;

        for (i, segment) in path.iter().enumerate() {
            holders.push(current);
            let last = i + 1 == path.len();
            if segment == LINK_KEY {
                let link = previous_link.take().ok_or_else(|| {
                    EngineError::invalid_match(
                        root_name,
                        format!("'&' in '{}' must follow a relation attribute", path.join(".")),
                    )
                })?;
                if last {
                    return Ok(ResolvedPath {
                        holders,
                        end: PathEnd::Link(link),
                    });
                }
                current = link;
                continue;
            }

            let attribute = self.attribute(current, segment)?;
            match &attribute.kind {
                AttributeKind::Value(_) => {
                    if !last {
                        return Err(EngineError::invalid_match(
                            root_name,
                            format!(
                                "'{segment}' in '{}' is a value attribute and cannot be traversed",
                                path.join(".")
                            ),
                        ));
                    }
                    return Ok(ResolvedPath {
                        holders,
                        end: PathEnd::Value(attribute),
                    });
                }
                AttributeKind::Relation(relation) => {
                    if last {
                        return Ok(ResolvedPath {
                            holders,
                            end: PathEnd::Relation(attribute),
                        });
                    }
                    previous_link = (!relation.endpoint).then_some(relation.link);
                    current = relation.target;
                }
            }
        }
        Err(EngineError::invalid_match(root_name, "empty path"))
    }

    /// For a path crossing a symmetric attribute, the two directional
    /// variants of the path (first symmetric segment replaced by its
    /// `:source` and `:target` forms). `None` if the path has no symmetric
    /// segment.
    pub fn symmetric_dual(&self, record: RecordId, path: &[String]) -> Result<Option<[Vec<String>; 2]>> {
        let resolved = self.resolve_path(record, path)?;
        for (i, segment) in path.iter().enumerate() {
            if segment == LINK_KEY {
                continue;
            }
            let attribute = self.attribute(resolved.holders[i], segment)?;
            if attribute.as_relation().is_some_and(|r| r.symmetric) {
                let mut source = path.to_vec();
                let mut target = path.to_vec();
                source[i] = format!("{segment}:source");
                target[i] = format!("{segment}:target");
                return Ok(Some([source, target]));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{EntityDef, RelationDef};
    use crate::test_utils::{full_schema, user_team_schema};

    #[test]
    fn test_value_and_relation_attributes() {
        let schema = user_team_schema();
        let user = schema.get("User").unwrap();
        let name = user.attribute("name").unwrap().as_value().unwrap();
        assert_eq!(name.column, "User_name");

        let teams = user.attribute("teams").unwrap().as_relation().unwrap();
        assert!(teams.many);
        assert_eq!(teams.side, Some(LinkSide::Source));
        assert_eq!(teams.reverse, vec!["members"]);
        assert_eq!(schema.record(teams.target).name, "Team");
        assert_eq!(schema.record(teams.link).name, "User_teams_members_Team");
    }

    #[test]
    fn test_link_endpoints_and_reverse_paths() {
        let schema = user_team_schema();
        let link = schema.get("User_teams_members_Team").unwrap();
        let source = link.attribute("source").unwrap().as_relation().unwrap();
        assert!(source.endpoint);
        assert_eq!(source.column.as_deref(), Some("User_teams_members_Team_source"));
        assert_eq!(source.reverse, vec!["teams", "&"]);
        assert!(link.attribute("role").is_some());
    }

    #[test]
    fn test_dictionary_always_present() {
        let schema = user_team_schema();
        let dict = schema.get(DICTIONARY).unwrap();
        assert!(dict.attribute("key").is_some());
        assert!(dict.attribute("value").is_some());
    }

    #[test]
    fn test_symmetric_relation_has_directional_variants() {
        let schema = full_schema();
        let user = schema.record_id("User").unwrap();
        let friends = schema.attribute(user, "friends").unwrap().as_relation().unwrap();
        assert!(friends.symmetric);
        let source = schema.attribute(user, "friends:source").unwrap();
        assert!(source.hidden);
        assert_eq!(source.as_relation().unwrap().reverse, vec!["friends:target"]);

        let dual = schema
            .symmetric_dual(user, &["friends".to_string(), "name".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(dual[0], vec!["friends:source", "name"]);
        assert_eq!(dual[1], vec!["friends:target", "name"]);
        assert!(schema
            .symmetric_dual(user, &["name".to_string()])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_filtered_entity_resolution() {
        let schema = full_schema();
        let senior = schema.get("SeniorAdult").unwrap();
        let user = schema.record_id("User").unwrap();
        assert_eq!(senior.root, user);
        assert_eq!(senior.table, "User");
        // Inherits relation attributes and combines filters with its base.
        assert!(senior.attribute("teams").is_some());
        assert_eq!(senior.filter.as_ref().unwrap().atoms().len(), 2);
        assert!(schema.record(user).views.contains(&senior.id));
    }

    #[test]
    fn test_combined_records_share_a_table() {
        let schema = full_schema();
        let user = schema.get("User").unwrap();
        let profile = schema.get("Profile").unwrap();
        assert_eq!(user.table, profile.table);
        let table = schema.table_of(user.id);
        assert!(table.is_shared());
        assert!(table.columns.iter().any(|c| c.name == "Profile_title"));
        // Combined links carry no endpoint columns.
        let link = schema.get("User_profile_owner_Profile").unwrap();
        assert!(link.attribute("source").unwrap().as_relation().unwrap().column.is_none());
    }

    #[test]
    fn test_merged_inputs_are_views() {
        let schema = full_schema();
        let merged = schema.get("Contact").unwrap();
        assert!(merged.attribute(INPUT_TYPE_ATTR).is_some());
        assert_eq!(merged.merged_inputs.len(), 2);
        let email = schema.get("EmailContact").unwrap();
        assert_eq!(email.input_type.as_deref(), Some("EmailContact"));
        assert_eq!(email.root, merged.id);
    }

    #[test]
    fn test_unknown_endpoint_fails_fast() {
        let def = SchemaDefinition::new()
            .entity(EntityDef::new("User"))
            .relation(RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany));
        assert!(matches!(
            SchemaMap::build(&def),
            Err(EngineError::UnknownRecord(name)) if name == "Team"
        ));
    }

    #[test]
    fn test_combined_must_be_one_to_one() {
        let def = SchemaDefinition::new()
            .entity(EntityDef::new("A"))
            .entity(EntityDef::new("B"))
            .relation(RelationDef::new("A", "b", "B", "a", Cardinality::OneToMany).combined());
        assert!(matches!(SchemaMap::build(&def), Err(EngineError::InvalidSchema(_))));
    }

    #[test]
    fn test_combined_cycle_rejected() {
        let def = SchemaDefinition::new()
            .entity(EntityDef::new("A"))
            .entity(EntityDef::new("B"))
            .relation(RelationDef::new("A", "b", "B", "a", Cardinality::OneToOne).combined())
            .relation(RelationDef::new("A", "b2", "B", "a2", Cardinality::OneToOne).combined());
        assert!(matches!(SchemaMap::build(&def), Err(EngineError::InvalidSchema(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let def = SchemaDefinition::new()
            .entity(EntityDef::new("A"))
            .entity(EntityDef::new("A"));
        assert!(matches!(SchemaMap::build(&def), Err(EngineError::InvalidSchema(_))));
    }

    #[test]
    fn test_filter_validated_at_build_time() {
        let def = SchemaDefinition::new()
            .entity(EntityDef::new("A").property("name", DataType::String))
            .filtered_entity("B", "A", MatchExp::eq("missing", 1i64));
        assert!(matches!(
            SchemaMap::build(&def),
            Err(EngineError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_resolve_path_through_link_marker() {
        let schema = user_team_schema();
        let user = schema.record_id("User").unwrap();
        let path: Vec<String> = ["teams", "&", "role"].iter().map(|s| s.to_string()).collect();
        let resolved = schema.resolve_path(user, &path).unwrap();
        assert!(matches!(resolved.end, PathEnd::Value(a) if a.name == "role"));
        assert_eq!(schema.record(resolved.holders[2]).name, "User_teams_members_Team");
    }
}
