//! Source-map compilation and event dispatch.
//!
//! Compilation walks each dependency's projection:
//!
//! | dependency | entries |
//! |------------|---------|
//! | `records` | `create`/`delete` on the source; `update` on the source for its projected values |
//! | nested relation hop | `create`/`delete` on the link; `update` on the link for `&` values; `update` on the target for its values |
//! | `property` | the hops above rooted at the host; `create` on the host when the computation reads a global |
//! | `global` | `create`/`update` on `_Dictionary_`, scoped by key |
//!
//! Buckets keep entries ordered by phase; within a phase, registration
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, trace};

use super::scheduler::Dispatch;
use super::{Computation, DataDep, Phase};
use crate::db::schema::{RecordId, SchemaMap, DICTIONARY};
use crate::error::{EngineError, Result};
use crate::executor::{EventType, MutationEvent};
use crate::queries::{AttributeQuery, ALL_VALUES};
use crate::value::{ID_ATTR, LINK_KEY};

/// Compiled form of one data dependency for one (record, event type).
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    pub record: String,
    pub event_type: EventType,
    pub dep_name: String,
    pub data_dep: DataDep,
    pub computation: Arc<Computation>,
    /// Path from the dependency's root to the record the entry watches;
    /// `None` at the root.
    pub target_path: Option<Vec<String>>,
    /// Attributes whose change triggers an `update` entry; `None` means any.
    pub attributes: Option<Vec<String>>,
    /// Key of a global dependency.
    pub global_key: Option<String>,
    pub phase: Phase,
}

struct EntryCompiler<'a> {
    schema: &'a SchemaMap,
    computation: Arc<Computation>,
    entries: Vec<SourceMapEntry>,
}

impl<'a> EntryCompiler<'a> {
    fn invalid(&self, message: impl Into<String>) -> EngineError {
        EngineError::InvalidComputation {
            computation: self.computation.name.clone(),
            message: message.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        record: RecordId,
        event_type: EventType,
        dep_name: &str,
        dep: &DataDep,
        path: &[String],
        attributes: Option<Vec<String>>,
        global_key: Option<String>,
    ) {
        self.entries.push(SourceMapEntry {
            record: self.schema.record(record).name.clone(),
            event_type,
            dep_name: dep_name.to_string(),
            data_dep: dep.clone(),
            computation: Arc::clone(&self.computation),
            target_path: (!path.is_empty()).then(|| path.to_vec()),
            attributes,
            global_key,
            phase: self.computation.phase,
        });
    }

    fn record_id(&self, name: &str) -> Result<RecordId> {
        self.schema
            .record_id(name)
            .map_err(|_| self.invalid(format!("unknown record type '{name}'")))
    }

    fn compile(mut self) -> Result<Vec<SourceMapEntry>> {
        let computation = Arc::clone(&self.computation);
        for (dep_name, dep) in &computation.deps {
            match dep {
                DataDep::Records {
                    source,
                    attribute_query,
                } => {
                    let source = self.record_id(source)?;
                    self.push(source, EventType::Create, dep_name, dep, &[], None, None);
                    self.push(source, EventType::Delete, dep_name, dep, &[], None, None);
                    if let Some(query) = attribute_query {
                        self.walk(source, query, Vec::new(), dep_name, dep)?;
                    }
                }
                DataDep::Property { attribute_query } => {
                    let host = computation
                        .host
                        .as_deref()
                        .ok_or_else(|| self.invalid("property dependency without a host record"))?;
                    let host = self.record_id(host)?;
                    self.walk(host, attribute_query, Vec::new(), dep_name, dep)?;
                    if computation.has_global_dep() {
                        self.push(host, EventType::Create, dep_name, dep, &[], None, None);
                    }
                }
                DataDep::Global { key } => {
                    let dictionary = self.record_id(DICTIONARY)?;
                    let watched = Some(vec!["value".to_string()]);
                    for event_type in [EventType::Create, EventType::Update] {
                        self.push(
                            dictionary,
                            event_type,
                            dep_name,
                            dep,
                            &[],
                            watched.clone(),
                            Some(key.clone()),
                        );
                    }
                }
            }
        }
        Ok(self.entries)
    }

    fn walk(
        &mut self,
        record: RecordId,
        query: &AttributeQuery,
        path: Vec<String>,
        dep_name: &str,
        dep: &DataDep,
    ) -> Result<()> {
        let schema = self.schema;
        let info = schema.record(record);

        let mut attributes: Vec<String> = Vec::new();
        if query.wants_all_values() {
            attributes.extend(
                info.value_attributes()
                    .map(|a| a.name.clone())
                    .filter(|name| name != ID_ATTR),
            );
        }
        for name in &query.values {
            if name == ALL_VALUES || name == ID_ATTR || attributes.contains(name) {
                continue;
            }
            match info.attribute(name) {
                Some(attribute) if attribute.is_value() => attributes.push(name.clone()),
                _ => {
                    return Err(self.invalid(format!("'{}' has no value attribute '{name}'", info.name)));
                }
            }
        }
        if !attributes.is_empty() {
            self.push(record, EventType::Update, dep_name, dep, &path, Some(attributes), None);
        }

        for (name, sub) in &query.nested {
            let relation = info
                .attribute(name)
                .and_then(|a| a.as_relation())
                .ok_or_else(|| self.invalid(format!("'{}' has no relation '{name}'", info.name)))?;
            let mut sub_path = path.clone();
            sub_path.push(name.clone());
            if !relation.endpoint {
                self.push(relation.link, EventType::Create, dep_name, dep, &sub_path, None, None);
                self.push(relation.link, EventType::Delete, dep_name, dep, &sub_path, None, None);
                if let Some(link_query) = &sub.link {
                    let mut link_path = sub_path.clone();
                    link_path.push(LINK_KEY.to_string());
                    self.walk(relation.link, link_query, link_path, dep_name, dep)?;
                }
            }
            self.walk(relation.target, sub, sub_path, dep_name, dep)?;
        }
        Ok(())
    }
}

/// Compile the entries of one computation.
pub fn compile_source_maps(schema: &SchemaMap, computation: Computation) -> Result<Vec<SourceMapEntry>> {
    EntryCompiler {
        schema,
        computation: Arc::new(computation),
        entries: Vec::new(),
    }
    .compile()
}

/// Dispatch index: record name → event type → entries.
#[derive(Debug, Default)]
pub struct SourceMapManager {
    initialized: bool,
    index: HashMap<String, HashMap<EventType, Vec<SourceMapEntry>>>,
}

impl SourceMapManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Replace the index with the entries of `computations`.
    pub fn initialize(
        &mut self,
        schema: &SchemaMap,
        computations: impl IntoIterator<Item = Computation>,
    ) -> Result<()> {
        let mut entries = Vec::new();
        let mut count = 0;
        for computation in computations {
            entries.extend(compile_source_maps(schema, computation)?);
            count += 1;
        }
        self.index.clear();
        self.initialized = true;
        let total = entries.len();
        self.insert(entries);
        info!(computations = count, entries = total, "initialized source maps");
        Ok(())
    }

    pub fn add_source_maps(&mut self, entries: Vec<SourceMapEntry>) -> Result<()> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        self.insert(entries);
        Ok(())
    }

    pub fn add_computation(&mut self, schema: &SchemaMap, computation: Computation) -> Result<()> {
        if !self.initialized {
            return Err(EngineError::NotInitialized);
        }
        let name = computation.name.clone();
        let entries = compile_source_maps(schema, computation)?;
        info!(computation = %name, entries = entries.len(), "registered computation");
        self.add_source_maps(entries)
    }

    fn insert(&mut self, entries: Vec<SourceMapEntry>) {
        let mut touched: Vec<(String, EventType)> = Vec::new();
        for entry in entries {
            let key = (entry.record.clone(), entry.event_type);
            if !touched.contains(&key) {
                touched.push(key);
            }
            self.index
                .entry(entry.record.clone())
                .or_default()
                .entry(entry.event_type)
                .or_default()
                .push(entry);
        }
        for (record, event_type) in touched {
            if let Some(bucket) = self.index.get_mut(&record).and_then(|b| b.get_mut(&event_type)) {
                bucket.sort_by_key(|e| e.phase);
            }
        }
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.index.values().flat_map(|b| b.values()).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries registered for the record type and event type of `event`.
    pub fn find_source_maps_for_mutation(&self, event: &MutationEvent) -> &[SourceMapEntry] {
        self.index
            .get(&event.record_name)
            .and_then(|b| b.get(&event.event_type))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether `event` (an update) changes what `entry` watches.
    ///
    /// Global entries match on the dictionary key. Other entries need at
    /// least one watched attribute that differs between the old and new
    /// snapshots; an attribute missing on one side counts as a change.
    pub fn should_trigger_update_computation(entry: &SourceMapEntry, event: &MutationEvent) -> bool {
        if let Some(key) = &entry.global_key {
            return event.record_name == DICTIONARY && event_key(event) == Some(key.as_str());
        }
        let (Some(attributes), Some(old)) = (&entry.attributes, &event.old_record) else {
            return true;
        };
        attributes.iter().any(|name| old.get(name) != event.record.get(name))
    }

    /// Entries `event` must be handed to, in index order.
    pub fn dispatch(&self, event: &MutationEvent) -> Vec<Dispatch> {
        self.find_source_maps_for_mutation(event)
            .iter()
            .filter(|entry| {
                let triggered = match event.event_type {
                    EventType::Update => Self::should_trigger_update_computation(entry, event),
                    _ => entry
                        .global_key
                        .as_deref()
                        .is_none_or(|key| event_key(event) == Some(key)),
                };
                trace!(
                    computation = %entry.computation.name,
                    dep = %entry.dep_name,
                    record = %event.record_name,
                    event = event.event_type.as_str(),
                    triggered,
                    "dispatch"
                );
                triggered
            })
            .map(|entry| Dispatch {
                entry: entry.clone(),
                event: event.clone(),
            })
            .collect()
    }
}

fn event_key(event: &MutationEvent) -> Option<&str> {
    event.record.get_value("key").and_then(|v| v.as_str())
}
