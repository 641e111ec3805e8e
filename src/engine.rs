//! Top-level engine handle.
//!
//! An [`Engine`] owns the resolved schema map, the storage driver and the
//! source-map index. Every mutation runs in its own transaction and returns
//! the events it produced; feeding those events to [`Engine::dispatch`] or
//! [`Engine::run`] is up to the caller.

use std::path::Path;

use tracing::{debug, info};

use crate::computation::{Computation, Dispatch, Scheduler, SourceMapManager};
use crate::config::{resolve_config, EngineOptions};
use crate::db::schema::{create_schema, RecordId, SchemaDefinition, SchemaMap};
use crate::db::{Database, DatabaseConfig};
use crate::error::Result;
use crate::executor::{with_transaction, Executor, Modifier, Mutation, MutationEvent};
use crate::queries::{AttributeQuery, MatchExp};
use crate::value::{Record, Value};

pub struct Engine {
    schema: SchemaMap,
    db: Box<dyn Database>,
    options: EngineOptions,
    source_maps: SourceMapManager,
}

impl Engine {
    /// Resolve `definition` and create its tables on `db`.
    pub fn new(definition: SchemaDefinition, db: Box<dyn Database>) -> Result<Self> {
        let schema = SchemaMap::build(&definition)?;
        create_schema(db.as_ref(), &schema)?;
        info!(backend = db.backend_name(), "engine ready");
        Ok(Self {
            schema,
            db,
            options: EngineOptions::default(),
            source_maps: SourceMapManager::new(),
        })
    }

    pub fn open(definition: SchemaDefinition, config: &DatabaseConfig) -> Result<Self> {
        let db = config.connect()?;
        Self::new(definition, db)
    }

    /// Open the database named by the config file at `path`, falling back
    /// to `DATABASE_URL` and then `./data.sqlite`.
    pub fn open_configured(definition: SchemaDefinition, path: &Path) -> Result<Self> {
        let (config, options) = resolve_config(path)?;
        Ok(Self::open(definition, &config)?.with_options(options))
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn schema(&self) -> &SchemaMap {
        &self.schema
    }

    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn source_maps(&self) -> &SourceMapManager {
        &self.source_maps
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(&self.schema, self.db.as_ref()).with_sql_logging(self.options.log_sql)
    }

    fn record_id(&self, name: &str) -> Result<RecordId> {
        self.schema.record_id(name)
    }

    pub fn find(
        &self,
        record: &str,
        exp: Option<&MatchExp>,
        query: &AttributeQuery,
        modifier: Option<&Modifier>,
    ) -> Result<Vec<Record>> {
        let record = self.record_id(record)?;
        self.executor().find(record, exp, query, modifier)
    }

    pub fn find_one(
        &self,
        record: &str,
        exp: Option<&MatchExp>,
        query: &AttributeQuery,
    ) -> Result<Option<Record>> {
        let record = self.record_id(record)?;
        self.executor().find_one(record, exp, query)
    }

    pub fn create(&self, record: &str, payload: &Record) -> Result<Mutation> {
        let record = self.record_id(record)?;
        with_transaction(self.db.as_ref(), || self.executor().create(record, payload))
    }

    pub fn update(&self, record: &str, exp: &MatchExp, payload: &Record) -> Result<Mutation> {
        let record = self.record_id(record)?;
        with_transaction(self.db.as_ref(), || self.executor().update(record, exp, payload))
    }

    pub fn delete(&self, record: &str, exp: &MatchExp) -> Result<Mutation> {
        let record = self.record_id(record)?;
        with_transaction(self.db.as_ref(), || self.executor().delete(record, exp))
    }

    /// Link two existing records through relation `relation`.
    pub fn add_link(&self, relation: &str, source: i64, target: i64, payload: &Record) -> Result<Mutation> {
        let payload = payload
            .clone()
            .with("source", Value::Int(source))
            .with("target", Value::Int(target));
        self.create(relation, &payload)
    }

    pub fn remove_link(&self, relation: &str, exp: &MatchExp) -> Result<Mutation> {
        self.delete(relation, exp)
    }

    /// Set a global value, creating its dictionary entry on first use.
    pub fn set_global(&self, key: &str, value: impl Into<Value>) -> Result<Mutation> {
        let dictionary = self.schema.dictionary()?;
        let value = value.into();
        let exp = MatchExp::eq("key", key);
        with_transaction(self.db.as_ref(), || {
            let executor = self.executor();
            if executor.find_ids(dictionary, Some(&exp))?.is_empty() {
                let payload = Record::new().with("key", key).with("value", value.clone());
                executor.create(dictionary, &payload)
            } else {
                executor.update(dictionary, &exp, &Record::new().with("value", value.clone()))
            }
        })
    }

    pub fn get_global(&self, key: &str) -> Result<Option<Value>> {
        let dictionary = self.schema.dictionary()?;
        let found = self.executor().find_one(
            dictionary,
            Some(&MatchExp::eq("key", key)),
            &AttributeQuery::new().value("value"),
        )?;
        Ok(found
            .and_then(|r| r.get_value("value").cloned())
            .map(|value| match value {
                Value::Json(json) => Value::from_json(&json),
                other => other,
            }))
    }

    /// Build the dispatch index from `computations`, replacing any previous
    /// one.
    pub fn initialize_computations(
        &mut self,
        computations: impl IntoIterator<Item = Computation>,
    ) -> Result<()> {
        self.source_maps.initialize(&self.schema, computations)
    }

    pub fn add_computation(&mut self, computation: Computation) -> Result<()> {
        self.source_maps.add_computation(&self.schema, computation)
    }

    /// Dispatches for `events`, in event order.
    pub fn dispatch(&self, events: &[MutationEvent]) -> Vec<Dispatch> {
        events
            .iter()
            .flat_map(|event| self.source_maps.dispatch(event))
            .collect()
    }

    /// Hand the dispatches of `events` to `scheduler`, phase by phase.
    /// Returns the number of dispatches scheduled.
    pub fn run(&self, events: &[MutationEvent], scheduler: &mut dyn Scheduler) -> Result<usize> {
        let mut dispatches = self.dispatch(events);
        dispatches.sort_by_key(|d| d.entry.phase);
        for dispatch in &dispatches {
            scheduler.schedule(self, dispatch)?;
        }
        debug!(events = events.len(), dispatches = dispatches.len(), "ran scheduler");
        Ok(dispatches.len())
    }
}
