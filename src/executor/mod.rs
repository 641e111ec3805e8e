//! Query and mutation executors.
//!
//! An [`Executor`] borrows the schema map and a driver for the duration of
//! one engine call. Reads go through [`Executor::find`]; writes go through
//! `create`, `update` and `delete`, each run inside [`with_transaction`] by
//! the engine so that either every row change commits together with its
//! events or nothing does.
//!
//! Events are appended in the order rows are written:
//! - creating a record emits its `create` before the links it takes part in
//! - deleting a record emits link deletions and reliant records first, then
//!   the record itself
//! - filtered views follow the row they were evaluated on

mod create;
mod delete;
pub mod events;
mod query;
mod rows;
mod update;

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

pub use events::{EventType, MutationEvent};
pub use query::{Modifier, OrderBy};

use crate::db::schema::{RecordId, SchemaMap};
use crate::db::{Database, QueryResult};
use crate::error::Result;
use crate::queries::builder::CompiledQuery;
use crate::queries::{AttributeQuery, MatchExp};
use crate::value::{Field, Record, Value, ID_ATTR};

/// Outcome of a mutation: the records written and the events to dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutation {
    pub records: Vec<Record>,
    pub events: Vec<MutationEvent>,
}

impl Mutation {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.events.is_empty()
    }

    /// Id of the first written record.
    pub fn id(&self) -> Option<i64> {
        self.records.first().and_then(Record::id)
    }
}

/// Run `f` in a transaction (a savepoint when the calling thread already
/// has one open). Other threads wait on the driver until it closes.
pub fn with_transaction<T>(db: &dyn Database, f: impl FnOnce() -> Result<T>) -> Result<T> {
    db.begin()?;
    match f() {
        Ok(value) => {
            db.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = db.rollback() {
                debug!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

pub struct Executor<'a> {
    pub(crate) schema: &'a SchemaMap,
    pub(crate) db: &'a dyn Database,
    log_sql: bool,
}

impl<'a> Executor<'a> {
    pub fn new(schema: &'a SchemaMap, db: &'a dyn Database) -> Self {
        Self {
            schema,
            db,
            log_sql: false,
        }
    }

    /// Log every statement at `info` instead of `debug`.
    pub fn with_sql_logging(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    fn log(&self, query: &CompiledQuery) {
        if self.log_sql {
            info!(sql = %query.sql, params = query.param_count(), "sql");
        } else {
            debug!(sql = %query.sql, params = query.param_count(), "sql");
        }
    }

    pub(crate) fn query(&self, query: &CompiledQuery) -> Result<QueryResult> {
        self.log(query);
        query.query(self.db)
    }

    pub(crate) fn execute(&self, query: &CompiledQuery) -> Result<usize> {
        self.log(query);
        query.execute(self.db)
    }

    /// Ids of the records of `record` matching `exp`, ascending.
    pub fn find_ids(&self, record: RecordId, exp: Option<&MatchExp>) -> Result<Vec<i64>> {
        let records = self.find(record, exp, &AttributeQuery::new(), None)?;
        Ok(records.iter().filter_map(Record::id).collect())
    }

    /// Members of each filtered view of `root` among `ids`.
    pub(crate) fn view_membership(
        &self,
        root: RecordId,
        ids: &[i64],
    ) -> Result<HashMap<RecordId, BTreeSet<i64>>> {
        let mut out = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let exp = id_in(ids);
        for &view in &self.schema.record(root).views {
            let members = self.find_ids(view, Some(&exp))?;
            out.insert(view, members.into_iter().collect());
        }
        Ok(out)
    }

    /// Emit view events for rows of `root` whose membership may have changed.
    ///
    /// Entering a view is a `create`, leaving it a `delete`, staying in it an
    /// `update` (only when `old` snapshots are given).
    pub(crate) fn view_events(
        &self,
        root: RecordId,
        before: &HashMap<RecordId, BTreeSet<i64>>,
        after: &HashMap<RecordId, BTreeSet<i64>>,
        snapshots: &HashMap<i64, (Option<Record>, Option<Record>)>,
        events: &mut Vec<MutationEvent>,
    ) {
        let empty = BTreeSet::new();
        for &view in &self.schema.record(root).views {
            let name = &self.schema.record(view).name;
            let was = before.get(&view).unwrap_or(&empty);
            let is = after.get(&view).unwrap_or(&empty);
            for id in was.union(is) {
                let Some((old, new)) = snapshots.get(id) else {
                    continue;
                };
                match (was.contains(id), is.contains(id)) {
                    (false, true) => {
                        if let Some(new) = new {
                            events.push(MutationEvent::create(name.clone(), new.clone()));
                        }
                    }
                    (true, false) => {
                        if let Some(record) = old.as_ref().or(new.as_ref()) {
                            events.push(MutationEvent::delete(name.clone(), record.clone()));
                        }
                    }
                    (true, true) => {
                        if let (Some(old), Some(new)) = (old, new) {
                            events.push(MutationEvent::update(name.clone(), new.clone(), old.clone()));
                        }
                    }
                    (false, false) => {}
                }
            }
        }
    }
}

/// `id IN (ids)`.
pub(crate) fn id_in(ids: &[i64]) -> MatchExp {
    MatchExp::is_in(ID_ATTR, ids.iter().copied().map(Value::Int).collect())
}

/// Id of the record held by relation field `attribute`.
pub(crate) fn related_id(record: &Record, attribute: &str) -> Option<i64> {
    record.get(attribute).and_then(Field::as_record).and_then(Record::id)
}

/// `{ id }` stub of a related record.
pub(crate) fn id_stub(id: i64) -> Record {
    Record::new().with(ID_ATTR, id)
}
