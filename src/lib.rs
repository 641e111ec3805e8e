//! reactive_er - reactive entity/relation data layer
//!
//! Maps an entity/relation schema onto relational tables, queries it with
//! path-based match expressions and attribute projections, runs
//! transactional create/update/delete operations that emit mutation events,
//! and routes those events to the computations that depend on them.

pub mod computation;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod queries;
pub mod value;

#[cfg(test)]
pub mod test_utils;

pub use computation::{Computation, DataDep, Dispatch, Phase, Scheduler, SourceMapEntry, SourceMapManager};
pub use config::EngineOptions;
pub use db::schema::{
    Cardinality, DataType, EntityDef, PropertyDef, RelationDef, SchemaDefinition, SchemaMap,
};
pub use db::{Database, DatabaseConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use executor::{EventType, Modifier, Mutation, MutationEvent, OrderBy};
pub use queries::builder::select::Order;
pub use queries::{AttributeQuery, MatchExp, Operand, Operator};
pub use value::{Field, Record, Value};
