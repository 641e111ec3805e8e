//! Computations and their data dependencies.
//!
//! A [`Computation`] declares what it reads as named [`DataDep`]s. The
//! [`SourceMapManager`] compiles those declarations into an index from
//! (record type, event type) to [`SourceMapEntry`] so that each mutation
//! event finds the computations it affects without scanning them all. What
//! re-running a computation means is left to a [`Scheduler`].

mod scheduler;
mod source_map;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use scheduler::{Dispatch, RecordingScheduler, Scheduler};
pub use source_map::{SourceMapEntry, SourceMapManager};

use crate::queries::AttributeQuery;

/// Ordering bucket of a computation within one event batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeAll,
    #[default]
    Normal,
    AfterAll,
}

/// Data a computation reads.
#[derive(Debug, Clone, PartialEq)]
pub enum DataDep {
    /// Every record of `source`, optionally with a projection whose paths
    /// are watched for updates.
    Records {
        source: String,
        attribute_query: Option<AttributeQuery>,
    },
    /// Attributes of the computation's host record and of records related
    /// to it.
    Property { attribute_query: AttributeQuery },
    /// One global value.
    Global { key: String },
}

impl DataDep {
    pub fn records(source: impl Into<String>) -> Self {
        DataDep::Records {
            source: source.into(),
            attribute_query: None,
        }
    }

    pub fn records_with(source: impl Into<String>, attribute_query: AttributeQuery) -> Self {
        DataDep::Records {
            source: source.into(),
            attribute_query: Some(attribute_query),
        }
    }

    pub fn property(attribute_query: AttributeQuery) -> Self {
        DataDep::Property { attribute_query }
    }

    pub fn global(key: impl Into<String>) -> Self {
        DataDep::Global { key: key.into() }
    }
}

/// A derived value and the data it depends on.
///
/// `host` names the record type a property computation is attached to;
/// global and records-only computations have none.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    pub name: String,
    pub host: Option<String>,
    pub phase: Phase,
    pub deps: BTreeMap<String, DataDep>,
}

impl Computation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            phase: Phase::Normal,
            deps: BTreeMap::new(),
        }
    }

    pub fn on(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn dep(mut self, name: impl Into<String>, dep: DataDep) -> Self {
        self.deps.insert(name.into(), dep);
        self
    }

    pub fn has_global_dep(&self) -> bool {
        self.deps.values().any(|d| matches!(d, DataDep::Global { .. }))
    }
}
