//! Scheduler contract.

use crate::computation::SourceMapEntry;
use crate::engine::Engine;
use crate::error::Result;
use crate::executor::MutationEvent;

/// One computation to reconsider because of one event.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub entry: SourceMapEntry,
    pub event: MutationEvent,
}

impl Dispatch {
    pub fn computation(&self) -> &str {
        &self.entry.computation.name
    }
}

/// Re-runs computations named by dispatches.
///
/// [`Engine::run`] calls `schedule` once per dispatch, before-all entries
/// first and after-all entries last. A scheduler may write through `engine`;
/// the events of those writes are not fed back automatically.
pub trait Scheduler {
    fn schedule(&mut self, engine: &Engine, dispatch: &Dispatch) -> Result<()>;
}

/// Scheduler that only records what it was handed.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub dispatched: Vec<Dispatch>,
}

impl Scheduler for RecordingScheduler {
    fn schedule(&mut self, _engine: &Engine, dispatch: &Dispatch) -> Result<()> {
        self.dispatched.push(dispatch.clone());
        Ok(())
    }
}
