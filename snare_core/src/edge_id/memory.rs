use super::{EdgeIdError, EdgeIdStrategy, take_next_id};
use crate::coverage::SharedCounters;

/// Allocator for single process runs: ids are handed out sequentially and
/// source file boundaries are irrelevant.
#[derive(Debug)]
pub struct MemorySyncIdStrategy {
    counters: SharedCounters,
    next_edge_id: usize,
}

impl MemorySyncIdStrategy {
    pub fn new(counters: SharedCounters) -> Self {
        Self {
            counters,
            next_edge_id: 0,
        }
    }
}

impl EdgeIdStrategy for MemorySyncIdStrategy {
    fn next_edge_id(&mut self) -> Result<usize, EdgeIdError> {
        take_next_id(&self.counters, &mut self.next_edge_id)
    }

    fn start_for_source_file(&mut self, _filename: &str) -> Result<(), EdgeIdError> {
        Ok(())
    }

    fn commit_id_count(&mut self, _filename: &str) -> Result<(), EdgeIdError> {
        Ok(())
    }
}
