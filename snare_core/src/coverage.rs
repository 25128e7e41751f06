use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

pub const DEFAULT_INITIAL_COUNTERS: usize = 1 << 9;
pub const DEFAULT_MAX_COUNTERS: usize = 1 << 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoverageError {
    #[error("Maximum number ({max}) of coverage counts exceeded.")]
    CounterLimit { max: usize },

    #[error("Invalid counter layout: initial {initial} must be between 1 and max {max}")]
    InvalidLayout { initial: usize, max: usize },
}

/// Receives the ranges of counters that become live, e.g. the native
/// fuzzing engine that reads the counter buffer.
pub trait CounterRegistrar: Send {
    fn register_new_counters(&mut self, old_count: usize, new_count: usize);
}

impl<F> CounterRegistrar for F
where
    F: FnMut(usize, usize) + Send,
{
    fn register_new_counters(&mut self, old_count: usize, new_count: usize) {
        self(old_count, new_count)
    }
}

/// Registrar for runs without a native engine attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRegistrar;

impl CounterRegistrar for NoOpRegistrar {
    fn register_new_counters(&mut self, _old_count: usize, _new_count: usize) {}
}

/// Edge hit counters shared between the instrumentation and the engine.
///
/// The backing buffer is allocated once at its maximum size so its address
/// never changes; only the registered prefix grows, doubling each time an
/// edge id falls outside of it.
pub struct CoverageCounters {
    counters: Box<[u8]>,
    registered: usize,
    registrar: Box<dyn CounterRegistrar>,
}

pub type SharedCounters = Arc<Mutex<CoverageCounters>>;

impl CoverageCounters {
    pub fn new(
        initial_counters: usize,
        max_counters: usize,
        mut registrar: Box<dyn CounterRegistrar>,
    ) -> Result<Self, CoverageError> {
        if initial_counters == 0 || initial_counters > max_counters {
            return Err(CoverageError::InvalidLayout {
                initial: initial_counters,
                max: max_counters,
            });
        }
        registrar.register_new_counters(0, initial_counters);
        Ok(Self {
            counters: vec![0u8; max_counters].into_boxed_slice(),
            registered: initial_counters,
            registrar,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            counters: vec![0u8; DEFAULT_MAX_COUNTERS].into_boxed_slice(),
            registered: DEFAULT_INITIAL_COUNTERS,
            registrar: Box::new(NoOpRegistrar),
        }
    }

    pub fn into_shared(self) -> SharedCounters {
        Arc::new(Mutex::new(self))
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn max_counters(&self) -> usize {
        self.counters.len()
    }

    /// Grows the registered prefix until `edge_id` fits.
    pub fn ensure_capacity(&mut self, edge_id: usize) -> Result<(), CoverageError> {
        let max = self.max_counters();
        let mut new_count = self.registered;
        while edge_id >= new_count {
            new_count *= 2;
            if new_count > max {
                return Err(CoverageError::CounterLimit { max });
            }
        }
        if new_count > self.registered {
            self.registrar
                .register_new_counters(self.registered, new_count);
            self.registered = new_count;
            log::info!("New number of coverage counters {new_count}");
        }
        Ok(())
    }

    /// Bumps the counter of `edge_id`. A saturated counter wraps to 1, never to 0,
    /// so a hit edge always stays visible.
    pub fn increment(&mut self, edge_id: usize) {
        if let Some(counter) = self.counters.get_mut(edge_id) {
            *counter = if *counter == u8::MAX { 1 } else { *counter + 1 };
        }
    }

    pub fn read(&self, edge_id: usize) -> Option<u8> {
        self.counters.get(edge_id).copied()
    }

    /// The registered part of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.counters[..self.registered]
    }

    pub fn covered_edges(&self) -> usize {
        self.as_slice().iter().filter(|&&c| c != 0).count()
    }

    pub fn reset(&mut self) {
        self.counters.fill(0);
    }
}

impl std::fmt::Debug for CoverageCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageCounters")
            .field("registered", &self.registered)
            .field("max_counters", &self.max_counters())
            .finish()
    }
}

/// Locks shared counters. A panic while holding the lock leaves the counters
/// in a usable state, so poisoning is ignored.
pub fn lock_counters(counters: &SharedCounters) -> MutexGuard<'_, CoverageCounters> {
    counters.lock().unwrap_or_else(PoisonError::into_inner)
}
