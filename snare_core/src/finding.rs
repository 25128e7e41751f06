use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// A bug reported by a detector hook, e.g. a command injection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct Finding {
    pub message: String,
}

impl Finding {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Holds the first finding reported while processing one input.
///
/// Detectors report through [`FindingSlot::report`], which hands the finding
/// back as an error so the hook can abort the call with `?`. Reports after
/// the first one are ignored until the slot is cleared for the next input.
#[derive(Debug, Default)]
pub struct FindingSlot {
    first: Mutex<Option<Finding>>,
}

impl FindingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Finding>> {
        self.first.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn report(&self, message: impl Into<String>) -> Result<(), Finding> {
        let mut slot = self.slot();
        if slot.is_some() {
            return Ok(());
        }
        let finding = Finding::new(message);
        log::debug!("Finding reported: {}", finding.message);
        *slot = Some(finding.clone());
        Err(finding)
    }

    pub fn first(&self) -> Option<Finding> {
        self.slot().clone()
    }

    pub fn take(&self) -> Option<Finding> {
        self.slot().take()
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }
}
