use std::sync::{Mutex, MutexGuard};
use log::warn;
use crate::config::defs::PipelineError;

/// Faults captured inside worker threads, held until a controlling thread
/// asks for them.
///
/// Errors never cross a thread boundary on their own: a worker pushes its
/// error here and exits, and whoever drives the pipeline is expected to call
/// [`ExceptionRegistry::check_and_rethrow`] after `stop()` and periodically
/// while iterating. A pipeline that drained after a partial failure looks
/// exactly like a clean one unless this is polled.
///
/// Retrieval is last-in-first-raised.
#[derive(Debug, Default)]
pub struct ExceptionRegistry {
    faults: Mutex<Vec<PipelineError>>,
}

impl ExceptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stage: &str, error: PipelineError) {
        warn!("Captured fault in stage '{}': {}", stage, error);
        self.lock().push(error);
    }

    /// Removes the most recently captured fault and returns it as an `Err`.
    pub fn check_and_rethrow(&self) -> Result<(), PipelineError> {
        match self.lock().pop() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Forgets every captured fault, returning how many were dropped.
    pub fn reset(&self) -> usize {
        let mut faults = self.lock();
        let n = faults.len();
        faults.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A worker that panicked while holding the lock leaves the Vec intact.
    fn lock(&self) -> MutexGuard<'_, Vec<PipelineError>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_ok() {
        let registry = ExceptionRegistry::new();
        assert!(registry.check_and_rethrow().is_ok());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_newest_fault_raised_first() {
        let registry = ExceptionRegistry::new();
        registry.push("parser", PipelineError::UnpairedReads("first".into()));
        registry.push("diginorm", PipelineError::Counting("second".into()));
        assert_eq!(registry.len(), 2);

        match registry.check_and_rethrow() {
            Err(PipelineError::Counting(msg)) => assert_eq!(msg, "second"),
            other => panic!("unexpected {:?}", other),
        }
        match registry.check_and_rethrow() {
            Err(PipelineError::UnpairedReads(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(registry.check_and_rethrow().is_ok());
    }

    #[test]
    fn test_reset_clears() {
        let registry = ExceptionRegistry::new();
        registry.push("a", PipelineError::Counting("x".into()));
        registry.push("b", PipelineError::Counting("y".into()));
        assert_eq!(registry.reset(), 2);
        assert!(registry.check_and_rethrow().is_ok());
    }
}
