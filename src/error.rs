//! Engine-level errors
//!
//! Script faults are not here: a run that faults still completes and reports
//! `Ok(false)`, with the [`ExecutionFault`](crate::interpreter::ExecutionFault)
//! in its report.

use crate::compiler::CompilationError;
use thiserror::Error;

/// A dump was requested before the stage that produces it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what} is not available yet: {reason}")]
pub struct InspectionUnavailable {
    pub what: &'static str,
    pub reason: &'static str,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    #[error("the run was cancelled")]
    CancellationRequested,

    #[error(transparent)]
    InspectionUnavailable(#[from] InspectionUnavailable),

    #[error("a run is already in progress for this artifact")]
    RunInProgress,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to start the execution thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

impl EngineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::CancellationRequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_message() {
        let err = EngineError::from(InspectionUnavailable {
            what: "native code",
            reason: "the artifact has not been executed",
        });
        assert_eq!(
            err.to_string(),
            "native code is not available yet: the artifact has not been executed"
        );
    }

    #[test]
    fn test_cancellation_is_distinct() {
        assert!(EngineError::CancellationRequested.is_cancellation());
        assert!(!EngineError::RunInProgress.is_cancellation());
    }
}
