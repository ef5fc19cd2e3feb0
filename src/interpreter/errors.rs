//! Runtime error types for the tune VM
//!
//! This module defines [`RuntimeError`], which represents everything that can
//! go wrong while a script runs (as opposed to compilation errors), and
//! [`ExecutionFault`], which pins an error to the method and IL offset that
//! raised it.
//!
//! All runtime errors are fatal to the run: the VM unwinds and the executor
//! reports the run as failed.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Runtime errors that can occur during execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("Integer overflow in {operation}")]
    IntegerOverflow { operation: String },

    #[error("Division by zero in {operation}")]
    DivisionByZero { operation: String },

    #[error("Index {index} is out of range for length {length}")]
    IndexOutOfRange { index: i64, length: usize },

    #[error("Type mismatch in {operation}: expected {expected}, got {got}")]
    TypeMismatch {
        operation: String,
        expected: String,
        got: String,
    },

    #[error("Null reference in {operation}")]
    NullReference { operation: String },

    #[error("Assertion failed")]
    AssertionFailed,

    #[error("Call depth exceeded the limit of {limit}")]
    CallDepthExceeded { limit: usize },

    #[error("Out of memory: requested {requested} bytes, heap limit is {limit}")]
    OutOfMemory { requested: u64, limit: u64 },

    #[error("Argument out of range in {function}: {message}")]
    ArgumentOutOfRange { function: String, message: String },

    #[error("Cannot convert \"{text}\" to an integer")]
    InvalidConversion { text: String },

    #[error("Execution time budget of {} ms exceeded", budget.as_millis())]
    TimeBudgetExceeded { budget: Duration },

    #[error("Execution cancelled")]
    Cancelled,

    /// Malformed IL; only reachable through a compiler bug
    #[error("Invalid program: {message}")]
    InvalidProgram { message: String },

    #[error("VM panicked: {message}")]
    Panic { message: String },
}

impl RuntimeError {
    /// Errors caused by the host stopping the run rather than by the script
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            RuntimeError::Cancelled | RuntimeError::TimeBudgetExceeded { .. }
        )
    }

    pub(crate) fn type_mismatch(operation: &str, expected: &str, got: &str) -> Self {
        RuntimeError::TypeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub(crate) fn invalid_program(message: impl Into<String>) -> Self {
        RuntimeError::InvalidProgram {
            message: message.into(),
        }
    }
}

/// A [`RuntimeError`] together with where it was raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFault {
    pub error: RuntimeError,
    pub method: Option<String>,
    pub offset: Option<u32>,
    pub line: Option<usize>,
}

impl ExecutionFault {
    /// A fault with no code position (panics, host interruptions)
    pub fn detached(error: RuntimeError) -> Self {
        Self {
            error,
            method: None,
            offset: None,
            line: None,
        }
    }
}

impl fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let (Some(method), Some(offset)) = (&self.method, self.offset) {
            write!(f, " in {} at IL_{:04x}", method, offset)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExecutionFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display_with_position() {
        let fault = ExecutionFault {
            error: RuntimeError::DivisionByZero {
                operation: "10 / 0".to_string(),
            },
            method: Some("main".to_string()),
            offset: Some(0x1c),
            line: Some(4),
        };
        assert_eq!(
            fault.to_string(),
            "Division by zero in 10 / 0 in main at IL_001c (line 4)"
        );
    }

    #[test]
    fn test_detached_fault_display() {
        let fault = ExecutionFault::detached(RuntimeError::Cancelled);
        assert_eq!(fault.to_string(), "Execution cancelled");
        assert!(fault.error.is_interruption());
    }
}
