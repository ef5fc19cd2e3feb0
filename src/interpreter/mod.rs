//! Tune virtual machine
//!
//! This module provides the core execution logic:
//! - [`engine`]: The [`Interpreter`](engine::Interpreter) that runs IL, plus the
//!   interrupt flag used to stop it from another thread
//! - [`errors`]: Runtime error and fault types
//! - [`builtins`]: Runtime functions callable from scripts
//! - [`constants`]: Limits and default budgets
//! - `ops`: Operator semantics shared with the optimizer
//!
//! # Execution Model
//!
//! The interpreter is a plain fetch-decode loop over one shared evaluation
//! stack. Every allocation goes through the managed heap, which reports to a
//! [`HeapObserver`](crate::memory::HeapObserver) so instrumentation sees each
//! size change and collection as it happens.

pub mod builtins;
pub mod constants;
pub mod engine;
pub mod errors;
pub(crate) mod ops;

pub use engine::{InterruptFlag, InterruptReason, Interpreter, VmOptions};
pub use errors::{ExecutionFault, RuntimeError};
