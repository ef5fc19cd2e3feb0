//! Memory model for the tune VM
//!
//! This module provides the core memory abstractions:
//! - [`value`]: Runtime value representation (Null, Int, Ref)
//! - [`heap`]: Generational object store with budgets, write barrier and
//!   the [`heap::HeapObserver`] hook used by instrumentation
//! - [`collector`]: Mark-sweep collection of generations `0..=g` with
//!   promotion of survivors
//!
//! # Object Sizes
//!
//! Sizes are fixed and platform-independent so that charts are comparable
//! between runs:
//! - array of `n` elements: `24 + 8n` bytes
//! - string of `n` bytes: `24 + n`, rounded up to a multiple of 8

pub mod collector;
pub mod heap;
pub mod value;

pub use collector::CollectionResult;
pub use heap::{Heap, HeapError, HeapObserver, HeapStats, NullObserver, ObjectKind};
pub use value::{ObjectId, Value};
