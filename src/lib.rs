//! # Introduction
//!
//! Tune compiles small scripts to a stack-based IL, runs them on a managed
//! runtime with a generational garbage collector, and records how each
//! generation grows and shrinks over the run. The recorded series, the IL
//! listing and a native-code listing are then shown side by side in a
//! terminal UI built with [ratatui](https://docs.rs/ratatui).
//!
//! ## Pipeline
//!
//! ```text
//! Source → Lexer → Parser → AST → Codegen → IL → Interpreter → Timeline → TUI
//!                                            └──→ JIT listing
//! ```
//!
//! 1. [`parser`]: tokenises the source and builds an AST.
//! 2. [`compiler`]: resolves names, reports diagnostics and emits IL
//!    ([`compiler::il::Module`]); Release builds are optimized.
//! 3. [`interpreter`]: executes IL over the [`memory`] heap, honouring call
//!    depth limits and an interrupt flag.
//! 4. [`instrumentation`]: turns heap notifications into per-generation
//!    [`instrumentation::DataPoint`] sequences and [`instrumentation::GcEvent`]s.
//! 5. [`jit`]: lowers IL methods to x86/x64 assembly listings.
//! 6. [`executor`], [`artifact`] and [`engine`]: run scripts on a worker
//!    thread with cancellation and a time budget, and expose the façade.
//! 7. [`ui`]: ratatui-based TUI; not part of the stable library API.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tune::config::{BuildMode, EngineConfig, Platform};
//! use tune::log::TracingSink;
//! use tune::DiagnosticEngine;
//!
//! let engine = DiagnosticEngine::new(EngineConfig::default(), Arc::new(TracingSink))?;
//! let artifact = engine.compile("var a = array(10); return len(a);", BuildMode::Debug, Platform::AnyCpu)?;
//! assert!(artifact.execute("")?);
//! println!("{}", artifact.dump_il());
//! println!("{}", artifact.dump_asm()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod artifact;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod inspector;
pub mod instrumentation;
pub mod interpreter;
pub mod jit;
pub mod log;
pub mod memory;
pub mod parser;
pub mod ui;

pub use artifact::CompiledArtifact;
pub use engine::{DiagnosticEngine, Diagnostics};
pub use error::{EngineError, InspectionUnavailable};
pub use executor::{CancellationToken, RunReport, RunResults};
