//! Compiled artifacts
//!
//! A [`CompiledArtifact`] owns one compiled module for its whole life. Each
//! `execute` replaces the previous run's results; native code lowered by
//! different runs accumulates, since lowering a method is deterministic.

use crate::compiler::il::Module;
use crate::compiler::Diagnostic;
use crate::config::{BuildConfiguration, EngineConfig};
use crate::error::{EngineError, InspectionUnavailable};
use crate::executor::{self, CancellationToken, RunResults};
use crate::inspector;
use crate::jit::NativeCode;
use crate::log::LogSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct ArtifactState {
    results: Arc<RunResults>,
    native: Option<NativeCode>,
}

pub struct CompiledArtifact {
    module: Arc<Module>,
    config: EngineConfig,
    warnings: Vec<Diagnostic>,
    state: Mutex<ArtifactState>,
    running: AtomicBool,
    current_run: Mutex<Option<CancellationToken>>,
    sink: Arc<dyn LogSink>,
}

/// Clears the running flag however `execute_with` exits
struct RunGuard<'a> {
    artifact: &'a CompiledArtifact,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.artifact.current_run.lock() = None;
        self.artifact.running.store(false, Ordering::Release);
    }
}

impl CompiledArtifact {
    pub(crate) fn new(
        module: Module,
        warnings: Vec<Diagnostic>,
        config: EngineConfig,
        native: Option<NativeCode>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            module: Arc::new(module),
            config,
            warnings,
            state: Mutex::new(ArtifactState {
                results: Arc::new(RunResults::empty()),
                native,
            }),
            running: AtomicBool::new(false),
            current_run: Mutex::new(None),
            sink,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn build(&self) -> BuildConfiguration {
        self.module.build
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the entry point. `Ok(true)` on normal completion, `Ok(false)` when
    /// the script faulted.
    pub fn execute(&self, argument: &str) -> Result<bool, EngineError> {
        self.execute_with(argument, &CancellationToken::new())
    }

    /// Like [`execute`](Self::execute), stopping early when `token` is cancelled
    pub fn execute_with(
        &self,
        argument: &str,
        token: &CancellationToken,
    ) -> Result<bool, EngineError> {
        // The token is published under the same lock that guards the flag,
        // so a caller that sees `is_running` can always cancel.
        let mut current = self.current_run.lock();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::RunInProgress);
        }
        *current = Some(token.clone());
        drop(current);
        let _guard = RunGuard { artifact: self };

        let execution = executor::execute(
            Arc::clone(&self.module),
            argument,
            &self.config,
            Arc::clone(&self.sink),
            token,
        )?;

        let report = &execution.results.report;
        let cancelled = report.cancelled;
        let succeeded = report.succeeded();

        let mut state = self.state.lock();
        state.results = Arc::new(execution.results);
        if let Some(lowered) = execution.native {
            let merged = match state.native.take() {
                Some(mut existing) => {
                    existing.merge(lowered);
                    existing
                }
                None => lowered,
            };
            state.native = Some(merged);
        }
        drop(state);

        if cancelled {
            return Err(EngineError::CancellationRequested);
        }
        Ok(succeeded)
    }

    /// Cancel the run in progress, if any
    pub fn cancel(&self) {
        if let Some(token) = self.current_run.lock().as_ref() {
            token.cancel();
        }
    }

    /// Results of the most recent run; empty before the first
    pub fn results(&self) -> Arc<RunResults> {
        Arc::clone(&self.state.lock().results)
    }

    pub fn dump_il(&self) -> String {
        inspector::dump_il(&self.module)
    }

    pub fn dump_asm(&self) -> Result<String, InspectionUnavailable> {
        inspector::dump_asm(self.state.lock().native.as_ref())
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("build", &self.module.build)
            .field("methods", &self.module.methods.len())
            .field("running", &self.is_running())
            .finish()
    }
}
