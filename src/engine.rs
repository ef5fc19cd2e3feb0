//! The diagnostic engine façade
//!
//! [`DiagnosticEngine`] ties the pipeline together:
//!
//! ```text
//!   compile ──► CompiledArtifact ──execute──► RunResults
//!                     │                         (timeline + report)
//!                     ├── dump_il   (always)
//!                     └── dump_asm  (after a run, or ahead-of-time)
//! ```
//!
//! It holds only configuration and the log sink; all per-script state lives
//! in the artifact.

use crate::artifact::CompiledArtifact;
use crate::compiler::{self, CompilationError, Diagnostic};
use crate::config::{BuildConfiguration, BuildMode, CodegenStrategy, EngineConfig, Platform};
use crate::error::EngineError;
use crate::executor::{CancellationToken, RunResults};
use crate::jit::lower_module;
use crate::log::{LogMessage, LogSink};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Everything one [`DiagnosticEngine::run`] produced
#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub build: BuildConfiguration,
    pub succeeded: bool,
    pub warnings: Vec<Diagnostic>,
    pub il: String,
    pub asm: String,
    pub results: Arc<RunResults>,
}

pub struct DiagnosticEngine {
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
}

impl DiagnosticEngine {
    pub fn new(config: EngineConfig, sink: Arc<dyn LogSink>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn title(&self) -> &str {
        &self.config.title
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Compile `source`. User code never runs here.
    pub fn compile(
        &self,
        source: &str,
        mode: BuildMode,
        platform: Platform,
    ) -> Result<CompiledArtifact, CompilationError> {
        let build = BuildConfiguration::new(mode, platform);
        let started = Instant::now();

        let compilation = match compiler::compile_with_diagnostics(source, build) {
            Ok(compilation) => compilation,
            Err(err) => {
                for diagnostic in &err.diagnostics {
                    self.sink.log(LogMessage::warning(diagnostic.to_string()));
                }
                self.sink.log(LogMessage::info(format!(
                    "Compilation failed with {} error(s)",
                    err.error_count()
                )));
                return Err(err);
            }
        };

        for warning in &compilation.warnings {
            self.sink.log(LogMessage::warning(warning.to_string()));
        }

        let native = match self.config.codegen {
            CodegenStrategy::AheadOfTime => Some(lower_module(&compilation.module)),
            CodegenStrategy::Deferred => None,
        };

        let elapsed = started.elapsed();
        debug!(%build, ?elapsed, "compile finished");
        self.sink.log(LogMessage::info(format!(
            "Compiled {} method(s) for {} in {} ms",
            compilation.module.methods.len(),
            build,
            elapsed.as_millis()
        )));

        Ok(CompiledArtifact::new(
            compilation.module,
            compilation.warnings,
            self.config.clone(),
            native,
            Arc::clone(&self.sink),
        ))
    }

    pub fn cancel(&self, token: &CancellationToken) {
        token.cancel();
    }

    /// Compile, execute once and collect both dumps
    pub fn run(
        &self,
        source: &str,
        argument: &str,
        build: BuildConfiguration,
        token: &CancellationToken,
    ) -> Result<Diagnostics, EngineError> {
        let artifact = self.compile(source, build.mode, build.platform)?;
        let succeeded = artifact.execute_with(argument, token)?;

        Ok(Diagnostics {
            build,
            succeeded,
            warnings: artifact.warnings().to_vec(),
            il: artifact.dump_il(),
            asm: artifact.dump_asm()?,
            results: artifact.results(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogKind, MemorySink, NullSink};
    use std::time::Duration;

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_time_budget(Duration::ZERO);
        assert!(matches!(
            DiagnosticEngine::new(config, Arc::new(NullSink)),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_run_produces_everything() {
        let engine = DiagnosticEngine::new(EngineConfig::default(), Arc::new(NullSink)).unwrap();
        let diagnostics = engine
            .run(
                "return len(arg);",
                "four",
                BuildConfiguration::new(BuildMode::Release, Platform::X64),
                &CancellationToken::new(),
            )
            .unwrap();
        assert!(diagnostics.succeeded);
        assert_eq!(diagnostics.results.report.return_value.as_deref(), Some("4"));
        assert!(diagnostics.il.contains(".entrypoint"));
        assert!(diagnostics.asm.contains("main:"));
    }

    #[test]
    fn test_compile_failure_is_logged() {
        let sink = Arc::new(MemorySink::new());
        let engine = DiagnosticEngine::new(EngineConfig::default(), sink.clone()).unwrap();
        let err = engine
            .compile("return nope;", BuildMode::Debug, Platform::AnyCpu)
            .unwrap_err();
        assert_eq!(err.error_count(), 1);
        assert_eq!(sink.kinds(), vec![LogKind::Warning, LogKind::Info]);
    }

    #[test]
    fn test_ahead_of_time_asm_available_after_compile() {
        let config = EngineConfig::default().with_codegen(CodegenStrategy::AheadOfTime);
        let engine = DiagnosticEngine::new(config, Arc::new(NullSink)).unwrap();
        let artifact = engine
            .compile("func f() { return 1; } return 0;", BuildMode::Debug, Platform::X86)
            .unwrap();
        let asm = artifact.dump_asm().unwrap();
        assert!(asm.contains("f:"));
        assert!(!asm.contains("not jitted"));
    }
}
