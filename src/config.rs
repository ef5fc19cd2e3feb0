//! Engine and build configuration
//!
//! [`BuildConfiguration`] is the per-compile choice of optimization mode and
//! target platform. [`EngineConfig`] holds everything else: code generation
//! strategy, execution limits, collector budgets and recorder sampling. All
//! defaults live in [`crate::interpreter::constants`].

use crate::error::EngineError;
use crate::interpreter::constants::*;
use std::fmt;
use std::time::Duration;

/// Optimization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BuildMode {
    #[default]
    Debug,
    Release,
}

impl BuildMode {
    pub fn toggled(self) -> Self {
        match self {
            BuildMode::Debug => BuildMode::Release,
            BuildMode::Release => BuildMode::Debug,
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Debug => write!(f, "Debug"),
            BuildMode::Release => write!(f, "Release"),
        }
    }
}

/// Target platform for native code listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    X86,
    X64,
    #[default]
    AnyCpu,
}

impl Platform {
    /// Resolve `AnyCpu` to the host pointer width
    pub fn resolve(self) -> Platform {
        match self {
            Platform::AnyCpu if cfg!(target_pointer_width = "64") => Platform::X64,
            Platform::AnyCpu => Platform::X86,
            other => other,
        }
    }

    /// Pointer size in bytes once resolved
    pub fn pointer_size(self) -> u32 {
        match self.resolve() {
            Platform::X86 => 4,
            _ => 8,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Platform::X86 => Platform::X64,
            Platform::X64 => Platform::AnyCpu,
            Platform::AnyCpu => Platform::X86,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::X86 => write!(f, "x86"),
            Platform::X64 => write!(f, "x64"),
            Platform::AnyCpu => write!(f, "AnyCPU"),
        }
    }
}

/// Mode and platform chosen for one compilation. Immutable once compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BuildConfiguration {
    pub mode: BuildMode,
    pub platform: Platform,
}

impl BuildConfiguration {
    pub fn new(mode: BuildMode, platform: Platform) -> Self {
        Self { mode, platform }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.mode, self.platform)
    }
}

/// When native code listings are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodegenStrategy {
    /// Methods are lowered the first time they are called during a run
    #[default]
    Deferred,
    /// Every method is lowered at compile time
    AheadOfTime,
}

/// Generational collector budgets, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    pub gen0_budget: u64,
    pub gen1_budget: u64,
    pub gen2_budget: u64,
    pub max_heap: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gen0_budget: DEFAULT_GEN0_BUDGET,
            gen1_budget: DEFAULT_GEN1_BUDGET,
            gen2_budget: DEFAULT_GEN2_BUDGET,
            max_heap: DEFAULT_MAX_HEAP,
        }
    }
}

/// Instrumentation sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Minimum spacing of allocation-driven samples. Zero disables coalescing.
    pub sample_interval: Duration,
    /// Cap on the number of samples per generation sequence
    pub max_points: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub codegen: CodegenStrategy,
    pub time_budget: Duration,
    pub cancel_grace: Duration,
    pub max_call_depth: usize,
    pub title: String,
    pub gc: GcConfig,
    pub recorder: RecorderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codegen: CodegenStrategy::default(),
            time_budget: DEFAULT_TIME_BUDGET,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            title: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            gc: GcConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_codegen(mut self, codegen: CodegenStrategy) -> Self {
        self.codegen = codegen;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    pub fn with_recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    /// Reject settings the runtime cannot honour
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| Err(EngineError::InvalidConfiguration(reason.to_string()));

        if self.time_budget.is_zero() {
            return invalid("time budget must be greater than zero");
        }
        if self.max_call_depth == 0 {
            return invalid("max call depth must be greater than zero");
        }
        let gc = &self.gc;
        if gc.gen0_budget == 0 || gc.gen1_budget == 0 || gc.gen2_budget == 0 {
            return invalid("generation budgets must be greater than zero");
        }
        if gc.gen0_budget > gc.gen1_budget || gc.gen1_budget > gc.gen2_budget {
            return invalid("generation budgets must not decrease with age");
        }
        if gc.max_heap < gc.gen0_budget {
            return invalid("max heap must be at least the gen 0 budget");
        }
        if self.recorder.max_points == 0 {
            return invalid("recorder max points must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_title_names_package() {
        assert!(EngineConfig::default().title.starts_with("tune "));
    }

    #[test]
    fn test_inverted_budgets_rejected() {
        let config = EngineConfig::default().with_gc(GcConfig {
            gen0_budget: 4 << 20,
            ..GcConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_points_rejected() {
        let config = EngineConfig::default().with_recorder(RecorderConfig {
            max_points: 0,
            ..RecorderConfig::default()
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_time_budget_rejected() {
        let config = EngineConfig::default().with_time_budget(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_any_cpu_resolves_to_concrete_platform() {
        assert_ne!(Platform::AnyCpu.resolve(), Platform::AnyCpu);
        assert_eq!(Platform::X86.pointer_size(), 4);
        assert_eq!(Platform::X64.pointer_size(), 8);
    }
}
