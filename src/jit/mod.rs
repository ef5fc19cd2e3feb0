//! Native code listings
//!
//! The VM interprets IL; this module produces the assembly a template JIT
//! would emit for it, so the listing can be inspected next to the IL.
//!
//! ```text
//!   Deferred:      Interpreter::push_frame ──► Jit::ensure ──► lower_method
//!   AheadOfTime:   compile ──► lower_module ──► lower_method (every method)
//! ```
//!
//! Both paths end in a [`NativeCode`], which renders deterministically.

mod lower;

use crate::compiler::il::Module;
use crate::config::{BuildConfiguration, BuildMode, Platform};
use std::fmt::{self, Write};

pub(crate) use lower::lower_method;

/// One line of an assembly listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmLine {
    Label(String),
    Inst { op: &'static str, operands: String },
    Comment(String),
}

impl fmt::Display for AsmLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmLine::Label(name) => write!(f, "{name}:"),
            AsmLine::Inst { op, operands } if operands.is_empty() => write!(f, "       {op}"),
            AsmLine::Inst { op, operands } => write!(f, "       {op:<8} {operands}"),
            AsmLine::Comment(text) => write!(f, "       ; {text}"),
        }
    }
}

/// Lowered code for one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMethod {
    pub name: String,
    pub signature: String,
    pub frame_size: u32,
    pub lines: Vec<AsmLine>,
}

impl NativeMethod {
    pub fn instruction_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|line| matches!(line, AsmLine::Inst { .. }))
            .count()
    }
}

/// Native listings for a module, one slot per method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCode {
    /// Build with the platform already resolved
    pub build: BuildConfiguration,
    signatures: Vec<String>,
    methods: Vec<Option<NativeMethod>>,
}

impl NativeCode {
    pub fn method(&self, index: usize) -> Option<&NativeMethod> {
        self.methods.get(index).and_then(Option::as_ref)
    }

    pub fn jitted_count(&self) -> usize {
        self.methods.iter().flatten().count()
    }

    /// Fill slots still missing here from `other`
    pub fn merge(&mut self, other: NativeCode) {
        for (slot, method) in self.methods.iter_mut().zip(other.methods) {
            if slot.is_none() {
                *slot = method;
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; {} native code ({})", env!("CARGO_PKG_NAME"), self.build);

        for (signature, method) in self.signatures.iter().zip(&self.methods) {
            out.push('\n');
            let _ = writeln!(out, "; method: {signature}");
            let Some(method) = method else {
                let _ = writeln!(out, "; not jitted");
                continue;
            };
            let _ = writeln!(
                out,
                "; platform: {}, mode: {}",
                self.build.platform, self.build.mode
            );
            let _ = writeln!(out, "; frame size: {} bytes", method.frame_size);
            let _ = writeln!(out, "{}:", method.name);
            for line in &method.lines {
                let _ = writeln!(out, "{line}");
            }
            let _ = writeln!(
                out,
                "; total {} instructions",
                method.instruction_count()
            );
        }
        out
    }
}

impl fmt::Display for NativeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Lowers methods on first use and caches them
#[derive(Debug, Clone)]
pub struct Jit {
    platform: Platform,
    mode: BuildMode,
    methods: Vec<Option<NativeMethod>>,
}

impl Jit {
    pub fn new(platform: Platform, mode: BuildMode) -> Self {
        Self {
            platform: platform.resolve(),
            mode,
            methods: Vec::new(),
        }
    }

    /// Lower method `index` unless it already has been
    pub fn ensure(&mut self, module: &Module, index: usize) {
        if self.is_jitted(index) {
            return;
        }
        if self.methods.len() < module.methods.len() {
            self.methods.resize(module.methods.len(), None);
        }
        if let Some(slot) = self.methods.get_mut(index) {
            *slot = lower_method(module, index, self.platform, self.mode);
            tracing::trace!(method = index, "lowered method");
        }
    }

    pub fn is_jitted(&self, index: usize) -> bool {
        self.methods.get(index).is_some_and(Option::is_some)
    }

    pub fn finish(mut self, module: &Module) -> NativeCode {
        self.methods.resize(module.methods.len(), None);
        NativeCode {
            build: BuildConfiguration::new(self.mode, self.platform),
            signatures: module.methods.iter().map(|m| m.signature()).collect(),
            methods: self.methods,
        }
    }
}

/// Lower every method of `module` up front
pub fn lower_module(module: &Module) -> NativeCode {
    let mut jit = Jit::new(module.build.platform, module.build.mode);
    for index in 0..module.methods.len() {
        jit.ensure(module, index);
    }
    jit.finish(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn module(source: &str, mode: BuildMode, platform: Platform) -> Module {
        compile(source, BuildConfiguration::new(mode, platform)).unwrap()
    }

    #[test]
    fn test_unused_methods_are_not_jitted() {
        let module = module(
            "func used() { return 1; }\nfunc unused() { return 2; }\nreturn used();",
            BuildMode::Debug,
            Platform::X64,
        );
        let mut jit = Jit::new(Platform::X64, BuildMode::Debug);
        jit.ensure(&module, 0);
        jit.ensure(&module, 1);
        let native = jit.finish(&module);

        assert_eq!(native.jitted_count(), 2);
        let text = native.render();
        assert!(text.contains("; method: object unused()\n; not jitted"));
        assert!(text.contains("call     used"));
    }

    #[test]
    fn test_platforms_use_their_registers() {
        let source = "var x = 1; return x + 2;";
        let x64 = lower_module(&module(source, BuildMode::Debug, Platform::X64)).render();
        let x86 = lower_module(&module(source, BuildMode::Debug, Platform::X86)).render();

        assert!(x64.contains("push     rbp"));
        assert!(x64.contains("qword ptr"));
        assert!(x86.contains("push     ebp"));
        assert!(x86.contains("dword ptr"));
        assert!(!x86.contains("rax"));
    }

    #[test]
    fn test_release_listing_is_shorter() {
        let source = "var t = 0; for (var i = 0; i < 10; i++) { t += i; } return t;";
        let debug = lower_module(&module(source, BuildMode::Debug, Platform::X64));
        let release = lower_module(&module(source, BuildMode::Release, Platform::X64));
        let count = |code: &NativeCode| code.method(0).map(NativeMethod::instruction_count);
        assert!(count(&release) < count(&debug));
    }

    #[test]
    fn test_loops_poll_for_interrupts() {
        let text = lower_module(&module("while (true) { }", BuildMode::Release, Platform::X64)).render();
        assert!(text.contains("call     TUNE_HELP_POLL"));
    }

    #[test]
    fn test_allocating_builtins_mark_safepoints() {
        let text = lower_module(&module("var a = array(4);", BuildMode::Debug, Platform::X64)).render();
        assert!(text.contains("call     TUNE_HELP_ALLOC_ARRAY\n       ; gc safepoint"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let m = module("func f(n) { return n * 2; } return f(4);", BuildMode::Release, Platform::AnyCpu);
        assert_eq!(lower_module(&m).render(), lower_module(&m).render());
        assert!(lower_module(&m).render().contains("; total "));
    }

    #[test]
    fn test_merge_keeps_existing_methods() {
        let m = module("func f() { return 1; } return 0;", BuildMode::Debug, Platform::X64);
        let mut first = Jit::new(Platform::X64, BuildMode::Debug);
        first.ensure(&m, 0);
        let mut merged = first.finish(&m);

        let mut second = Jit::new(Platform::X64, BuildMode::Debug);
        second.ensure(&m, 1);
        merged.merge(second.finish(&m));
        assert_eq!(merged.jitted_count(), 2);
    }

    #[test]
    fn test_ensure_lowers_once() {
        let module = module(
            "func f() { return 1; }\nreturn f();",
            BuildMode::Release,
            Platform::X86,
        );
        let mut jit = Jit::new(Platform::X86, BuildMode::Release);
        assert!(!jit.is_jitted(1));
        jit.ensure(&module, 1);
        assert!(jit.is_jitted(1));
        assert!(!jit.is_jitted(0));
        jit.ensure(&module, 1);
        jit.ensure(&module, 99);
        assert!(!jit.is_jitted(99));
        assert_eq!(jit.finish(&module).jitted_count(), 1);
    }
}
