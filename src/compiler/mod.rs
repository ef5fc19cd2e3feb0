//! Script compiler
//!
//! Turns source text into an IL [`Module`]:
//! - [`parser`](crate::parser): tokens and AST, stops at the first syntax error
//! - `codegen`: name resolution, semantic checks and IL emission
//! - `optimize`: Release-mode rewrites, label resolution and stack depth
//! - [`il`]: the instruction set and its disassembler
//! - [`diagnostics`]: errors and warnings reported to the caller
//!
//! Debug builds keep one `nop` per statement plus a line table so faults map
//! back to source lines. Release builds drop both and fold constants.

mod codegen;
pub mod diagnostics;
pub mod il;
pub(crate) mod optimize;

pub use diagnostics::{CompilationError, Diagnostic, Severity};
pub use il::{Instruction, LineEntry, Method, Module};

use crate::config::{BuildConfiguration, BuildMode};
use crate::parser::Parser;
use codegen::CodeGen;

/// A successful compile: the module plus any warnings
#[derive(Debug, Clone)]
pub struct Compilation {
    pub module: Module,
    pub warnings: Vec<Diagnostic>,
}

/// Compile `source`, discarding warnings
pub fn compile(source: &str, build: BuildConfiguration) -> Result<Module, CompilationError> {
    compile_with_diagnostics(source, build).map(|compilation| compilation.module)
}

/// Compile `source`. Fails with every error found when there is at least one.
pub fn compile_with_diagnostics(
    source: &str,
    build: BuildConfiguration,
) -> Result<Compilation, CompilationError> {
    let program = Parser::new(source)?.parse_program()?;

    let mut gen = CodeGen::new(build.mode);
    let bodies = gen.generate(&program);

    if gen.diagnostics.iter().any(Diagnostic::is_error) {
        let error = CompilationError::new(gen.diagnostics);
        tracing::debug!(errors = error.error_count(), "compilation failed");
        return Err(error);
    }

    let params_of = |method: u16| gen.method_params.get(method as usize).copied().unwrap_or(0);
    let keep_lines = build.mode == BuildMode::Debug;

    let methods: Vec<Method> = bodies
        .into_iter()
        .map(|body| {
            let items = match build.mode {
                BuildMode::Debug => body.items,
                BuildMode::Release => optimize::optimize(body.items),
            };
            let assembled = optimize::assemble(&items, keep_lines, params_of);
            Method {
                name: body.name,
                params: body.params,
                locals: body.locals,
                code: assembled.code,
                offsets: assembled.offsets,
                lines: assembled.lines,
                max_stack: assembled.max_stack,
                is_entry: body.is_entry,
            }
        })
        .collect();

    tracing::debug!(
        build = %build,
        methods = methods.len(),
        warnings = gen.diagnostics.len(),
        "compiled script"
    );

    Ok(Compilation {
        module: Module {
            methods,
            globals: gen.globals,
            strings: gen.strings,
            entry: 0,
            build,
        },
        warnings: gen.diagnostics,
    })
}
