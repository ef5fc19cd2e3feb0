//! Compiler diagnostics
//!
//! Lexing and parsing stop at the first error and produce a single
//! [`Diagnostic`]. The semantic pass in code generation keeps going and
//! reports everything it finds in one [`CompilationError`].

use crate::parser::ast::SourceLocation;
use crate::parser::ParseError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One compiler message tied to a source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            line: location.line,
            column: location.column,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            line: location.line,
            column: location.column,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{}): {}: {}",
            self.line, self.column, self.severity, self.message
        )
    }
}

impl From<ParseError> for Diagnostic {
    fn from(err: ParseError) -> Self {
        Diagnostic::error(err.location, err.message)
    }
}

/// Compilation failed; carries every diagnostic produced, errors and warnings
#[derive(Debug, Clone, Error)]
#[error("compilation failed with {} error(s){}", self.error_count(), self.first_error_suffix())]
pub struct CompilationError {
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationError {
    pub fn new(diagnostics: Vec<Diagnostic>) -> Self {
        Self { diagnostics }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    fn first_error_suffix(&self) -> String {
        self.errors()
            .next()
            .map(|d| format!("; first: {d}"))
            .unwrap_or_default()
    }
}

impl From<ParseError> for CompilationError {
    fn from(err: ParseError) -> Self {
        CompilationError::new(vec![err.into()])
    }
}
