//! Tune script parser
//!
//! This module transforms script source text into an Abstract Syntax Tree (AST):
//! - [`lexer`]: Tokenization (source text → tokens)
//! - [`parse`]: Parsing (tokens → AST), extended by `declarations`,
//!   `statements` and `expressions`
//! - [`ast`]: AST node definitions
//!
//! # Language
//!
//! Tune script is a small dynamically typed, C-flavoured language:
//! - Values: 64-bit integers, strings, arrays, `null`
//! - Statements: `var`, `func`, `if`/`else`, `while`, `do`/`while`, `for`,
//!   `break`, `continue`, `return`, blocks
//! - Expressions: arithmetic, logical, bitwise, ternary, indexing, calls
//! - Lines starting with `#` are directives and are skipped
//!
//! # Parser Implementation
//!
//! Hand-written recursive descent parser with precedence climbing for binary operators.
//! No external parser generator dependencies.

pub mod ast;
mod declarations;
mod expressions;
pub mod lexer;
pub mod parse;
mod statements;

pub use parse::{ParseError, Parser};
