pub mod access;
pub mod binary;
pub mod unary;

// Most operations are `impl Interpreter`; the pure integer helpers are also
// used by the optimizer for constant folding.
pub use binary::int_binary;
pub use unary::int_unary;
