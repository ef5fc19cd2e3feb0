//! Unary operator evaluation

use crate::compiler::il::Instruction;
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::Value;

/// Apply `neg` or `not` to an integer
pub fn int_unary(op: Instruction, n: i64) -> Result<i64, RuntimeError> {
    match op {
        Instruction::Neg => n.checked_neg().ok_or(RuntimeError::IntegerOverflow {
            operation: format!("-({})", n),
        }),
        Instruction::Not => Ok(!n),
        other => Err(RuntimeError::invalid_program(format!(
            "{} is not a unary operation",
            other.mnemonic()
        ))),
    }
}

impl Interpreter<'_> {
    pub(crate) fn unary(&mut self, op: Instruction, operand: Value) -> Result<Value, RuntimeError> {
        let n = self.expect_int(&operand, op.mnemonic())?;
        int_unary(op, n).map(Value::Int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate() {
        assert_eq!(int_unary(Instruction::Neg, 5), Ok(-5));
        assert!(matches!(
            int_unary(Instruction::Neg, i64::MIN),
            Err(RuntimeError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn test_bitwise_not() {
        assert_eq!(int_unary(Instruction::Not, 0), Ok(-1));
    }
}
