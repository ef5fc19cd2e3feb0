//! Binary operator evaluation
//!
//! Integer arithmetic is checked: overflow and division by zero are runtime
//! errors rather than wrapping. Shifts use the low six bits of the count.
//! `add` concatenates when either side is a string; equality compares
//! strings by content and arrays by identity.

use crate::compiler::il::Instruction;
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::{ObjectKind, Value};
use std::cmp::Ordering;

/// Apply an integer binary operation
pub fn int_binary(op: Instruction, a: i64, b: i64) -> Result<i64, RuntimeError> {
    let overflow = |symbol: &str| RuntimeError::IntegerOverflow {
        operation: format!("{} {} {}", a, symbol, b),
    };
    let div_zero = |symbol: &str| RuntimeError::DivisionByZero {
        operation: format!("{} {} {}", a, symbol, b),
    };

    match op {
        Instruction::Add => a.checked_add(b).ok_or_else(|| overflow("+")),
        Instruction::Sub => a.checked_sub(b).ok_or_else(|| overflow("-")),
        Instruction::Mul => a.checked_mul(b).ok_or_else(|| overflow("*")),
        Instruction::Div => {
            if b == 0 {
                Err(div_zero("/"))
            } else {
                a.checked_div(b).ok_or_else(|| overflow("/"))
            }
        }
        Instruction::Rem => {
            if b == 0 {
                Err(div_zero("%"))
            } else {
                a.checked_rem(b).ok_or_else(|| overflow("%"))
            }
        }
        Instruction::And => Ok(a & b),
        Instruction::Or => Ok(a | b),
        Instruction::Xor => Ok(a ^ b),
        Instruction::Shl => Ok(a.wrapping_shl((b & 63) as u32)),
        Instruction::Shr => Ok(a.wrapping_shr((b & 63) as u32)),
        Instruction::Ceq => Ok((a == b) as i64),
        Instruction::Cne => Ok((a != b) as i64),
        Instruction::Clt => Ok((a < b) as i64),
        Instruction::Cle => Ok((a <= b) as i64),
        Instruction::Cgt => Ok((a > b) as i64),
        Instruction::Cge => Ok((a >= b) as i64),
        other => Err(RuntimeError::invalid_program(format!(
            "{} is not a binary operation",
            other.mnemonic()
        ))),
    }
}

fn ordering_matches(op: Instruction, ordering: Ordering) -> bool {
    match op {
        Instruction::Clt => ordering.is_lt(),
        Instruction::Cle => ordering.is_le(),
        Instruction::Cgt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

impl Interpreter<'_> {
    pub(crate) fn binary(
        &mut self,
        op: Instruction,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        match op {
            Instruction::Add if self.is_string(&left) || self.is_string(&right) => {
                self.concat(left, right)
            }
            Instruction::Ceq => Ok(Value::from_bool(self.values_equal(&left, &right))),
            Instruction::Cne => Ok(Value::from_bool(!self.values_equal(&left, &right))),
            Instruction::Clt | Instruction::Cle | Instruction::Cgt | Instruction::Cge
                if self.is_string(&left) && self.is_string(&right) =>
            {
                let a = self.expect_string(&left, op.mnemonic())?;
                let b = self.expect_string(&right, op.mnemonic())?;
                Ok(Value::from_bool(ordering_matches(op, a.cmp(b))))
            }
            _ => {
                let a = self.expect_int(&left, op.mnemonic())?;
                let b = self.expect_int(&right, op.mnemonic())?;
                int_binary(op, a, b).map(Value::Int)
            }
        }
    }

    fn is_string(&self, value: &Value) -> bool {
        value
            .as_ref()
            .is_some_and(|id| self.heap.string(id).is_some())
    }

    fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Ref(a), Value::Ref(b)) if a != b => {
                match (self.heap.string(*a), self.heap.string(*b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            _ => left == right,
        }
    }

    fn concat(&mut self, left: Value, right: Value) -> Result<Value, RuntimeError> {
        let mut text = self.display(&left);
        text.push_str(&self.display(&right));
        self.alloc(ObjectKind::Str(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(int_binary(Instruction::Add, 2, 3), Ok(5));
        assert_eq!(int_binary(Instruction::Rem, -7, 3), Ok(-1));
        assert!(matches!(
            int_binary(Instruction::Mul, i64::MAX, 2),
            Err(RuntimeError::IntegerOverflow { .. })
        ));
        assert!(matches!(
            int_binary(Instruction::Div, i64::MIN, -1),
            Err(RuntimeError::IntegerOverflow { .. })
        ));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            int_binary(Instruction::Div, 1, 0),
            Err(RuntimeError::DivisionByZero {
                operation: "1 / 0".to_string()
            })
        );
    }

    #[test]
    fn test_comparisons_yield_booleans() {
        assert_eq!(int_binary(Instruction::Clt, 1, 2), Ok(1));
        assert_eq!(int_binary(Instruction::Cge, 1, 2), Ok(0));
    }

    #[test]
    fn test_shift_count_is_masked() {
        assert_eq!(int_binary(Instruction::Shl, 1, 65), Ok(2));
    }
}
