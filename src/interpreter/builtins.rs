//! Built-in function implementations
//!
//! This module provides the runtime functions scripts call by name. The
//! compiler resolves them to [`Builtin`] ids and emits `callb`; each takes
//! exactly one argument and pushes one result.
//!
//! # Supported Built-ins
//!
//! - `array(n)`: new array of `n` nulls
//! - `len(x)`: length of a string (bytes) or array
//! - `print(x)`: write `x` to the run output, returns null
//! - `str(x)`: string form of any value
//! - `int(s)`: parse a decimal string; integers pass through
//! - `collect(g)`: force a collection of generations `0..=g`
//! - `generation(x)`: generation of a heap object, `-1` for non-objects
//! - `collection_count(g)`: passes that collected generation `g` or older
//! - `heap_size(g)`: bytes in generation `g`, or the whole heap for `-1`
//! - `sleep(ms)`: pause the run; stays responsive to cancellation
//! - `assert(cond)`: fault when `cond` is false

use crate::interpreter::constants::{MAX_ARRAY_LENGTH, SLEEP_SLICE};
use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::heap::GENERATIONS;
use crate::memory::{ObjectKind, Value};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Array,
    Len,
    Print,
    Str,
    Int,
    Collect,
    Generation,
    CollectionCount,
    HeapSize,
    Sleep,
    Assert,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::Array,
        Builtin::Len,
        Builtin::Print,
        Builtin::Str,
        Builtin::Int,
        Builtin::Collect,
        Builtin::Generation,
        Builtin::CollectionCount,
        Builtin::HeapSize,
        Builtin::Sleep,
        Builtin::Assert,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Array => "array",
            Builtin::Len => "len",
            Builtin::Print => "print",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Collect => "collect",
            Builtin::Generation => "generation",
            Builtin::CollectionCount => "collection_count",
            Builtin::HeapSize => "heap_size",
            Builtin::Sleep => "sleep",
            Builtin::Assert => "assert",
        }
    }

    pub fn arity(self) -> usize {
        1
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    /// Whether a call may allocate or collect
    pub fn touches_heap(self) -> bool {
        matches!(
            self,
            Builtin::Array | Builtin::Str | Builtin::Collect
        )
    }
}

impl Interpreter<'_> {
    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let arg = args.first().copied().unwrap_or(Value::Null);
        let name = builtin.name();

        match builtin {
            Builtin::Array => {
                let n = self.expect_int(&arg, name)?;
                if !(0..=MAX_ARRAY_LENGTH).contains(&n) {
                    return Err(out_of_range(
                        name,
                        format!("length {n} is outside 0..={MAX_ARRAY_LENGTH}"),
                    ));
                }
                self.alloc(ObjectKind::Array(vec![Value::Null; n as usize]))
            }
            Builtin::Len => {
                let length = match arg.as_ref().and_then(|id| self.heap.get(id).ok()) {
                    Some(object) => match &object.kind {
                        ObjectKind::Str(s) => s.len(),
                        ObjectKind::Array(items) => items.len(),
                    },
                    None => {
                        return Err(RuntimeError::type_mismatch(
                            name,
                            "string or array",
                            self.heap.type_name(&arg),
                        ))
                    }
                };
                Ok(Value::Int(length as i64))
            }
            Builtin::Print => {
                let text = self.display(&arg);
                self.print(&text);
                Ok(Value::Null)
            }
            Builtin::Str => {
                if self.heap.type_name(&arg) == "string" {
                    return Ok(arg);
                }
                let text = self.display(&arg);
                self.alloc(ObjectKind::Str(text))
            }
            Builtin::Int => match arg {
                Value::Int(_) => Ok(arg),
                _ => {
                    let text = self.expect_string(&arg, name)?;
                    text.trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| RuntimeError::InvalidConversion {
                            text: text.to_string(),
                        })
                }
            },
            Builtin::Collect => {
                let generation = self.generation_arg(&arg, name)?;
                self.collect(generation);
                Ok(Value::Null)
            }
            Builtin::Generation => Ok(Value::Int(
                arg.as_ref()
                    .and_then(|id| self.heap.generation_of(id))
                    .map(i64::from)
                    .unwrap_or(-1),
            )),
            Builtin::CollectionCount => {
                let generation = self.generation_arg(&arg, name)?;
                Ok(Value::Int(
                    self.heap.collection_count(generation as usize) as i64
                ))
            }
            Builtin::HeapSize => {
                let size = match self.expect_int(&arg, name)? {
                    -1 => self.heap.total_size(),
                    _ => self.heap.generation_size(self.generation_arg(&arg, name)? as usize),
                };
                Ok(Value::Int(size as i64))
            }
            Builtin::Sleep => {
                let ms = self.expect_int(&arg, name)?;
                if ms < 0 {
                    return Err(out_of_range(name, format!("{ms} ms is negative")));
                }
                self.sleep(Duration::from_millis(ms as u64))?;
                Ok(Value::Null)
            }
            Builtin::Assert => {
                if arg.is_truthy() {
                    Ok(Value::Null)
                } else {
                    Err(RuntimeError::AssertionFailed)
                }
            }
        }
    }

    fn generation_arg(&self, arg: &Value, name: &str) -> Result<u8, RuntimeError> {
        let g = self.expect_int(arg, name)?;
        if (0..GENERATIONS as i64).contains(&g) {
            Ok(g as u8)
        } else {
            Err(out_of_range(
                name,
                format!("generation {g} is outside 0..={}", GENERATIONS - 1),
            ))
        }
    }

    /// Sleep in short slices so cancellation is noticed promptly
    fn sleep(&self, duration: Duration) -> Result<(), RuntimeError> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.poll_interrupt()?;
            let now = Instant::now();
            let slice = match deadline {
                Some(deadline) if now >= deadline => return Ok(()),
                Some(deadline) => SLEEP_SLICE.min(deadline - now),
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

fn out_of_range(function: &str, message: String) -> RuntimeError {
    RuntimeError::ArgumentOutOfRange {
        function: function.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::from_name("malloc"), None);
    }

    #[test]
    fn test_heap_touching_builtins() {
        assert!(Builtin::Array.touches_heap());
        assert!(!Builtin::Len.touches_heap());
    }
}
