//! Array element access

use crate::interpreter::engine::Interpreter;
use crate::interpreter::errors::RuntimeError;
use crate::memory::{HeapError, ObjectId, Value};

impl Interpreter<'_> {
    /// Resolve `target[index]` to an array handle and in-range slot
    fn element_slot(
        &self,
        target: Value,
        index: Value,
        operation: &str,
    ) -> Result<(ObjectId, usize), RuntimeError> {
        let id = match target {
            Value::Null => {
                return Err(RuntimeError::NullReference {
                    operation: operation.to_string(),
                })
            }
            Value::Ref(id) if self.heap.array(id).is_some() => id,
            other => {
                return Err(RuntimeError::type_mismatch(
                    operation,
                    "array",
                    self.heap.type_name(&other),
                ))
            }
        };
        let i = self.expect_int(&index, operation)?;
        let length = self.heap.array(id).map(<[Value]>::len).unwrap_or(0);

        match usize::try_from(i) {
            Ok(slot) if slot < length => Ok((id, slot)),
            _ => Err(RuntimeError::IndexOutOfRange { index: i, length }),
        }
    }

    pub(crate) fn load_element(&self, target: Value, index: Value) -> Result<Value, RuntimeError> {
        let (id, slot) = self.element_slot(target, index, "ldelem")?;
        self.heap
            .array(id)
            .and_then(|items| items.get(slot).copied())
            .ok_or_else(|| RuntimeError::invalid_program("array vanished during load"))
    }

    pub(crate) fn store_element(
        &mut self,
        target: Value,
        index: Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let (id, slot) = self.element_slot(target, index, "stelem")?;
        self.heap
            .store_element(id, slot, value)
            .map_err(|err: HeapError| RuntimeError::invalid_program(err.to_string()))
    }
}
