//! Runtime value representation
//!
//! This module defines the [`Value`] enum, which represents all possible runtime
//! values in the tune VM. Values are small and `Copy`; anything with a variable
//! size lives on the managed heap and is referred to by [`ObjectId`].
//!
//! # Value Types
//!
//! - [`Value::Null`]: the null reference
//! - [`Value::Int`]: 64-bit signed integer (booleans are 0 and 1)
//! - [`Value::Ref`]: handle to a heap string or array

use std::fmt;

/// Handle to a heap object: an index into the heap's object slab
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime values in the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Ref(ObjectId),
}

impl Value {
    /// Boolean as stored by comparisons and `true`/`false` literals
    pub fn from_bool(b: bool) -> Self {
        Value::Int(b as i64)
    }

    /// Get the integer value, returns None if not an Int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the heap handle, returns None if not a Ref
    pub fn as_ref(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by conditional branches: non-zero integers and all
    /// heap objects are true, zero and null are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(n) => *n != 0,
            Value::Ref(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Ref(ObjectId(0)).is_truthy());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(7).as_int(), Some(7));
        assert_eq!(Value::Null.as_int(), None);
        assert_eq!(Value::Ref(ObjectId(3)).as_ref(), Some(ObjectId(3)));
        assert_eq!(Value::from_bool(true), Value::Int(1));
    }
}
