//! Managed heap for the tune VM
//!
//! This module provides the generational object store:
//! - A slab of [`HeapObject`]s addressed by [`ObjectId`], with a free list so
//!   handles are reused after collection
//! - Per-generation byte and object accounting
//! - Generation budgets that decide when and what to collect
//! - A write barrier feeding the remembered set used by partial collections
//!
//! The heap never collects on its own. The VM asks
//! [`Heap::collection_needed`] before allocating and runs
//! [`Heap::collect`](crate::memory::collector) with its roots.

use super::value::{ObjectId, Value};
use crate::config::GcConfig;
use crate::interpreter::constants::{ARRAY_SLOT_SIZE, OBJECT_ALIGNMENT, OBJECT_HEADER_SIZE};
use crate::memory::collector::CollectionResult;
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Number of generations; generation 2 is the oldest
pub const GENERATIONS: usize = 3;

/// Payload of a heap object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    Str(String),
    Array(Vec<Value>),
}

impl ObjectKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjectKind::Str(_) => "string",
            ObjectKind::Array(_) => "array",
        }
    }

    /// Accounted size: header plus payload, aligned
    pub fn size(&self) -> u64 {
        match self {
            ObjectKind::Str(s) => string_size(s.len()),
            ObjectKind::Array(items) => array_size(items.len()),
        }
    }
}

pub fn string_size(len: usize) -> u64 {
    (OBJECT_HEADER_SIZE + len as u64).div_ceil(OBJECT_ALIGNMENT) * OBJECT_ALIGNMENT
}

pub fn array_size(len: usize) -> u64 {
    OBJECT_HEADER_SIZE + ARRAY_SLOT_SIZE * len as u64
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub kind: ObjectKind,
    pub generation: u8,
    pub size: u64,
}

/// Snapshot of heap occupancy handed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub generation_sizes: [u64; GENERATIONS],
    pub object_counts: [usize; GENERATIONS],
}

impl HeapStats {
    pub fn total_size(&self) -> u64 {
        self.generation_sizes.iter().sum()
    }
}

/// Receives heap activity as it happens
///
/// All methods default to doing nothing, so an observer implements only what
/// it cares about.
pub trait HeapObserver {
    /// A new object was placed in generation 0
    fn on_allocation(&mut self, _stats: &HeapStats) {}

    /// A pass over generations `0..=generation` is about to start
    fn on_collection_start(&mut self, _generation: u8, _stats: &HeapStats) {}

    /// The pass described by `result` has finished
    fn on_collection_end(&mut self, _result: &CollectionResult, _stats: &HeapStats) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl HeapObserver for NullObserver {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("Out of memory: requested {requested} bytes, heap limit is {limit}")]
    OutOfMemory { requested: u64, limit: u64 },

    #[error("Invalid object handle {0}")]
    InvalidHandle(ObjectId),
}

pub struct Heap {
    pub(crate) objects: Vec<Option<HeapObject>>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) generation_sizes: [u64; GENERATIONS],
    pub(crate) object_counts: [usize; GENERATIONS],
    pub(crate) budgets: [u64; GENERATIONS],
    pub(crate) config: GcConfig,
    /// Older arrays that may hold references to younger objects
    pub(crate) remembered: FxHashSet<ObjectId>,
    /// Passes per collected generation
    pub(crate) collections: [u64; GENERATIONS],
    pub(crate) pass_count: u64,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Heap {
            objects: Vec::new(),
            free_list: Vec::new(),
            generation_sizes: [0; GENERATIONS],
            object_counts: [0; GENERATIONS],
            budgets: [config.gen0_budget, config.gen1_budget, config.gen2_budget],
            config,
            remembered: FxHashSet::default(),
            collections: [0; GENERATIONS],
            pass_count: 0,
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            generation_sizes: self.generation_sizes,
            object_counts: self.object_counts,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.generation_sizes.iter().sum()
    }

    pub fn generation_size(&self, generation: usize) -> u64 {
        self.generation_sizes.get(generation).copied().unwrap_or(0)
    }

    pub fn budget(&self, generation: usize) -> u64 {
        self.budgets.get(generation).copied().unwrap_or(0)
    }

    pub fn max_heap(&self) -> u64 {
        self.config.max_heap
    }

    /// Number of passes that collected `generation` or an older one
    pub fn collection_count(&self, generation: usize) -> u64 {
        self.collections.iter().skip(generation).sum()
    }

    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    /// Which generation to collect before allocating `size` bytes, if any
    ///
    /// A pass is due when generation 0 would exceed its budget. The pass then
    /// covers the oldest generation that is already over budget.
    pub fn collection_needed(&self, size: u64) -> Option<u8> {
        if self.generation_sizes[0] + size <= self.budgets[0] {
            return None;
        }
        if self.generation_sizes[2] > self.budgets[2] {
            Some(2)
        } else if self.generation_sizes[1] > self.budgets[1] {
            Some(1)
        } else {
            Some(0)
        }
    }

    /// Whether `size` more bytes fit under the heap cap
    pub fn fits(&self, size: u64) -> bool {
        self.total_size().saturating_add(size) <= self.config.max_heap
    }

    /// Place a new object in generation 0
    pub fn allocate(
        &mut self,
        kind: ObjectKind,
        observer: &mut dyn HeapObserver,
    ) -> Result<ObjectId, HeapError> {
        let size = kind.size();
        if !self.fits(size) {
            return Err(HeapError::OutOfMemory {
                requested: size,
                limit: self.config.max_heap,
            });
        }

        let object = HeapObject {
            kind,
            generation: 0,
            size,
        };
        let id = match self.free_list.pop() {
            Some(slot) => {
                self.objects[slot as usize] = Some(object);
                ObjectId(slot)
            }
            None => {
                self.objects.push(Some(object));
                ObjectId((self.objects.len() - 1) as u32)
            }
        };

        self.generation_sizes[0] += size;
        self.object_counts[0] += 1;
        observer.on_allocation(&self.stats());
        Ok(id)
    }

    pub fn get(&self, id: ObjectId) -> Result<&HeapObject, HeapError> {
        self.objects
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(HeapError::InvalidHandle(id))
    }

    pub fn string(&self, id: ObjectId) -> Option<&str> {
        match &self.get(id).ok()?.kind {
            ObjectKind::Str(s) => Some(s),
            ObjectKind::Array(_) => None,
        }
    }

    pub fn array(&self, id: ObjectId) -> Option<&[Value]> {
        match &self.get(id).ok()?.kind {
            ObjectKind::Array(items) => Some(items),
            ObjectKind::Str(_) => None,
        }
    }

    pub fn generation_of(&self, id: ObjectId) -> Option<u8> {
        self.get(id).ok().map(|obj| obj.generation)
    }

    /// Type name of a value as shown in error messages
    pub fn type_name(&self, value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Ref(id) => self
                .get(*id)
                .map(|obj| obj.kind.type_name())
                .unwrap_or("object"),
        }
    }

    /// Store into an array element, recording old-to-young references
    ///
    /// The caller has already checked that `holder` is an array and `index`
    /// is in range; a mismatch here is reported as an invalid handle.
    pub fn store_element(
        &mut self,
        holder: ObjectId,
        index: usize,
        value: Value,
    ) -> Result<(), HeapError> {
        let value_generation = match value {
            Value::Ref(child) => Some(self.generation_of(child).ok_or(HeapError::InvalidHandle(child))?),
            _ => None,
        };

        let object = self
            .objects
            .get_mut(holder.index())
            .and_then(Option::as_mut)
            .ok_or(HeapError::InvalidHandle(holder))?;
        let holder_generation = object.generation;
        match &mut object.kind {
            ObjectKind::Array(items) if index < items.len() => items[index] = value,
            _ => return Err(HeapError::InvalidHandle(holder)),
        }

        if value_generation.is_some_and(|g| g < holder_generation) {
            self.remembered.insert(holder);
        }
        Ok(())
    }

    /// Whether an array holds a reference to an object younger than itself
    pub(crate) fn holds_younger(&self, holder: ObjectId) -> bool {
        let Ok(object) = self.get(holder) else {
            return false;
        };
        match &object.kind {
            ObjectKind::Array(items) => items.iter().any(|item| match item {
                Value::Ref(child) => self
                    .generation_of(*child)
                    .is_some_and(|g| g < object.generation),
                _ => false,
            }),
            ObjectKind::Str(_) => false,
        }
    }

    pub fn remembered_len(&self) -> usize {
        self.remembered.len()
    }

    pub fn live_objects(&self) -> usize {
        self.object_counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_heap() -> Heap {
        Heap::new(GcConfig {
            gen0_budget: 1024,
            gen1_budget: 4096,
            gen2_budget: 16384,
            max_heap: 65536,
        })
    }

    #[test]
    fn test_object_sizes() {
        assert_eq!(array_size(0), 24);
        assert_eq!(array_size(10), 104);
        assert_eq!(string_size(0), 24);
        assert_eq!(string_size(1), 32);
        assert_eq!(string_size(8), 32);
        assert_eq!(string_size(9), 40);
    }

    #[test]
    fn test_allocation_goes_to_gen0() {
        let mut heap = small_heap();
        let id = heap
            .allocate(ObjectKind::Array(vec![Value::Null; 4]), &mut NullObserver)
            .unwrap();
        assert_eq!(heap.generation_of(id), Some(0));
        assert_eq!(heap.generation_size(0), array_size(4));
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_collection_needed_when_gen0_full() {
        let mut heap = small_heap();
        assert_eq!(heap.collection_needed(1000), None);
        heap.allocate(ObjectKind::Array(vec![Value::Null; 100]), &mut NullObserver)
            .unwrap();
        assert_eq!(heap.collection_needed(300), Some(0));
    }

    #[test]
    fn test_oldest_over_budget_generation_is_chosen() {
        let mut heap = small_heap();
        heap.generation_sizes = [1024, 5000, 0];
        assert_eq!(heap.collection_needed(8), Some(1));
        heap.generation_sizes = [1024, 5000, 20000];
        assert_eq!(heap.collection_needed(8), Some(2));
    }

    #[test]
    fn test_heap_cap() {
        let mut heap = small_heap();
        let err = heap
            .allocate(ObjectKind::Array(vec![Value::Null; 10_000]), &mut NullObserver)
            .unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory { limit: 65536, .. }));
    }

    #[test]
    fn test_write_barrier_records_old_to_young() {
        let mut heap = small_heap();
        let holder = heap
            .allocate(ObjectKind::Array(vec![Value::Null; 2]), &mut NullObserver)
            .unwrap();
        let child = heap
            .allocate(ObjectKind::Str("x".to_string()), &mut NullObserver)
            .unwrap();

        // Same generation: nothing to remember
        heap.store_element(holder, 0, Value::Ref(child)).unwrap();
        assert_eq!(heap.remembered_len(), 0);

        heap.objects[holder.index()].as_mut().unwrap().generation = 1;
        heap.store_element(holder, 1, Value::Ref(child)).unwrap();
        assert_eq!(heap.remembered_len(), 1);
        assert!(heap.holds_younger(holder));
    }

    #[test]
    fn test_store_out_of_range_is_rejected() {
        let mut heap = small_heap();
        let holder = heap
            .allocate(ObjectKind::Array(vec![Value::Null; 1]), &mut NullObserver)
            .unwrap();
        assert!(heap.store_element(holder, 5, Value::Int(1)).is_err());
    }
}
