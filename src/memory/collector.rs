//! Generational mark-sweep collection
//!
//! A pass over generation `g` collects generations `0..=g`:
//!
//! ```text
//! roots ──┐
//!         ├──▶ mark (objects of gen ≤ g only) ──▶ sweep gen ≤ g ──▶ promote survivors
//! remembered set ┘
//! ```
//!
//! Objects older than `g` are treated as live and never traced. References
//! from them into the collected generations are found through the remembered
//! set kept by the write barrier in [`Heap::store_element`]. Survivors move up
//! one generation; generation 2 survivors stay put.

use super::heap::{Heap, HeapObserver, ObjectKind, GENERATIONS};
use super::value::{ObjectId, Value};
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of one collection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionResult {
    /// Oldest generation collected
    pub generation: u8,
    /// 1-based pass number within the run
    pub ordinal: u64,
    /// Time spent in the pass
    pub duration: Duration,
    pub bytes_freed: u64,
    pub objects_freed: usize,
    pub bytes_promoted: u64,
    pub objects_promoted: usize,
    /// Total heap bytes after the pass
    pub live_bytes: u64,
}

impl Heap {
    /// Collect generations `0..=generation` from the given roots
    pub fn collect(
        &mut self,
        generation: u8,
        roots: &[Value],
        observer: &mut dyn HeapObserver,
    ) -> CollectionResult {
        let generation = generation.min((GENERATIONS - 1) as u8);
        observer.on_collection_start(generation, &self.stats());
        let start = Instant::now();

        let marked = self.mark(generation, roots);
        let mut result = self.sweep(generation, &marked);

        self.rebuild_remembered_set(&marked);

        if generation as usize == GENERATIONS - 1 {
            // Give the old generation room to grow past what survived
            self.budgets[2] = self.config.gen2_budget.max(self.generation_sizes[2] * 2);
        }

        self.collections[generation as usize] += 1;
        self.pass_count += 1;

        result.ordinal = self.pass_count;
        result.duration = start.elapsed();
        result.live_bytes = self.total_size();

        debug!(
            generation,
            ordinal = result.ordinal,
            freed = result.bytes_freed,
            promoted = result.bytes_promoted,
            live = result.live_bytes,
            "collection finished"
        );
        observer.on_collection_end(&result, &self.stats());
        result
    }

    /// Mark everything of generation ≤ `generation` reachable from the roots
    /// or the remembered set. Returns a bitmap indexed by slot.
    fn mark(&self, generation: u8, roots: &[Value]) -> Vec<bool> {
        let mut marked = vec![false; self.objects.len()];
        let mut worklist: Vec<ObjectId> = Vec::new();

        let collectable = |id: ObjectId| {
            self.generation_of(id)
                .is_some_and(|g| g <= generation)
        };

        worklist.extend(roots.iter().filter_map(Value::as_ref).filter(|&id| collectable(id)));

        // Old holders act as roots for their young children
        for &holder in &self.remembered {
            if let Some(items) = self.array(holder) {
                worklist.extend(
                    items
                        .iter()
                        .filter_map(Value::as_ref)
                        .filter(|&id| collectable(id)),
                );
            }
        }

        while let Some(id) = worklist.pop() {
            let slot = id.index();
            if marked.get(slot).copied().unwrap_or(true) {
                continue;
            }
            marked[slot] = true;

            if let Some(items) = self.array(id) {
                worklist.extend(
                    items
                        .iter()
                        .filter_map(Value::as_ref)
                        .filter(|&child| collectable(child) && !marked[child.index()]),
                );
            }
        }

        marked
    }

    /// Free unmarked objects of generation ≤ `generation`, promote the rest
    fn sweep(&mut self, generation: u8, marked: &[bool]) -> CollectionResult {
        let mut result = CollectionResult {
            generation,
            ordinal: 0,
            duration: Duration::ZERO,
            bytes_freed: 0,
            objects_freed: 0,
            bytes_promoted: 0,
            objects_promoted: 0,
            live_bytes: 0,
        };

        for (slot, entry) in self.objects.iter_mut().enumerate() {
            let Some(object) = entry else { continue };
            if object.generation > generation {
                continue;
            }

            let from = object.generation as usize;
            if !marked[slot] {
                self.generation_sizes[from] -= object.size;
                self.object_counts[from] -= 1;
                result.bytes_freed += object.size;
                result.objects_freed += 1;
                *entry = None;
                self.free_list.push(slot as u32);
            } else if from < GENERATIONS - 1 {
                let size = object.size;
                object.generation += 1;
                self.generation_sizes[from] -= size;
                self.object_counts[from] -= 1;
                self.generation_sizes[from + 1] += size;
                self.object_counts[from + 1] += 1;
                result.bytes_promoted += size;
                result.objects_promoted += 1;
            }
        }

        result
    }

    /// Keep only holders that are still alive and still point at something
    /// younger. Freshly promoted arrays are candidates too.
    fn rebuild_remembered_set(&mut self, marked: &[bool]) {
        let mut candidates: FxHashSet<ObjectId> = std::mem::take(&mut self.remembered);
        candidates.extend(
            marked
                .iter()
                .enumerate()
                .filter(|(slot, live)| {
                    **live
                        && matches!(
                        self.objects[*slot].as_ref().map(|o| &o.kind),
                        Some(ObjectKind::Array(_))
                    )
                })
                .map(|(slot, _)| ObjectId(slot as u32)),
        );

        self.remembered = candidates
            .into_iter()
            .filter(|&holder| self.holds_younger(holder))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::GcConfig;
    use crate::memory::heap::{array_size, Heap, HeapObserver, HeapStats, NullObserver, ObjectKind};
    use crate::memory::collector::CollectionResult;
    use crate::memory::value::Value;

    fn heap() -> Heap {
        Heap::new(GcConfig {
            gen0_budget: 1024,
            gen1_budget: 4096,
            gen2_budget: 16384,
            max_heap: 1 << 20,
        })
    }

    fn alloc_array(heap: &mut Heap, len: usize) -> Value {
        Value::Ref(
            heap.allocate(ObjectKind::Array(vec![Value::Null; len]), &mut NullObserver)
                .unwrap(),
        )
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = heap();
        let kept = alloc_array(&mut heap, 1);
        let _garbage = alloc_array(&mut heap, 1);

        let result = heap.collect(0, &[kept], &mut NullObserver);

        assert_eq!(result.objects_freed, 1);
        assert_eq!(result.bytes_freed, array_size(1));
        assert_eq!(result.objects_promoted, 1);
        assert_eq!(result.ordinal, 1);
        assert_eq!(heap.generation_of(kept.as_ref().unwrap()), Some(1));
        assert_eq!(heap.generation_size(0), 0);
        assert_eq!(heap.generation_size(1), array_size(1));
    }

    #[test]
    fn test_survivors_are_promoted_up_to_gen2() {
        let mut heap = heap();
        let root = alloc_array(&mut heap, 0);
        for _ in 0..4 {
            heap.collect(2, &[root], &mut NullObserver);
        }
        assert_eq!(heap.generation_of(root.as_ref().unwrap()), Some(2));
        assert_eq!(heap.collection_count(0), 4);
        assert_eq!(heap.collection_count(2), 4);
    }

    #[test]
    fn test_children_are_traced() {
        let mut heap = heap();
        let parent = alloc_array(&mut heap, 1);
        let child = alloc_array(&mut heap, 0);
        heap.store_element(parent.as_ref().unwrap(), 0, child).unwrap();

        let result = heap.collect(0, &[parent], &mut NullObserver);
        assert_eq!(result.objects_freed, 0);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn test_remembered_set_keeps_young_children_alive() {
        let mut heap = heap();
        let old = alloc_array(&mut heap, 1);
        heap.collect(0, &[old], &mut NullObserver);
        assert_eq!(heap.generation_of(old.as_ref().unwrap()), Some(1));

        let young = alloc_array(&mut heap, 0);
        heap.store_element(old.as_ref().unwrap(), 0, young).unwrap();
        assert_eq!(heap.remembered_len(), 1);

        // The old holder is not a root and gen 1 is not traced, yet its
        // young child survives through the remembered set
        let result = heap.collect(0, &[], &mut NullObserver);
        assert_eq!(result.objects_freed, 0);
        assert_eq!(heap.generation_of(young.as_ref().unwrap()), Some(1));

        // Both now live in gen 1, so the holder is no longer remembered
        assert_eq!(heap.remembered_len(), 0);
    }

    #[test]
    fn test_older_generations_untouched_by_minor_pass() {
        let mut heap = heap();
        let old = alloc_array(&mut heap, 0);
        heap.collect(0, &[old], &mut NullObserver);

        // Unrooted, but gen 1 is not collected by a gen 0 pass
        let result = heap.collect(0, &[], &mut NullObserver);
        assert_eq!(result.objects_freed, 0);
        assert_eq!(heap.live_objects(), 1);

        let result = heap.collect(1, &[], &mut NullObserver);
        assert_eq!(result.objects_freed, 1);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let mut heap = heap();
        let first = alloc_array(&mut heap, 0);
        heap.collect(0, &[], &mut NullObserver);
        let second = alloc_array(&mut heap, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_full_pass_grows_gen2_budget() {
        let mut heap = heap();
        let big = alloc_array(&mut heap, 1500);
        heap.collect(2, &[big], &mut NullObserver);
        heap.collect(2, &[big], &mut NullObserver);
        assert_eq!(heap.generation_of(big.as_ref().unwrap()), Some(2));
        assert_eq!(heap.budget(2), 16384.max(array_size(1500) * 2));
    }

    #[derive(Default)]
    struct Counting {
        starts: Vec<u8>,
        ends: Vec<CollectionResult>,
    }

    impl HeapObserver for Counting {
        fn on_collection_start(&mut self, generation: u8, _stats: &HeapStats) {
            self.starts.push(generation);
        }

        fn on_collection_end(&mut self, result: &CollectionResult, _stats: &HeapStats) {
            self.ends.push(*result);
        }
    }

    #[test]
    fn test_observer_sees_both_pass_boundaries() {
        let mut heap = heap();
        let mut observer = Counting::default();
        heap.collect(1, &[], &mut observer);
        heap.collect(0, &[], &mut observer);
        assert_eq!(observer.starts, vec![1, 0]);
        assert_eq!(observer.ends.len(), 2);
        assert_eq!(observer.ends[1].ordinal, 2);
    }
}
