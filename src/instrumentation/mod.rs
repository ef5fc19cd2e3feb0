//! GC instrumentation
//!
//! The [`Recorder`] turns heap activity into time series: one sample sequence
//! per generation plus one sequence of collection events.
//!
//! ```text
//!   Heap ──on_allocation──────────► gen 0 sample (coalesced)
//!        ──on_collection_start────► gen 0/1/2 samples, pass start time
//!        ──on_collection_end──────► gen 0/1/2 samples, GcEvent
//! ```
//!
//! Coalesced allocation samples are kept pending and written by
//! [`Recorder::flush`], so the last sample of a run always matches the heap
//! the run left behind.
//!
//! The worker thread and the executor share the recorder behind a
//! `parking_lot::Mutex`. When the executor abandons a worker it closes the
//! recorder, after which late notifications are dropped and the samples
//! taken so far stay readable.

use crate::config::RecorderConfig;
use crate::memory::heap::GENERATIONS;
use crate::memory::{CollectionResult, HeapObserver, HeapStats};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Wall-clock time derived from one anchored reading plus a monotonic clock,
/// so timestamps are absolute and never go backwards
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    wall: SystemTime,
    anchor: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            wall: SystemTime::now(),
            anchor: Instant::now(),
        }
    }

    pub fn started(&self) -> SystemTime {
        self.wall
    }

    pub fn now(&self) -> SystemTime {
        self.wall + self.anchor.elapsed()
    }
}

/// One sample of a generation's size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPoint {
    pub timestamp: SystemTime,
    /// Bytes
    pub value: u64,
    pub description: Option<String>,
}

/// A collection pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcEvent {
    /// When the pass started
    pub timestamp: SystemTime,
    /// Total heap bytes after the pass
    pub value: u64,
    pub description: String,
    pub generation: u8,
    pub ordinal: u64,
    pub duration: Duration,
    pub bytes_freed: u64,
    pub bytes_promoted: u64,
}

impl GcEvent {
    /// The event as a plain sample, for charting next to the generations
    pub fn data_point(&self) -> DataPoint {
        DataPoint {
            timestamp: self.timestamp,
            value: self.value,
            description: Some(self.description.clone()),
        }
    }
}

/// Everything recorded during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    pub generations: [Vec<DataPoint>; GENERATIONS],
    pub events: Vec<GcEvent>,
    /// A sequence hit the point cap and stopped growing
    pub truncated: bool,
}

impl Timeline {
    pub fn generation(&self, generation: usize) -> &[DataPoint] {
        self.generations
            .get(generation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn point_count(&self) -> usize {
        self.generations.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.point_count() == 0 && self.events.is_empty()
    }

    /// Largest value across all sequences, for chart scaling
    pub fn peak(&self) -> u64 {
        self.generations
            .iter()
            .flatten()
            .map(|p| p.value)
            .chain(self.events.iter().map(|e| e.value))
            .max()
            .unwrap_or(0)
    }
}

/// Collects samples for one run
#[derive(Debug)]
pub struct Recorder {
    clock: RunClock,
    config: RecorderConfig,
    timeline: Timeline,
    last_values: [Option<u64>; GENERATIONS],
    last_allocation_sample: Option<Instant>,
    /// Latest allocation notification that fell inside the coalescing window
    pending: Option<HeapStats>,
    pass_started: Option<SystemTime>,
    closed: bool,
}

impl Recorder {
    pub fn new(config: RecorderConfig, clock: RunClock) -> Self {
        Self {
            clock,
            config,
            timeline: Timeline::default(),
            last_values: [None; GENERATIONS],
            last_allocation_sample: None,
            pending: None,
            pass_started: None,
            closed: false,
        }
    }

    pub fn shared(config: RecorderConfig, clock: RunClock) -> Arc<Mutex<Recorder>> {
        Arc::new(Mutex::new(Self::new(config, clock)))
    }

    /// Sample every generation once, before the first user instruction
    pub fn begin(&mut self, stats: &HeapStats) {
        self.sample_all(stats);
    }

    /// Record the heap as the run left it. `final_stats` comes from the VM when
    /// it returned; without it the last coalesced allocation is sampled.
    pub fn flush(&mut self, final_stats: Option<&HeapStats>) {
        let pending = self.pending.take();
        if let Some(stats) = final_stats.or(pending.as_ref()) {
            self.sample_all(stats);
        }
    }

    /// Stop accepting notifications
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn take_timeline(&mut self) -> Timeline {
        std::mem::take(&mut self.timeline)
    }

    fn sample(&mut self, generation: usize, value: u64) {
        if self.closed || self.last_values[generation] == Some(value) {
            return;
        }
        let sequence = &mut self.timeline.generations[generation];
        if sequence.len() >= self.config.max_points {
            self.timeline.truncated = true;
            return;
        }
        sequence.push(DataPoint {
            timestamp: self.clock.now(),
            value,
            description: None,
        });
        self.last_values[generation] = Some(value);
    }

    fn sample_all(&mut self, stats: &HeapStats) {
        for (generation, size) in stats.generation_sizes.iter().enumerate() {
            self.sample(generation, *size);
        }
    }
}

impl HeapObserver for Recorder {
    fn on_allocation(&mut self, stats: &HeapStats) {
        let now = Instant::now();
        if let Some(last) = self.last_allocation_sample {
            if now.duration_since(last) < self.config.sample_interval {
                if !self.closed {
                    self.pending = Some(*stats);
                }
                return;
            }
        }
        self.last_allocation_sample = Some(now);
        self.pending = None;
        self.sample(0, stats.generation_sizes[0]);
    }

    fn on_collection_start(&mut self, _generation: u8, stats: &HeapStats) {
        if self.closed {
            return;
        }
        self.pass_started = Some(self.clock.now());
        self.pending = None;
        self.sample_all(stats);
    }

    fn on_collection_end(&mut self, result: &CollectionResult, stats: &HeapStats) {
        if self.closed {
            return;
        }
        self.sample_all(stats);
        // The next allocation starts a fresh coalescing window
        self.last_allocation_sample = None;

        let timestamp = self.pass_started.take().unwrap_or_else(|| self.clock.now());
        self.timeline.events.push(GcEvent {
            timestamp,
            value: stats.total_size(),
            description: format!(
                "Gen{} GC #{}: freed {} bytes, promoted {} bytes in {:?}",
                result.generation,
                result.ordinal,
                result.bytes_freed,
                result.bytes_promoted,
                result.duration
            ),
            generation: result.generation,
            ordinal: result.ordinal,
            duration: result.duration,
            bytes_freed: result.bytes_freed,
            bytes_promoted: result.bytes_promoted,
        });
    }
}

/// Observer handle the VM holds while the executor keeps the other end
#[derive(Debug, Clone)]
pub struct SharedObserver(pub Arc<Mutex<Recorder>>);

impl HeapObserver for SharedObserver {
    fn on_allocation(&mut self, stats: &HeapStats) {
        self.0.lock().on_allocation(stats);
    }

    fn on_collection_start(&mut self, generation: u8, stats: &HeapStats) {
        self.0.lock().on_collection_start(generation, stats);
    }

    fn on_collection_end(&mut self, result: &CollectionResult, stats: &HeapStats) {
        self.0.lock().on_collection_end(result, stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(sizes: [u64; 3]) -> HeapStats {
        HeapStats {
            generation_sizes: sizes,
            object_counts: [0; 3],
        }
    }

    fn recorder(sample_interval: Duration, max_points: usize) -> Recorder {
        Recorder::new(
            RecorderConfig {
                sample_interval,
                max_points,
            },
            RunClock::start(),
        )
    }

    fn pass(generation: u8, ordinal: u64) -> CollectionResult {
        CollectionResult {
            generation,
            ordinal,
            duration: Duration::from_micros(5),
            bytes_freed: 64,
            objects_freed: 2,
            bytes_promoted: 32,
            objects_promoted: 1,
            live_bytes: 32,
        }
    }

    #[test]
    fn test_clock_never_goes_backwards() {
        let clock = RunClock::start();
        let a = clock.now();
        let b = clock.now();
        assert!(clock.started() <= a && a <= b);
    }

    #[test]
    fn test_equal_values_are_skipped() {
        let mut rec = recorder(Duration::ZERO, 100);
        rec.begin(&stats([0, 0, 0]));
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        let values: Vec<u64> = rec.timeline().generation(0).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0, 32, 64]);
        assert_eq!(rec.timeline().generation(1).len(), 1);
    }

    #[test]
    fn test_allocation_samples_are_coalesced() {
        let mut rec = recorder(Duration::from_secs(60), 100);
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        assert_eq!(rec.timeline().generation(0).len(), 1);

        // Collection samples are always taken
        rec.on_collection_start(0, &stats([96, 0, 0]));
        rec.on_collection_end(&pass(0, 1), &stats([0, 32, 0]));
        let values: Vec<u64> = rec.timeline().generation(0).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![32, 96, 0]);
        assert_eq!(rec.timeline().generation(1).iter().map(|p| p.value).collect::<Vec<_>>(), vec![0, 32]);
    }

    #[test]
    fn test_collection_event() {
        let mut rec = recorder(Duration::ZERO, 100);
        rec.on_collection_start(1, &stats([100, 50, 0]));
        rec.on_collection_end(&pass(1, 3), &stats([0, 0, 32]));

        let event = &rec.timeline().events[0];
        assert_eq!(event.generation, 1);
        assert_eq!(event.ordinal, 3);
        assert_eq!(event.value, 32);
        assert!(event.description.starts_with("Gen1 GC #3"));
        assert!(event.timestamp <= rec.timeline().generation(2)[0].timestamp);
        assert_eq!(event.data_point().description.as_deref(), Some(event.description.as_str()));
    }

    #[test]
    fn test_cap_truncates_samples_but_not_events() {
        let mut rec = recorder(Duration::ZERO, 2);
        for size in 1..=5 {
            rec.on_allocation(&stats([size, 0, 0]));
        }
        rec.on_collection_start(0, &stats([5, 0, 0]));
        rec.on_collection_end(&pass(0, 1), &stats([0, 0, 0]));

        assert_eq!(rec.timeline().generation(0).len(), 2);
        assert!(rec.timeline().truncated);
        assert_eq!(rec.timeline().events.len(), 1);
    }

    #[test]
    fn test_closed_recorder_ignores_notifications() {
        let shared = Recorder::shared(RecorderConfig::default(), RunClock::start());
        let mut observer = SharedObserver(Arc::clone(&shared));
        observer.on_allocation(&stats([8, 0, 0]));
        shared.lock().close();
        observer.on_allocation(&stats([16, 0, 0]));
        observer.on_collection_start(0, &stats([16, 0, 0]));
        observer.on_collection_end(&pass(0, 1), &stats([0, 0, 0]));

        let timeline = shared.lock().take_timeline();
        assert_eq!(timeline.generation(0).len(), 1);
        assert!(timeline.events.is_empty());
    }

    #[test]
    fn test_flush_writes_coalesced_allocation() {
        let mut rec = recorder(Duration::from_secs(60), 100);
        rec.begin(&stats([0, 0, 0]));
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        rec.on_allocation(&stats([96, 0, 0]));
        rec.flush(None);
        rec.close();

        let values: Vec<u64> = rec.timeline().generation(0).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0, 32, 96]);
    }

    #[test]
    fn test_flush_prefers_final_stats() {
        let mut rec = recorder(Duration::from_secs(60), 100);
        rec.begin(&stats([0, 0, 0]));
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        rec.flush(Some(&stats([80, 16, 0])));

        let last = |g: usize| rec.timeline().generation(g).last().map(|p| p.value);
        assert_eq!(last(0), Some(80));
        assert_eq!(last(1), Some(16));
        assert_eq!(last(2), Some(0));
    }

    #[test]
    fn test_collection_clears_pending_allocation() {
        let mut rec = recorder(Duration::from_secs(60), 100);
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        rec.on_collection_start(0, &stats([64, 0, 0]));
        rec.on_collection_end(&pass(0, 1), &stats([0, 16, 0]));
        rec.flush(None);

        let values: Vec<u64> = rec.timeline().generation(0).iter().map(|p| p.value).collect();
        assert_eq!(values, vec![32, 64, 0]);
    }

    #[test]
    fn test_flush_after_close_is_ignored() {
        let mut rec = recorder(Duration::from_secs(60), 100);
        rec.on_allocation(&stats([32, 0, 0]));
        rec.on_allocation(&stats([64, 0, 0]));
        rec.close();
        rec.flush(Some(&stats([128, 0, 0])));
        assert!(rec.is_closed());
        assert_eq!(rec.timeline().generation(0).len(), 1);
    }
}
