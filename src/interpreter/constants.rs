// Constants for the tune runtime

use std::time::Duration;

/// Default generation 0 budget (256 KiB). Exceeding it triggers a collection.
pub const DEFAULT_GEN0_BUDGET: u64 = 256 * 1024;

/// Default generation 1 budget (2 MiB)
pub const DEFAULT_GEN1_BUDGET: u64 = 2 * 1024 * 1024;

/// Default generation 2 budget (16 MiB); grows after full collections
pub const DEFAULT_GEN2_BUDGET: u64 = 16 * 1024 * 1024;

/// Hard cap on live heap bytes before allocation faults (256 MiB)
pub const DEFAULT_MAX_HEAP: u64 = 256 * 1024 * 1024;

/// Wall-clock limit for one run
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(30);

/// How long a cancelled or timed-out run may take to stop before it is abandoned
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(250);

pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;

/// Minimum spacing of allocation-driven samples
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

pub const DEFAULT_MAX_POINTS: usize = 250_000;

/// Object header size shared by strings and arrays
pub const OBJECT_HEADER_SIZE: u64 = 24;

/// Size of one array element slot
pub const ARRAY_SLOT_SIZE: u64 = 8;

/// Object sizes are rounded up to this alignment
pub const OBJECT_ALIGNMENT: u64 = 8;

/// Largest array `array(n)` may create
pub const MAX_ARRAY_LENGTH: i64 = 1 << 24;

/// The VM polls its interrupt flag once per this many instructions
pub const INTERRUPT_POLL_INTERVAL: u64 = 1024;

/// `sleep` wakes this often to check for interruption
pub const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Name of the implicit entry method; scripts may neither define nor call it
pub const ENTRY_METHOD_NAME: &str = "main";

/// Name under which the run argument is visible to top-level code
pub const ARGUMENT_NAME: &str = "arg";

/// Name of the worker thread that runs the VM
pub const WORKER_THREAD_NAME: &str = "tune-exec";

/// How often the executor checks for cancellation and the time budget
pub const EXECUTOR_WAIT_SLICE: Duration = Duration::from_millis(10);

/// Deepest the parser lets brackets, prefix operators, operator chains and
/// blocks nest
pub const MAX_NESTING_DEPTH: usize = 64;
