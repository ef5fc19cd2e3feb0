//! Sandboxed execution
//!
//! A run happens on a dedicated worker thread so the caller can stop waiting
//! for it at any time:
//!
//! ```text
//!   caller ──spawn──► tune-exec: Interpreter::run ──► mpsc ──┐
//!     │                    │ (SharedObserver)                │
//!     │                    ▼                                 │
//!     │               Recorder ◄─ flush, close, take_timeline┤
//!     └── recv_timeout loop: token? deadline? ───────────────┘
//! ```
//!
//! Panics inside the VM are caught at the thread boundary and reported as
//! faults. On cancellation or timeout the executor raises the VM's interrupt
//! flag, waits up to the cancel grace period, and otherwise abandons the
//! worker; the recorder is flushed and closed either way so the samples
//! gathered so far are kept. Output an abandoned worker prints after that is
//! dropped.

use crate::compiler::il::Module;
use crate::config::{CodegenStrategy, EngineConfig};
use crate::instrumentation::{Recorder, RunClock, SharedObserver, Timeline};
use crate::interpreter::constants::{EXECUTOR_WAIT_SLICE, WORKER_THREAD_NAME};
use crate::interpreter::{
    ExecutionFault, InterruptFlag, InterruptReason, Interpreter, RuntimeError, VmOptions,
};
use crate::jit::{Jit, NativeCode};
use crate::log::{LogKind, LogMessage, LogSink};
use crate::memory::HeapStats;
use crate::EngineError;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};
use tracing::{info, warn};

/// Cooperative cancellation shared between a caller and a run
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a run ended, apart from its samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started: SystemTime,
    pub ended: SystemTime,
    /// Display form of the value the entry point returned
    pub return_value: Option<String>,
    pub fault: Option<ExecutionFault>,
    /// Lines printed by the script
    pub output: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.fault.is_none() && !self.cancelled
    }
}

/// Immutable snapshot of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResults {
    pub timeline: Timeline,
    pub report: RunReport,
}

impl RunResults {
    /// Results of an artifact that has not run yet
    pub fn empty() -> Self {
        let now = SystemTime::now();
        Self {
            timeline: Timeline::default(),
            report: RunReport {
                started: now,
                ended: now,
                return_value: None,
                fault: None,
                output: Vec::new(),
                cancelled: false,
            },
        }
    }
}

/// Everything a finished run hands back to its artifact
#[derive(Debug)]
pub(crate) struct Execution {
    pub results: RunResults,
    /// Methods lowered during the run under the deferred strategy
    pub native: Option<NativeCode>,
}

/// Script output that stops flowing once the run's recorder is closed
struct OutputGate {
    recorder: Arc<Mutex<Recorder>>,
    output: Arc<Mutex<Vec<String>>>,
    sink: Arc<dyn LogSink>,
}

impl OutputGate {
    fn print(&self, text: &str) {
        // Held across the log so a close cannot slip in between
        let recorder = self.recorder.lock();
        if recorder.is_closed() {
            return;
        }
        self.output.lock().push(text.to_string());
        self.sink.log(LogMessage::new(LogKind::Output, text));
    }
}

/// Return value or fault, the JIT it lowered with, and the heap it left
type WorkerOutcome = (Result<String, ExecutionFault>, Option<Jit>, Option<HeapStats>);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `module` once with `argument`
pub(crate) fn execute(
    module: Arc<Module>,
    argument: &str,
    config: &EngineConfig,
    sink: Arc<dyn LogSink>,
    token: &CancellationToken,
) -> Result<Execution, EngineError> {
    let clock = RunClock::start();
    let recorder = Recorder::shared(config.recorder, clock);
    recorder.lock().begin(&HeapStats::default());

    let interrupt = InterruptFlag::new();
    let output = Arc::new(Mutex::new(Vec::<String>::new()));
    let (sender, receiver) = mpsc::channel::<WorkerOutcome>();

    let entry = module.entry_method().signature();
    info!(build = %module.build, entry = %entry, "run started");
    sink.log(LogMessage::new(
        LogKind::RunStarted,
        format!("Running {} [{}] with arg {:?}", entry, module.build, argument),
    ));

    let jit = match config.codegen {
        CodegenStrategy::Deferred => Some(Jit::new(module.build.platform, module.build.mode)),
        CodegenStrategy::AheadOfTime => None,
    };
    let options = VmOptions {
        max_call_depth: config.max_call_depth,
        time_budget: config.time_budget,
        gc: config.gc,
    };

    let worker = {
        let module = Arc::clone(&module);
        let argument = argument.to_string();
        let observer = SharedObserver(Arc::clone(&recorder));
        let gate = OutputGate {
            recorder: Arc::clone(&recorder),
            output: Arc::clone(&output),
            sink: Arc::clone(&sink),
        };
        let interrupt = interrupt.clone();

        thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut observer = observer;
                    let mut printer = |text: &str| gate.print(text);
                    let mut vm =
                        Interpreter::new(&module, options, &mut observer, interrupt, &mut printer);
                    if let Some(jit) = jit {
                        vm = vm.with_jit(jit);
                    }
                    let result = vm.run(&argument).map(|value| vm.display(&value));
                    let stats = vm.heap().stats();
                    (result, vm.take_jit(), Some(stats))
                }));
                let outcome = outcome.unwrap_or_else(|payload| {
                    let message = panic_message(payload.as_ref());
                    (
                        Err(ExecutionFault::detached(RuntimeError::Panic { message })),
                        None,
                        None,
                    )
                });
                // The executor may have stopped listening
                let _ = sender.send(outcome);
            })
            .map_err(EngineError::WorkerSpawn)?
    };

    // A budget too large to represent never expires
    let deadline = Instant::now().checked_add(config.time_budget);
    let received = loop {
        if token.is_cancelled() {
            interrupt.request_cancel();
        } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            interrupt.request_timeout();
        }
        if interrupt.reason().is_some() {
            break receiver.recv_timeout(config.cancel_grace).ok();
        }

        match receiver.recv_timeout(EXECUTOR_WAIT_SLICE) {
            Ok(outcome) => break Some(outcome),
            Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {}
        }
    };

    let finished = received.is_some();
    if finished {
        let _ = worker.join();
    } else {
        warn!("worker did not stop within the grace period; abandoning it");
    }

    let final_stats = received.as_ref().and_then(|(_, _, stats)| *stats);
    let timeline = {
        let mut recorder = recorder.lock();
        recorder.flush(final_stats.as_ref());
        recorder.close();
        recorder.take_timeline()
    };
    let ended = clock.now();
    let output = std::mem::take(&mut *output.lock());

    let reason = interrupt.reason();
    let cancelled = reason == Some(InterruptReason::Cancelled);
    let (result, jit) = match received {
        Some((result, jit, _)) => (result, jit),
        None => {
            let error = match reason {
                Some(InterruptReason::TimedOut) => RuntimeError::TimeBudgetExceeded {
                    budget: config.time_budget,
                },
                Some(InterruptReason::Cancelled) => RuntimeError::Cancelled,
                None => RuntimeError::Panic {
                    message: "execution thread exited without a result".to_string(),
                },
            };
            (Err(ExecutionFault::detached(error)), None)
        }
    };

    let (return_value, fault) = match result {
        Ok(value) => (Some(value), None),
        Err(_) if cancelled => (None, None),
        Err(fault) => (None, Some(fault)),
    };

    let elapsed = ended.duration_since(clock.started()).unwrap_or_default();
    let summary = if cancelled {
        "Run cancelled".to_string()
    } else if let Some(fault) = &fault {
        format!("Run failed after {} ms: {}", elapsed.as_millis(), fault)
    } else {
        format!(
            "Run succeeded in {} ms, returned {}",
            elapsed.as_millis(),
            return_value.as_deref().unwrap_or("null")
        )
    };
    if let Some(fault) = &fault {
        warn!(%fault, "run faulted");
        sink.log(LogMessage::warning(fault.to_string()));
    }
    if timeline.truncated {
        sink.log(LogMessage::info(format!(
            "Sample cap of {} points per generation reached; later samples were dropped",
            config.recorder.max_points
        )));
    }
    info!(
        cancelled,
        events = timeline.events.len(),
        points = timeline.point_count(),
        "run ended"
    );
    sink.log(LogMessage::new(LogKind::RunEnded, summary));

    let native = jit.map(|jit| jit.finish(&module));
    Ok(Execution {
        results: RunResults {
            timeline,
            report: RunReport {
                started: clock.started(),
                ended,
                return_value,
                fault,
                output,
                cancelled,
            },
        },
        native,
    })
}
