// Execution engine for tune IL

use crate::compiler::il::{Instruction, Module};
use crate::config::GcConfig;
use crate::interpreter::constants::INTERRUPT_POLL_INTERVAL;
use crate::interpreter::errors::{ExecutionFault, RuntimeError};
use crate::jit::Jit;
use crate::memory::{
    CollectionResult, Heap, HeapError, HeapObserver, ObjectId, ObjectKind, Value,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

const RUNNING: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const TIMEOUT_REQUESTED: u8 = 2;

/// Why the host asked the VM to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    Cancelled,
    TimedOut,
}

/// Flag the executor sets to stop a running VM. Only the first request sticks.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicU8>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_cancel(&self) {
        let _ = self.0.compare_exchange(
            RUNNING,
            CANCEL_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn request_timeout(&self) {
        let _ = self.0.compare_exchange(
            RUNNING,
            TIMEOUT_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn reason(&self) -> Option<InterruptReason> {
        match self.0.load(Ordering::Acquire) {
            RUNNING => None,
            CANCEL_REQUESTED => Some(InterruptReason::Cancelled),
            _ => Some(InterruptReason::TimedOut),
        }
    }
}

/// Limits and settings for one VM instance
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_call_depth: usize,
    pub time_budget: Duration,
    pub gc: GcConfig,
}

/// One activation record
#[derive(Debug)]
struct Frame {
    method: usize,
    pc: usize,
    args: Vec<Value>,
    locals: Vec<Value>,
    /// Height of the shared evaluation stack when this frame was entered
    stack_base: usize,
}

/// The interpreter that executes a compiled [`Module`]
pub struct Interpreter<'a> {
    module: &'a Module,
    options: VmOptions,

    /// Managed heap for strings and arrays
    pub(crate) heap: Heap,

    /// Static fields, one per top-level `var`
    globals: Vec<Value>,

    /// Call stack
    frames: Vec<Frame>,

    /// Evaluation stack shared by all frames
    stack: Vec<Value>,

    /// String literals, allocated on first use and kept alive for the run
    interned: Vec<Option<ObjectId>>,

    observer: &'a mut dyn HeapObserver,
    interrupt: InterruptFlag,
    printer: &'a mut dyn FnMut(&str),

    /// Present when methods are lowered on first call
    jit: Option<Jit>,

    steps: u64,
    root_scratch: Vec<Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        module: &'a Module,
        options: VmOptions,
        observer: &'a mut dyn HeapObserver,
        interrupt: InterruptFlag,
        printer: &'a mut dyn FnMut(&str),
    ) -> Self {
        Interpreter {
            heap: Heap::new(options.gc),
            globals: vec![Value::Null; module.globals.len()],
            frames: Vec::new(),
            stack: Vec::new(),
            interned: vec![None; module.strings.len()],
            module,
            options,
            observer,
            interrupt,
            printer,
            jit: None,
            steps: 0,
            root_scratch: Vec::new(),
        }
    }

    /// Lower each method to native code the first time it is called
    pub fn with_jit(mut self, jit: Jit) -> Self {
        self.jit = Some(jit);
        self
    }

    /// Native code lowered during the run, if deferred lowering was enabled
    pub fn take_jit(&mut self) -> Option<Jit> {
        self.jit.take()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Run the entry point with `argument` bound to its single parameter
    pub fn run(&mut self, argument: &str) -> Result<Value, ExecutionFault> {
        let entry = self.module.entry;
        let arg = self
            .alloc(ObjectKind::Str(argument.to_string()))
            .map_err(ExecutionFault::detached)?;

        self.push_frame(entry, vec![arg]).map_err(ExecutionFault::detached)?;

        match self.execute() {
            Ok(value) => Ok(value),
            Err(error) => Err(self.fault(error)),
        }
    }

    /// Attach the current code position to an error
    fn fault(&self, error: RuntimeError) -> ExecutionFault {
        let Some(frame) = self.frames.last() else {
            return ExecutionFault::detached(error);
        };
        let method = &self.module.methods[frame.method];
        // pc already points past the faulting instruction
        let index = frame.pc.saturating_sub(1);
        ExecutionFault {
            error,
            method: Some(method.name.clone()),
            offset: Some(method.offset_of(index)),
            line: method.line_at(index),
        }
    }

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        let module = self.module;

        loop {
            self.steps += 1;
            if self.steps % INTERRUPT_POLL_INTERVAL == 0 {
                self.poll_interrupt()?;
            }

            let frame = self.frame_mut()?;
            let instr = *module.methods[frame.method]
                .code
                .get(frame.pc)
                .ok_or_else(|| RuntimeError::invalid_program("fell off the end of a method"))?;
            frame.pc += 1;

            match instr {
                Instruction::Nop => {}
                Instruction::LdcI8(n) => self.push(Value::Int(n)),
                Instruction::Ldstr(index) => {
                    let value = self.load_literal(index)?;
                    self.push(value);
                }
                Instruction::Ldnull => self.push(Value::Null),
                Instruction::Ldarg(i) => {
                    let value = self.slot(|f| &mut f.args, i)?;
                    self.push(value);
                }
                Instruction::Starg(i) => {
                    let value = self.pop()?;
                    self.store_slot(|f| &mut f.args, i, value)?;
                }
                Instruction::Ldloc(i) => {
                    let value = self.slot(|f| &mut f.locals, i)?;
                    self.push(value);
                }
                Instruction::Stloc(i) => {
                    let value = self.pop()?;
                    self.store_slot(|f| &mut f.locals, i, value)?;
                }
                Instruction::Ldsfld(i) => {
                    let value = *self
                        .globals
                        .get(i as usize)
                        .ok_or_else(|| RuntimeError::invalid_program("bad field index"))?;
                    self.push(value);
                }
                Instruction::Stsfld(i) => {
                    let value = self.pop()?;
                    *self
                        .globals
                        .get_mut(i as usize)
                        .ok_or_else(|| RuntimeError::invalid_program("bad field index"))? = value;
                }
                Instruction::Ldelem => {
                    let index = self.pop()?;
                    let target = self.pop()?;
                    let value = self.load_element(target, index)?;
                    self.push(value);
                }
                Instruction::Stelem => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let target = self.pop()?;
                    self.store_element(target, index, value)?;
                }
                Instruction::Neg | Instruction::Not => {
                    let operand = self.pop()?;
                    let result = self.unary(instr, operand)?;
                    self.push(result);
                }
                Instruction::Br(target) => self.frame_mut()?.pc = target as usize,
                Instruction::Brtrue(target) => {
                    if self.pop()?.is_truthy() {
                        self.frame_mut()?.pc = target as usize;
                    }
                }
                Instruction::Brfalse(target) => {
                    if !self.pop()?.is_truthy() {
                        self.frame_mut()?.pc = target as usize;
                    }
                }
                Instruction::Call(method) => self.call(method as usize)?,
                Instruction::Callb(builtin) => {
                    let args = self.pop_n(builtin.arity())?;
                    let result = self.call_builtin(builtin, &args)?;
                    self.push(result);
                }
                Instruction::Pop => {
                    self.pop()?;
                }
                Instruction::Dup => {
                    let value = self.peek()?;
                    self.push(value);
                }
                Instruction::Ret => {
                    let value = self.pop()?;
                    let frame = self
                        .frames
                        .pop()
                        .ok_or_else(|| RuntimeError::invalid_program("return without frame"))?;
                    self.stack.truncate(frame.stack_base);
                    if self.frames.is_empty() {
                        return Ok(value);
                    }
                    self.push(value);
                }
                _ => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = self.binary(instr, left, right)?;
                    self.push(result);
                }
            }
        }
    }

    // ===== Frames and stack =====

    fn frame_mut(&mut self) -> Result<&mut Frame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::invalid_program("no active frame"))
    }

    fn slot(
        &mut self,
        select: impl FnOnce(&mut Frame) -> &mut Vec<Value>,
        index: u16,
    ) -> Result<Value, RuntimeError> {
        let frame = self.frame_mut()?;
        select(frame)
            .get(index as usize)
            .copied()
            .ok_or_else(|| RuntimeError::invalid_program("bad slot index"))
    }

    fn store_slot(
        &mut self,
        select: impl FnOnce(&mut Frame) -> &mut Vec<Value>,
        index: u16,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let frame = self.frame_mut()?;
        let slot = select(frame)
            .get_mut(index as usize)
            .ok_or_else(|| RuntimeError::invalid_program("bad slot index"))?;
        *slot = value;
        Ok(())
    }

    fn stack_base(&self) -> usize {
        self.frames.last().map(|f| f.stack_base).unwrap_or(0)
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.stack.len() <= self.stack_base() {
            return Err(RuntimeError::invalid_program("evaluation stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::invalid_program("evaluation stack underflow"))
    }

    fn peek(&self) -> Result<Value, RuntimeError> {
        if self.stack.len() <= self.stack_base() {
            return Err(RuntimeError::invalid_program("evaluation stack underflow"));
        }
        self.stack
            .last()
            .copied()
            .ok_or_else(|| RuntimeError::invalid_program("evaluation stack underflow"))
    }

    /// Pop `n` values, returned in push order
    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, RuntimeError> {
        let available = self.stack.len() - self.stack_base().min(self.stack.len());
        if available < n {
            return Err(RuntimeError::invalid_program("evaluation stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn push_frame(&mut self, method: usize, args: Vec<Value>) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.options.max_call_depth {
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.options.max_call_depth,
            });
        }
        let module = self.module;
        let target = module
            .methods
            .get(method)
            .ok_or_else(|| RuntimeError::invalid_program("bad method index"))?;

        if let Some(jit) = self.jit.as_mut() {
            jit.ensure(module, method);
        }

        self.frames.push(Frame {
            method,
            pc: 0,
            args,
            locals: vec![Value::Null; target.locals.len()],
            stack_base: self.stack.len(),
        });
        Ok(())
    }

    fn call(&mut self, method: usize) -> Result<(), RuntimeError> {
        let arity = self.module.params_of(method as u16);
        let args = self.pop_n(arity)?;
        self.push_frame(method, args)
    }

    // ===== Heap access =====

    pub(crate) fn poll_interrupt(&self) -> Result<(), RuntimeError> {
        match self.interrupt.reason() {
            None => Ok(()),
            Some(InterruptReason::Cancelled) => Err(RuntimeError::Cancelled),
            Some(InterruptReason::TimedOut) => Err(RuntimeError::TimeBudgetExceeded {
                budget: self.options.time_budget,
            }),
        }
    }

    /// Allocate, collecting first when the budgets say so
    pub(crate) fn alloc(&mut self, kind: ObjectKind) -> Result<Value, RuntimeError> {
        self.poll_interrupt()?;

        let size = kind.size();
        if let Some(generation) = self.heap.collection_needed(size) {
            self.collect(generation);
        }
        if !self.heap.fits(size) {
            self.collect(2);
        }

        match self.heap.allocate(kind, &mut *self.observer) {
            Ok(id) => Ok(Value::Ref(id)),
            Err(HeapError::OutOfMemory { requested, limit }) => {
                Err(RuntimeError::OutOfMemory { requested, limit })
            }
            Err(err) => Err(RuntimeError::invalid_program(err.to_string())),
        }
    }

    /// Run a collection pass with the VM's current roots
    pub(crate) fn collect(&mut self, generation: u8) -> CollectionResult {
        let mut roots = std::mem::take(&mut self.root_scratch);
        roots.clear();
        roots.extend_from_slice(&self.globals);
        roots.extend_from_slice(&self.stack);
        for frame in &self.frames {
            roots.extend_from_slice(&frame.args);
            roots.extend_from_slice(&frame.locals);
        }
        roots.extend(self.interned.iter().flatten().map(|id| Value::Ref(*id)));

        trace!(generation, roots = roots.len(), "collecting");
        let result = self.heap.collect(generation, &roots, &mut *self.observer);
        self.root_scratch = roots;
        result
    }

    fn load_literal(&mut self, index: u32) -> Result<Value, RuntimeError> {
        let slot = index as usize;
        match self.interned.get(slot) {
            Some(Some(id)) => return Ok(Value::Ref(*id)),
            Some(None) => {}
            None => return Err(RuntimeError::invalid_program("bad string index")),
        }
        let text = self.module.strings[slot].clone();
        let value = self.alloc(ObjectKind::Str(text))?;
        self.interned[slot] = value.as_ref();
        Ok(value)
    }

    /// String payload of a value, or a type mismatch naming `operation`
    pub(crate) fn expect_string(&self, value: &Value, operation: &str) -> Result<&str, RuntimeError> {
        value
            .as_ref()
            .and_then(|id| self.heap.string(id))
            .ok_or_else(|| {
                RuntimeError::type_mismatch(operation, "string", self.heap.type_name(value))
            })
    }

    pub(crate) fn expect_int(&self, value: &Value, operation: &str) -> Result<i64, RuntimeError> {
        value
            .as_int()
            .ok_or_else(|| RuntimeError::type_mismatch(operation, "int", self.heap.type_name(value)))
    }

    // ===== Formatting =====

    /// Text shown by `print`, `str` and the run result
    pub fn display(&self, value: &Value) -> String {
        self.display_nested(value, 0)
    }

    fn display_nested(&self, value: &Value, depth: usize) -> String {
        const MAX_ITEMS: usize = 16;

        match value {
            Value::Null => "null".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Ref(id) => match self.heap.get(*id).map(|o| &o.kind) {
                Ok(ObjectKind::Str(s)) if depth == 0 => s.clone(),
                Ok(ObjectKind::Str(s)) => format!("\"{}\"", s.escape_default()),
                Ok(ObjectKind::Array(items)) if depth >= 2 => format!("array({})", items.len()),
                Ok(ObjectKind::Array(items)) => {
                    let mut parts: Vec<String> = items
                        .iter()
                        .take(MAX_ITEMS)
                        .map(|item| self.display_nested(item, depth + 1))
                        .collect();
                    if items.len() > MAX_ITEMS {
                        parts.push(format!("... {} more", items.len() - MAX_ITEMS));
                    }
                    format!("[{}]", parts.join(", "))
                }
                Err(_) => format!("<dangling {}>", id),
            },
        }
    }

    pub(crate) fn print(&mut self, text: &str) {
        (self.printer)(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::{BuildConfiguration, BuildMode, Platform};
    use crate::memory::NullObserver;

    fn options() -> VmOptions {
        VmOptions {
            max_call_depth: 64,
            time_budget: Duration::from_secs(5),
            gc: GcConfig::default(),
        }
    }

    fn run_with(source: &str, arg: &str, mode: BuildMode) -> (Result<String, ExecutionFault>, Vec<String>) {
        let module = compile(source, BuildConfiguration::new(mode, Platform::X64))
            .unwrap_or_else(|e| panic!("compile failed: {e}"));
        let mut output = Vec::new();
        let mut printer = |line: &str| output.push(line.to_string());
        let mut observer = NullObserver;
        let mut vm = Interpreter::new(
            &module,
            options(),
            &mut observer,
            InterruptFlag::new(),
            &mut printer,
        );
        let result = vm.run(arg).map(|v| vm.display(&v));
        drop(vm);
        (result, output)
    }

    fn run(source: &str) -> Result<String, ExecutionFault> {
        run_with(source, "", BuildMode::Debug).0
    }

    #[test]
    fn test_return_literal() {
        assert_eq!(run("return 1;").unwrap(), "1");
    }

    #[test]
    fn test_falling_off_the_end_returns_zero() {
        assert_eq!(run("var x = 3;").unwrap(), "0");
    }

    #[test]
    fn test_argument_is_visible() {
        let (result, _) = run_with("return arg + \"!\";", "hi", BuildMode::Debug);
        assert_eq!(result.unwrap(), "hi!");
    }

    #[test]
    fn test_recursion() {
        let source = "func fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\nreturn fib(15);";
        assert_eq!(run(source).unwrap(), "610");
        assert_eq!(
            run_with(source, "", BuildMode::Release).0.unwrap(),
            "610"
        );
    }

    #[test]
    fn test_loops_and_arrays() {
        let source = r#"
            var items = array(5);
            for (var i = 0; i < len(items); i++) { items[i] = i * i; }
            var total = 0;
            var j = 0;
            while (true) {
                if (j >= 5) break;
                total += items[j];
                j++;
            }
            return total;
        "#;
        assert_eq!(run(source).unwrap(), "30");
    }

    #[test]
    fn test_print_output() {
        let (result, output) = run_with(
            "print(\"a\"); print(1 + 2); print(array(2));",
            "",
            BuildMode::Debug,
        );
        assert!(result.is_ok());
        assert_eq!(output, vec!["a", "3", "[null, null]"]);
    }

    #[test]
    fn test_division_by_zero_fault_has_line() {
        let err = run("var a = 1;\nvar b = 0;\nreturn a / b;").unwrap_err();
        assert!(matches!(err.error, RuntimeError::DivisionByZero { .. }));
        assert_eq!(err.line, Some(3));
        assert_eq!(err.method.as_deref(), Some("main"));
    }

    #[test]
    fn test_overflow_fault() {
        let err = run("var x = 9223372036854775807; return x + 1;").unwrap_err();
        assert!(matches!(err.error, RuntimeError::IntegerOverflow { .. }));
    }

    #[test]
    fn test_index_out_of_range() {
        let err = run("var a = array(2); return a[2];").unwrap_err();
        assert!(matches!(
            err.error,
            RuntimeError::IndexOutOfRange {
                index: 2,
                length: 2
            }
        ));
    }

    #[test]
    fn test_call_depth_limit() {
        let err = run("func down(n) { return down(n + 1); } return down(0);").unwrap_err();
        assert!(matches!(
            err.error,
            RuntimeError::CallDepthExceeded { limit: 64 }
        ));
    }

    #[test]
    fn test_cancel_flag_stops_loop() {
        let module = compile("while (true) { }", BuildConfiguration::default()).unwrap();
        let flag = InterruptFlag::new();
        flag.request_cancel();
        flag.request_timeout();
        let mut printer = |_: &str| {};
        let mut observer = NullObserver;
        let mut vm = Interpreter::new(&module, options(), &mut observer, flag, &mut printer);
        let err = vm.run("").unwrap_err();
        assert_eq!(err.error, RuntimeError::Cancelled);
    }

    #[test]
    fn test_allocation_loop_triggers_collections() {
        let source = "for (var i = 0; i < 2000; i++) { var a = array(100); } return collection_count(0);";
        let result: i64 = run(source).unwrap().parse().unwrap();
        assert!(result > 0);
    }
}
