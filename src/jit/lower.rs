//! Template lowering of IL methods to assembly listings
//!
//! Each IL instruction expands to a fixed template over a frame that holds
//! locals followed by one slot per evaluation-stack position:
//!
//! ```text
//!   [bp + 2p + p·i]        argument i
//!   [bp]                   saved bp
//!   [bp - p·(i+1)]         local i
//!   [bp - p·(L+k+1)]       eval stack slot k   (L = local count)
//! ```
//!
//! `p` is the pointer size of the resolved platform. Script calls push their
//! arguments right to left; runtime helpers take register arguments on x64
//! and stack arguments on x86.

use super::{AsmLine, NativeMethod};
use crate::compiler::il::{Instruction, Method, Module};
use crate::compiler::optimize::stack_depths;
use crate::config::{BuildMode, Platform};
use crate::interpreter::builtins::Builtin;
use rustc_hash::FxHashSet;

const HELPER_PREFIX: &str = "TUNE_HELP_";

/// Registers of the two supported targets
struct Registers {
    ax: &'static str,
    cx: &'static str,
    dx: &'static str,
    bp: &'static str,
    sp: &'static str,
    ptr: &'static str,
    /// Helper argument registers; empty means stack arguments
    helper_args: &'static [&'static str],
}

const X64: Registers = Registers {
    ax: "rax",
    cx: "rcx",
    dx: "rdx",
    bp: "rbp",
    sp: "rsp",
    ptr: "qword ptr",
    helper_args: &["rcx", "rdx", "r8"],
};

const X86: Registers = Registers {
    ax: "eax",
    cx: "ecx",
    dx: "edx",
    bp: "ebp",
    sp: "esp",
    ptr: "dword ptr",
    helper_args: &[],
};

fn helper(name: &str) -> String {
    format!("{HELPER_PREFIX}{name}")
}

fn builtin_helper(builtin: Builtin) -> String {
    match builtin {
        Builtin::Array => helper("ALLOC_ARRAY"),
        Builtin::Str => helper("ALLOC_STRING"),
        other => helper(&other.name().to_uppercase()),
    }
}

fn label(offset: u32) -> String {
    format!("L_{offset:04x}")
}

struct Lowering<'m> {
    module: &'m Module,
    method: &'m Method,
    platform: Platform,
    regs: &'static Registers,
    ptr_size: u32,
    lines: Vec<AsmLine>,
}

impl<'m> Lowering<'m> {
    fn inst(&mut self, op: &'static str, operands: impl Into<String>) {
        self.lines.push(AsmLine::Inst {
            op,
            operands: operands.into(),
        });
    }

    fn comment(&mut self, text: impl Into<String>) {
        self.lines.push(AsmLine::Comment(text.into()));
    }

    fn memory(&self, base: &str, sign: char, offset: u32) -> String {
        format!("{} [{}{}{:#x}]", self.regs.ptr, base, sign, offset)
    }

    fn eval(&self, slot: usize) -> String {
        let index = self.method.locals.len() as u32 + slot as u32 + 1;
        self.memory(self.regs.bp, '-', self.ptr_size * index)
    }

    fn local(&self, index: u16) -> String {
        self.memory(self.regs.bp, '-', self.ptr_size * (u32::from(index) + 1))
    }

    fn arg(&self, index: u16) -> String {
        self.memory(self.regs.bp, '+', self.ptr_size * (u32::from(index) + 2))
    }

    fn static_field(&self, index: u16) -> String {
        self.memory("tune_statics", '+', self.ptr_size * u32::from(index))
    }

    fn load(&mut self, reg: &'static str, operand: String) {
        self.inst("mov", format!("{reg}, {operand}"));
    }

    fn store(&mut self, operand: String, reg: &'static str) {
        self.inst("mov", format!("{operand}, {reg}"));
    }

    fn frame_size(&self) -> u32 {
        let slots = (self.method.locals.len() + self.method.max_stack) as u32;
        let align = match self.platform {
            Platform::X86 => 4,
            _ => 16,
        };
        (slots * self.ptr_size).div_ceil(align) * align
    }

    fn call_helper(&mut self, name: String, args: &[String]) {
        let regs = self.regs;
        if regs.helper_args.is_empty() {
            for arg in args.iter().rev() {
                self.inst("push", arg.clone());
            }
            self.inst("call", name);
            if !args.is_empty() {
                self.inst("add", format!("{}, {}", regs.sp, self.ptr_size as usize * args.len()));
            }
        } else {
            for (arg, reg) in args.iter().zip(regs.helper_args) {
                self.load(*reg, arg.clone());
            }
            self.inst("call", name);
        }
    }

    fn prologue(&mut self, frame_size: u32) {
        let regs = self.regs;
        self.inst("push", regs.bp);
        self.inst("mov", format!("{}, {}", regs.bp, regs.sp));
        if frame_size > 0 {
            self.inst("sub", format!("{}, {:#x}", regs.sp, frame_size));
        }
        if !self.method.locals.is_empty() {
            self.inst("xor", "eax, eax");
            for index in 0..self.method.locals.len() as u16 {
                let slot = self.local(index);
                self.store(slot, regs.ax);
            }
        }
    }

    fn lower_instruction(&mut self, index: usize, instr: Instruction, depth: usize) {
        let regs = self.regs;
        let ax = regs.ax;
        let top = depth.saturating_sub(1);
        let second = depth.saturating_sub(2);

        match instr {
            Instruction::Nop => self.inst("nop", ""),
            Instruction::LdcI8(n) => {
                if self.platform == Platform::X86 && i32::try_from(n).is_err() {
                    self.inst("mov", format!("eax, {:#x}", n as u64 & 0xffff_ffff));
                    self.inst("mov", format!("edx, {:#x}", (n as u64) >> 32));
                    self.call_helper(helper("BOX_I8"), &[]);
                } else {
                    self.inst("mov", format!("{ax}, {n}"));
                }
                let slot = self.eval(depth);
                self.store(slot, ax);
            }
            Instruction::Ldstr(i) => {
                let operand = self.memory("tune_strings", '+', self.ptr_size * i);
                self.load(ax, operand);
                let text = self
                    .module
                    .strings
                    .get(i as usize)
                    .map(String::as_str)
                    .unwrap_or_default();
                self.comment(format!("\"{}\"", text.escape_default()));
                let slot = self.eval(depth);
                self.store(slot, ax);
            }
            Instruction::Ldnull => {
                self.inst("xor", "eax, eax");
                let slot = self.eval(depth);
                self.store(slot, ax);
            }
            Instruction::Ldarg(i) | Instruction::Ldloc(i) | Instruction::Ldsfld(i) => {
                let source = match instr {
                    Instruction::Ldarg(_) => self.arg(i),
                    Instruction::Ldloc(_) => self.local(i),
                    _ => self.static_field(i),
                };
                self.load(ax, source);
                let slot = self.eval(depth);
                self.store(slot, ax);
            }
            Instruction::Starg(i) | Instruction::Stloc(i) | Instruction::Stsfld(i) => {
                let target = match instr {
                    Instruction::Starg(_) => self.arg(i),
                    Instruction::Stloc(_) => self.local(i),
                    _ => self.static_field(i),
                };
                let slot = self.eval(top);
                self.load(ax, slot);
                self.store(target, ax);
            }
            Instruction::Ldelem => {
                let args = [self.eval(second), self.eval(top)];
                self.call_helper(helper("LDELEM"), &args);
                let slot = self.eval(second);
                self.store(slot, ax);
            }
            Instruction::Stelem => {
                let args = [self.eval(depth.saturating_sub(3)), self.eval(second), self.eval(top)];
                self.call_helper(helper("STELEM"), &args);
                self.comment("write barrier");
            }
            Instruction::Add | Instruction::Ceq | Instruction::Cne => {
                let name = match instr {
                    Instruction::Add => "ADD",
                    _ => "EQUALS",
                };
                let args = [self.eval(second), self.eval(top)];
                self.call_helper(helper(name), &args);
                if instr == Instruction::Add {
                    self.comment("gc safepoint");
                }
                if instr == Instruction::Cne {
                    self.inst("xor", "eax, 1");
                }
                let slot = self.eval(second);
                self.store(slot, ax);
            }
            Instruction::Clt | Instruction::Cle | Instruction::Cgt | Instruction::Cge => {
                let args = [self.eval(second), self.eval(top)];
                self.call_helper(helper("COMPARE"), &args);
                let set = match instr {
                    Instruction::Clt => "setl",
                    Instruction::Cle => "setle",
                    Instruction::Cgt => "setg",
                    _ => "setge",
                };
                self.inst("cmp", "eax, 0");
                self.inst(set, "al");
                self.inst("movzx", "eax, al");
                let slot = self.eval(second);
                self.store(slot, ax);
            }
            Instruction::Sub | Instruction::And | Instruction::Or | Instruction::Xor => {
                let op = match instr {
                    Instruction::Sub => "sub",
                    Instruction::And => "and",
                    Instruction::Or => "or",
                    _ => "xor",
                };
                let (left, right) = (self.eval(second), self.eval(top));
                self.load(ax, left.clone());
                self.inst(op, format!("{ax}, {right}"));
                if instr == Instruction::Sub {
                    self.inst("jo", helper("OVERFLOW"));
                }
                self.store(left, ax);
            }
            Instruction::Mul | Instruction::Div | Instruction::Rem | Instruction::Shl | Instruction::Shr
                if self.platform == Platform::X86 =>
            {
                let name = match instr {
                    Instruction::Mul => "LMUL",
                    Instruction::Div => "LDIV",
                    Instruction::Rem => "LREM",
                    Instruction::Shl => "LLSH",
                    _ => "LRSH",
                };
                let args = [self.eval(second), self.eval(top)];
                self.call_helper(helper(name), &args);
                let slot = self.eval(second);
                self.store(slot, ax);
            }
            Instruction::Mul => {
                let (left, right) = (self.eval(second), self.eval(top));
                self.load(ax, left.clone());
                self.inst("imul", format!("{ax}, {right}"));
                self.inst("jo", helper("OVERFLOW"));
                self.store(left, ax);
            }
            Instruction::Div | Instruction::Rem => {
                let (left, right) = (self.eval(second), self.eval(top));
                self.load(ax, left.clone());
                self.load(regs.cx, right);
                self.inst("test", format!("{0}, {0}", regs.cx));
                self.inst("je", helper("DIVZERO"));
                self.inst("cqo", "");
                self.inst("idiv", regs.cx);
                let result = if instr == Instruction::Div { ax } else { regs.dx };
                self.store(left, result);
            }
            Instruction::Shl | Instruction::Shr => {
                let (left, right) = (self.eval(second), self.eval(top));
                self.load(ax, left.clone());
                self.load(regs.cx, right);
                self.inst("and", "ecx, 63");
                let op = if instr == Instruction::Shl { "shl" } else { "sar" };
                self.inst(op, format!("{ax}, cl"));
                self.store(left, ax);
            }
            Instruction::Neg | Instruction::Not => {
                let slot = self.eval(top);
                self.load(ax, slot.clone());
                if instr == Instruction::Neg {
                    self.inst("neg", ax);
                    self.inst("jo", helper("OVERFLOW"));
                } else {
                    self.inst("not", ax);
                }
                self.store(slot, ax);
            }
            Instruction::Br(target) | Instruction::Brtrue(target) | Instruction::Brfalse(target) => {
                if (target as usize) <= index {
                    self.call_helper(helper("POLL"), &[]);
                    self.comment("interrupt poll");
                }
                let destination = label(self.method.offset_of(target as usize));
                match instr {
                    Instruction::Br(_) => self.inst("jmp", destination),
                    _ => {
                        let slot = self.eval(top);
                        self.inst("cmp", format!("{slot}, 0"));
                        let jump = if matches!(instr, Instruction::Brtrue(_)) { "jne" } else { "je" };
                        self.inst(jump, destination);
                    }
                }
            }
            Instruction::Call(callee) => {
                let arity = self.module.params_of(callee);
                let base = depth.saturating_sub(arity);
                for slot in (base..depth).rev() {
                    let operand = self.eval(slot);
                    self.inst("push", operand);
                }
                let name = self
                    .module
                    .methods
                    .get(callee as usize)
                    .map(|m| m.name.clone())
                    .unwrap_or_else(|| format!("method#{callee}"));
                self.inst("call", name);
                if arity > 0 {
                    self.inst("add", format!("{}, {:#x}", regs.sp, self.ptr_size as usize * arity));
                }
                let slot = self.eval(base);
                self.store(slot, ax);
            }
            Instruction::Callb(builtin) => {
                let base = depth.saturating_sub(builtin.arity());
                let args: Vec<String> = (base..depth).map(|slot| self.eval(slot)).collect();
                self.call_helper(builtin_helper(builtin), &args);
                if builtin.touches_heap() {
                    self.comment("gc safepoint");
                }
                let slot = self.eval(base);
                self.store(slot, ax);
            }
            Instruction::Pop => {}
            Instruction::Dup => {
                let (source, target) = (self.eval(top), self.eval(depth));
                self.load(ax, source);
                self.store(target, ax);
            }
            Instruction::Ret => {
                let slot = self.eval(top);
                self.load(ax, slot);
                self.inst("mov", format!("{}, {}", regs.sp, regs.bp));
                self.inst("pop", regs.bp);
                self.inst("ret", "");
            }
        }
    }
}

/// Lower one method of `module` for `platform` (already resolved)
pub(crate) fn lower_method(
    module: &Module,
    index: usize,
    platform: Platform,
    mode: BuildMode,
) -> Option<NativeMethod> {
    let method = module.methods.get(index)?;
    let regs = match platform {
        Platform::X86 => &X86,
        _ => &X64,
    };
    let mut lowering = Lowering {
        module,
        method,
        platform,
        regs,
        ptr_size: platform.pointer_size(),
        lines: Vec::new(),
    };

    let depths = stack_depths(&method.code, |m| module.params_of(m));
    let targets: FxHashSet<usize> = method
        .code
        .iter()
        .filter_map(|instr| instr.branch_target().map(|t| t as usize))
        .collect();

    let frame_size = lowering.frame_size();
    lowering.prologue(frame_size);

    for (i, instr) in method.code.iter().enumerate() {
        // Unreachable IL is not lowered
        let Some(depth) = depths[i] else {
            continue;
        };
        if targets.contains(&i) {
            lowering.lines.push(AsmLine::Label(label(method.offset_of(i))));
        }
        if mode == BuildMode::Debug {
            lowering.comment(format!("IL_{:04x}: {}", method.offset_of(i), instr.mnemonic()));
        }
        lowering.lower_instruction(i, *instr, depth);
    }

    let mut lines = lowering.lines;
    if mode == BuildMode::Release {
        peephole(&mut lines);
    }

    Some(NativeMethod {
        name: method.name.clone(),
        signature: method.signature(),
        frame_size,
        lines,
    })
}

/// Drop a reload of the location that the previous instruction just stored
pub(crate) fn peephole(lines: &mut Vec<AsmLine>) {
    let mut out: Vec<AsmLine> = Vec::with_capacity(lines.len());
    for line in lines.drain(..) {
        if let (
            Some(AsmLine::Inst {
                op: "mov",
                operands: stored,
            }),
            AsmLine::Inst {
                op: "mov",
                operands: loaded,
            },
        ) = (out.last(), &line)
        {
            let store = stored.split_once(", ");
            let load = loaded.split_once(", ");
            if let (Some((place, reg)), Some((reg2, place2))) = (store, load) {
                if place == place2 && reg == reg2 && place.contains('[') {
                    continue;
                }
            }
        }
        out.push(line);
    }
    *lines = out;
}
