//! Stack-based intermediate language
//!
//! Every method compiles to a flat list of [`Instruction`]s operating on an
//! evaluation stack. Each instruction has a fixed encoded size so that its
//! `IL_xxxx` offset is stable across runs and platforms.
//!
//! # Operands
//!
//! Branch operands are label ids while code is being generated and optimized;
//! [`crate::compiler::optimize::assemble`] rewrites them to instruction
//! indices. Disassembly prints them as the target's IL offset.

use crate::config::BuildConfiguration;
use crate::interpreter::builtins::Builtin;
use std::fmt::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    LdcI8(i64),
    /// Load interned string literal by pool index
    Ldstr(u32),
    Ldnull,
    Ldarg(u16),
    Starg(u16),
    Ldloc(u16),
    Stloc(u16),
    Ldsfld(u16),
    Stsfld(u16),
    Ldelem,
    Stelem,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ceq,
    Cne,
    Clt,
    Cle,
    Cgt,
    Cge,
    Br(u32),
    Brtrue(u32),
    Brfalse(u32),
    /// Call a script method by index
    Call(u16),
    /// Call a runtime builtin
    Callb(Builtin),
    Pop,
    Dup,
    Ret,
}

impl Instruction {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Nop => "nop",
            Instruction::LdcI8(_) => "ldc.i8",
            Instruction::Ldstr(_) => "ldstr",
            Instruction::Ldnull => "ldnull",
            Instruction::Ldarg(_) => "ldarg",
            Instruction::Starg(_) => "starg",
            Instruction::Ldloc(_) => "ldloc",
            Instruction::Stloc(_) => "stloc",
            Instruction::Ldsfld(_) => "ldsfld",
            Instruction::Stsfld(_) => "stsfld",
            Instruction::Ldelem => "ldelem",
            Instruction::Stelem => "stelem",
            Instruction::Add => "add",
            Instruction::Sub => "sub",
            Instruction::Mul => "mul",
            Instruction::Div => "div",
            Instruction::Rem => "rem",
            Instruction::Neg => "neg",
            Instruction::Not => "not",
            Instruction::And => "and",
            Instruction::Or => "or",
            Instruction::Xor => "xor",
            Instruction::Shl => "shl",
            Instruction::Shr => "shr",
            Instruction::Ceq => "ceq",
            Instruction::Cne => "cne",
            Instruction::Clt => "clt",
            Instruction::Cle => "cle",
            Instruction::Cgt => "cgt",
            Instruction::Cge => "cge",
            Instruction::Br(_) => "br",
            Instruction::Brtrue(_) => "brtrue",
            Instruction::Brfalse(_) => "brfalse",
            Instruction::Call(_) => "call",
            Instruction::Callb(_) => "callb",
            Instruction::Pop => "pop",
            Instruction::Dup => "dup",
            Instruction::Ret => "ret",
        }
    }

    /// Encoded size in bytes: opcode plus operand
    pub fn encoded_size(&self) -> u32 {
        match self {
            Instruction::LdcI8(_) => 9,
            Instruction::Ldstr(_)
            | Instruction::Ldsfld(_)
            | Instruction::Stsfld(_)
            | Instruction::Br(_)
            | Instruction::Brtrue(_)
            | Instruction::Brfalse(_)
            | Instruction::Call(_)
            | Instruction::Callb(_) => 5,
            Instruction::Ldarg(_)
            | Instruction::Starg(_)
            | Instruction::Ldloc(_)
            | Instruction::Stloc(_) => 2,
            // Two-byte prefixed opcodes, as in CIL
            Instruction::Ceq
            | Instruction::Cne
            | Instruction::Clt
            | Instruction::Cle
            | Instruction::Cgt
            | Instruction::Cge => 2,
            _ => 1,
        }
    }

    /// Values popped and pushed. `params_of` gives a callee's parameter count.
    pub fn stack_effect(&self, params_of: impl Fn(u16) -> usize) -> (usize, usize) {
        match self {
            Instruction::Nop | Instruction::Br(_) => (0, 0),
            Instruction::LdcI8(_)
            | Instruction::Ldstr(_)
            | Instruction::Ldnull
            | Instruction::Ldarg(_)
            | Instruction::Ldloc(_)
            | Instruction::Ldsfld(_) => (0, 1),
            Instruction::Starg(_)
            | Instruction::Stloc(_)
            | Instruction::Stsfld(_)
            | Instruction::Brtrue(_)
            | Instruction::Brfalse(_)
            | Instruction::Pop
            | Instruction::Ret => (1, 0),
            Instruction::Ldelem => (2, 1),
            Instruction::Stelem => (3, 0),
            Instruction::Neg | Instruction::Not => (1, 1),
            Instruction::Dup => (1, 2),
            Instruction::Call(method) => (params_of(*method), 1),
            Instruction::Callb(builtin) => (builtin.arity(), 1),
            _ => (2, 1),
        }
    }

    pub fn branch_target(&self) -> Option<u32> {
        match self {
            Instruction::Br(t) | Instruction::Brtrue(t) | Instruction::Brfalse(t) => Some(*t),
            _ => None,
        }
    }

    /// Same branch with a different operand; non-branches are returned unchanged
    pub fn with_target(self, target: u32) -> Self {
        match self {
            Instruction::Br(_) => Instruction::Br(target),
            Instruction::Brtrue(_) => Instruction::Brtrue(target),
            Instruction::Brfalse(_) => Instruction::Brfalse(target),
            other => other,
        }
    }

    /// Control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::Br(_) | Instruction::Ret)
    }
}

/// Maps an IL offset to the source line of the statement starting there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    pub offset: u32,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub code: Vec<Instruction>,
    /// IL offset of each instruction in `code`
    pub offsets: Vec<u32>,
    /// Present in Debug builds only
    pub lines: Option<Vec<LineEntry>>,
    pub max_stack: usize,
    pub is_entry: bool,
}

impl Method {
    pub fn offset_of(&self, index: usize) -> u32 {
        self.offsets.get(index).copied().unwrap_or_else(|| self.code_size())
    }

    pub fn code_size(&self) -> u32 {
        self.code.iter().map(Instruction::encoded_size).sum()
    }

    /// Source line of the statement containing instruction `index`
    pub fn line_at(&self, index: usize) -> Option<usize> {
        let offset = self.offset_of(index);
        self.lines
            .as_ref()?
            .iter()
            .take_while(|entry| entry.offset <= offset)
            .last()
            .map(|entry| entry.line)
    }

    /// Signature as printed in headers and call operands
    pub fn signature(&self) -> String {
        if self.is_entry {
            return format!("object {}(string {})", self.name, self.params.join(", string "));
        }
        let params: Vec<String> = self.params.iter().map(|p| format!("object {p}")).collect();
        format!("object {}({})", self.name, params.join(", "))
    }

    fn call_signature(&self) -> String {
        let kind = if self.is_entry { "string" } else { "object" };
        let params = vec![kind; self.params.len()].join(", ");
        format!("object {}({})", self.name, params)
    }
}

/// A compiled script: its methods, static fields and string pool
#[derive(Debug, Clone)]
pub struct Module {
    pub methods: Vec<Method>,
    pub globals: Vec<String>,
    pub strings: Vec<String>,
    pub entry: usize,
    pub build: BuildConfiguration,
}

impl Module {
    pub fn entry_method(&self) -> &Method {
        &self.methods[self.entry]
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    pub fn params_of(&self, method: u16) -> usize {
        self.methods
            .get(method as usize)
            .map(|m| m.params.len())
            .unwrap_or(0)
    }

    /// Render the whole module as an IL listing
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "// {} IL ({})", env!("CARGO_PKG_NAME"), self.build);
        let _ = writeln!(out, ".module script");

        if !self.globals.is_empty() {
            out.push('\n');
            for name in &self.globals {
                let _ = writeln!(out, ".field static object {name}");
            }
        }

        for method in &self.methods {
            out.push('\n');
            self.disassemble_method(method, &mut out);
        }
        out
    }

    fn disassemble_method(&self, method: &Method, out: &mut String) {
        let _ = writeln!(out, ".method static {} cil managed", method.signature());
        let _ = writeln!(out, "{{");
        if method.is_entry {
            let _ = writeln!(out, "  .entrypoint");
        }
        let _ = writeln!(out, "  // code size {}", method.code_size());
        let _ = writeln!(out, "  .maxstack {}", method.max_stack);
        if !method.locals.is_empty() {
            let locals: Vec<String> = method
                .locals
                .iter()
                .enumerate()
                .map(|(i, name)| format!("[{i}] object {name}"))
                .collect();
            let _ = writeln!(out, "  .locals init ({})", locals.join(", "));
        }

        let mut lines = method.lines.as_deref().unwrap_or(&[]).iter().peekable();
        for (index, instr) in method.code.iter().enumerate() {
            let offset = method.offset_of(index);
            while let Some(entry) = lines.next_if(|entry| entry.offset <= offset) {
                let _ = writeln!(out, "  .line {}", entry.line);
            }
            let _ = writeln!(out, "  IL_{:04x}: {}", offset, self.format_instruction(method, instr));
        }
        let _ = writeln!(out, "}} // end of method {}", method.name);
    }

    fn format_instruction(&self, method: &Method, instr: &Instruction) -> String {
        let name_or_index = |names: &[String], index: u16| {
            names
                .get(index as usize)
                .cloned()
                .unwrap_or_else(|| format!("V_{index}"))
        };

        let operand = match instr {
            Instruction::LdcI8(n) => n.to_string(),
            Instruction::Ldstr(index) => {
                let text = self
                    .strings
                    .get(*index as usize)
                    .map(String::as_str)
                    .unwrap_or_default();
                format!("\"{}\"", text.escape_default())
            }
            Instruction::Ldarg(i) | Instruction::Starg(i) => name_or_index(&method.params, *i),
            Instruction::Ldloc(i) | Instruction::Stloc(i) => {
                format!("{} // {}", i, name_or_index(&method.locals, *i))
            }
            Instruction::Ldsfld(i) | Instruction::Stsfld(i) => {
                format!("object {}", name_or_index(&self.globals, *i))
            }
            Instruction::Br(t) | Instruction::Brtrue(t) | Instruction::Brfalse(t) => {
                format!("IL_{:04x}", method.offset_of(*t as usize))
            }
            Instruction::Call(m) => self
                .methods
                .get(*m as usize)
                .map(Method::call_signature)
                .unwrap_or_else(|| format!("method#{m}")),
            Instruction::Callb(b) => {
                let params = vec!["object"; b.arity()].join(", ");
                format!("object [runtime]Builtins::{}({})", b.name(), params)
            }
            _ => String::new(),
        };

        if operand.is_empty() {
            instr.mnemonic().to_string()
        } else {
            format!("{:<8} {}", instr.mnemonic(), operand)
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_opcodes_are_two_bytes() {
        assert_eq!(Instruction::Ceq.encoded_size(), 2);
        assert_eq!(Instruction::Add.encoded_size(), 1);
        assert_eq!(Instruction::LdcI8(0).encoded_size(), 9);
    }

    #[test]
    fn test_stack_effect_of_call_uses_callee_params() {
        assert_eq!(Instruction::Call(0).stack_effect(|_| 3), (3, 1));
        assert_eq!(
            Instruction::Callb(Builtin::Print).stack_effect(|_| 0),
            (1, 1)
        );
    }

    #[test]
    fn test_with_target_only_changes_branches() {
        assert_eq!(Instruction::Br(1).with_target(9), Instruction::Br(9));
        assert_eq!(Instruction::Pop.with_target(9), Instruction::Pop);
    }

    #[test]
    fn test_line_lookup() {
        let method = Method {
            name: "main".to_string(),
            params: vec!["arg".to_string()],
            locals: Vec::new(),
            code: vec![
                Instruction::Nop,
                Instruction::LdcI8(1),
                Instruction::Nop,
                Instruction::Ret,
            ],
            offsets: vec![0, 1, 10, 11],
            lines: Some(vec![
                LineEntry { offset: 0, line: 1 },
                LineEntry {
                    offset: 10,
                    line: 2,
                },
            ]),
            max_stack: 1,
            is_entry: true,
        };
        assert_eq!(method.line_at(1), Some(1));
        assert_eq!(method.line_at(3), Some(2));
        assert_eq!(method.code_size(), 12);
    }
}
