//! AST to IL code generation
//!
//! Code generation doubles as the semantic pass: name resolution, arity
//! checks and loop-context checks happen while emitting, and every problem is
//! recorded as a [`Diagnostic`] instead of aborting, so one compile reports
//! all of them.
//!
//! Output is a stream of [`Item`]s per method: instructions whose branch
//! operands are label ids, label marks, and (in Debug builds) sequence
//! points. The optimizer and assembler in [`super::optimize`] turn that
//! stream into final [`Method`](super::il::Method) code.

use super::diagnostics::Diagnostic;
use super::il::Instruction;
use crate::config::BuildMode;
use crate::interpreter::builtins::Builtin;
use crate::interpreter::constants::{ARGUMENT_NAME, ENTRY_METHOD_NAME};
use crate::parser::ast::*;
use rustc_hash::FxHashMap;

/// One element of a method's emitted stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Item {
    Op(Instruction),
    /// Position of a label
    Mark(u32),
    /// Start of the statement on this source line
    Seq(usize),
}

/// Where a name lives at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Global(u16),
    Local(u16),
    Arg(u16),
}

/// Code emitted for one method, before optimization
#[derive(Debug, Clone)]
pub(crate) struct MethodBody {
    pub name: String,
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub items: Vec<Item>,
    pub is_entry: bool,
}

/// Per-method generation state
struct MethodGen {
    body: MethodBody,
    scopes: Vec<FxHashMap<String, Storage>>,
    /// (break label, continue label) of enclosing loops
    loops: Vec<(u32, u32)>,
    next_label: u32,
    temps: usize,
}

impl MethodGen {
    fn new(name: &str, params: &[String], is_entry: bool) -> Self {
        MethodGen {
            body: MethodBody {
                name: name.to_string(),
                params: params.to_vec(),
                locals: Vec::new(),
                items: Vec::new(),
                is_entry,
            },
            scopes: vec![FxHashMap::default()],
            loops: Vec::new(),
            next_label: 0,
            temps: 0,
        }
    }

    fn emit(&mut self, instr: Instruction) {
        self.body.items.push(Item::Op(instr));
    }

    fn new_label(&mut self) -> u32 {
        self.next_label += 1;
        self.next_label - 1
    }

    fn mark(&mut self, label: u32) {
        self.body.items.push(Item::Mark(label));
    }

    /// Top level of the script: `var` declares a static field here
    fn at_top_level(&self) -> bool {
        self.body.is_entry && self.scopes.len() == 1
    }

    fn add_local(&mut self, name: String) -> Option<u16> {
        let index = u16::try_from(self.body.locals.len()).ok()?;
        self.body.locals.push(name);
        Some(index)
    }

    /// Hidden local for intermediate values
    fn temp(&mut self) -> Option<u16> {
        let name = format!("$t{}", self.temps);
        self.temps += 1;
        self.add_local(name)
    }
}

/// Module-wide generation state
pub(crate) struct CodeGen {
    mode: BuildMode,
    /// Script function name → method index (0 is the entry method)
    functions: FxHashMap<String, u16>,
    pub(crate) method_params: Vec<usize>,
    pub(crate) globals: Vec<String>,
    global_index: FxHashMap<String, u16>,
    pub(crate) strings: Vec<String>,
    string_index: FxHashMap<String, u32>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl CodeGen {
    pub(crate) fn new(mode: BuildMode) -> Self {
        CodeGen {
            mode,
            functions: FxHashMap::default(),
            method_params: Vec::new(),
            globals: Vec::new(),
            global_index: FxHashMap::default(),
            strings: Vec::new(),
            string_index: FxHashMap::default(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(location, message));
    }

    /// Generate every method of the program. The entry method comes first.
    pub(crate) fn generate(&mut self, program: &Program) -> Vec<MethodBody> {
        let entry_params = vec![ARGUMENT_NAME.to_string()];
        self.method_params.push(entry_params.len());

        // Register functions first so calls may precede definitions
        let mut defined = Vec::new();
        for def in &program.functions {
            if def.name == ENTRY_METHOD_NAME {
                self.error(
                    def.location,
                    format!("'{}' is reserved for the script entry point", def.name),
                );
                continue;
            }
            if Builtin::from_name(&def.name).is_some() {
                self.error(
                    def.location,
                    format!("Function '{}' conflicts with a built-in function", def.name),
                );
                continue;
            }
            if self.functions.contains_key(&def.name) {
                self.error(
                    def.location,
                    format!("Duplicate definition of function '{}'", def.name),
                );
                continue;
            }
            if u16::try_from(def.params.len()).is_err() {
                self.error(
                    def.location,
                    format!("Too many parameters in function '{}'", def.name),
                );
                continue;
            }
            let Ok(index) = u16::try_from(self.method_params.len()) else {
                self.error(def.location, "Too many functions in one script");
                continue;
            };
            self.functions.insert(def.name.clone(), index);
            self.method_params.push(def.params.len());
            defined.push(def);
        }

        let mut methods = Vec::with_capacity(defined.len() + 1);

        let mut entry = MethodGen::new(ENTRY_METHOD_NAME, &entry_params, true);
        entry.scopes[0].insert(ARGUMENT_NAME.to_string(), Storage::Arg(0));
        self.gen_statements(&mut entry, &program.body);
        entry.emit(Instruction::LdcI8(0));
        entry.emit(Instruction::Ret);
        methods.push(entry.body);

        for def in defined {
            methods.push(self.gen_function(def));
        }

        methods
    }

    fn gen_function(&mut self, def: &FunctionDef) -> MethodBody {
        let mut m = MethodGen::new(&def.name, &def.params, false);
        // Registration rejected functions whose parameters overflow a slot
        for (slot, param) in (0..=u16::MAX).zip(&def.params) {
            if m.scopes[0].contains_key(param) {
                self.error(
                    def.location,
                    format!("Duplicate parameter '{}' in function '{}'", param, def.name),
                );
                continue;
            }
            m.scopes[0].insert(param.clone(), Storage::Arg(slot));
        }

        // Function bodies get their own scope so locals may shadow parameters
        m.scopes.push(FxHashMap::default());
        self.gen_statements(&mut m, &def.body);
        m.emit(Instruction::Ldnull);
        m.emit(Instruction::Ret);
        m.body
    }

    // ===== Statements =====

    fn gen_statements(&mut self, m: &mut MethodGen, statements: &[AstNode]) {
        let mut reported_unreachable = false;
        let mut terminated = false;

        for stmt in statements {
            if terminated && !reported_unreachable {
                self.diagnostics
                    .push(Diagnostic::warning(stmt.location(), "Unreachable code detected"));
                reported_unreachable = true;
            }
            self.gen_statement(m, stmt);
            terminated |= matches!(
                stmt,
                AstNode::Return { .. } | AstNode::Break { .. } | AstNode::Continue { .. }
            );
        }
    }

    fn gen_scoped(&mut self, m: &mut MethodGen, statements: &[AstNode]) {
        m.scopes.push(FxHashMap::default());
        self.gen_statements(m, statements);
        m.scopes.pop();
    }

    fn gen_statement(&mut self, m: &mut MethodGen, stmt: &AstNode) {
        if self.mode == BuildMode::Debug && !matches!(stmt, AstNode::Block { .. }) {
            m.body.items.push(Item::Seq(stmt.location().line));
        }

        match stmt {
            AstNode::FunctionDef(def) => {
                self.error(
                    def.location,
                    format!(
                        "Function '{}' must be defined at the top level of the script",
                        def.name
                    ),
                );
            }
            AstNode::VarDecl {
                name,
                init,
                location,
            } => self.gen_var_decl(m, name, init.as_deref(), *location),
            AstNode::Return { expr, .. } => {
                match expr {
                    Some(expr) => self.gen_expr(m, expr, true),
                    None if m.body.is_entry => m.emit(Instruction::LdcI8(0)),
                    None => m.emit(Instruction::Ldnull),
                }
                m.emit(Instruction::Ret);
            }
            AstNode::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                let else_label = m.new_label();
                self.gen_expr(m, condition, true);
                m.emit(Instruction::Brfalse(else_label));
                self.gen_scoped(m, then_branch);
                match else_branch {
                    Some(else_branch) => {
                        let end_label = m.new_label();
                        m.emit(Instruction::Br(end_label));
                        m.mark(else_label);
                        self.gen_scoped(m, else_branch);
                        m.mark(end_label);
                    }
                    None => m.mark(else_label),
                }
            }
            AstNode::While {
                condition, body, ..
            } => {
                let cond_label = m.new_label();
                let end_label = m.new_label();
                m.mark(cond_label);
                self.gen_expr(m, condition, true);
                m.emit(Instruction::Brfalse(end_label));
                self.gen_loop_body(m, body, end_label, cond_label);
                m.emit(Instruction::Br(cond_label));
                m.mark(end_label);
            }
            AstNode::DoWhile {
                body, condition, ..
            } => {
                let top_label = m.new_label();
                let cond_label = m.new_label();
                let end_label = m.new_label();
                m.mark(top_label);
                self.gen_loop_body(m, body, end_label, cond_label);
                m.mark(cond_label);
                self.gen_expr(m, condition, true);
                m.emit(Instruction::Brtrue(top_label));
                m.mark(end_label);
            }
            AstNode::For {
                init,
                condition,
                increment,
                body,
                ..
            } => {
                m.scopes.push(FxHashMap::default());
                if let Some(init) = init {
                    self.gen_statement(m, init);
                }

                let cond_label = m.new_label();
                let next_label = m.new_label();
                let end_label = m.new_label();
                m.mark(cond_label);
                if let Some(condition) = condition {
                    self.gen_expr(m, condition, true);
                    m.emit(Instruction::Brfalse(end_label));
                }
                self.gen_loop_body(m, body, end_label, next_label);
                m.mark(next_label);
                if let Some(increment) = increment {
                    self.gen_expr(m, increment, false);
                }
                m.emit(Instruction::Br(cond_label));
                m.mark(end_label);
                m.scopes.pop();
            }
            AstNode::Block { statements, .. } => self.gen_scoped(m, statements),
            AstNode::Break { location } => match m.loops.last() {
                Some(&(break_label, _)) => m.emit(Instruction::Br(break_label)),
                None => self.error(*location, "'break' can only be used inside a loop"),
            },
            AstNode::Continue { location } => match m.loops.last() {
                Some(&(_, continue_label)) => m.emit(Instruction::Br(continue_label)),
                None => self.error(*location, "'continue' can only be used inside a loop"),
            },
            AstNode::ExpressionStatement { expr, .. } => self.gen_expr(m, expr, false),
            expr => self.gen_expr(m, expr, false),
        }
    }

    fn gen_loop_body(
        &mut self,
        m: &mut MethodGen,
        body: &[AstNode],
        break_label: u32,
        continue_label: u32,
    ) {
        m.loops.push((break_label, continue_label));
        self.gen_scoped(m, body);
        m.loops.pop();
    }

    fn gen_var_decl(
        &mut self,
        m: &mut MethodGen,
        name: &str,
        init: Option<&AstNode>,
        location: SourceLocation,
    ) {
        match init {
            Some(init) => self.gen_expr(m, init, true),
            None => m.emit(Instruction::Ldnull),
        }

        let duplicate = if m.at_top_level() {
            self.global_index.contains_key(name) || name == ARGUMENT_NAME
        } else {
            m.scopes.last().is_some_and(|scope| scope.contains_key(name))
        };
        if duplicate {
            self.error(location, format!("Duplicate declaration of '{}'", name));
            m.emit(Instruction::Pop);
            return;
        }

        let storage = if m.at_top_level() {
            let Ok(index) = u16::try_from(self.globals.len()) else {
                self.error(location, "Too many global variables");
                m.emit(Instruction::Pop);
                return;
            };
            self.globals.push(name.to_string());
            self.global_index.insert(name.to_string(), index);
            Storage::Global(index)
        } else {
            match m.add_local(name.to_string()) {
                Some(index) => Storage::Local(index),
                None => {
                    self.error(location, "Too many local variables in one method");
                    m.emit(Instruction::Pop);
                    return;
                }
            }
        };

        if let Some(scope) = m.scopes.last_mut() {
            scope.insert(name.to_string(), storage);
        }
        Self::emit_store(m, storage);
    }

    // ===== Names =====

    fn lookup(&self, m: &MethodGen, name: &str) -> Option<Storage> {
        m.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
            .or_else(|| self.global_index.get(name).map(|&i| Storage::Global(i)))
    }

    fn resolve(&mut self, m: &MethodGen, name: &str, location: SourceLocation) -> Option<Storage> {
        let storage = self.lookup(m, name);
        if storage.is_none() {
            self.error(location, format!("Undefined variable '{}'", name));
        }
        storage
    }

    fn emit_load(m: &mut MethodGen, storage: Storage) {
        m.emit(match storage {
            Storage::Global(i) => Instruction::Ldsfld(i),
            Storage::Local(i) => Instruction::Ldloc(i),
            Storage::Arg(i) => Instruction::Ldarg(i),
        });
    }

    fn emit_store(m: &mut MethodGen, storage: Storage) {
        m.emit(match storage {
            Storage::Global(i) => Instruction::Stsfld(i),
            Storage::Local(i) => Instruction::Stloc(i),
            Storage::Arg(i) => Instruction::Starg(i),
        });
    }

    fn temp(&mut self, m: &mut MethodGen, location: SourceLocation) -> u16 {
        m.temp().unwrap_or_else(|| {
            self.error(location, "Too many local variables in one method");
            0
        })
    }

    fn intern(&mut self, text: &str) -> u32 {
        if let Some(&index) = self.string_index.get(text) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(text.to_string());
        self.string_index.insert(text.to_string(), index);
        index
    }

    // ===== Expressions =====

    /// Emit `expr`. With `want` the value is left on the stack, otherwise
    /// nothing is.
    fn gen_expr(&mut self, m: &mut MethodGen, expr: &AstNode, want: bool) {
        match expr {
            AstNode::Assignment { lhs, rhs, location } => {
                self.gen_assignment(m, lhs, rhs, *location, want);
                return;
            }
            AstNode::CompoundAssignment {
                lhs,
                op,
                rhs,
                location,
            } => {
                self.gen_update(m, lhs, binary_instruction(*op), Some(rhs), false, *location, want);
                return;
            }
            AstNode::UnaryOp {
                op: op @ (UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec),
                operand,
                location,
            } => {
                let instr = match op {
                    UnOp::PreInc | UnOp::PostInc => Instruction::Add,
                    _ => Instruction::Sub,
                };
                let postfix = matches!(op, UnOp::PostInc | UnOp::PostDec);
                self.gen_update(m, operand, instr, None, postfix, *location, want);
                return;
            }
            AstNode::FunctionCall {
                name,
                args,
                location,
            } => {
                self.gen_call(m, name, args, *location);
            }
            AstNode::IntLiteral(n, _) => m.emit(Instruction::LdcI8(*n)),
            AstNode::StringLiteral(s, _) => {
                let index = self.intern(s);
                m.emit(Instruction::Ldstr(index));
            }
            AstNode::Null { .. } => m.emit(Instruction::Ldnull),
            AstNode::Variable(name, location) => match self.resolve(m, name, *location) {
                Some(storage) => Self::emit_load(m, storage),
                None => m.emit(Instruction::Ldnull),
            },
            AstNode::BinaryOp {
                op: op @ (BinOp::And | BinOp::Or),
                left,
                right,
                ..
            } => self.gen_short_circuit(m, *op, left, right),
            AstNode::BinaryOp {
                op, left, right, ..
            } => {
                self.gen_expr(m, left, true);
                self.gen_expr(m, right, true);
                m.emit(binary_instruction(*op));
            }
            AstNode::UnaryOp { op, operand, .. } => {
                self.gen_expr(m, operand, true);
                match op {
                    UnOp::Neg => m.emit(Instruction::Neg),
                    UnOp::BitNot => m.emit(Instruction::Not),
                    // Logical not: compare against zero
                    _ => {
                        m.emit(Instruction::LdcI8(0));
                        m.emit(Instruction::Ceq);
                    }
                }
            }
            AstNode::TernaryOp {
                condition,
                true_expr,
                false_expr,
                ..
            } => {
                let else_label = m.new_label();
                let end_label = m.new_label();
                self.gen_expr(m, condition, true);
                m.emit(Instruction::Brfalse(else_label));
                self.gen_expr(m, true_expr, want);
                m.emit(Instruction::Br(end_label));
                m.mark(else_label);
                self.gen_expr(m, false_expr, want);
                m.mark(end_label);
                return;
            }
            AstNode::Index { target, index, .. } => {
                self.gen_expr(m, target, true);
                self.gen_expr(m, index, true);
                m.emit(Instruction::Ldelem);
            }
            other => {
                // Statements never reach here through the parser
                self.error(other.location(), "Expected an expression");
                m.emit(Instruction::Ldnull);
            }
        }

        if !want {
            m.emit(Instruction::Pop);
        }
    }

    fn gen_short_circuit(&mut self, m: &mut MethodGen, op: BinOp, left: &AstNode, right: &AstNode) {
        // For `&&` a false operand decides; for `||` a true one does
        let (decided_value, branch) = match op {
            BinOp::And => (0, Instruction::Brfalse(0)),
            _ => (1, Instruction::Brtrue(0)),
        };
        let decided = m.new_label();
        let end = m.new_label();

        self.gen_expr(m, left, true);
        m.emit(branch.with_target(decided));
        self.gen_expr(m, right, true);
        m.emit(branch.with_target(decided));
        m.emit(Instruction::LdcI8(1 - decided_value));
        m.emit(Instruction::Br(end));
        m.mark(decided);
        m.emit(Instruction::LdcI8(decided_value));
        m.mark(end);
    }

    fn gen_call(&mut self, m: &mut MethodGen, name: &str, args: &[AstNode], location: SourceLocation) {
        let check_arity = |this: &mut Self, expected: usize| {
            if args.len() != expected {
                this.error(
                    location,
                    format!(
                        "Function '{}' expects {} argument(s), got {}",
                        name,
                        expected,
                        args.len()
                    ),
                );
                false
            } else {
                true
            }
        };

        for arg in args {
            self.gen_expr(m, arg, true);
        }

        if name == ENTRY_METHOD_NAME {
            self.error(location, "The script entry point cannot be called");
        } else if let Some(&index) = self.functions.get(name) {
            let expected = self.method_params[index as usize];
            if check_arity(self, expected) {
                m.emit(Instruction::Call(index));
                return;
            }
        } else if let Some(builtin) = Builtin::from_name(name) {
            if check_arity(self, builtin.arity()) {
                m.emit(Instruction::Callb(builtin));
                return;
            }
        } else {
            self.error(location, format!("Undefined function '{}'", name));
        }

        // Keep the stack shape valid after an error
        for _ in args {
            m.emit(Instruction::Pop);
        }
        m.emit(Instruction::Ldnull);
    }

    fn gen_assignment(
        &mut self,
        m: &mut MethodGen,
        lhs: &AstNode,
        rhs: &AstNode,
        location: SourceLocation,
        want: bool,
    ) {
        match lhs {
            AstNode::Variable(name, var_location) => {
                self.gen_expr(m, rhs, true);
                if want {
                    m.emit(Instruction::Dup);
                }
                match self.resolve(m, name, *var_location) {
                    Some(storage) => Self::emit_store(m, storage),
                    None => m.emit(Instruction::Pop),
                }
            }
            AstNode::Index { target, index, .. } => {
                self.gen_expr(m, target, true);
                self.gen_expr(m, index, true);
                self.gen_expr(m, rhs, true);
                if want {
                    let keep = self.temp(m, location);
                    m.emit(Instruction::Dup);
                    m.emit(Instruction::Stloc(keep));
                    m.emit(Instruction::Stelem);
                    m.emit(Instruction::Ldloc(keep));
                } else {
                    m.emit(Instruction::Stelem);
                }
            }
            other => {
                self.error(other.location(), "Left side of assignment must be assignable");
                if want {
                    m.emit(Instruction::Ldnull);
                }
            }
        }
    }

    /// Read-modify-write of a variable or element: compound assignment and
    /// increment/decrement. `rhs` of `None` means the constant 1.
    #[allow(clippy::too_many_arguments)]
    fn gen_update(
        &mut self,
        m: &mut MethodGen,
        target: &AstNode,
        op: Instruction,
        rhs: Option<&AstNode>,
        postfix: bool,
        location: SourceLocation,
        want: bool,
    ) {
        let emit_rhs = |this: &mut Self, m: &mut MethodGen| match rhs {
            Some(rhs) => this.gen_expr(m, rhs, true),
            None => m.emit(Instruction::LdcI8(1)),
        };

        match target {
            AstNode::Variable(name, var_location) => {
                let Some(storage) = self.resolve(m, name, *var_location) else {
                    if want {
                        m.emit(Instruction::Ldnull);
                    }
                    return;
                };
                Self::emit_load(m, storage);
                if want && postfix {
                    m.emit(Instruction::Dup);
                }
                emit_rhs(self, m);
                m.emit(op);
                if want && !postfix {
                    m.emit(Instruction::Dup);
                }
                Self::emit_store(m, storage);
            }
            AstNode::Index { target, index, .. } => {
                let array = self.temp(m, location);
                let slot = self.temp(m, location);
                self.gen_expr(m, target, true);
                m.emit(Instruction::Stloc(array));
                self.gen_expr(m, index, true);
                m.emit(Instruction::Stloc(slot));

                m.emit(Instruction::Ldloc(array));
                m.emit(Instruction::Ldloc(slot));
                m.emit(Instruction::Ldloc(array));
                m.emit(Instruction::Ldloc(slot));
                m.emit(Instruction::Ldelem);

                let keep = want.then(|| self.temp(m, location));
                if let (Some(keep), true) = (keep, postfix) {
                    m.emit(Instruction::Dup);
                    m.emit(Instruction::Stloc(keep));
                }
                emit_rhs(self, m);
                m.emit(op);
                if let (Some(keep), false) = (keep, postfix) {
                    m.emit(Instruction::Dup);
                    m.emit(Instruction::Stloc(keep));
                }
                m.emit(Instruction::Stelem);
                if let Some(keep) = keep {
                    m.emit(Instruction::Ldloc(keep));
                }
            }
            other => {
                self.error(other.location(), "Operand must be a variable or array element");
                if want {
                    m.emit(Instruction::Ldnull);
                }
            }
        }
    }
}

/// IL opcode for a non-short-circuit binary operator
fn binary_instruction(op: BinOp) -> Instruction {
    match op {
        BinOp::Add => Instruction::Add,
        BinOp::Sub => Instruction::Sub,
        BinOp::Mul => Instruction::Mul,
        BinOp::Div => Instruction::Div,
        BinOp::Mod => Instruction::Rem,
        BinOp::Eq => Instruction::Ceq,
        BinOp::Ne => Instruction::Cne,
        BinOp::Lt => Instruction::Clt,
        BinOp::Le => Instruction::Cle,
        BinOp::Gt => Instruction::Cgt,
        BinOp::Ge => Instruction::Cge,
        BinOp::BitAnd | BinOp::And => Instruction::And,
        BinOp::BitOr | BinOp::Or => Instruction::Or,
        BinOp::BitXor => Instruction::Xor,
        BinOp::BitShl => Instruction::Shl,
        BinOp::BitShr => Instruction::Shr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn generate(source: &str, mode: BuildMode) -> (Vec<MethodBody>, CodeGen) {
        let program = Parser::new(source).unwrap().parse_program().unwrap();
        let mut gen = CodeGen::new(mode);
        let methods = gen.generate(&program);
        (methods, gen)
    }

    fn errors(source: &str) -> Vec<String> {
        let (_, gen) = generate(source, BuildMode::Debug);
        gen.diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| d.message.clone())
            .collect()
    }

    fn ops(body: &MethodBody) -> Vec<Instruction> {
        body.items
            .iter()
            .filter_map(|item| match item {
                Item::Op(instr) => Some(*instr),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_top_level_vars_are_globals() {
        let (methods, gen) = generate("var x = 1; { var y = 2; }", BuildMode::Release);
        assert_eq!(gen.globals, vec!["x".to_string()]);
        assert_eq!(methods[0].locals, vec!["y".to_string()]);
        assert!(ops(&methods[0]).contains(&Instruction::Stsfld(0)));
        assert!(ops(&methods[0]).contains(&Instruction::Stloc(0)));
    }

    #[test]
    fn test_debug_emits_sequence_points() {
        let (methods, _) = generate("var x = 1;\nreturn x;", BuildMode::Debug);
        let seqs: Vec<usize> = methods[0]
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Seq(line) => Some(*line),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_expression_statement_leaves_nothing() {
        let (methods, _) = generate("var x = 0; x = 5;", BuildMode::Release);
        assert_eq!(
            ops(&methods[0]),
            vec![
                Instruction::LdcI8(0),
                Instruction::Stsfld(0),
                Instruction::LdcI8(5),
                Instruction::Stsfld(0),
                Instruction::LdcI8(0),
                Instruction::Ret,
            ]
        );
    }

    #[test]
    fn test_postfix_increment_keeps_old_value() {
        let (methods, _) = generate("var i = 0; return i++;", BuildMode::Release);
        let code = ops(&methods[0]);
        assert_eq!(
            &code[2..7],
            &[
                Instruction::Ldsfld(0),
                Instruction::Dup,
                Instruction::LdcI8(1),
                Instruction::Add,
                Instruction::Stsfld(0),
            ]
        );
    }

    #[test]
    fn test_arg_not_visible_in_functions() {
        assert_eq!(
            errors("func f() { return arg; }"),
            vec!["Undefined variable 'arg'".to_string()]
        );
    }

    #[test]
    fn test_all_semantic_errors_are_collected() {
        let errs = errors("break;\nreturn g(1) + y;\nfunc f(a) { }\nf();");
        assert_eq!(errs.len(), 4, "{errs:?}");
        assert!(errs[0].contains("'break'"));
        assert!(errs.iter().any(|e| e == "Undefined function 'g'"));
        assert!(errs.iter().any(|e| e == "Undefined variable 'y'"));
        assert!(errs.iter().any(|e| e.contains("expects 1 argument(s), got 0")));
    }

    #[test]
    fn test_duplicates() {
        assert_eq!(errors("var x; var x;").len(), 1);
        assert_eq!(errors("var arg;").len(), 1);
        assert_eq!(errors("func f() {} func f() {}").len(), 1);
        assert_eq!(errors("func f(a, a) {}").len(), 1);
        // Shadowing in an inner scope is fine
        assert!(errors("var x; { var x; }").is_empty());
    }

    #[test]
    fn test_reserved_and_builtin_names() {
        assert_eq!(errors("func main() {}").len(), 1);
        assert_eq!(errors("main(\"\");").len(), 1);
        assert_eq!(errors("func print(x) {}").len(), 1);
    }

    #[test]
    fn test_nested_function_rejected() {
        let errs = errors("if (1) { func inner() {} }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("top level"));
    }

    #[test]
    fn test_unreachable_warning() {
        let (_, gen) = generate("return 1;\nprint(2);", BuildMode::Debug);
        assert_eq!(gen.diagnostics.len(), 1);
        assert!(!gen.diagnostics[0].is_error());
        assert_eq!(gen.diagnostics[0].line, 2);
    }

    #[test]
    fn test_functions_see_later_globals() {
        assert!(errors("func f() { return total; }\nvar total = 1;").is_empty());
    }

    #[test]
    fn test_string_literals_are_interned() {
        let (_, gen) = generate("print(\"a\"); print(\"a\"); print(\"b\");", BuildMode::Debug);
        assert_eq!(gen.strings, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_global_slots_do_not_wrap() {
        let source: String = (0..70_000).map(|i| format!("var g{i} = 0;\n")).collect();
        let (_, gen) = generate(&source, BuildMode::Release);
        assert_eq!(gen.globals.len(), usize::from(u16::MAX) + 1);
        let errors: Vec<_> = gen.diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 70_000 - (usize::from(u16::MAX) + 1));
        assert!(errors.iter().all(|d| d.message == "Too many global variables"));
    }

    #[test]
    fn test_method_indices_do_not_wrap() {
        let source: String = (0..66_000).map(|i| format!("func f{i}() {{ }}\n")).collect();
        let errors = errors(&source);
        // Index 0 belongs to the entry method
        assert_eq!(errors.len(), 66_000 - usize::from(u16::MAX));
        assert!(errors.iter().all(|m| m == "Too many functions in one script"));
    }
}
