//! Code generation: a structural walk of the optimized typed AST.
//!
//! Forward jumps are emitted short-first with a reserved hole; the
//! patcher writes `target − hole − operand_size` once the target is
//! known, and promotes a short jump to its long variant when the
//! distance outgrows one byte. Promotion inserts a byte and shifts
//! later offsets, which is the only place already-emitted code moves;
//! all position bookkeeping (pending holes, loop headers) is relocated
//! through one choke point.

use crate::chunk::{Chunk, Constant, FunctionProto, UpvalueDesc};
use crate::compiler::allocator::RegisterAllocator;
use crate::compiler::ast::*;
use crate::compiler::scope::{resolve, Local, LoopCtx, LoopPatches, Scope, ScopeKind};
use crate::consts::{FRAME_BASE, SHORT_JUMP_MAX, SMART_TYPED_THRESHOLD};
use crate::diagnostic::{codes, Diagnostic, DiagnosticKind, SourceLoc};

use orus_asm::Opcode;

use std::collections::HashMap;
use std::rc::Rc;

/// One unresolved forward jump.
#[derive(Debug, Clone, Copy)]
struct Patch {
    /// Offset of the opcode byte.
    op_at: usize,
    /// Offset of the first reserved offset byte.
    hole: usize,
    /// Whether the hole is currently one byte.
    short: bool,
    done: bool,
}

/// An expression result: which register holds it, and whether the
/// register is a temp the consumer must free.
#[derive(Debug, Clone, Copy)]
struct Slot {
    id: u8,
    temp: bool,
}

impl Slot {
    const fn temp(id: u8) -> Self {
        Self { id, temp: true }
    }

    const fn home(id: u8) -> Self {
        Self { id, temp: false }
    }
}

/// Emits a whole module.
pub(super) fn generate(module: &TypedModule, diagnostics: &mut Vec<Diagnostic>) -> Chunk {
    let mut globals = HashMap::new();

    let mut root = CodeGen {
        chunk: Chunk::new(module.name.clone(), module.file.clone()),
        alloc: RegisterAllocator::new(),
        scopes: vec![Scope::new(ScopeKind::Function)],
        patches: Vec::new(),
        upvalues: Vec::new(),
        enclosing_locals: Vec::new(),
        enclosing_upvalues: Vec::new(),
        globals: &mut globals,
        diagnostics,
        file: module.file.clone(),
        cur_loc: SourceLoc::default(),
        at_module_level: true,
        typed_ctx: false,
    };

    for stmt in &module.stmts {
        root.stmt(stmt);
    }
    root.emit_op(Opcode::Halt);
    root.check_patches_resolved();

    let mut chunk = root.chunk;
    chunk.frame_used = root.alloc.frame_used();
    chunk
}

struct CodeGen<'d> {
    chunk: Chunk,
    alloc: RegisterAllocator,
    scopes: Vec<Scope>,
    patches: Vec<Patch>,
    /// This function's captures: name plus descriptor.
    upvalues: Vec<(Rc<str>, UpvalueDesc)>,
    /// Frame locals visible in the enclosing function, for capture.
    enclosing_locals: Vec<(Rc<str>, u8)>,
    /// Upvalue names of the enclosing function, for re-capture.
    enclosing_upvalues: Vec<Rc<str>>,
    /// Module-level bindings: name to (global index, mutable, kind).
    globals: &'d mut HashMap<Rc<str>, (u8, bool, Kind)>,
    diagnostics: &'d mut Vec<Diagnostic>,
    file: Rc<str>,
    cur_loc: SourceLoc,
    at_module_level: bool,
    /// Whether numeric arithmetic in the current statement goes
    /// through the typed shadow banks.
    typed_ctx: bool,
}

impl CodeGen<'_> {
    /* DIAGNOSTICS */

    fn error(&mut self, kind: DiagnosticKind, code: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(
            kind,
            code,
            message,
            self.file.clone(),
            self.cur_loc,
        ));
    }

    /* RAW EMISSION */

    fn at(&self) -> usize {
        self.chunk.len()
    }

    fn emit_op(&mut self, op: Opcode) {
        self.chunk.push(op as u8, self.cur_loc);
    }

    fn emit_byte(&mut self, byte: u8) {
        self.chunk.push(byte, self.cur_loc);
    }

    fn emit_u16(&mut self, value: u16) {
        let [hi, lo] = value.to_be_bytes();
        self.chunk.push(hi, self.cur_loc);
        self.chunk.push(lo, self.cur_loc);
    }

    fn add_constant(&mut self, constant: Constant) -> u16 {
        match self.chunk.add_constant(constant) {
            Ok(index) => index,
            Err(_) => {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::CONST_POOL_FULL,
                    "constant pool limit reached",
                );
                0
            }
        }
    }

    /* FORWARD JUMPS */

    /// Emits a short-variant forward jump with a one-byte hole.
    ///
    /// Only jumps whose hole can never sit inside an already-patched
    /// span may start short: promotion shifts everything after the
    /// hole, and a completed jump straddling it would need its encoded
    /// distance rewritten. The then-skip of an `if` is the one shape
    /// with that guarantee (nested spans complete strictly inside the
    /// branch); every other forward jump takes the two-byte form from
    /// the start.
    fn emit_forward(&mut self, short_op: Opcode, reg: Option<u8>) -> usize {
        let op_at = self.at();
        self.emit_op(short_op);
        if let Some(reg) = reg {
            self.emit_byte(reg);
        }

        let hole = self.at();
        self.emit_byte(0xff);

        self.patches.push(Patch {
            op_at,
            hole,
            short: true,
            done: false,
        });
        self.patches.len() - 1
    }

    /// Emits a two-byte-offset forward jump.
    fn emit_forward_long(&mut self, op: Opcode, reg: Option<u8>) -> usize {
        let op_at = self.at();
        self.emit_op(op);
        if let Some(reg) = reg {
            self.emit_byte(reg);
        }

        let hole = self.at();
        self.emit_u16(0xffff);

        self.patches.push(Patch {
            op_at,
            hole,
            short: false,
            done: false,
        });
        self.patches.len() - 1
    }

    /// Resolves a forward jump to the current position.
    fn patch_forward(&mut self, index: usize) {
        let target = self.at();
        let patch = self.patches[index];
        let mut distance = target - patch.hole - if patch.short { 1 } else { 2 };

        if patch.short && distance > SHORT_JUMP_MAX {
            // Promote to the long variant: rewrite the opcode, widen
            // the hole by one byte, and shift every tracked position
            // past the insertion. The widened hole itself keeps its
            // position; relocation only applies to the code after it.
            let short_op = self.chunk.get(patch.op_at);
            let long_op = Opcode::from_repr(short_op)
                .and_then(Opcode::promoted)
                .unwrap_or(Opcode::Jump);

            self.chunk.set(patch.op_at, long_op as u8);
            self.chunk.insert(patch.hole, 0);
            self.relocate(patch.hole);

            self.patches[index] = Patch {
                op_at: patch.op_at,
                hole: patch.hole,
                short: false,
                done: false,
            };
            distance = (target + 1) - patch.hole - 2;

            tracing::debug!(at = patch.op_at, distance, "short jump promoted");
        }

        let patch = self.patches[index];
        if patch.short {
            self.chunk.set(patch.hole, distance as u8);
        } else {
            if distance > u16::MAX as usize {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::JUMP_TOO_FAR,
                    format!("jump distance {distance} exceeds the 16-bit encoding"),
                );
            }
            let [hi, lo] = (distance as u16).to_be_bytes();
            self.chunk.set(patch.hole, hi);
            self.chunk.set(patch.hole + 1, lo);
        }

        self.patches[index].done = true;
    }

    /// Shifts every tracked position past a one-byte insertion.
    fn relocate(&mut self, inserted_at: usize) {
        for patch in &mut self.patches {
            if patch.done {
                continue;
            }
            if patch.op_at >= inserted_at {
                patch.op_at += 1;
            }
            if patch.hole >= inserted_at {
                patch.hole += 1;
            }
        }

        for scope in &mut self.scopes {
            if let ScopeKind::Loop(ctx) = &mut scope.kind {
                if ctx.header >= inserted_at {
                    ctx.header += 1;
                }
                if let Some(target) = &mut ctx.continue_target {
                    if *target >= inserted_at {
                        *target += 1;
                    }
                }
            }
        }
    }

    fn check_patches_resolved(&mut self) {
        if self.patches.iter().any(|patch| !patch.done) {
            self.error(
                DiagnosticKind::Semantic,
                codes::JUMP_TOO_FAR,
                "internal: unresolved forward jump",
            );
        }
    }

    /* BACKWARD JUMPS */

    /// Emits a backward jump to a known header, choosing the short
    /// variant when the distance fits.
    fn emit_loop_to(&mut self, header: usize) {
        let short_distance = self.at() + 2 - header;

        if short_distance <= SHORT_JUMP_MAX {
            self.emit_op(Opcode::LoopShort);
            self.emit_byte(short_distance as u8);
            return;
        }

        let distance = self.at() + 3 - header;
        if distance > u16::MAX as usize {
            self.error(
                DiagnosticKind::Semantic,
                codes::JUMP_TOO_FAR,
                format!("loop distance {distance} exceeds the 16-bit encoding"),
            );
        }
        self.emit_op(Opcode::Loop);
        self.emit_u16(distance as u16);
    }

    /// Backward jump that always takes the two-byte-offset form.
    /// Induction-loop edges use it so the peephole fusion can replace
    /// `inc; loop` with the equal-sized fused instruction in place.
    fn emit_loop_wide_to(&mut self, header: usize) {
        let distance = self.at() + 3 - header;
        if distance > u16::MAX as usize {
            self.error(
                DiagnosticKind::Semantic,
                codes::JUMP_TOO_FAR,
                format!("loop distance {distance} exceeds the 16-bit encoding"),
            );
        }
        self.emit_op(Opcode::Loop);
        self.emit_u16(distance as u16);
    }

    /* SCOPES */

    fn push_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
        self.alloc.enter_scope();
    }

    fn pop_scope(&mut self) -> Scope {
        let scope = self.scopes.pop().unwrap_or_else(|| Scope::new(ScopeKind::Block));
        for local in &scope.locals {
            self.alloc.free(local.reg);
        }
        self.alloc.exit_scope();
        scope
    }

    fn declare_local(&mut self, name: Rc<str>, reg: u8, mutable: bool, kind: Kind) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.locals.push(Local {
                name,
                reg,
                mutable,
                kind,
            });
        }
    }

    fn free_slot(&mut self, slot: Slot) {
        if slot.temp {
            self.alloc.free(slot.id);
        }
    }

    fn alloc_temp_or_error(&mut self) -> u8 {
        match self.alloc.alloc_temp() {
            Some(id) => {
                if !self.alloc.take_displaced().is_empty() {
                    self.error(
                        DiagnosticKind::Semantic,
                        codes::REGISTER_PRESSURE,
                        "expression needs more temporaries than the temp band holds",
                    );
                }
                id
            }
            None => {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::REGISTER_PRESSURE,
                    "temp band exhausted",
                );
                0
            }
        }
    }

    /* EXPRESSIONS */

    fn expr(&mut self, expr: &Expr) -> Option<Slot> {
        self.cur_loc = expr.loc;

        match &expr.node {
            ExprNode::Literal(lit) => self.literal(lit, expr.kind),
            ExprNode::Var(name) => self.variable(name.clone()),
            ExprNode::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs),
            ExprNode::Unary { op, operand } => self.unary(expr, *op, operand),
            ExprNode::Cast(operand) => self.cast(operand, expr.kind),
            ExprNode::Call { callee, args } => self.call(callee, args),
            ExprNode::Builtin { name, args } => self.builtin(name, args),
            ExprNode::Index { array, index } => {
                let array = self.expr(array)?;
                let index = self.expr(index)?;
                let dst = self.alloc_temp_or_error();
                self.emit_op(Opcode::ArrayGet);
                self.emit_byte(dst);
                self.emit_byte(array.id);
                self.emit_byte(index.id);
                self.free_slot(array);
                self.free_slot(index);
                Some(Slot::temp(dst))
            }
            ExprNode::ArrayLit(items) => self.aggregate(Opcode::MakeArray, items),
            ExprNode::StructLit(fields) => self.aggregate(Opcode::MakeStruct, fields),
            ExprNode::EnumLit { variant, payload } => self.enum_lit(*variant, payload),
            ExprNode::Field { object, index } => {
                let object = self.expr(object)?;
                let dst = self.alloc_temp_or_error();
                self.emit_op(Opcode::StructGet);
                self.emit_byte(dst);
                self.emit_byte(object.id);
                self.emit_byte(*index as u8);
                self.free_slot(object);
                Some(Slot::temp(dst))
            }
            ExprNode::TagOf(object) => {
                let object = self.expr(object)?;
                let dst = self.alloc_temp_or_error();
                self.emit_op(Opcode::EnumTag);
                self.emit_byte(dst);
                self.emit_byte(object.id);
                self.free_slot(object);
                Some(Slot::temp(dst))
            }
            ExprNode::PayloadOf { object, index } => {
                let object = self.expr(object)?;
                let dst = self.alloc_temp_or_error();
                self.emit_op(Opcode::EnumPayload);
                self.emit_byte(dst);
                self.emit_byte(object.id);
                self.emit_byte(*index as u8);
                self.free_slot(object);
                Some(Slot::temp(dst))
            }
            ExprNode::Range { start, end } => {
                let start = self.expr(start)?;
                let end = self.expr(end)?;
                let dst = self.alloc_temp_or_error();
                self.emit_op(Opcode::MakeRange);
                self.emit_byte(dst);
                self.emit_byte(start.id);
                self.emit_byte(end.id);
                self.free_slot(start);
                self.free_slot(end);
                Some(Slot::temp(dst))
            }
        }
    }

    /// Compiles an expression directly into a destination register,
    /// moving only when the value landed elsewhere.
    fn expr_into(&mut self, expr: &Expr, dst: u8) -> Option<()> {
        let slot = self.expr(expr)?;

        if slot.id != dst {
            self.emit_op(Opcode::Move);
            self.emit_byte(dst);
            self.emit_byte(slot.id);
        }

        self.free_slot(slot);
        Some(())
    }

    fn literal(&mut self, lit: &Lit, kind: Kind) -> Option<Slot> {
        let dst = self.alloc_temp_or_error();

        match lit {
            Lit::Nil => {
                self.emit_op(Opcode::LoadNil);
                self.emit_byte(dst);
            }
            Lit::Bool(true) => {
                self.emit_op(Opcode::LoadTrue);
                self.emit_byte(dst);
            }
            Lit::Bool(false) => {
                self.emit_op(Opcode::LoadFalse);
                self.emit_byte(dst);
            }
            other => {
                let constant = match other {
                    Lit::I32(v) => Constant::I32(*v),
                    Lit::I64(v) => Constant::I64(*v),
                    Lit::U32(v) => Constant::U32(*v),
                    Lit::U64(v) => Constant::U64(*v),
                    Lit::F64(v) => Constant::F64(*v),
                    Lit::Str(s) => Constant::Str(s.clone()),
                    Lit::Nil | Lit::Bool(_) => unreachable!(),
                };

                let index = self.add_constant(constant);
                let op = if self.typed_ctx && kind.is_numeric() {
                    Opcode::LoadConstTyped
                } else {
                    Opcode::LoadConst
                };
                self.emit_op(op);
                self.emit_byte(dst);
                self.emit_u16(index);
            }
        }

        Some(Slot::temp(dst))
    }

    fn variable(&mut self, name: Rc<str>) -> Option<Slot> {
        if let Some(local) = resolve(&self.scopes, &name) {
            return Some(Slot::home(local.reg));
        }

        if let Some(slot) = self.resolve_capture(&name) {
            let dst = self.alloc_temp_or_error();
            self.emit_op(Opcode::GetUpvalue);
            self.emit_byte(dst);
            self.emit_byte(slot);
            return Some(Slot::temp(dst));
        }

        if let Some((index, _, _)) = self.globals.get(&name).copied() {
            let dst = self.alloc_temp_or_error();
            self.emit_op(Opcode::LoadGlobal);
            self.emit_byte(dst);
            self.emit_byte(index);
            return Some(Slot::temp(dst));
        }

        self.error(
            DiagnosticKind::Semantic,
            codes::UNDEFINED_VARIABLE,
            format!("undefined variable `{name}`"),
        );
        None
    }

    /// Capture search: this function's upvalues, then the enclosing
    /// frame's locals, then the enclosing function's own upvalues.
    fn resolve_capture(&mut self, name: &str) -> Option<u8> {
        if self.at_module_level {
            return None;
        }

        if let Some(index) = self.upvalues.iter().position(|(n, _)| &**n == name) {
            return Some(index as u8);
        }

        if let Some((_, slot)) = self
            .enclosing_locals
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
        {
            let desc = UpvalueDesc::FromFrame(*slot);
            self.upvalues.push((Rc::from(name), desc));
            return Some((self.upvalues.len() - 1) as u8);
        }

        if let Some(index) = self
            .enclosing_upvalues
            .iter()
            .position(|n| &**n == name)
        {
            let desc = UpvalueDesc::FromEnclosing(index as u8);
            self.upvalues.push((Rc::from(name), desc));
            return Some((self.upvalues.len() - 1) as u8);
        }

        None
    }

    fn binary(&mut self, whole: &Expr, op: BinOp, lhs: &Expr, rhs: &Expr) -> Option<Slot> {
        let operand_kind = lhs.kind;

        let opcode = match op {
            BinOp::Add if operand_kind == Kind::Str => Some(Opcode::Concat),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                arith_opcode(operand_kind, op, self.typed_ctx && whole.kind.is_numeric())
            }
            BinOp::Eq => Some(Opcode::Eq),
            BinOp::Ne => Some(Opcode::Ne),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => cmp_opcode(operand_kind, op),
            BinOp::And => Some(Opcode::AndBool),
            BinOp::Or => Some(Opcode::OrBool),
            BinOp::BitAnd => Some(Opcode::And32),
            BinOp::BitOr => Some(Opcode::Or32),
            BinOp::BitXor => Some(Opcode::Xor32),
            BinOp::Shl => Some(Opcode::Shl32),
            BinOp::Shr => Some(Opcode::Shr32),
        };

        let Some(opcode) = opcode else {
            self.error(
                DiagnosticKind::Semantic,
                codes::TYPE_MISMATCH,
                format!("operator {op:?} is not defined for {operand_kind:?}"),
            );
            return None;
        };

        let lhs = self.expr(lhs)?;
        let rhs = self.expr(rhs)?;
        let dst = self.alloc_temp_or_error();

        self.cur_loc = whole.loc;
        self.emit_op(opcode);
        self.emit_byte(dst);
        self.emit_byte(lhs.id);
        self.emit_byte(rhs.id);

        self.free_slot(lhs);
        self.free_slot(rhs);
        Some(Slot::temp(dst))
    }

    fn unary(&mut self, whole: &Expr, op: UnOp, operand: &Expr) -> Option<Slot> {
        let operand = self.expr(operand)?;
        let dst = self.alloc_temp_or_error();

        self.cur_loc = whole.loc;
        let opcode = match op {
            UnOp::Neg => Opcode::Neg,
            UnOp::Not => Opcode::NotBool,
            UnOp::BitNot => Opcode::Not32,
        };
        self.emit_op(opcode);
        self.emit_byte(dst);
        self.emit_byte(operand.id);

        self.free_slot(operand);
        Some(Slot::temp(dst))
    }

    fn cast(&mut self, operand: &Expr, to: Kind) -> Option<Slot> {
        let from = operand.kind;
        let operand = self.expr(operand)?;

        if from == to {
            return Some(operand);
        }

        let Some(opcode) = cast_opcode(from, to) else {
            self.error(
                DiagnosticKind::Semantic,
                codes::TYPE_MISMATCH,
                format!("no conversion from {from:?} to {to:?}; convert in two steps"),
            );
            self.free_slot(operand);
            return None;
        };

        let dst = self.alloc_temp_or_error();
        self.emit_op(opcode);
        self.emit_byte(dst);
        self.emit_byte(operand.id);

        self.free_slot(operand);
        Some(Slot::temp(dst))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Option<Slot> {
        let callee = self.expr(callee)?;
        let (first, count) = self.argument_window(args)?;

        let result = self.alloc_temp_or_error();
        self.emit_op(Opcode::Call);
        self.emit_byte(callee.id);
        self.emit_byte(first);
        self.emit_byte(count);
        self.emit_byte(result);

        self.free_slot(callee);
        self.free_argument_window(first, count);
        Some(Slot::temp(result))
    }

    fn builtin(&mut self, name: &str, args: &[Expr]) -> Option<Slot> {
        // Ids follow the VM's default registration order.
        let native = match name {
            "read_line" => 0u8,
            "timestamp" => 1,
            _ => {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::UNDEFINED_VARIABLE,
                    format!("unknown builtin `{name}`"),
                );
                return None;
            }
        };

        let (first, count) = self.argument_window(args)?;

        let result = self.alloc_temp_or_error();
        self.emit_op(Opcode::CallNative);
        self.emit_byte(native);
        self.emit_byte(first);
        self.emit_byte(count);
        self.emit_byte(result);

        self.free_argument_window(first, count);
        Some(Slot::temp(result))
    }

    /// Allocates `args.len()` consecutive temps and compiles each
    /// argument into its slot, in order.
    fn argument_window(&mut self, args: &[Expr]) -> Option<(u8, u8)> {
        if args.is_empty() {
            return Some((0, 0));
        }

        let first = match self.alloc.alloc_consecutive_temps(args.len()) {
            Some(first) => first,
            None => {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::REGISTER_PRESSURE,
                    format!("no room for {} consecutive argument registers", args.len()),
                );
                return None;
            }
        };

        for (offset, arg) in args.iter().enumerate() {
            self.expr_into(arg, first + offset as u8)?;
        }

        Some((first, args.len() as u8))
    }

    fn free_argument_window(&mut self, first: u8, count: u8) {
        for offset in 0..count {
            self.alloc.free(first + offset);
        }
    }

    fn aggregate(&mut self, opcode: Opcode, items: &[Expr]) -> Option<Slot> {
        let (first, count) = self.argument_window(items)?;

        let dst = self.alloc_temp_or_error();
        self.emit_op(opcode);
        self.emit_byte(dst);
        self.emit_byte(first);
        self.emit_byte(count);

        self.free_argument_window(first, count);
        Some(Slot::temp(dst))
    }

    fn enum_lit(&mut self, variant: u32, payload: &[Expr]) -> Option<Slot> {
        if variant > u8::MAX as u32 {
            self.error(
                DiagnosticKind::Semantic,
                codes::TYPE_MISMATCH,
                format!("enum variant index {variant} exceeds the encoding"),
            );
            return None;
        }

        let (first, count) = self.argument_window(payload)?;

        let dst = self.alloc_temp_or_error();
        self.emit_op(Opcode::MakeEnum);
        self.emit_byte(dst);
        self.emit_byte(variant as u8);
        self.emit_byte(first);
        self.emit_byte(count);

        self.free_argument_window(first, count);
        Some(Slot::temp(dst))
    }

    /* STATEMENTS */

    fn stmt(&mut self, stmt: &Stmt) {
        self.cur_loc = stmt.loc;

        match &stmt.node {
            StmtNode::Let {
                name,
                mutable,
                init,
            } => self.let_stmt(name.clone(), *mutable, init),
            StmtNode::Assign { target, value } => self.assign(target, value),
            StmtNode::Expr(expr) => {
                self.typed_ctx = arithmetic_intensity(expr) >= SMART_TYPED_THRESHOLD
                    && expr.kind.is_numeric();
                if let Some(slot) = self.expr(expr) {
                    self.free_slot(slot);
                }
                self.typed_ctx = false;
            }
            StmtNode::Print(args) => self.print(args),
            StmtNode::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_stmt(cond, then_branch, else_branch.as_deref()),
            StmtNode::While { label, cond, body } => {
                self.while_stmt(label.clone(), cond, body)
            }
            StmtNode::ForRange {
                label,
                var,
                var_kind,
                start,
                end,
                inclusive,
                step,
                body,
            } => self.for_range(
                label.clone(),
                var.clone(),
                *var_kind,
                start,
                end,
                *inclusive,
                step.as_ref(),
                body,
            ),
            StmtNode::ForEach {
                label,
                var,
                iterable,
                body,
            } => self.for_each(label.clone(), var.clone(), iterable, body),
            StmtNode::Block(stmts) => {
                self.push_scope(ScopeKind::Block);
                for stmt in stmts {
                    self.stmt(stmt);
                }
                self.pop_scope();
            }
            StmtNode::FnDecl { name, params, body } => {
                self.fn_decl(name.clone(), params, body)
            }
            StmtNode::Return(value) => self.return_stmt(value.as_ref()),
            StmtNode::Break(label) => self.break_stmt(label.as_deref()),
            StmtNode::Continue(label) => self.continue_stmt(label.as_deref()),
            StmtNode::Try {
                body,
                catch_name,
                handler,
            } => self.try_stmt(body, catch_name.clone(), handler),
            StmtNode::Raise(expr) => {
                if let Some(slot) = self.expr(expr) {
                    self.cur_loc = stmt.loc;
                    self.emit_op(Opcode::Raise);
                    self.emit_byte(slot.id);
                    self.free_slot(slot);
                }
            }
        }
    }

    fn let_stmt(&mut self, name: Rc<str>, mutable: bool, init: &Expr) {
        let intensity = arithmetic_intensity(init);
        self.typed_ctx = intensity >= SMART_TYPED_THRESHOLD && init.kind.is_numeric();

        if self.at_module_level && self.scopes.len() == 1 {
            let Some(index) = self.alloc_global_or_error() else {
                self.typed_ctx = false;
                return;
            };

            if let Some(slot) = self.expr(init) {
                self.emit_op(Opcode::StoreGlobal);
                self.emit_byte(index);
                self.emit_byte(slot.id);
                self.free_slot(slot);
            }

            self.globals.insert(name, (index, mutable, init.kind));
        } else {
            let Some(reg) = self.alloc.alloc_frame() else {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::REGISTER_PRESSURE,
                    "frame band exhausted",
                );
                self.typed_ctx = false;
                return;
            };

            self.alloc.alloc_smart(reg, init.kind, intensity);
            let _ = self.expr_into(init, reg);
            self.declare_local(name, reg, mutable, init.kind);
        }

        self.typed_ctx = false;
    }

    fn alloc_global_or_error(&mut self) -> Option<u8> {
        let id = self.alloc.alloc_global();
        if id.is_none() {
            self.error(
                DiagnosticKind::Semantic,
                codes::REGISTER_PRESSURE,
                "global band exhausted",
            );
        }
        id
    }

    fn assign(&mut self, target: &AssignTarget, value: &Expr) {
        self.typed_ctx =
            arithmetic_intensity(value) >= SMART_TYPED_THRESHOLD && value.kind.is_numeric();

        match target {
            AssignTarget::Var(name) => self.assign_var(name, value),
            AssignTarget::Index { array, index } => {
                let Some(array) = self.expr(array) else {
                    self.typed_ctx = false;
                    return;
                };
                let Some(index) = self.expr(index) else {
                    self.typed_ctx = false;
                    return;
                };
                if let Some(slot) = self.expr(value) {
                    self.emit_op(Opcode::ArraySet);
                    self.emit_byte(array.id);
                    self.emit_byte(index.id);
                    self.emit_byte(slot.id);
                    self.free_slot(slot);
                }
                self.free_slot(array);
                self.free_slot(index);
            }
            AssignTarget::Field { object, index } => {
                let Some(object) = self.expr(object) else {
                    self.typed_ctx = false;
                    return;
                };
                if let Some(slot) = self.expr(value) {
                    self.emit_op(Opcode::StructSet);
                    self.emit_byte(object.id);
                    self.emit_byte(*index as u8);
                    self.emit_byte(slot.id);
                    self.free_slot(slot);
                }
                self.free_slot(object);
            }
        }

        self.typed_ctx = false;
    }

    fn assign_var(&mut self, name: &str, value: &Expr) {
        if let Some(local) = resolve(&self.scopes, name) {
            let (reg, mutable) = (local.reg, local.mutable);
            if !mutable {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::IMMUTABLE_ASSIGN,
                    format!("cannot assign to immutable binding `{name}`"),
                );
                return;
            }
            let _ = self.expr_into(value, reg);
            return;
        }

        if let Some(slot) = self.resolve_capture(name) {
            if let Some(value) = self.expr(value) {
                self.emit_op(Opcode::SetUpvalue);
                self.emit_byte(slot);
                self.emit_byte(value.id);
                self.free_slot(value);
            }
            return;
        }

        if let Some((index, mutable, _)) = self.globals.get(name).copied() {
            if !mutable {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::IMMUTABLE_ASSIGN,
                    format!("cannot assign to immutable binding `{name}`"),
                );
                return;
            }
            if let Some(value) = self.expr(value) {
                self.emit_op(Opcode::StoreGlobal);
                self.emit_byte(index);
                self.emit_byte(value.id);
                self.free_slot(value);
            }
            return;
        }

        self.error(
            DiagnosticKind::Semantic,
            codes::UNDEFINED_VARIABLE,
            format!("undefined variable `{name}`"),
        );
    }

    fn print(&mut self, args: &[Expr]) {
        if let [single] = args {
            if let Some(slot) = self.expr(single) {
                self.emit_op(Opcode::Print);
                self.emit_byte(slot.id);
                self.free_slot(slot);
            }
            return;
        }

        let Some((first, count)) = self.argument_window(args) else {
            return;
        };
        self.emit_op(Opcode::PrintMulti);
        self.emit_byte(first);
        self.emit_byte(count);
        self.emit_byte(1);
        self.free_argument_window(first, count);
    }

    fn if_stmt(&mut self, cond: &Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>) {
        let Some(cond) = self.expr(cond) else { return };

        let skip_then = self.emit_forward(Opcode::JumpIfNotShort, Some(cond.id));
        self.free_slot(cond);

        self.push_scope(ScopeKind::Block);
        for stmt in then_branch {
            self.stmt(stmt);
        }
        self.pop_scope();

        match else_branch {
            Some(else_branch) => {
                let skip_else = self.emit_forward_long(Opcode::Jump, None);
                self.patch_forward(skip_then);

                self.push_scope(ScopeKind::Block);
                for stmt in else_branch {
                    self.stmt(stmt);
                }
                self.pop_scope();

                self.patch_forward(skip_else);
            }
            None => self.patch_forward(skip_then),
        }
    }

    fn while_stmt(&mut self, label: Option<Rc<str>>, cond: &Expr, body: &[Stmt]) {
        let header = self.at();
        self.push_scope(ScopeKind::Loop(LoopCtx {
            label,
            header,
            continue_target: Some(header),
            patches: LoopPatches::default(),
        }));

        let exit = match self.expr(cond) {
            Some(cond) => {
                let exit = self.emit_forward_long(Opcode::JumpIfNot, Some(cond.id));
                self.free_slot(cond);
                Some(exit)
            }
            None => None,
        };

        for stmt in body {
            self.stmt(stmt);
        }

        let header = self.loop_header();
        self.emit_loop_to(header);

        if let Some(exit) = exit {
            self.patch_forward(exit);
        }
        self.flush_loop_patches();
        self.pop_scope();
    }

    #[allow(clippy::too_many_arguments)]
    fn for_range(
        &mut self,
        label: Option<Rc<str>>,
        var: Rc<str>,
        var_kind: Kind,
        start: &Expr,
        end: &Expr,
        inclusive: bool,
        step: Option<&Expr>,
        body: &[Stmt],
    ) {
        self.push_scope(ScopeKind::Loop(LoopCtx {
            label,
            header: 0,
            continue_target: None,
            patches: LoopPatches::default(),
        }));

        // Induction register: treated as hot, pinned to its bank for
        // the duration of the loop.
        let Some(induction) = self.alloc.alloc_frame() else {
            self.error(
                DiagnosticKind::Semantic,
                codes::REGISTER_PRESSURE,
                "frame band exhausted",
            );
            self.pop_scope();
            return;
        };
        self.alloc.alloc_smart(induction, var_kind, SMART_TYPED_THRESHOLD);
        self.alloc.typed_residency_hint(induction, true);
        self.declare_local(var, induction, false, var_kind);

        if self.expr_into(start, induction).is_none() {
            self.pop_scope();
            return;
        }

        let Some(limit) = self.expr(end) else {
            self.pop_scope();
            return;
        };

        let step_slot = match step {
            Some(step) => match self.expr(step) {
                Some(slot) => Some(slot),
                None => {
                    self.pop_scope();
                    return;
                }
            },
            None => None,
        };

        let header = self.at();
        self.set_loop_header(header);

        let compare = if inclusive { BinOp::Le } else { BinOp::Lt };
        let Some(compare) = cmp_opcode(var_kind, compare) else {
            self.error(
                DiagnosticKind::Semantic,
                codes::TYPE_MISMATCH,
                format!("range loops are not defined for {var_kind:?}"),
            );
            self.pop_scope();
            return;
        };

        let cond = self.alloc_temp_or_error();
        self.emit_op(compare);
        self.emit_byte(cond);
        self.emit_byte(induction);
        self.emit_byte(limit.id);

        let exit = self.emit_forward_long(Opcode::JumpIfNot, Some(cond));
        self.alloc.free(cond);

        for stmt in body {
            self.stmt(stmt);
        }

        // Continues land on the step section.
        self.flush_continues();

        match step_slot {
            None => {
                self.emit_op(Opcode::Inc);
                self.emit_byte(induction);
            }
            Some(step) => {
                let add = arith_opcode(var_kind, BinOp::Add, false).unwrap_or(Opcode::AddI64);
                self.emit_op(add);
                self.emit_byte(induction);
                self.emit_byte(induction);
                self.emit_byte(step.id);
            }
        }

        let header = self.loop_header();
        self.emit_loop_wide_to(header);
        self.patch_forward(exit);
        self.flush_loop_patches();

        self.alloc.typed_residency_hint(induction, false);
        if let Some(step) = step_slot {
            self.free_slot(step);
        }
        self.free_slot(limit);
        self.pop_scope();
    }

    fn for_each(&mut self, label: Option<Rc<str>>, var: Rc<str>, iterable: &Expr, body: &[Stmt]) {
        let Some(source) = self.expr(iterable) else {
            return;
        };

        let iter = self.alloc_temp_or_error();
        self.emit_op(Opcode::GetIter);
        self.emit_byte(iter);
        self.emit_byte(source.id);
        self.free_slot(source);

        let header = self.at();
        self.push_scope(ScopeKind::Loop(LoopCtx {
            label,
            header,
            continue_target: Some(header),
            patches: LoopPatches::default(),
        }));

        let Some(element) = self.alloc.alloc_frame() else {
            self.error(
                DiagnosticKind::Semantic,
                codes::REGISTER_PRESSURE,
                "frame band exhausted",
            );
            self.pop_scope();
            return;
        };
        self.declare_local(var, element, false, Kind::Nil);

        let has = self.alloc_temp_or_error();
        self.emit_op(Opcode::IterNext);
        self.emit_byte(element);
        self.emit_byte(iter);
        self.emit_byte(has);

        let exit = self.emit_forward_long(Opcode::JumpIfNot, Some(has));
        self.alloc.free(has);

        for stmt in body {
            self.stmt(stmt);
        }

        let header = self.loop_header();
        self.emit_loop_to(header);
        self.patch_forward(exit);
        self.flush_loop_patches();
        self.pop_scope();
        self.alloc.free(iter);
    }

    fn fn_decl(&mut self, name: Rc<str>, params: &[(Rc<str>, Kind)], body: &[Stmt]) {
        let proto = self.compile_function(name.clone(), params, body);
        let Some(proto) = proto else { return };

        let index = self.add_constant(Constant::Function(proto));

        if self.at_module_level && self.scopes.len() == 1 {
            let Some(global) = self.alloc_global_or_error() else {
                return;
            };
            // Bind the name before emitting so recursive references
            // resolve to the global slot.
            self.globals.insert(name, (global, false, Kind::Function));

            let temp = self.alloc_temp_or_error();
            self.emit_op(Opcode::Closure);
            self.emit_byte(temp);
            self.emit_u16(index);
            self.emit_op(Opcode::StoreGlobal);
            self.emit_byte(global);
            self.emit_byte(temp);
            self.alloc.free(temp);
        } else {
            let Some(reg) = self.alloc.alloc_frame() else {
                self.error(
                    DiagnosticKind::Semantic,
                    codes::REGISTER_PRESSURE,
                    "frame band exhausted",
                );
                return;
            };
            self.emit_op(Opcode::Closure);
            self.emit_byte(reg);
            self.emit_u16(index);
            self.declare_local(name, reg, false, Kind::Function);
        }
    }

    fn compile_function(
        &mut self,
        name: Rc<str>,
        params: &[(Rc<str>, Kind)],
        body: &[Stmt],
    ) -> Option<Rc<FunctionProto>> {
        if params.len() > u8::MAX as usize {
            self.error(
                DiagnosticKind::Semantic,
                codes::ARITY_MISMATCH,
                "too many parameters",
            );
            return None;
        }

        // Snapshot the enclosing frame's bindings for capture.
        let enclosing_locals: Vec<(Rc<str>, u8)> = self
            .scopes
            .iter()
            .flat_map(|scope| scope.locals.iter())
            .filter(|local| (local.reg as usize) >= FRAME_BASE)
            .map(|local| (local.name.clone(), local.reg - FRAME_BASE as u8))
            .collect();
        let enclosing_upvalues: Vec<Rc<str>> =
            self.upvalues.iter().map(|(n, _)| n.clone()).collect();

        let mut child = CodeGen {
            chunk: Chunk::new(name.clone(), self.file.clone()),
            alloc: RegisterAllocator::new(),
            scopes: vec![Scope::new(ScopeKind::Function)],
            patches: Vec::new(),
            upvalues: Vec::new(),
            enclosing_locals,
            enclosing_upvalues,
            globals: &mut *self.globals,
            diagnostics: &mut *self.diagnostics,
            file: self.file.clone(),
            cur_loc: self.cur_loc,
            at_module_level: false,
            typed_ctx: false,
        };

        for (param, kind) in params {
            match child.alloc.alloc_frame() {
                Some(reg) => child.declare_local(param.clone(), reg, true, *kind),
                None => child.error(
                    DiagnosticKind::Semantic,
                    codes::REGISTER_PRESSURE,
                    "frame band exhausted",
                ),
            }
        }

        for stmt in body {
            child.stmt(stmt);
        }
        child.emit_op(Opcode::ReturnVoid);
        child.check_patches_resolved();

        let mut chunk = child.chunk;
        chunk.frame_used = child.alloc.frame_used();

        let upvalues: Vec<UpvalueDesc> =
            child.upvalues.iter().map(|(_, desc)| *desc).collect();

        Some(Rc::new(FunctionProto {
            name,
            arity: params.len() as u8,
            chunk: Rc::new(chunk),
            upvalues,
        }))
    }

    fn return_stmt(&mut self, value: Option<&Expr>) {
        let Some(value) = value else {
            self.emit_op(Opcode::ReturnVoid);
            return;
        };

        // A call in tail position reuses the current frame. Inside a
        // try body the frame must survive so its handler still
        // applies; those calls stay ordinary.
        if let ExprNode::Call { callee, args } = &value.node {
            if !self.at_module_level && !self.in_try() {
                if let Some(callee) = self.expr(callee) {
                    if let Some((first, count)) = self.argument_window(args) {
                        self.emit_op(Opcode::TailCall);
                        self.emit_byte(callee.id);
                        self.emit_byte(first);
                        self.emit_byte(count);
                        self.free_slot(callee);
                        self.free_argument_window(first, count);
                        return;
                    }
                    self.free_slot(callee);
                }
                return;
            }
        }

        if let Some(slot) = self.expr(value) {
            self.emit_op(Opcode::Return);
            self.emit_byte(slot.id);
            self.free_slot(slot);
        }
    }

    fn break_stmt(&mut self, label: Option<&str>) {
        if self.find_loop(label).is_none() {
            self.loop_error(label, codes::BREAK_OUTSIDE_LOOP, "break");
            return;
        }

        self.pop_crossed_trys(label);

        let patch = self.emit_forward_long(Opcode::Jump, None);
        if let Some(ctx) = self.find_loop(label) {
            ctx.patches.breaks.push(patch);
        }
    }

    fn continue_stmt(&mut self, label: Option<&str>) {
        let target = match self.find_loop(label) {
            Some(ctx) => ctx.continue_target,
            None => {
                self.loop_error(label, codes::CONTINUE_OUTSIDE_LOOP, "continue");
                return;
            }
        };

        self.pop_crossed_trys(label);

        match target {
            Some(header) => self.emit_loop_to(header),
            None => {
                let patch = self.emit_forward_long(Opcode::Jump, None);
                if let Some(ctx) = self.find_loop(label) {
                    ctx.patches.continues.push(patch);
                }
            }
        }
    }

    /// Jumping out of a `try` body skips its `pop_try`; emit one for
    /// every try scope between here and the targeted loop.
    fn pop_crossed_trys(&mut self, label: Option<&str>) {
        let mut crossed = 0;

        for scope in self.scopes.iter().rev() {
            match &scope.kind {
                ScopeKind::Try => crossed += 1,
                ScopeKind::Loop(ctx) => {
                    let target = match label {
                        Some(label) => ctx.label.as_deref() == Some(label),
                        None => true,
                    };
                    if target {
                        break;
                    }
                }
                _ => {}
            }
        }

        for _ in 0..crossed {
            self.emit_op(Opcode::PopTry);
        }
    }

    /// Whether any enclosing scope of the current function is a try
    /// body.
    fn in_try(&self) -> bool {
        self.scopes
            .iter()
            .any(|scope| matches!(scope.kind, ScopeKind::Try))
    }

    fn loop_error(&mut self, label: Option<&str>, fallback: &'static str, word: &str) {
        match label {
            Some(label) => self.error(
                DiagnosticKind::Scope,
                codes::UNKNOWN_LABEL,
                format!("no enclosing loop labeled `{label}`"),
            ),
            None => self.error(
                DiagnosticKind::Scope,
                fallback,
                format!("`{word}` outside of a loop"),
            ),
        }
    }

    /// Innermost loop, or the nearest one with a matching label.
    fn find_loop(&mut self, label: Option<&str>) -> Option<&mut LoopCtx> {
        self.scopes
            .iter_mut()
            .rev()
            .filter_map(|scope| match &mut scope.kind {
                ScopeKind::Loop(ctx) => Some(ctx),
                _ => None,
            })
            .find(|ctx| match label {
                Some(label) => ctx.label.as_deref() == Some(label),
                None => true,
            })
    }

    fn loop_header(&mut self) -> usize {
        self.find_loop(None).map(|ctx| ctx.header).unwrap_or_default()
    }

    fn set_loop_header(&mut self, header: usize) {
        if let Some(ctx) = self.find_loop(None) {
            ctx.header = header;
        }
    }

    fn flush_continues(&mut self) {
        let continues = match self.find_loop(None) {
            Some(ctx) => std::mem::take(&mut ctx.patches.continues),
            None => return,
        };
        for patch in continues {
            self.patch_forward(patch);
        }
    }

    /// Flushes the loop's break list (and any continues a broken loop
    /// still holds) at its end.
    fn flush_loop_patches(&mut self) {
        let patches = match self.find_loop(None) {
            Some(ctx) => std::mem::take(&mut ctx.patches),
            None => return,
        };
        for patch in patches.breaks.into_iter().chain(patches.continues) {
            self.patch_forward(patch);
        }
    }

    fn try_stmt(&mut self, body: &[Stmt], catch_name: Rc<str>, handler: &[Stmt]) {
        let Some(catch_reg) = self.alloc.alloc_frame() else {
            self.error(
                DiagnosticKind::Semantic,
                codes::REGISTER_PRESSURE,
                "frame band exhausted",
            );
            return;
        };

        let install = self.emit_forward_long(Opcode::PushTry, Some(catch_reg));

        self.push_scope(ScopeKind::Try);
        for stmt in body {
            self.stmt(stmt);
        }
        self.pop_scope();

        self.emit_op(Opcode::PopTry);
        let over_handler = self.emit_forward_long(Opcode::Jump, None);

        self.patch_forward(install);

        self.push_scope(ScopeKind::Block);
        self.declare_local(catch_name, catch_reg, false, Kind::Nil);
        for stmt in handler {
            self.stmt(stmt);
        }
        self.pop_scope();

        self.patch_forward(over_handler);
        self.alloc.free(catch_reg);
    }
}

/* OPCODE SELECTION TABLES */

fn arith_opcode(kind: Kind, op: BinOp, typed: bool) -> Option<Opcode> {
    use Opcode::*;

    let boxed = match (kind, op) {
        (Kind::I32, BinOp::Add) => AddI32,
        (Kind::I32, BinOp::Sub) => SubI32,
        (Kind::I32, BinOp::Mul) => MulI32,
        (Kind::I32, BinOp::Div) => DivI32,
        (Kind::I32, BinOp::Mod) => ModI32,
        (Kind::I64, BinOp::Add) => AddI64,
        (Kind::I64, BinOp::Sub) => SubI64,
        (Kind::I64, BinOp::Mul) => MulI64,
        (Kind::I64, BinOp::Div) => DivI64,
        (Kind::I64, BinOp::Mod) => ModI64,
        (Kind::U32, BinOp::Add) => AddU32,
        (Kind::U32, BinOp::Sub) => SubU32,
        (Kind::U32, BinOp::Mul) => MulU32,
        (Kind::U32, BinOp::Div) => DivU32,
        (Kind::U32, BinOp::Mod) => ModU32,
        (Kind::U64, BinOp::Add) => AddU64,
        (Kind::U64, BinOp::Sub) => SubU64,
        (Kind::U64, BinOp::Mul) => MulU64,
        (Kind::U64, BinOp::Div) => DivU64,
        (Kind::U64, BinOp::Mod) => ModU64,
        (Kind::F64, BinOp::Add) => AddF64,
        (Kind::F64, BinOp::Sub) => SubF64,
        (Kind::F64, BinOp::Mul) => MulF64,
        (Kind::F64, BinOp::Div) => DivF64,
        (Kind::F64, BinOp::Mod) => ModF64,
        _ => return None,
    };

    if !typed {
        return Some(boxed);
    }

    Some(match boxed {
        AddI32 => AddI32Typed,
        SubI32 => SubI32Typed,
        MulI32 => MulI32Typed,
        DivI32 => DivI32Typed,
        ModI32 => ModI32Typed,
        AddI64 => AddI64Typed,
        SubI64 => SubI64Typed,
        MulI64 => MulI64Typed,
        DivI64 => DivI64Typed,
        ModI64 => ModI64Typed,
        AddU32 => AddU32Typed,
        SubU32 => SubU32Typed,
        MulU32 => MulU32Typed,
        DivU32 => DivU32Typed,
        ModU32 => ModU32Typed,
        AddU64 => AddU64Typed,
        SubU64 => SubU64Typed,
        MulU64 => MulU64Typed,
        DivU64 => DivU64Typed,
        ModU64 => ModU64Typed,
        AddF64 => AddF64Typed,
        SubF64 => SubF64Typed,
        MulF64 => MulF64Typed,
        DivF64 => DivF64Typed,
        ModF64 => ModF64Typed,
        other => other,
    })
}

fn cmp_opcode(kind: Kind, op: BinOp) -> Option<Opcode> {
    use Opcode::*;

    Some(match (kind, op) {
        (Kind::I32, BinOp::Lt) => LtI32,
        (Kind::I32, BinOp::Le) => LeI32,
        (Kind::I32, BinOp::Gt) => GtI32,
        (Kind::I32, BinOp::Ge) => GeI32,
        (Kind::I64, BinOp::Lt) => LtI64,
        (Kind::I64, BinOp::Le) => LeI64,
        (Kind::I64, BinOp::Gt) => GtI64,
        (Kind::I64, BinOp::Ge) => GeI64,
        (Kind::U32, BinOp::Lt) => LtU32,
        (Kind::U32, BinOp::Le) => LeU32,
        (Kind::U32, BinOp::Gt) => GtU32,
        (Kind::U32, BinOp::Ge) => GeU32,
        (Kind::U64, BinOp::Lt) => LtU64,
        (Kind::U64, BinOp::Le) => LeU64,
        (Kind::U64, BinOp::Gt) => GtU64,
        (Kind::U64, BinOp::Ge) => GeU64,
        (Kind::F64, BinOp::Lt) => LtF64,
        (Kind::F64, BinOp::Le) => LeF64,
        (Kind::F64, BinOp::Gt) => GtF64,
        (Kind::F64, BinOp::Ge) => GeF64,
        _ => return None,
    })
}

fn cast_opcode(from: Kind, to: Kind) -> Option<Opcode> {
    use Opcode::*;

    Some(match (from, to) {
        (Kind::I32, Kind::I64) => I32ToI64,
        (Kind::I64, Kind::I32) => I64ToI32,
        (Kind::I32, Kind::U32) => I32ToU32,
        (Kind::U32, Kind::I32) => U32ToI32,
        (Kind::I32, Kind::F64) => I32ToF64,
        (Kind::F64, Kind::I32) => F64ToI32,
        (Kind::I64, Kind::F64) => I64ToF64,
        (Kind::F64, Kind::I64) => F64ToI64,
        (Kind::I64, Kind::U64) => I64ToU64,
        (Kind::U64, Kind::I64) => U64ToI64,
        (Kind::U32, Kind::U64) => U32ToU64,
        (Kind::U64, Kind::U32) => U64ToU32,
        (Kind::U32, Kind::F64) => U32ToF64,
        (Kind::F64, Kind::U32) => F64ToU32,
        (Kind::Bool, Kind::I32) => BoolToI32,
        (Kind::I32, Kind::Bool) => I32ToBool,
        _ => return None,
    })
}

/// Arithmetic-node count of an expression tree, the smart allocator's
/// intensity measure.
fn arithmetic_intensity(expr: &Expr) -> usize {
    let own = match &expr.node {
        ExprNode::Binary { op, .. } => matches!(
            op,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        ) && expr.kind.is_numeric(),
        ExprNode::Unary { op: UnOp::Neg, .. } => expr.kind.is_numeric(),
        _ => false,
    } as usize;

    own + match &expr.node {
        ExprNode::Binary { lhs, rhs, .. } => {
            arithmetic_intensity(lhs) + arithmetic_intensity(rhs)
        }
        ExprNode::Unary { operand, .. } | ExprNode::Cast(operand) => {
            arithmetic_intensity(operand)
        }
        ExprNode::Index { array, index } => {
            arithmetic_intensity(array) + arithmetic_intensity(index)
        }
        ExprNode::Call { callee, args } => {
            arithmetic_intensity(callee)
                + args.iter().map(arithmetic_intensity).sum::<usize>()
        }
        ExprNode::Builtin { args, .. } => args.iter().map(arithmetic_intensity).sum(),
        ExprNode::ArrayLit(items) | ExprNode::StructLit(items) => {
            items.iter().map(arithmetic_intensity).sum()
        }
        ExprNode::EnumLit { payload, .. } => payload.iter().map(arithmetic_intensity).sum(),
        ExprNode::Field { object, .. }
        | ExprNode::TagOf(object)
        | ExprNode::PayloadOf { object, .. } => arithmetic_intensity(object),
        ExprNode::Range { start, end } => {
            arithmetic_intensity(start) + arithmetic_intensity(end)
        }
        ExprNode::Literal(_) | ExprNode::Var(_) => 0,
    }
}
