//! AST optimizer: constant folding, small-loop unrolling,
//! loop-invariant hoisting.
//!
//! Folding wraps for unsigned kinds and reports a compile-time error
//! for signed overflow. Induction loops with literal bounds and at
//! most eight iterations are replaced by their repeated bodies with
//! the induction variable substituted. Invariant subexpressions of a
//! loop body move to fresh bindings emitted before the loop header.

use crate::compiler::ast::*;
use crate::consts::UNROLL_LIMIT;
use crate::diagnostic::{codes, Diagnostic, DiagnosticKind, SourceLoc};

use std::collections::HashSet;
use std::rc::Rc;

pub(super) fn optimize(mut module: TypedModule, diagnostics: &mut Vec<Diagnostic>) -> TypedModule {
    let mut optimizer = Optimizer {
        diagnostics,
        file: module.file.clone(),
        hoist_counter: 0,
    };

    optimizer.stmts(&mut module.stmts);
    module
}

struct Optimizer<'d> {
    diagnostics: &'d mut Vec<Diagnostic>,
    file: Rc<str>,
    hoist_counter: usize,
}

impl Optimizer<'_> {
    fn error(&mut self, code: &'static str, message: String, loc: SourceLoc) {
        self.diagnostics.push(Diagnostic::new(
            DiagnosticKind::ConstantFold,
            code,
            message,
            self.file.clone(),
            loc,
        ));
    }

    fn stmts(&mut self, list: &mut Vec<Stmt>) {
        for stmt in list {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        if matches!(stmt.node, StmtNode::ForRange { .. }) {
            self.for_range_stmt(stmt);
            return;
        }
        if matches!(stmt.node, StmtNode::While { .. }) {
            self.while_stmt(stmt);
            return;
        }

        match &mut stmt.node {
            StmtNode::Let { init, .. } => self.fold(init),
            StmtNode::Assign { target, value } => {
                if let AssignTarget::Index { array, index } = target {
                    self.fold(array);
                    self.fold(index);
                }
                if let AssignTarget::Field { object, .. } = target {
                    self.fold(object);
                }
                self.fold(value);
            }
            StmtNode::Expr(expr) | StmtNode::Raise(expr) => self.fold(expr),
            StmtNode::Print(args) => {
                for arg in args {
                    self.fold(arg);
                }
            }
            StmtNode::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.fold(cond);
                self.stmts(then_branch);
                if let Some(else_branch) = else_branch {
                    self.stmts(else_branch);
                }
            }
            StmtNode::While { .. } | StmtNode::ForRange { .. } => {
                // Handled above; the loop rewrites replace the whole
                // statement and need the node borrow released.
            }
            StmtNode::ForEach { iterable, body, .. } => {
                self.fold(iterable);
                self.stmts(body);
            }
            StmtNode::Block(stmts) => self.stmts(stmts),
            StmtNode::FnDecl { body, .. } => self.stmts(body),
            StmtNode::Return(value) => {
                if let Some(value) = value {
                    self.fold(value);
                }
            }
            StmtNode::Try { body, handler, .. } => {
                self.stmts(body);
                self.stmts(handler);
            }
            StmtNode::Break(_) | StmtNode::Continue(_) => {}
        }
    }

    fn while_stmt(&mut self, stmt: &mut Stmt) {
        let hoisted = {
            let StmtNode::While { cond, body, .. } = &mut stmt.node else {
                return;
            };
            self.fold(cond);
            self.stmts(body);
            self.hoist_invariants(body, None)
        };

        if let Some(hoisted) = hoisted {
            wrap_with_hoists(stmt, hoisted);
        }
    }

    fn for_range_stmt(&mut self, stmt: &mut Stmt) {
        let unrolled = {
            let StmtNode::ForRange {
                var,
                start,
                end,
                inclusive,
                step,
                body,
                ..
            } = &mut stmt.node
            else {
                return;
            };

            self.fold(start);
            self.fold(end);
            if let Some(step) = step {
                self.fold(step);
            }
            self.stmts(body);

            let var = var.clone();
            unroll(start, end, *inclusive, step.as_ref(), &var, body)
        };

        if let Some(mut unrolled) = unrolled {
            // Substituted literals open new folding chances.
            self.stmt(&mut unrolled);
            *stmt = unrolled;
            return;
        }

        let hoisted = {
            let StmtNode::ForRange { var, body, .. } = &mut stmt.node else {
                return;
            };
            let var = var.clone();
            self.hoist_invariants(body, Some(&var))
        };

        if let Some(hoisted) = hoisted {
            wrap_with_hoists(stmt, hoisted);
        }
    }

    /* CONSTANT FOLDING */

    fn fold(&mut self, expr: &mut Expr) {
        match &mut expr.node {
            ExprNode::Binary { lhs, rhs, .. } => {
                self.fold(lhs);
                self.fold(rhs);
            }
            ExprNode::Unary { operand, .. } => self.fold(operand),
            ExprNode::Cast(operand) => self.fold(operand),
            ExprNode::Call { callee, args } => {
                self.fold(callee);
                for arg in args {
                    self.fold(arg);
                }
            }
            ExprNode::Builtin { args, .. } => {
                for arg in args {
                    self.fold(arg);
                }
            }
            ExprNode::Index { array, index } => {
                self.fold(array);
                self.fold(index);
            }
            ExprNode::ArrayLit(items) | ExprNode::StructLit(items) => {
                for item in items {
                    self.fold(item);
                }
            }
            ExprNode::EnumLit { payload, .. } => {
                for item in payload {
                    self.fold(item);
                }
            }
            ExprNode::Field { object, .. }
            | ExprNode::TagOf(object)
            | ExprNode::PayloadOf { object, .. } => self.fold(object),
            ExprNode::Range { start, end } => {
                self.fold(start);
                self.fold(end);
            }
            ExprNode::Literal(_) | ExprNode::Var(_) => {}
        }

        let folded = match &expr.node {
            ExprNode::Binary { op, lhs, rhs } => {
                match (&lhs.node, &rhs.node) {
                    (ExprNode::Literal(a), ExprNode::Literal(b)) if a.kind() == b.kind() => {
                        self.fold_binary(*op, a.clone(), b.clone(), expr.loc)
                    }
                    _ => None,
                }
            }
            ExprNode::Unary { op, operand } => match &operand.node {
                ExprNode::Literal(lit) => self.fold_unary(*op, lit.clone(), expr.loc),
                _ => None,
            },
            _ => None,
        };

        if let Some(lit) = folded {
            expr.node = ExprNode::Literal(lit);
        }
    }

    fn fold_binary(&mut self, op: BinOp, a: Lit, b: Lit, loc: SourceLoc) -> Option<Lit> {
        use BinOp::*;

        // Comparisons and equality fold for every kind.
        match op {
            Eq => return lit_eq(&a, &b).map(Lit::Bool),
            Ne => return lit_eq(&a, &b).map(|eq| Lit::Bool(!eq)),
            Lt | Le | Gt | Ge => return lit_cmp(op, &a, &b),
            _ => {}
        }

        match (a, b) {
            (Lit::I32(x), Lit::I32(y)) => self.fold_signed(op, x as i64, y as i64, loc, |v| {
                i32::try_from(v).ok().map(Lit::I32)
            }),
            (Lit::I64(x), Lit::I64(y)) => {
                self.fold_signed(op, x, y, loc, |v| Some(Lit::I64(v)))
            }
            (Lit::U32(x), Lit::U32(y)) => fold_unsigned_32(op, x, y),
            (Lit::U64(x), Lit::U64(y)) => fold_unsigned_64(op, x, y),
            (Lit::F64(x), Lit::F64(y)) => Some(Lit::F64(match op {
                Add => x + y,
                Sub => x - y,
                Mul => x * y,
                Div => x / y,
                Mod => x % y,
                _ => return None,
            })),
            (Lit::Bool(x), Lit::Bool(y)) => Some(Lit::Bool(match op {
                And => x && y,
                Or => x || y,
                _ => return None,
            })),
            (Lit::Str(x), Lit::Str(y)) if op == Add => {
                Some(Lit::Str(Rc::from(format!("{x}{y}"))))
            }
            _ => None,
        }
    }

    /// Signed folding evaluates in `i64` and narrows; any overflow is
    /// a compile-time error rather than a silent wrap.
    fn fold_signed<F>(
        &mut self,
        op: BinOp,
        x: i64,
        y: i64,
        loc: SourceLoc,
        narrow: F,
    ) -> Option<Lit>
    where
        F: FnOnce(i64) -> Option<Lit>,
    {
        let wide = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            // Division by zero is left for the runtime trap.
            BinOp::Div if y != 0 => x.checked_div(y),
            BinOp::Mod if y != 0 => x.checked_rem(y),
            _ => return None,
        }?;

        match narrow(wide) {
            Some(lit) => Some(lit),
            None => {
                self.error(
                    codes::FOLD_OVERFLOW,
                    format!("expression overflows its kind at compile time ({wide})"),
                    loc,
                );
                None
            }
        }
    }

    fn fold_unary(&mut self, op: UnOp, lit: Lit, loc: SourceLoc) -> Option<Lit> {
        match (op, lit) {
            (UnOp::Neg, Lit::I32(v)) => match v.checked_neg() {
                Some(v) => Some(Lit::I32(v)),
                None => {
                    self.error(
                        codes::FOLD_OVERFLOW,
                        "negation overflows i32 at compile time".to_string(),
                        loc,
                    );
                    None
                }
            },
            (UnOp::Neg, Lit::I64(v)) => match v.checked_neg() {
                Some(v) => Some(Lit::I64(v)),
                None => {
                    self.error(
                        codes::FOLD_OVERFLOW,
                        "negation overflows i64 at compile time".to_string(),
                        loc,
                    );
                    None
                }
            },
            (UnOp::Neg, Lit::F64(v)) => Some(Lit::F64(-v)),
            (UnOp::Not, Lit::Bool(v)) => Some(Lit::Bool(!v)),
            (UnOp::BitNot, Lit::I32(v)) => Some(Lit::I32(!v)),
            _ => None,
        }
    }

    /* LOOP-INVARIANT HOISTING */

    /// Moves invariant subexpressions of the body into fresh bindings;
    /// returns the `let` statements to emit before the loop header.
    fn hoist_invariants(
        &mut self,
        body: &mut Vec<Stmt>,
        induction: Option<&Rc<str>>,
    ) -> Option<Vec<Stmt>> {
        let mut forbidden = mutated_names(body);
        if let Some(var) = induction {
            forbidden.insert(var.clone());
        }

        let mut hoisted: Vec<(Expr, Rc<str>)> = Vec::new();
        for stmt in body.iter_mut() {
            hoist_in_stmt(stmt, &forbidden, &mut hoisted, &mut self.hoist_counter);
        }

        if hoisted.is_empty() {
            return None;
        }

        Some(
            hoisted
                .into_iter()
                .map(|(init, name)| Stmt {
                    loc: init.loc,
                    node: StmtNode::Let {
                        name,
                        mutable: false,
                        init,
                    },
                })
                .collect(),
        )
    }
}

/// Replaces a loop statement with a block of hoisted bindings followed
/// by the loop itself, keeping the fresh names scoped to the loop.
fn wrap_with_hoists(stmt: &mut Stmt, hoisted: Vec<Stmt>) {
    let loc = stmt.loc;
    let placeholder = Stmt {
        node: StmtNode::Block(Vec::new()),
        loc,
    };
    let original = std::mem::replace(stmt, placeholder);

    let mut stmts = hoisted;
    stmts.push(original);

    stmt.node = StmtNode::Block(stmts);
}

/* UNROLLING */

/// Replaces a literal-bounded induction loop of at most eight
/// iterations by its repeated body.
fn unroll(
    start: &Expr,
    end: &Expr,
    inclusive: bool,
    step: Option<&Expr>,
    var: &Rc<str>,
    body: &[Stmt],
) -> Option<Stmt> {
    let step_is_one = match step {
        None => true,
        Some(step) => matches!(&step.node, ExprNode::Literal(Lit::I32(1) | Lit::I64(1))),
    };
    if !step_is_one {
        return None;
    }

    if body.iter().any(has_break_or_continue) {
        return None;
    }

    let (lo, hi, make) = match (&start.node, &end.node) {
        (ExprNode::Literal(Lit::I32(lo)), ExprNode::Literal(Lit::I32(hi))) => (
            *lo as i64,
            *hi as i64,
            (|value: i64| Lit::I32(value as i32)) as fn(i64) -> Lit,
        ),
        (ExprNode::Literal(Lit::I64(lo)), ExprNode::Literal(Lit::I64(hi))) => {
            (*lo, *hi, (|value: i64| Lit::I64(value)) as fn(i64) -> Lit)
        }
        _ => return None,
    };

    let count = (hi - lo) + inclusive as i64;
    if count > UNROLL_LIMIT {
        return None;
    }

    let loc = start.loc;
    if count <= 0 {
        return Some(Stmt {
            node: StmtNode::Block(Vec::new()),
            loc,
        });
    }

    let mut iterations = Vec::with_capacity(count as usize);
    for value in lo..lo + count {
        let mut iteration = body.to_vec();
        substitute_stmts(&mut iteration, var, &make(value));
        iterations.push(Stmt {
            node: StmtNode::Block(iteration),
            loc,
        });
    }

    Some(Stmt {
        node: StmtNode::Block(iterations),
        loc,
    })
}

fn has_break_or_continue(stmt: &Stmt) -> bool {
    match &stmt.node {
        StmtNode::Break(_) | StmtNode::Continue(_) => true,
        StmtNode::If {
            then_branch,
            else_branch,
            ..
        } => {
            then_branch.iter().any(has_break_or_continue)
                || else_branch
                    .as_ref()
                    .is_some_and(|stmts| stmts.iter().any(has_break_or_continue))
        }
        StmtNode::While { body, .. }
        | StmtNode::ForRange { body, .. }
        | StmtNode::ForEach { body, .. }
        | StmtNode::Block(body)
        | StmtNode::FnDecl { body, .. } => body.iter().any(has_break_or_continue),
        StmtNode::Try { body, handler, .. } => {
            body.iter().any(has_break_or_continue) || handler.iter().any(has_break_or_continue)
        }
        _ => false,
    }
}

/* INDUCTION-VARIABLE SUBSTITUTION */

/// Statement-list substitution stops at a shadowing `let`: its
/// initializer still sees the induction value, everything after it
/// resolves to the new binding.
fn substitute_stmts(stmts: &mut [Stmt], name: &Rc<str>, lit: &Lit) {
    for stmt in stmts {
        let shadows = matches!(&stmt.node, StmtNode::Let { name: bound, .. } if bound == name);
        substitute_stmt(stmt, name, lit);
        if shadows {
            break;
        }
    }
}

fn substitute_stmt(stmt: &mut Stmt, name: &Rc<str>, lit: &Lit) {
    match &mut stmt.node {
        StmtNode::Let { init, .. } => {
            substitute_expr(init, name, lit);
        }
        StmtNode::Assign { target, value } => {
            match target {
                AssignTarget::Index { array, index } => {
                    substitute_expr(array, name, lit);
                    substitute_expr(index, name, lit);
                }
                AssignTarget::Field { object, .. } => substitute_expr(object, name, lit),
                AssignTarget::Var(_) => {}
            }
            substitute_expr(value, name, lit);
        }
        StmtNode::Expr(expr) | StmtNode::Raise(expr) => substitute_expr(expr, name, lit),
        StmtNode::Print(args) => {
            for arg in args {
                substitute_expr(arg, name, lit);
            }
        }
        StmtNode::If {
            cond,
            then_branch,
            else_branch,
        } => {
            substitute_expr(cond, name, lit);
            substitute_stmts(then_branch, name, lit);
            if let Some(else_branch) = else_branch {
                substitute_stmts(else_branch, name, lit);
            }
        }
        StmtNode::While { cond, body, .. } => {
            substitute_expr(cond, name, lit);
            substitute_stmts(body, name, lit);
        }
        StmtNode::ForRange {
            var,
            start,
            end,
            step,
            body,
            ..
        } => {
            substitute_expr(start, name, lit);
            substitute_expr(end, name, lit);
            if let Some(step) = step {
                substitute_expr(step, name, lit);
            }
            if var != name {
                substitute_stmts(body, name, lit);
            }
        }
        StmtNode::ForEach {
            var,
            iterable,
            body,
            ..
        } => {
            substitute_expr(iterable, name, lit);
            if var != name {
                substitute_stmts(body, name, lit);
            }
        }
        StmtNode::Block(stmts) => substitute_stmts(stmts, name, lit),
        StmtNode::FnDecl { params, body, .. } => {
            if params.iter().all(|(param, _)| param != name) {
                substitute_stmts(body, name, lit);
            }
        }
        StmtNode::Return(value) => {
            if let Some(value) = value {
                substitute_expr(value, name, lit);
            }
        }
        StmtNode::Try { body, handler, .. } => {
            substitute_stmts(body, name, lit);
            substitute_stmts(handler, name, lit);
        }
        StmtNode::Break(_) | StmtNode::Continue(_) => {}
    }
}

fn substitute_expr(expr: &mut Expr, name: &Rc<str>, lit: &Lit) {
    match &mut expr.node {
        ExprNode::Var(var) if var == name => {
            expr.node = ExprNode::Literal(lit.clone());
        }
        ExprNode::Var(_) | ExprNode::Literal(_) => {}
        ExprNode::Binary { lhs, rhs, .. } => {
            substitute_expr(lhs, name, lit);
            substitute_expr(rhs, name, lit);
        }
        ExprNode::Unary { operand, .. } => substitute_expr(operand, name, lit),
        ExprNode::Cast(operand) => substitute_expr(operand, name, lit),
        ExprNode::Call { callee, args } => {
            substitute_expr(callee, name, lit);
            for arg in args {
                substitute_expr(arg, name, lit);
            }
        }
        ExprNode::Builtin { args, .. } => {
            for arg in args {
                substitute_expr(arg, name, lit);
            }
        }
        ExprNode::Index { array, index } => {
            substitute_expr(array, name, lit);
            substitute_expr(index, name, lit);
        }
        ExprNode::ArrayLit(items) | ExprNode::StructLit(items) => {
            for item in items {
                substitute_expr(item, name, lit);
            }
        }
        ExprNode::EnumLit { payload, .. } => {
            for item in payload {
                substitute_expr(item, name, lit);
            }
        }
        ExprNode::Field { object, .. }
        | ExprNode::TagOf(object)
        | ExprNode::PayloadOf { object, .. } => substitute_expr(object, name, lit),
        ExprNode::Range { start, end } => {
            substitute_expr(start, name, lit);
            substitute_expr(end, name, lit);
        }
    }
}

/* LITERAL COMPARISON HELPERS */

fn lit_eq(a: &Lit, b: &Lit) -> Option<bool> {
    Some(match (a, b) {
        (Lit::Nil, Lit::Nil) => true,
        (Lit::Bool(x), Lit::Bool(y)) => x == y,
        (Lit::I32(x), Lit::I32(y)) => x == y,
        (Lit::I64(x), Lit::I64(y)) => x == y,
        (Lit::U32(x), Lit::U32(y)) => x == y,
        (Lit::U64(x), Lit::U64(y)) => x == y,
        (Lit::F64(x), Lit::F64(y)) => !x.is_nan() && !y.is_nan() && x.to_bits() == y.to_bits(),
        (Lit::Str(x), Lit::Str(y)) => x == y,
        _ => return None,
    })
}

fn lit_cmp(op: BinOp, a: &Lit, b: &Lit) -> Option<Lit> {
    fn decide<T: PartialOrd>(op: BinOp, x: T, y: T) -> Option<bool> {
        Some(match op {
            BinOp::Lt => x < y,
            BinOp::Le => x <= y,
            BinOp::Gt => x > y,
            BinOp::Ge => x >= y,
            _ => return None,
        })
    }

    let result = match (a, b) {
        (Lit::I32(x), Lit::I32(y)) => decide(op, x, y),
        (Lit::I64(x), Lit::I64(y)) => decide(op, x, y),
        (Lit::U32(x), Lit::U32(y)) => decide(op, x, y),
        (Lit::U64(x), Lit::U64(y)) => decide(op, x, y),
        (Lit::F64(x), Lit::F64(y)) => decide(op, x, y),
        _ => None,
    };

    result.map(Lit::Bool)
}

fn fold_unsigned_32(op: BinOp, x: u32, y: u32) -> Option<Lit> {
    Some(Lit::U32(match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div if y != 0 => x / y,
        BinOp::Mod if y != 0 => x % y,
        _ => return None,
    }))
}

fn fold_unsigned_64(op: BinOp, x: u64, y: u64) -> Option<Lit> {
    Some(Lit::U64(match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div if y != 0 => x / y,
        BinOp::Mod if y != 0 => x % y,
        _ => return None,
    }))
}

/* INVARIANT ANALYSIS */

/// Names written anywhere in the body: assignment targets, loop
/// variables, and body-local declarations (whose values do not exist
/// before the loop runs).
fn mutated_names(stmts: &[Stmt]) -> HashSet<Rc<str>> {
    let mut names = HashSet::new();
    collect_mutated(stmts, &mut names);
    names
}

fn collect_mutated(stmts: &[Stmt], names: &mut HashSet<Rc<str>>) {
    for stmt in stmts {
        match &stmt.node {
            StmtNode::Let { name, .. } => {
                names.insert(name.clone());
            }
            StmtNode::Assign { target, .. } => {
                if let AssignTarget::Var(name) = target {
                    names.insert(name.clone());
                }
            }
            StmtNode::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_mutated(then_branch, names);
                if let Some(else_branch) = else_branch {
                    collect_mutated(else_branch, names);
                }
            }
            StmtNode::While { body, .. } | StmtNode::Block(body) => {
                collect_mutated(body, names)
            }
            StmtNode::ForRange { var, body, .. } | StmtNode::ForEach { var, body, .. } => {
                names.insert(var.clone());
                collect_mutated(body, names);
            }
            StmtNode::FnDecl { name, body, .. } => {
                names.insert(name.clone());
                collect_mutated(body, names);
            }
            StmtNode::Try { body, handler, .. } => {
                collect_mutated(body, names);
                collect_mutated(handler, names);
            }
            _ => {}
        }
    }
}

fn free_vars(expr: &Expr, out: &mut HashSet<Rc<str>>) {
    match &expr.node {
        ExprNode::Var(name) => {
            out.insert(name.clone());
        }
        ExprNode::Literal(_) => {}
        ExprNode::Binary { lhs, rhs, .. } => {
            free_vars(lhs, out);
            free_vars(rhs, out);
        }
        ExprNode::Unary { operand, .. } | ExprNode::Cast(operand) => free_vars(operand, out),
        _ => {
            // Aggregates, calls and indexing are never hoist
            // candidates, so their variables are irrelevant here.
        }
    }
}

/// Pure, total expressions only: no calls, no heap reads, and no
/// division that could trap before the loop proves it runs.
fn hoistable(expr: &Expr, forbidden: &HashSet<Rc<str>>) -> bool {
    match &expr.node {
        ExprNode::Literal(_) => true,
        ExprNode::Var(name) => !forbidden.contains(name),
        ExprNode::Binary { op, lhs, rhs } => {
            let division_safe = !matches!(op, BinOp::Div | BinOp::Mod)
                || matches!(
                    &rhs.node,
                    ExprNode::Literal(
                        Lit::I32(1..) | Lit::I64(1..) | Lit::U32(1..) | Lit::U64(1..)
                    )
                );

            division_safe && hoistable(lhs, forbidden) && hoistable(rhs, forbidden)
        }
        ExprNode::Unary { operand, .. } => hoistable(operand, forbidden),
        _ => false,
    }
}

fn hoist_in_stmt(
    stmt: &mut Stmt,
    forbidden: &HashSet<Rc<str>>,
    hoisted: &mut Vec<(Expr, Rc<str>)>,
    counter: &mut usize,
) {
    match &mut stmt.node {
        StmtNode::Let { init, .. } => hoist_in_expr(init, forbidden, hoisted, counter),
        StmtNode::Assign { target, value } => {
            if let AssignTarget::Index { array, index } = target {
                hoist_in_expr(array, forbidden, hoisted, counter);
                hoist_in_expr(index, forbidden, hoisted, counter);
            }
            hoist_in_expr(value, forbidden, hoisted, counter);
        }
        StmtNode::Expr(expr) | StmtNode::Raise(expr) => {
            hoist_in_expr(expr, forbidden, hoisted, counter)
        }
        StmtNode::Print(args) => {
            for arg in args {
                hoist_in_expr(arg, forbidden, hoisted, counter);
            }
        }
        StmtNode::If {
            cond,
            then_branch,
            else_branch,
        } => {
            hoist_in_expr(cond, forbidden, hoisted, counter);
            for inner in then_branch {
                hoist_in_stmt(inner, forbidden, hoisted, counter);
            }
            if let Some(else_branch) = else_branch {
                for inner in else_branch {
                    hoist_in_stmt(inner, forbidden, hoisted, counter);
                }
            }
        }
        StmtNode::Block(stmts) => {
            for inner in stmts {
                hoist_in_stmt(inner, forbidden, hoisted, counter);
            }
        }
        // Nested loops run their own hoisting pass; everything else
        // is left in place.
        _ => {}
    }
}

fn hoist_in_expr(
    expr: &mut Expr,
    forbidden: &HashSet<Rc<str>>,
    hoisted: &mut Vec<(Expr, Rc<str>)>,
    counter: &mut usize,
) {
    let is_candidate = matches!(expr.node, ExprNode::Binary { .. })
        && hoistable(expr, forbidden)
        && {
            let mut vars = HashSet::new();
            free_vars(expr, &mut vars);
            // Variable-free expressions fold instead.
            !vars.is_empty()
        };

    if is_candidate {
        let name = match hoisted.iter().find(|(other, _)| other == expr) {
            Some((_, name)) => name.clone(),
            None => {
                let name: Rc<str> = Rc::from(format!("__licm{counter}"));
                *counter += 1;
                hoisted.push((expr.clone(), name.clone()));
                name
            }
        };

        expr.node = ExprNode::Var(name);
        return;
    }

    match &mut expr.node {
        ExprNode::Binary { lhs, rhs, .. } => {
            hoist_in_expr(lhs, forbidden, hoisted, counter);
            hoist_in_expr(rhs, forbidden, hoisted, counter);
        }
        ExprNode::Unary { operand, .. } | ExprNode::Cast(operand) => {
            hoist_in_expr(operand, forbidden, hoisted, counter)
        }
        ExprNode::Call { callee, args } => {
            hoist_in_expr(callee, forbidden, hoisted, counter);
            for arg in args {
                hoist_in_expr(arg, forbidden, hoisted, counter);
            }
        }
        ExprNode::Builtin { args, .. } => {
            for arg in args {
                hoist_in_expr(arg, forbidden, hoisted, counter);
            }
        }
        ExprNode::Index { array, index } => {
            hoist_in_expr(array, forbidden, hoisted, counter);
            hoist_in_expr(index, forbidden, hoisted, counter);
        }
        _ => {}
    }
}
