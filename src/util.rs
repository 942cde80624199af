//! Utilities shared by the integration tests and embedders.

/// Builders that assemble typed AST fragments the way the external
/// frontend would, plus one-call compile-and-run helpers with captured
/// output.
pub mod test_helpers {
    use crate::compiler::ast::*;
    use crate::compiler::compile;
    use crate::diagnostic::SourceLoc;
    use crate::error::VmError;
    use crate::interpreter::{DispatchMode, Vm, VmParams};
    use crate::state::ProgramState;

    use std::rc::Rc;

    /// Module named `main`, file `test.orus`.
    pub fn module(stmts: Vec<Stmt>) -> TypedModule {
        TypedModule {
            name: Rc::from("main"),
            file: Rc::from("test.orus"),
            stmts,
        }
    }

    fn loc() -> SourceLoc {
        SourceLoc::new(1, 1)
    }

    /// Expression from a node and kind.
    pub fn expr(node: ExprNode, kind: Kind) -> Expr {
        Expr {
            node,
            kind,
            loc: loc(),
        }
    }

    /// Statement from a node.
    pub fn stmt(node: StmtNode) -> Stmt {
        Stmt { node, loc: loc() }
    }

    /// Literal expression.
    pub fn lit(value: Lit) -> Expr {
        let kind = value.kind();
        expr(ExprNode::Literal(value), kind)
    }

    /// `i32` literal.
    pub fn i32l(value: i32) -> Expr {
        lit(Lit::I32(value))
    }

    /// `i64` literal.
    pub fn i64l(value: i64) -> Expr {
        lit(Lit::I64(value))
    }

    /// `u32` literal.
    pub fn u32l(value: u32) -> Expr {
        lit(Lit::U32(value))
    }

    /// `f64` literal.
    pub fn f64l(value: f64) -> Expr {
        lit(Lit::F64(value))
    }

    /// String literal.
    pub fn strl(value: &str) -> Expr {
        lit(Lit::Str(Rc::from(value)))
    }

    /// Variable reference.
    pub fn var(name: &str, kind: Kind) -> Expr {
        expr(ExprNode::Var(Rc::from(name)), kind)
    }

    /// Arithmetic/bitwise binary over the operands' kind.
    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let kind = lhs.kind;
        expr(
            ExprNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            kind,
        )
    }

    /// Comparison / logical binary, producing `bool`.
    pub fn cmp(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        expr(
            ExprNode::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Kind::Bool,
        )
    }

    /// Explicit conversion.
    pub fn cast(operand: Expr, to: Kind) -> Expr {
        expr(ExprNode::Cast(Box::new(operand)), to)
    }

    /// Unary operation keeping the operand kind.
    pub fn unary(op: UnOp, operand: Expr) -> Expr {
        let kind = match op {
            UnOp::Not => Kind::Bool,
            _ => operand.kind,
        };
        expr(
            ExprNode::Unary {
                op,
                operand: Box::new(operand),
            },
            kind,
        )
    }

    /// Call of a named function value.
    pub fn call(name: &str, args: Vec<Expr>, ret: Kind) -> Expr {
        expr(
            ExprNode::Call {
                callee: Box::new(var(name, Kind::Function)),
                args,
            },
            ret,
        )
    }

    /// Array literal.
    pub fn array(items: Vec<Expr>) -> Expr {
        expr(ExprNode::ArrayLit(items), Kind::Array)
    }

    /// Array indexing.
    pub fn index(array: Expr, at: Expr, kind: Kind) -> Expr {
        expr(
            ExprNode::Index {
                array: Box::new(array),
                index: Box::new(at),
            },
            kind,
        )
    }

    /// Immutable binding.
    pub fn let_(name: &str, init: Expr) -> Stmt {
        stmt(StmtNode::Let {
            name: Rc::from(name),
            mutable: false,
            init,
        })
    }

    /// Mutable binding.
    pub fn let_mut(name: &str, init: Expr) -> Stmt {
        stmt(StmtNode::Let {
            name: Rc::from(name),
            mutable: true,
            init,
        })
    }

    /// Assignment to a variable.
    pub fn assign(name: &str, value: Expr) -> Stmt {
        stmt(StmtNode::Assign {
            target: AssignTarget::Var(Rc::from(name)),
            value,
        })
    }

    /// Assignment to an array element.
    pub fn assign_index(array: Expr, at: Expr, value: Expr) -> Stmt {
        stmt(StmtNode::Assign {
            target: AssignTarget::Index { array, index: at },
            value,
        })
    }

    /// `print` with one argument.
    pub fn print1(value: Expr) -> Stmt {
        stmt(StmtNode::Print(vec![value]))
    }

    /// Two-armed conditional.
    pub fn if_else(cond: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::If {
            cond,
            then_branch,
            else_branch: Some(else_branch),
        })
    }

    /// One-armed conditional.
    pub fn if_(cond: Expr, then_branch: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::If {
            cond,
            then_branch,
            else_branch: None,
        })
    }

    /// Unlabeled `while`.
    pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::While {
            label: None,
            cond,
            body,
        })
    }

    /// Induction loop with unit step.
    pub fn for_range(var: &str, kind: Kind, start: Expr, end: Expr, inclusive: bool, body: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::ForRange {
            label: None,
            var: Rc::from(var),
            var_kind: kind,
            start,
            end,
            inclusive,
            step: None,
            body,
        })
    }

    /// Iterator loop.
    pub fn for_each(var: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::ForEach {
            label: None,
            var: Rc::from(var),
            iterable,
            body,
        })
    }

    /// Function declaration.
    pub fn fn_decl(name: &str, params: &[(&str, Kind)], body: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::FnDecl {
            name: Rc::from(name),
            params: params
                .iter()
                .map(|(param, kind)| (Rc::from(*param), *kind))
                .collect(),
            body,
        })
    }

    /// `return value`.
    pub fn ret(value: Expr) -> Stmt {
        stmt(StmtNode::Return(Some(value)))
    }

    /// `try { body } catch name { handler }`.
    pub fn try_catch(body: Vec<Stmt>, catch_name: &str, handler: Vec<Stmt>) -> Stmt {
        stmt(StmtNode::Try {
            body,
            catch_name: Rc::from(catch_name),
            handler,
        })
    }

    /// Compiles and runs a module on a fresh capturing VM; returns the
    /// printed output and the outcome.
    pub fn run(module: &TypedModule) -> (String, Result<ProgramState, VmError>) {
        run_on(Vm::with_params(VmParams::default(), DispatchMode::Goto), module)
    }

    /// Same, on a caller-configured VM.
    pub fn run_on(
        mut vm: Vm,
        module: &TypedModule,
    ) -> (String, Result<ProgramState, VmError>) {
        vm.capture_output();

        let result = match compile(module) {
            Ok(chunk) => vm.execute(chunk),
            Err(diagnostics) => Err(VmError::Compile(diagnostics)),
        };

        (vm.take_output(), result)
    }

    /// Runs and asserts success; returns the printed output.
    pub fn run_expect(module: &TypedModule) -> String {
        let (output, result) = run(module);
        if let Err(error) = result {
            panic!("program failed: {error}\noutput so far: {output}");
        }
        output
    }
}
