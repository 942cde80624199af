//! The typed AST the backend consumes.
//!
//! Lexing, parsing and type inference are external; the tree arriving
//! here carries resolved kinds on every expression and a source
//! location on every node. The backend trusts the kinds (they pick the
//! opcodes) but still surfaces scope and pressure errors of its own.

use crate::diagnostic::SourceLoc;

use std::rc::Rc;

/// Resolved kind of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit unsigned integer.
    U32,
    /// 64-bit unsigned integer.
    U64,
    /// 64-bit float.
    F64,
    /// Boolean.
    Bool,
    /// String.
    Str,
    /// `nil` / no value.
    Nil,
    /// Array of values.
    Array,
    /// Struct instance.
    Struct,
    /// Enum instance.
    Enum,
    /// Integer range value.
    Range,
    /// Function value.
    Function,
}

impl Kind {
    /// Whether values of this kind live in the numeric typed banks.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::I32 | Self::I64 | Self::U32 | Self::U64 | Self::F64)
    }
}

/// A literal with its kind carried by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    /// `nil`.
    Nil,
    /// Boolean literal.
    Bool(bool),
    /// `i32` literal.
    I32(i32),
    /// `i64` literal.
    I64(i64),
    /// `u32` literal.
    U32(u32),
    /// `u64` literal.
    U64(u64),
    /// `f64` literal.
    F64(f64),
    /// String literal.
    Str(Rc<str>),
}

impl Lit {
    /// Kind of the literal.
    pub const fn kind(&self) -> Kind {
        match self {
            Self::Nil => Kind::Nil,
            Self::Bool(_) => Kind::Bool,
            Self::I32(_) => Kind::I32,
            Self::I64(_) => Kind::I64,
            Self::U32(_) => Kind::U32,
            Self::U64(_) => Kind::U64,
            Self::F64(_) => Kind::F64,
            Self::Str(_) => Kind::Str,
        }
    }
}

/// Binary operators. Arithmetic and comparison operators apply to one
/// numeric kind (the frontend inserts [`ExprNode::Cast`] where kinds
/// differ); `Add` over [`Kind::Str`] is concatenation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Addition / string concatenation.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Mod,
    /// Deep equality.
    Eq,
    /// Negated deep equality.
    Ne,
    /// Ordered less-than.
    Lt,
    /// Ordered less-or-equal.
    Le,
    /// Ordered greater-than.
    Gt,
    /// Ordered greater-or-equal.
    Ge,
    /// Boolean AND.
    And,
    /// Boolean OR.
    Or,
    /// Bitwise AND (`i32`).
    BitAnd,
    /// Bitwise OR (`i32`).
    BitOr,
    /// Bitwise XOR (`i32`).
    BitXor,
    /// Left shift (`i32`).
    Shl,
    /// Logical right shift (`i32`).
    Shr,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Numeric negation.
    Neg,
    /// Boolean NOT.
    Not,
    /// Bitwise NOT (`i32`).
    BitNot,
}

/// A typed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Node payload.
    pub node: ExprNode,
    /// Resolved kind.
    pub kind: Kind,
    /// Source location.
    pub loc: SourceLoc,
}

/// Expression payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    /// Literal value.
    Literal(Lit),
    /// Variable reference, resolved through the scope stack.
    Var(Rc<str>),
    /// Binary operation over operands of one kind.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Explicit kind conversion; the target kind is the expression's
    /// own `kind`.
    Cast(Box<Expr>),
    /// Call of a function value.
    Call {
        /// Callee expression.
        callee: Box<Expr>,
        /// Arguments in order.
        args: Vec<Expr>,
    },
    /// Call of a registered native (`read_line`, `timestamp`, ...).
    Builtin {
        /// Native name, resolved to an id at emission.
        name: Rc<str>,
        /// Arguments in order.
        args: Vec<Expr>,
    },
    /// Array indexing.
    Index {
        /// Array expression.
        array: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Array literal.
    ArrayLit(Vec<Expr>),
    /// Struct construction, fields in declaration order.
    StructLit(Vec<Expr>),
    /// Enum construction.
    EnumLit {
        /// Declaration-order variant index.
        variant: u32,
        /// Payload expressions.
        payload: Vec<Expr>,
    },
    /// Struct field access by declaration index.
    Field {
        /// Struct expression.
        object: Box<Expr>,
        /// Field index.
        index: u32,
    },
    /// Variant index of an enum value, as `i32`.
    TagOf(Box<Expr>),
    /// Payload element of an enum value.
    PayloadOf {
        /// Enum expression.
        object: Box<Expr>,
        /// Payload index.
        index: u32,
    },
    /// Range value `start..end` (half-open at runtime; the frontend
    /// rewrites `..=` by widening `end`).
    Range {
        /// Start bound.
        start: Box<Expr>,
        /// End bound (exclusive).
        end: Box<Expr>,
    },
}

/// Assignment targets.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// Named variable.
    Var(Rc<str>),
    /// Array element.
    Index {
        /// Array expression.
        array: Expr,
        /// Index expression.
        index: Expr,
    },
    /// Struct field.
    Field {
        /// Struct expression.
        object: Expr,
        /// Field index.
        index: u32,
    },
}

/// A typed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Node payload.
    pub node: StmtNode,
    /// Source location.
    pub loc: SourceLoc,
}

/// Statement payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtNode {
    /// `let name = init`.
    Let {
        /// Binding name.
        name: Rc<str>,
        /// Whether assignment is allowed.
        mutable: bool,
        /// Initializer.
        init: Expr,
    },
    /// Assignment to a resolved target.
    Assign {
        /// Target.
        target: AssignTarget,
        /// Right-hand side.
        value: Expr,
    },
    /// Expression evaluated for effect.
    Expr(Expr),
    /// `print(...)` with one or more arguments.
    Print(Vec<Expr>),
    /// Two-armed conditional.
    If {
        /// Condition (`bool`).
        cond: Expr,
        /// Then branch.
        then_branch: Vec<Stmt>,
        /// Else branch.
        else_branch: Option<Vec<Stmt>>,
    },
    /// Condition-tested loop.
    While {
        /// Optional label for `break`/`continue`.
        label: Option<Rc<str>>,
        /// Condition (`bool`).
        cond: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Induction loop over an integer range.
    ForRange {
        /// Optional label.
        label: Option<Rc<str>>,
        /// Induction variable.
        var: Rc<str>,
        /// Kind of the induction variable.
        var_kind: Kind,
        /// Start bound.
        start: Expr,
        /// End bound.
        end: Expr,
        /// Whether `end` is included.
        inclusive: bool,
        /// Step; `None` is one.
        step: Option<Expr>,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Iterator loop over an array or range value.
    ForEach {
        /// Optional label.
        label: Option<Rc<str>>,
        /// Element variable.
        var: Rc<str>,
        /// Iterated expression.
        iterable: Expr,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Braced block with its own scope.
    Block(Vec<Stmt>),
    /// Function declaration; binds a closure value.
    FnDecl {
        /// Function name.
        name: Rc<str>,
        /// Parameters with their kinds.
        params: Vec<(Rc<str>, Kind)>,
        /// Body.
        body: Vec<Stmt>,
    },
    /// Return, with or without a value.
    Return(Option<Expr>),
    /// `break`, optionally labeled.
    Break(Option<Rc<str>>),
    /// `continue`, optionally labeled.
    Continue(Option<Rc<str>>),
    /// `try { body } catch name { handler }`.
    Try {
        /// Protected statements.
        body: Vec<Stmt>,
        /// Name the error object is bound to.
        catch_name: Rc<str>,
        /// Handler statements.
        handler: Vec<Stmt>,
    },
    /// Raises a value as an error.
    Raise(Expr),
}

/// A type-checked module ready for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedModule {
    /// Module name.
    pub name: Rc<str>,
    /// Source file path, carried into diagnostics and line tables.
    pub file: Rc<str>,
    /// Top-level statements.
    pub stmts: Vec<Stmt>,
}
