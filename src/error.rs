//! Runtime and top-level error ladder.
//!
//! Handlers fail with a [`TrapKind`] (or a contextualized [`Trap`]);
//! the dispatch loop decorates traps with the source location recovered
//! from the line table and routes them through the try stack. Anything
//! that cannot be recovered is a [`Fatal`], which aborts the run while
//! leaving the VM reusable.

use crate::diagnostic::{codes, Diagnostic, DiagnosticKind, SourceLoc};

use std::rc::Rc;
use thiserror::Error;

/// Recoverable trap reasons.
///
/// The display form is the bare classification word; it is the prefix a
/// program observes when it stringifies a caught error object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum TrapKind {
    /// Operand kind does not match the opcode.
    #[error("TypeMismatch")]
    TypeMismatch,
    /// Checked signed arithmetic overflowed.
    #[error("ArithmeticOverflow")]
    ArithmeticOverflow,
    /// Integer division or remainder by zero.
    #[error("DivisionByZero")]
    DivisionByZero,
    /// Array or payload index out of range.
    #[error("IndexOutOfBounds")]
    IndexOutOfBounds,
    /// `nil` where a value was required.
    #[error("NilDereference")]
    NilDereference,
    /// Value-preserving conversion impossible.
    #[error("ConversionError")]
    ConversionError,
    /// Typed shadow bank read with the wrong kind tag.
    #[error("RegisterKindMismatch")]
    RegisterKindMismatch,
    /// Shift amount not below the operand width.
    #[error("ShiftOutOfRange")]
    ShiftOutOfRange,
    /// Call-frame depth limit exceeded.
    #[error("RecursionError")]
    RecursionError,
    /// Try-frame depth limit exceeded.
    #[error("TryDepthExceeded")]
    TryDepthExceeded,
    /// Explicitly raised by the program.
    #[error("UserRaised")]
    UserRaised,
    /// Native call with the wrong argument count.
    #[error("ArityMismatch")]
    ArityMismatch,
    /// A built-in I/O operation failed.
    #[error("IoError")]
    IoError,
    /// Cooperative cancellation observed at a safe point.
    #[error("Cancelled")]
    Cancelled,
}

impl TrapKind {
    /// Default human-readable description.
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::TypeMismatch => "operand kind does not match the operation",
            Self::ArithmeticOverflow => "arithmetic overflow",
            Self::DivisionByZero => "division by zero",
            Self::IndexOutOfBounds => "index out of bounds",
            Self::NilDereference => "nil dereference",
            Self::ConversionError => "value does not fit the target kind",
            Self::RegisterKindMismatch => "typed register read with the wrong kind",
            Self::ShiftOutOfRange => "shift amount exceeds the operand width",
            Self::RecursionError => "call depth limit exceeded",
            Self::TryDepthExceeded => "try depth limit exceeded",
            Self::UserRaised => "error raised by the program",
            Self::ArityMismatch => "wrong number of arguments",
            Self::IoError => "input/output failure",
            Self::Cancelled => "execution cancelled",
        }
    }

    /// Diagnostic code surfaced when the trap escapes uncaught.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DivisionByZero => codes::DIVISION_BY_ZERO,
            Self::Cancelled => codes::CANCELLED,
            _ => codes::RUNTIME_TRAP,
        }
    }
}

/// A recoverable trap with its context message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Trap {
    /// Classification.
    pub kind: TrapKind,
    /// Human-readable description.
    pub message: String,
}

impl Trap {
    /// Trap with an explicit message.
    pub fn new(kind: TrapKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TrapKind> for Trap {
    fn from(kind: TrapKind) -> Self {
        Self {
            kind,
            message: kind.describe().to_string(),
        }
    }
}

/// Unrecoverable interpreter failures. Execution aborts, the VM stays
/// usable for subsequent runs after cleanup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Fatal {
    /// Allocation would exceed the heap ceiling.
    #[error("out of memory: heap limit of {limit} bytes exceeded")]
    OutOfMemory {
        /// The configured ceiling.
        limit: usize,
    },
    /// A collection was requested while one was running.
    #[error("re-entrant garbage collection")]
    ReentrantGc,
    /// The instruction stream failed to decode; implies a compiler bug.
    #[error("malformed bytecode: {0}")]
    MalformedBytecode(#[from] orus_asm::DecodeError),
    /// A constant index escaped its pool; implies a compiler bug.
    #[error("constant index {0} out of range")]
    ConstantOutOfRange(u16),
    /// A native id with no registered function; implies a compiler bug.
    #[error("native function {0} is not registered")]
    UnknownNative(u8),
    /// Return without a frame; implies a compiler bug.
    #[error("call frame underflow")]
    FrameUnderflow,
}

/// Runtime error description: either specified trap behavior with a
/// fallback strategy, or a halt.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Specified error with a well-formed fallback strategy.
    #[error(transparent)]
    Trap(#[from] Trap),
    /// Unspecified error that must halt the execution.
    #[error("unrecoverable error: {0}")]
    Halt(#[from] Fatal),
}

impl RuntimeError {
    /// Flag whether the error is recoverable through a try frame.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Trap(_))
    }

    /// Flag whether the error must halt the execution.
    pub const fn must_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }
}

impl From<TrapKind> for RuntimeError {
    fn from(kind: TrapKind) -> Self {
        Self::Trap(kind.into())
    }
}

/// Top-level outcome surfaced to embedders.
#[derive(Debug, Error)]
pub enum VmError {
    /// Compilation failed; all accumulated diagnostics are returned.
    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    Compile(Vec<Diagnostic>),
    /// Execution failed; the diagnostic carries the trap or halt.
    #[error("{0}")]
    Runtime(Diagnostic),
    /// Cancellation propagated out of the program uncaught.
    #[error("{0}")]
    Cancelled(Diagnostic),
}

impl VmError {
    /// Process exit code an external CLI maps this error to: `1` for
    /// compile failures, `2` for runtime failures and cancellation.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Compile(_) => 1,
            Self::Runtime(_) | Self::Cancelled(_) => 2,
        }
    }

    /// Builds the runtime-side variant from an escaped error.
    pub fn from_runtime(error: RuntimeError, file: Rc<str>, loc: SourceLoc) -> Self {
        match error {
            RuntimeError::Trap(trap) => {
                let cancelled = trap.kind == TrapKind::Cancelled;
                let diagnostic = Diagnostic::new(
                    if cancelled {
                        DiagnosticKind::Cancelled
                    } else {
                        DiagnosticKind::Runtime
                    },
                    trap.kind.code(),
                    trap.to_string(),
                    file,
                    loc,
                );

                if cancelled {
                    Self::Cancelled(diagnostic)
                } else {
                    Self::Runtime(diagnostic)
                }
            }
            RuntimeError::Halt(fatal) => Self::Runtime(Diagnostic::new(
                DiagnosticKind::Runtime,
                codes::RUNTIME_FATAL,
                fatal.to_string(),
                file,
                loc,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_display_leads_with_the_kind_word() {
        let trap = Trap::from(TrapKind::DivisionByZero);
        assert!(trap.to_string().starts_with("DivisionByZero"));
    }

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        assert_eq!(VmError::Compile(vec![]).exit_code(), 1);

        let diag = Diagnostic::new(
            DiagnosticKind::Runtime,
            codes::RUNTIME_TRAP,
            "boom",
            Rc::from("main.orus"),
            SourceLoc::default(),
        );
        assert_eq!(VmError::Runtime(diag).exit_code(), 2);
    }
}
