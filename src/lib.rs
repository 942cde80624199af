//! Orus execution core: compiler backend and register VM.
//!
//! The crate consumes a type-checked AST (lexing, parsing and
//! inference are external), lowers it through the optimizer and code
//! generator into [`chunk::Chunk`] bytecode, and interprets it on a
//! register machine with typed shadow banks and a mark-sweep heap.
//!
//! The embedder owns a [`Vm`] and reuses it across runs; see
//! [`run_source`] for the whole pipeline behind one call.

#![warn(missing_docs)]

pub mod call;
pub mod chunk;
pub mod compiler;
pub mod consts;
pub mod debug;
pub mod diagnostic;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod profiler;
pub mod registers;
pub mod state;
pub mod util;
pub mod value;

use compiler::ast::TypedModule;
use diagnostic::Diagnostic;
use error::VmError;
use interpreter::Vm;
use state::ProgramState;

/// The external frontend boundary: source text in, typed AST out.
///
/// Lexical, syntactic and type errors are reported through the same
/// diagnostic channel the backend uses, so one caller renders them all
/// identically.
pub trait Frontend {
    /// Lowers a module's source to its typed AST.
    fn lower(&self, source: &str, module: &str) -> Result<TypedModule, Vec<Diagnostic>>;
}

/// The module loader boundary: resolve a module name to source text
/// and a cache key. Cached compiled chunks are opaque bytes to the
/// core (see [`chunk::Chunk::to_bytes`]).
pub trait ModuleLoader {
    /// Resolves a module name; `None` when unknown.
    fn resolve(&self, name: &str) -> Option<(String, String)>;
}

/// Compiles and runs one module. The VM is passed as mutable context
/// so globals, heap and interned strings persist across runs.
///
/// The error maps onto process exit codes through
/// [`VmError::exit_code`]: `1` for compile errors, `2` for runtime
/// errors.
pub fn run_source<F>(
    vm: &mut Vm,
    frontend: &F,
    source: &str,
    module: &str,
) -> Result<ProgramState, VmError>
where
    F: Frontend,
{
    let ast = frontend.lower(source, module).map_err(VmError::Compile)?;
    let chunk = compiler::compile(&ast).map_err(VmError::Compile)?;
    vm.execute(chunk)
}

/// `tracing` filter directive derived from `ORUS_LOG_LEVEL`
/// (`debug|info|warn|error`); embedders and tests feed it to their
/// subscriber's `EnvFilter`.
pub fn log_env_filter() -> String {
    let level = match std::env::var("ORUS_LOG_LEVEL").as_deref() {
        Ok("debug") => "debug",
        Ok("info") => "info",
        Ok("warn") => "warn",
        Ok("error") => "error",
        _ => "warn",
    };

    format!("orus_vm={level}")
}

/// Convenience re-exports mirroring how embedders consume the crate.
pub mod prelude {
    pub use crate::chunk::{Chunk, Constant, FunctionProto};
    pub use crate::compiler::{self, ast};
    pub use crate::diagnostic::{Diagnostic, DiagnosticKind, SourceLoc};
    pub use crate::error::{Fatal, RuntimeError, Trap, TrapKind, VmError};
    pub use crate::interpreter::{DispatchMode, Vm, VmParams};
    pub use crate::state::{ExecuteState, ProgramState};
    pub use crate::value::{ObjId, ObjectBody, TypedCell, TypedKind, Value};
    pub use crate::{run_source, Frontend, ModuleLoader};
}
