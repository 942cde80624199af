//! Compiler backend: typed AST to bytecode chunks.
//!
//! Three passes over a module the external frontend has already type
//! checked: the AST optimizer (folding, small-loop unrolling,
//! loop-invariant hoisting), the code generator (register allocation,
//! emission, jump patching), and the peephole pass over the finished
//! stream (induction-step fusion). Diagnostics accumulate across
//! passes; compilation keeps going after an error so one run surfaces
//! as many problems as possible.

use crate::chunk::Chunk;
use crate::diagnostic::Diagnostic;

use std::rc::Rc;

pub mod ast;

mod allocator;
mod codegen;
mod optimizer;
mod peephole;
mod scope;

pub use allocator::RegisterAllocator;

/// Compiles a typed module into an executable chunk.
pub fn compile(module: &ast::TypedModule) -> Result<Rc<Chunk>, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();

    let optimized = optimizer::optimize(module.clone(), &mut diagnostics);
    let chunk = codegen::generate(&optimized, &mut diagnostics);

    if diagnostics.is_empty() {
        let chunk = peephole::fuse(chunk);
        Ok(Rc::new(chunk))
    } else {
        Err(diagnostics)
    }
}
