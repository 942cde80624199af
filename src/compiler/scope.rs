//! Scope stack and loop bookkeeping for the code generator.

use crate::compiler::ast::Kind;

use std::rc::Rc;

/// One resolved binding.
#[derive(Debug, Clone)]
pub struct Local {
    /// Binding name.
    pub name: Rc<str>,
    /// Home register (frame band, or global band at module level).
    pub reg: u8,
    /// Whether assignment is allowed.
    pub mutable: bool,
    /// Declared kind.
    pub kind: Kind,
}

/// Pending forward-jump holes of one loop, flushed when the loop's
/// extent becomes known.
#[derive(Debug, Clone, Default)]
pub struct LoopPatches {
    /// `break` holes, patched to just past the loop.
    pub breaks: Vec<usize>,
    /// `continue` holes, patched to the loop's step position. Empty
    /// for loops whose continue edge jumps backward directly.
    pub continues: Vec<usize>,
}

/// A loop's codegen context, carried by its scope entry.
#[derive(Debug, Clone)]
pub struct LoopCtx {
    /// Loop label, matched by labeled `break`/`continue`.
    pub label: Option<Rc<str>>,
    /// Code offset of the loop header.
    pub header: usize,
    /// Where `continue` goes when it jumps backward (`while` loops);
    /// `None` defers continues to the forward patch list (`for` loops,
    /// whose step section is not yet emitted).
    pub continue_target: Option<usize>,
    /// Unresolved break/continue holes.
    pub patches: LoopPatches,
}

/// Scope flavors; loops carry their patch lists.
#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// Function body (frame root).
    Function,
    /// Plain `{ ... }` block.
    Block,
    /// `try` body: jumps that leave it must pop its try frame.
    Try,
    /// Loop body.
    Loop(LoopCtx),
}

/// One lexical scope.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Flavor.
    pub kind: ScopeKind,
    /// Bindings declared at this level, in declaration order.
    pub locals: Vec<Local>,
}

impl Scope {
    /// Empty scope of the given flavor.
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            locals: Vec::new(),
        }
    }
}

/// Innermost-first search for a binding.
pub fn resolve<'a>(scopes: &'a [Scope], name: &str) -> Option<&'a Local> {
    scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.locals.iter().rev())
        .find(|local| &*local.name == name)
}
