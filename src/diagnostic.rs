//! Structured diagnostics with source locations.
//!
//! Every compiler and runtime failure surfaces as a [`Diagnostic`]:
//! a classification, a stable error code, a summary, and the source
//! span it originates from. Rendering follows the
//! `-- KIND: summary -- file:line:column` header convention with a
//! caret excerpt and any help/note stanzas registered for the code.

use std::fmt;
use std::rc::Rc;

/// A line/column pair, 1-based, recovered from a chunk's line table or
/// carried on an AST node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLoc {
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

impl SourceLoc {
    /// New location.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Classification of a diagnostic, printed in the report header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagnosticKind {
    /// Invalid token stream (reported by the external lexer through
    /// this same channel).
    Lexical,
    /// Unexpected token shape (external parser).
    Syntax,
    /// Type mismatch, undefined variable, arity mismatch.
    Semantic,
    /// `break`/`continue` outside a loop, unknown label.
    Scope,
    /// Signed overflow while folding constants.
    ConstantFold,
    /// Recoverable or fatal runtime failure.
    Runtime,
    /// Cooperative cancellation observed between instructions.
    Cancelled,
}

impl DiagnosticKind {
    /// Header word for the rendered report.
    pub const fn header(&self) -> &'static str {
        match self {
            Self::Lexical => "LEXICAL ERROR",
            Self::Syntax => "SYNTAX ERROR",
            Self::Semantic => "SEMANTIC ERROR",
            Self::Scope => "SCOPE ERROR",
            Self::ConstantFold => "CONSTANT OVERFLOW",
            Self::Runtime => "RUNTIME ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// One reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Classification.
    pub kind: DiagnosticKind,
    /// Stable error code, the key into the help registry.
    pub code: &'static str,
    /// One-line summary.
    pub message: String,
    /// Originating file.
    pub file: Rc<str>,
    /// Originating location.
    pub loc: SourceLoc,
}

impl Diagnostic {
    /// New diagnostic.
    pub fn new(
        kind: DiagnosticKind,
        code: &'static str,
        message: impl Into<String>,
        file: Rc<str>,
        loc: SourceLoc,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            file,
            loc,
        }
    }

    /// Renders the report. When the source text is available the
    /// offending line is excerpted with a caret under the column.
    pub fn render(&self, source: Option<&str>) -> String {
        use fmt::Write;

        let mut out = String::new();

        let _ = writeln!(
            out,
            "-- {}: {} -- {}:{}",
            self.kind.header(),
            self.message,
            self.file,
            self.loc
        );

        if let Some(text) = source.and_then(|s| s.lines().nth(self.loc.line.saturating_sub(1) as usize)) {
            let gutter = format!("{:>4}", self.loc.line);
            let _ = writeln!(out, "{} |", " ".repeat(gutter.len()));
            let _ = writeln!(out, "{gutter} | {text}");
            let _ = writeln!(
                out,
                "{} | {}^",
                " ".repeat(gutter.len()),
                " ".repeat(self.loc.column.saturating_sub(1) as usize)
            );
        }

        if let Some(entry) = registry_lookup(self.code) {
            if let Some(help) = entry.help {
                let _ = writeln!(out, "  = help: {help}");
            }
            if let Some(note) = entry.note {
                let _ = writeln!(out, "  = note: {note}");
            }
        }

        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "-- {}: {} -- {}:{}",
            self.kind.header(),
            self.message,
            self.file,
            self.loc
        )
    }
}

struct RegistryEntry {
    code: &'static str,
    help: Option<&'static str>,
    note: Option<&'static str>,
}

/// Help and note stanzas, pre-registered per error code.
const REGISTRY: &[RegistryEntry] = &[
    RegistryEntry {
        code: codes::TYPE_MISMATCH,
        help: Some("operands of an operator must share one kind; insert an explicit conversion"),
        note: Some("arithmetic never converts implicitly"),
    },
    RegistryEntry {
        code: codes::UNDEFINED_VARIABLE,
        help: Some("declare the variable with `let` before its first use"),
        note: None,
    },
    RegistryEntry {
        code: codes::ARITY_MISMATCH,
        help: Some("pass exactly as many arguments as the function declares"),
        note: None,
    },
    RegistryEntry {
        code: codes::BREAK_OUTSIDE_LOOP,
        help: Some("`break` is only meaningful inside `while` or `for`"),
        note: None,
    },
    RegistryEntry {
        code: codes::CONTINUE_OUTSIDE_LOOP,
        help: Some("`continue` is only meaningful inside `while` or `for`"),
        note: None,
    },
    RegistryEntry {
        code: codes::UNKNOWN_LABEL,
        help: Some("label a loop with `'name:` before jumping to it"),
        note: None,
    },
    RegistryEntry {
        code: codes::FOLD_OVERFLOW,
        help: Some("the expression overflows its signed kind at compile time"),
        note: Some("unsigned kinds wrap instead of overflowing"),
    },
    RegistryEntry {
        code: codes::CONST_POOL_FULL,
        help: Some("split the function; a chunk addresses at most 65535 constants"),
        note: None,
    },
    RegistryEntry {
        code: codes::REGISTER_PRESSURE,
        help: Some("simplify the expression; the temp band spilled past its overflow map"),
        note: None,
    },
    RegistryEntry {
        code: codes::DIVISION_BY_ZERO,
        help: Some("guard the divisor or catch the error with `try`"),
        note: None,
    },
];

fn registry_lookup(code: &str) -> Option<&'static RegistryEntry> {
    REGISTRY.iter().find(|entry| entry.code == code)
}

/// Stable error codes.
pub mod codes {
    /// Operator applied across kinds.
    pub const TYPE_MISMATCH: &str = "E1001";
    /// Name not resolvable through the scope stack.
    pub const UNDEFINED_VARIABLE: &str = "E1002";
    /// Call with the wrong argument count.
    pub const ARITY_MISMATCH: &str = "E1003";
    /// Assignment to an immutable binding.
    pub const IMMUTABLE_ASSIGN: &str = "E1004";
    /// `break` outside any loop.
    pub const BREAK_OUTSIDE_LOOP: &str = "E1401";
    /// `continue` outside any loop.
    pub const CONTINUE_OUTSIDE_LOOP: &str = "E1402";
    /// `break`/`continue` naming an unknown label.
    pub const UNKNOWN_LABEL: &str = "E1403";
    /// Signed overflow while folding.
    pub const FOLD_OVERFLOW: &str = "E1501";
    /// Constant pool exhausted.
    pub const CONST_POOL_FULL: &str = "E1601";
    /// Register allocator exhausted.
    pub const REGISTER_PRESSURE: &str = "E1602";
    /// Jump distance exceeds the 16-bit encoding.
    pub const JUMP_TOO_FAR: &str = "E1603";
    /// Runtime trap surfaced as a diagnostic.
    pub const RUNTIME_TRAP: &str = "R0001";
    /// Division by zero.
    pub const DIVISION_BY_ZERO: &str = "R0002";
    /// Fatal runtime failure.
    pub const RUNTIME_FATAL: &str = "R0100";
    /// Cooperative cancellation.
    pub const CANCELLED: &str = "R0200";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_follows_the_report_convention() {
        let d = Diagnostic::new(
            DiagnosticKind::Semantic,
            codes::UNDEFINED_VARIABLE,
            "undefined variable `x`",
            Rc::from("main.orus"),
            SourceLoc::new(3, 9),
        );

        assert_eq!(
            d.to_string(),
            "-- SEMANTIC ERROR: undefined variable `x` -- main.orus:3:9"
        );
    }

    #[test]
    fn render_excerpts_the_offending_line() {
        let d = Diagnostic::new(
            DiagnosticKind::Semantic,
            codes::UNDEFINED_VARIABLE,
            "undefined variable `x`",
            Rc::from("main.orus"),
            SourceLoc::new(2, 9),
        );

        let report = d.render(Some("let a = 1;\nlet y = x + 1;\n"));

        assert!(report.contains("   2 | let y = x + 1;"));
        assert!(report.contains("|         ^"));
        assert!(report.contains("= help:"));
    }
}
