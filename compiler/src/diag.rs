// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic type returned by every compiler pass.
// All errors in this compiler are fatal for the module being compiled: a pass
// returns the first `Diagnostic` it hits and the pipeline stops.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, grouped by the pass that raises them.
pub mod codes {
    use super::DiagCode;

    // ── analyze / stamp (E01xx) ──
    /// Axis vectors are not prefix-related.
    pub const E0101: DiagCode = DiagCode("E0101");
    /// Input path missing from the input table.
    pub const E0102: DiagCode = DiagCode("E0102");
    /// Reference to a declaration that has not been analyzed.
    pub const E0103: DiagCode = DiagCode("E0103");
    /// Function id missing from the function table.
    pub const E0104: DiagCode = DiagCode("E0104");
    /// Dtype rule rejected the argument types.
    pub const E0105: DiagCode = DiagCode("E0105");
    /// Wrong number of arguments.
    pub const E0106: DiagCode = DiagCode("E0106");
    /// Reduce node names a function that is not a reducer.
    pub const E0107: DiagCode = DiagCode("E0107");
    /// Trait declaration does not produce a boolean.
    pub const E0108: DiagCode = DiagCode("E0108");
    /// Two declarations share a name.
    pub const E0109: DiagCode = DiagCode("E0109");
    /// Two input table entries share a path.
    pub const E0110: DiagCode = DiagCode("E0110");

    // ── carrier (E02xx) ──
    /// One axis vector realized by two different field paths.
    pub const E0201: DiagCode = DiagCode("E0201");

    // ── lower (E03xx) ──
    /// Local anchor path too short for the required axes.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// No carrier covers the required axes.
    pub const E0302: DiagCode = DiagCode("E0302");
    /// Reduction over a scalar argument.
    pub const E0303: DiagCode = DiagCode("E0303");
    /// Reduce argument axes differ from result axes ++ over.
    pub const E0304: DiagCode = DiagCode("E0304");

    // ── verify (E04xx) ──
    /// Register or accumulator read before definition.
    pub const E0401: DiagCode = DiagCode("E0401");
    /// Loop nesting does not balance.
    pub const E0402: DiagCode = DiagCode("E0402");
    /// More than one yield.
    pub const E0403: DiagCode = DiagCode("E0403");
    /// No yield.
    pub const E0404: DiagCode = DiagCode("E0404");
    /// Non-structural instruction after the yield.
    pub const E0405: DiagCode = DiagCode("E0405");
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    /// Declaration being compiled when the error was raised.
    pub decl: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related spans, or causes.
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            span,
            message: message.into(),
            hint: None,
            decl: None,
            related_spans: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    /// Shorthand for a diagnostic carrying `code`.
    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    /// Record the enclosing declaration. The innermost one wins.
    pub fn in_decl(mut self, name: &str) -> Self {
        if self.decl.is_none() {
            self.decl = Some(name.to_string());
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "error[{}]: {}", code, self.message)?;
        } else {
            write!(f, "error: {}", self.message)?;
        }
        if let Some(decl) = &self.decl {
            write!(f, " (in `{}`)", decl)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  note: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span::from(0..1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_decl() {
        let d = Diagnostic::error(codes::E0101, dummy_span(), "axes do not line up")
            .in_decl("subtotal");
        assert_eq!(
            format!("{d}"),
            "error[E0101]: axes do not line up (in `subtotal`)"
        );
    }

    #[test]
    fn innermost_decl_wins() {
        let d = Diagnostic::error(codes::E0103, dummy_span(), "unknown")
            .in_decl("inner")
            .in_decl("outer");
        assert_eq!(d.decl.as_deref(), Some("inner"));
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0201, dummy_span(), "ambiguous carrier")
            .with_hint("load the axis from a single field")
            .with_related(dummy_span(), "first path here")
            .with_cause("observed while scanning `total`", Some(dummy_span()));

        assert_eq!(d.code, Some(codes::E0201));
        assert_eq!(d.hint.as_deref(), Some("load the axis from a single field"));
        assert_eq!(d.related_spans.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
    }

    #[test]
    fn causes_rendered_before_hint() {
        let d = Diagnostic::error(codes::E0301, dummy_span(), "path too short")
            .with_cause("opening loop [a, b] of `sum`", Some(dummy_span()))
            .with_hint("use a deeper input");
        assert_eq!(
            format!("{d}"),
            "error[E0301]: path too short\n  note: opening loop [a, b] of `sum`\n  hint: use a deeper input"
        );
    }

    #[test]
    fn hint_rendered_on_second_line() {
        let d = Diagnostic::error(codes::E0404, dummy_span(), "declaration never yields")
            .with_hint("lowering must end with one yield");
        assert_eq!(
            format!("{d}"),
            "error[E0404]: declaration never yields\n  hint: lowering must end with one yield"
        );
    }
}
