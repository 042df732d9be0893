//! Compile diagnostics and the per-module error log.
//!
//! Non-fatal errors anywhere in the pipeline are pushed onto an [`ErrorLog`]
//! and rendered after the module finishes; the failing node's type becomes
//! the `Error` sentinel and checking continues. A module whose log contains
//! any error does not proceed to back-end lowering.

use serde::{Deserialize, Serialize};

use crate::source::{SourceBuffer, Span};

/// Pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Lex,
    Parse,
    Resolve,
    Type,
    /// Special-declaration signature validation (`__print__` and friends).
    Decl,
    Interp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic with enough context to render a line + snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

/// Per-module accumulating diagnostic sink.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorLog {
    entries: Vec<Diagnostic>,
}

impl ErrorLog {
    pub fn new() -> ErrorLog {
        ErrorLog::default()
    }

    pub fn error(&mut self, stage: Stage, span: Span, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            stage,
            severity: Severity::Error,
            message: message.into(),
            span,
        });
    }

    pub fn warn(&mut self, stage: Stage, span: Span, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            stage,
            severity: Severity::Warning,
            message: message.into(),
            span,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders all entries against a source buffer, grouped under its name.
    pub fn render(&self, src: &SourceBuffer) -> String {
        let mut out = String::new();
        if self.entries.is_empty() {
            return out;
        }
        out.push_str(&format!("{}:\n", src.name()));
        for d in &self.entries {
            let line = src.line_of(d.span.lo);
            let sev = match d.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            };
            out.push_str(&format!("  {}:{}: {}\n", sev, line, d.message));
            let snippet = src.line_text(line);
            if !snippet.is_empty() {
                out.push_str(&format!("    | {}\n", snippet));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut log = ErrorLog::new();
        log.warn(Stage::Lex, Span::new(0, 1), "odd escape");
        assert!(!log.has_errors());
        log.error(Stage::Type, Span::new(0, 1), "mismatch");
        assert!(log.has_errors());
        assert_eq!(log.entries().len(), 2);
    }

    #[test]
    fn render_includes_line_and_snippet() {
        let src = SourceBuffer::new("demo.tn", "x := 1\ny := true + 3\n");
        let mut log = ErrorLog::new();
        log.error(Stage::Type, Span::new(12, 20), "operands do not match");
        let rendered = log.render(&src);
        assert!(rendered.contains("demo.tn:"));
        assert!(rendered.contains("error:2:"));
        assert!(rendered.contains("y := true + 3"));
    }
}
