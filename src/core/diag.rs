// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Diagnostics: errors, warnings, and source-located reporting.
//!
//! Every pipeline phase routes problems through a [`Diagnostics`] sink that
//! counts errors and warnings. Phases check the counters at their boundary;
//! a non-zero error count aborts the rest of the pipeline.

use std::fmt;

/// A source position: line and column range within the current input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub col_start: usize,
    pub col_end: usize,
}

impl Span {
    pub fn new(line: u32, col_start: usize, col_end: usize) -> Self {
        Self {
            line,
            col_start,
            col_end,
        }
    }

    pub fn at_line(line: u32) -> Self {
        Self {
            line,
            col_start: 0,
            col_end: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.line != 0
    }
}

/// Categories of assembler errors.
///
/// Orthogonal to transport: the same kinds flow through diagnostics and
/// through `Result` returns inside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    /// Parser-side malformed input. Never raised by the core itself.
    Syntax,
    /// Wrong kind in context (register where an integer was expected).
    Type,
    /// Semantically invalid literal or out-of-range constant.
    Value,
    Redefined,
    Undefined,
    /// A relocatable value shape the output format cannot express.
    TooComplex,
    NotAbsolute,
    NotConstant,
    ZeroDivision,
    Io,
    /// Invariant violation inside the assembler; unrecoverable.
    Internal,
}

/// An assembler error with a kind and message.
#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    pub fn with_param(kind: AsmErrorKind, msg: &str, param: &str) -> Self {
        Self {
            kind,
            message: format!("{msg}: {param}"),
        }
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A reported problem with its source location.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    pub error: AsmError,
}

impl Diagnostic {
    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        if self.span.is_valid() {
            format!("{}: {}: {}", self.span.line, sev, self.error.message())
        } else {
            format!("{}: {}", sev, self.error.message())
        }
    }

    /// Render with a caret-highlighted source line when available.
    pub fn format_with_context(&self, lines: Option<&[String]>, use_color: bool) -> String {
        let mut out = self.format();
        let Some(lines) = lines else {
            return out;
        };
        if !self.span.is_valid() {
            return out;
        }
        let idx = self.span.line.saturating_sub(1) as usize;
        if let Some(line) = lines.get(idx) {
            out.push('\n');
            let col = if self.span.col_start > 0 {
                Some(self.span.col_start)
            } else {
                None
            };
            out.push_str(&format!(
                "{:>5} | {}",
                self.span.line,
                crate::core::report::highlight_line(line, col, use_color)
            ));
        }
        out
    }
}

/// Sink for diagnostics; counts errors and warnings.
#[derive(Debug, Default)]
pub struct Diagnostics {
    diags: Vec<Diagnostic>,
    num_errors: usize,
    num_warnings: usize,
    warning_error: bool,
    suppress_warnings: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat warnings as errors when checking phase boundaries.
    pub fn set_warning_error(&mut self, enable: bool) {
        self.warning_error = enable;
    }

    /// Drop warnings entirely.
    pub fn set_suppress_warnings(&mut self, enable: bool) {
        self.suppress_warnings = enable;
    }

    pub fn error(&mut self, span: Span, error: AsmError) {
        self.num_errors += 1;
        self.diags.push(Diagnostic {
            span,
            severity: Severity::Error,
            error,
        });
    }

    pub fn warning(&mut self, span: Span, error: AsmError) {
        if self.suppress_warnings {
            return;
        }
        self.num_warnings += 1;
        self.diags.push(Diagnostic {
            span,
            severity: Severity::Warning,
            error,
        });
    }

    pub fn num_errors(&self) -> usize {
        self.num_errors
    }

    pub fn num_warnings(&self) -> usize {
        self.num_warnings
    }

    /// Effective error count for a phase-boundary check.
    pub fn phase_errors(&self) -> usize {
        if self.warning_error {
            self.num_errors + self.num_warnings
        } else {
            self.num_errors
        }
    }

    pub fn has_errors(&self) -> bool {
        self.phase_errors() > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_errors_counts_warnings_under_werror() {
        let mut diags = Diagnostics::new();
        diags.warning(Span::at_line(1), AsmError::new(AsmErrorKind::Value, "w"));
        assert_eq!(diags.phase_errors(), 0);
        diags.set_warning_error(true);
        assert_eq!(diags.phase_errors(), 1);
    }

    #[test]
    fn suppressed_warnings_are_dropped() {
        let mut diags = Diagnostics::new();
        diags.set_suppress_warnings(true);
        diags.warning(Span::at_line(3), AsmError::new(AsmErrorKind::Value, "w"));
        assert_eq!(diags.num_warnings(), 0);
        assert!(diags.diagnostics().is_empty());
    }

    #[test]
    fn diagnostic_format_includes_line_and_severity() {
        let diag = Diagnostic {
            span: Span::at_line(12),
            severity: Severity::Error,
            error: AsmError::new(AsmErrorKind::Undefined, "undefined symbol: foo"),
        };
        assert_eq!(diag.format(), "12: error: undefined symbol: foo");
    }
}
