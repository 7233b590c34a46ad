/// Error types for the view compiler

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TemplateSyntax(#[from] simpleview_engine::SyntaxError),

    #[error("Compilation failed with {} error(s):\n{}", .0.len(), .0.iter().map(|d| format!("  - {}", d)).collect::<Vec<_>>().join("\n"))]
    Compilation(Vec<Diagnostic>),

    #[error("Unable to load template library {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Template library does not export `{expected}` (found: {})", .found.join(", "))]
    ContractViolation { expected: String, found: Vec<String> },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Toolchain error: {0}")]
    Toolchain(String),

    #[error("Configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Compilation task aborted: {0}")]
    Aborted(String),
}

impl CompileError {
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        CompileError::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompileError::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Diagnostics carried by a compilation failure.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CompileError::Compilation(diagnostics) => diagnostics,
            _ => &[],
        }
    }
}

/// Diagnostic severity as reported by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Where a diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A line of the template itself, e.g. a directive.
    Template { line: usize },
    /// A position in the generated source, with the template line it maps to.
    Generated {
        line: usize,
        column: usize,
        template_line: Option<usize>,
    },
}

impl SourceLocation {
    /// The template line this location corresponds to, if known.
    pub fn template_line(&self) -> Option<usize> {
        match self {
            SourceLocation::Template { line } => Some(*line),
            SourceLocation::Generated { template_line, .. } => *template_line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Template { line } => write!(f, "template line {}", line),
            SourceLocation::Generated {
                line,
                column,
                template_line: Some(template_line),
            } => write!(
                f,
                "template line {} (generated {}:{})",
                template_line, line, column
            ),
            SourceLocation::Generated {
                line,
                column,
                template_line: None,
            } => write!(f, "generated {}:{}", line, column),
        }
    }
}

/// A single compiler message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Compiler error code such as `E0412`.
    pub code: Option<String>,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            code: None,
            location: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.code {
            Some(code) => write!(f, "{}[{}]: {}", level, code, self.message)?,
            None => write!(f, "{}: {}", level, self.message)?,
        }
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_error_lists_every_diagnostic() {
        let err = CompileError::Compilation(vec![
            Diagnostic::error("cannot find type `Foo`").at(SourceLocation::Template { line: 1 }),
            Diagnostic {
                severity: Severity::Error,
                message: "mismatched types".to_string(),
                code: Some("E0308".to_string()),
                location: Some(SourceLocation::Generated {
                    line: 12,
                    column: 5,
                    template_line: Some(4),
                }),
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("2 error(s)"));
        assert!(text.contains("error: cannot find type `Foo` at template line 1"));
        assert!(text.contains("error[E0308]: mismatched types at template line 4 (generated 12:5)"));
        assert_eq!(err.diagnostics().len(), 2);
    }

    #[test]
    fn test_contract_violation_message() {
        let err = CompileError::ContractViolation {
            expected: "views::View".to_string(),
            found: vec!["other::Page".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Template library does not export `views::View` (found: other::Page)"
        );
        assert!(err.diagnostics().is_empty());
    }
}
