//! Error types for the template engine.

use thiserror::Error;

/// A markup error with the template position where it was found.
///
/// Lines and columns are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("template syntax error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        SyntaxError {
            line,
            column,
            message: message.into(),
        }
    }
}
