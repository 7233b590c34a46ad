//! Line-level markup scanning.
//!
//! A template line is split into literal text, `@expr` / `@( expr )`
//! expressions and `@{ stmts }` code blocks. Delimiters must balance on the
//! line they open on.

use crate::error::SyntaxError;
use crate::Result;

/// A piece of a template line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Literal text written as-is.
    Text(&'a str),
    /// An expression formatted with `Display`.
    Expr(&'a str),
    /// Statements emitted verbatim into the render body.
    Code(&'a str),
}

/// Split one template line (without its line terminator) into segments.
///
/// `line_no` is the 1-based template line, used for error positions.
pub fn parse_line(line: &str, line_no: usize) -> Result<Vec<Segment<'_>>> {
    let bytes = line.as_bytes();
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'@' {
            i += 1;
            continue;
        }

        if text_start < i {
            segments.push(Segment::Text(&line[text_start..i]));
        }

        match bytes.get(i + 1).copied() {
            Some(b'@') => {
                segments.push(Segment::Text(&line[i + 1..i + 2]));
                i += 2;
            }
            Some(b'(') => {
                let close = find_closing(line, i + 1, b'(', b')').ok_or_else(|| {
                    error_at(line, line_no, i, "unclosed `@(` expression")
                })?;
                let expr = line[i + 2..close].trim();
                if expr.is_empty() {
                    return Err(error_at(line, line_no, i, "empty `@( )` expression"));
                }
                segments.push(Segment::Expr(expr));
                i = close + 1;
            }
            Some(b'{') => {
                let close = find_closing(line, i + 1, b'{', b'}')
                    .ok_or_else(|| error_at(line, line_no, i, "unclosed `@{` code block"))?;
                let code = line[i + 2..close].trim();
                if !code.is_empty() {
                    segments.push(Segment::Code(code));
                }
                i = close + 1;
            }
            Some(b) if is_ident_start(b) => {
                let end = member_path_end(bytes, i + 1);
                segments.push(Segment::Expr(&line[i + 1..end]));
                i = end;
            }
            Some(_) => {
                let found = line[i + 1..].chars().next().unwrap_or('@');
                return Err(error_at(
                    line,
                    line_no,
                    i + 1,
                    format!("unexpected `{}` after `@` (use `@@` for a literal `@`)", found),
                ));
            }
            None => {
                return Err(error_at(line, line_no, i, "dangling `@` at end of line"));
            }
        }

        text_start = i;
    }

    if text_start < bytes.len() {
        segments.push(Segment::Text(&line[text_start..]));
    }

    Ok(segments)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// End of an implicit `ident(.ident)*` member path starting at `start`.
fn member_path_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    loop {
        while end < bytes.len() && is_ident_continue(bytes[end]) {
            end += 1;
        }
        // A trailing dot belongs to the surrounding text.
        if end + 1 < bytes.len() && bytes[end] == b'.' && is_ident_start(bytes[end + 1]) {
            end += 1;
        } else {
            return end;
        }
    }
}

/// Find the byte index of the delimiter closing the one at `open_at`,
/// skipping over double-quoted string literals.
fn find_closing(line: &str, open_at: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open_at..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(open_at + offset);
            }
        }
    }

    None
}

fn error_at(line: &str, line_no: usize, byte_idx: usize, message: impl Into<String>) -> SyntaxError {
    let column = line[..byte_idx].chars().count() + 1;
    SyntaxError::new(line_no, column, message)
}
