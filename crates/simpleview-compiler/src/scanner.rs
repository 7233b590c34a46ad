//! Directive scanning.
//!
//! Reads a template line by line, records the first `@model` and the first
//! `@handler` directive, and copies every line (directives included) into a
//! fresh buffer that replaces the original template.

use std::io::BufRead;
use std::sync::Arc;

use parking_lot::Mutex;

/// Token declaring the model type.
pub const MODEL_DIRECTIVE: &str = "@model";
/// Token declaring the handler type.
pub const HANDLER_DIRECTIVE: &str = "@handler";

/// The two declaration directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Model,
    Handler,
}

impl DirectiveKind {
    pub fn token(&self) -> &'static str {
        match self {
            DirectiveKind::Model => MODEL_DIRECTIVE,
            DirectiveKind::Handler => HANDLER_DIRECTIVE,
        }
    }
}

/// A directive found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Type text after the token, trimmed. Empty when nothing follows it.
    pub raw_type: String,
    /// 1-based template line.
    pub line: usize,
}

/// Declarations honored for one template: first occurrence of each kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    pub model: Option<Directive>,
    pub handler: Option<Directive>,
}

impl Declarations {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.handler.is_none()
    }

    fn record(&mut self, line: &str, line_no: usize) {
        let trimmed = line.trim();
        for kind in [DirectiveKind::Model, DirectiveKind::Handler] {
            let slot = match kind {
                DirectiveKind::Model => &mut self.model,
                DirectiveKind::Handler => &mut self.handler,
            };
            if slot.is_some() {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix(kind.token()) {
                *slot = Some(Directive {
                    kind,
                    raw_type: rest.trim().to_string(),
                    line: line_no,
                });
            }
        }
    }
}

/// A template after scanning: the rewritten text and what it declares.
#[derive(Debug, Clone)]
pub struct ScannedTemplate {
    pub source: Arc<str>,
    pub declarations: Declarations,
}

/// Scan a template from a reader. Lines are copied byte for byte,
/// terminators included.
pub fn scan<R: BufRead>(mut reader: R) -> std::io::Result<ScannedTemplate> {
    let mut buffer = String::new();
    let mut declarations = Declarations::default();
    let mut line = String::new();
    let mut line_no = 0;

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        line_no += 1;
        declarations.record(&line, line_no);
        buffer.push_str(&line);
    }

    Ok(ScannedTemplate {
        source: Arc::from(buffer),
        declarations,
    })
}

/// Scan an in-memory template.
pub fn scan_str(template: &str) -> ScannedTemplate {
    let mut declarations = Declarations::default();
    for (idx, line) in template.split_inclusive('\n').enumerate() {
        declarations.record(line, idx + 1);
    }

    ScannedTemplate {
        source: Arc::from(template),
        declarations,
    }
}

/// A shared, replaceable handle to the current template text.
///
/// Readers always observe either the old or the new text, never a mix.
#[derive(Debug)]
pub struct TemplateSlot {
    current: Mutex<Arc<str>>,
}

impl TemplateSlot {
    pub fn new(template: impl Into<Arc<str>>) -> Self {
        Self {
            current: Mutex::new(template.into()),
        }
    }

    /// The current template text.
    pub fn load(&self) -> Arc<str> {
        self.current.lock().clone()
    }

    /// Replace the template unconditionally, returning the previous text.
    #[cfg(test)]
    fn replace(&self, template: impl Into<Arc<str>>) -> Arc<str> {
        std::mem::replace(&mut *self.current.lock(), template.into())
    }

    /// Install `new` only if the slot still holds `expected`.
    ///
    /// Returns the previous text on success, or the text that is actually
    /// installed when another writer got there first.
    pub fn compare_and_swap(&self, expected: &Arc<str>, new: Arc<str>) -> Result<Arc<str>, Arc<str>> {
        let mut current = self.current.lock();
        if Arc::ptr_eq(&current, expected) {
            Ok(std::mem::replace(&mut *current, new))
        } else {
            Err(current.clone())
        }
    }
}

/// Scan the slot's template and swap the rewritten buffer in.
///
/// If another writer replaces the template mid-scan, the new text is
/// scanned instead, so the declarations always describe what is installed.
pub fn scan_in_place(slot: &TemplateSlot) -> ScannedTemplate {
    let mut current = slot.load();
    loop {
        let scanned = scan_str(&current);
        match slot.compare_and_swap(&current, scanned.source.clone()) {
            Ok(_) => return scanned,
            Err(actual) => {
                tracing::debug!("Template replaced during scan, rescanning");
                current = actual;
            }
        }
    }
}
