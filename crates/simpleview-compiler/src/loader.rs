//! Loading compiled view libraries.
//!
//! A library is opened once and never closed: the handle is leaked so the
//! render function stays valid for the life of the process. Long-lived
//! hosts that recompile templates repeatedly accumulate one mapping per
//! compile.

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use simpleview_engine::{status, EXPORTS_SYMBOL};

use crate::error::{CompileError, Result};

type WriteFn = unsafe extern "C" fn(*mut c_void, *const u8, usize);
type RenderFn = unsafe extern "C" fn(*const c_void, *const c_void, *mut c_void, WriteFn) -> i32;

/// One exported view (must match the generated layout).
#[repr(C)]
struct RawExport {
    name: *const u8,
    name_len: usize,
    model_type: *const u8,
    model_type_len: usize,
    handler_type: *const u8,
    handler_type_len: usize,
    render: RenderFn,
}

/// The export table returned by [`EXPORTS_SYMBOL`].
#[repr(C)]
struct RawExportTable {
    entries: *const RawExport,
    len: usize,
}

type ExportsFn = unsafe extern "C" fn() -> RawExportTable;

/// The view produced by compiling a template.
#[derive(Clone)]
pub struct EntryType {
    name: String,
    model_type: Option<String>,
    handler_type: Option<String>,
    render: RenderFn,
    library_path: PathBuf,
}

impl fmt::Debug for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryType")
            .field("name", &self.name)
            .field("model_type", &self.model_type)
            .field("handler_type", &self.handler_type)
            .field("library_path", &self.library_path)
            .finish()
    }
}

impl EntryType {
    /// Fully-qualified name of the view type.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_type(&self) -> Option<&str> {
        self.model_type.as_deref()
    }

    pub fn handler_type(&self) -> Option<&str> {
        self.handler_type.as_deref()
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    /// Render a view that declares neither a model nor a handler.
    pub fn render(&self) -> Result<String> {
        // SAFETY: null pointers are rejected by the generated code when the
        // view declares a model or handler.
        unsafe { self.render_raw(std::ptr::null(), std::ptr::null()) }
    }

    /// Render with a model and handler.
    ///
    /// # Safety
    ///
    /// `M` and `H` must be the exact types named by [`model_type`] and
    /// [`handler_type`], compiled by the same toolchain.
    ///
    /// [`model_type`]: EntryType::model_type
    /// [`handler_type`]: EntryType::handler_type
    pub unsafe fn render_with<M, H>(&self, model: Option<&M>, handler: Option<&H>) -> Result<String> {
        let model = model.map_or(std::ptr::null(), |m| m as *const M as *const c_void);
        let handler = handler.map_or(std::ptr::null(), |h| h as *const H as *const c_void);
        unsafe { self.render_raw(model, handler) }
    }

    unsafe fn render_raw(&self, model: *const c_void, handler: *const c_void) -> Result<String> {
        let mut out = String::new();
        let code = unsafe {
            (self.render)(
                model,
                handler,
                &mut out as *mut String as *mut c_void,
                collect_fragment,
            )
        };

        match code {
            status::OK => Ok(out),
            status::MISSING_MODEL => Err(CompileError::Render(format!(
                "view `{}` requires a model of type {}",
                self.name,
                self.model_type.as_deref().unwrap_or("?")
            ))),
            status::MISSING_HANDLER => Err(CompileError::Render(format!(
                "view `{}` requires a handler of type {}",
                self.name,
                self.handler_type.as_deref().unwrap_or("?")
            ))),
            status::FORMAT_ERROR => Err(CompileError::Render(format!(
                "view `{}` failed to format its output",
                self.name
            ))),
            status::PANICKED => Err(CompileError::Render(format!("view `{}` panicked", self.name))),
            other => Err(CompileError::Render(format!(
                "view `{}` returned unknown status {}",
                self.name, other
            ))),
        }
    }
}

unsafe extern "C" fn collect_fragment(sink: *mut c_void, ptr: *const u8, len: usize) {
    let out = unsafe { &mut *(sink as *mut String) };
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    out.push_str(&String::from_utf8_lossy(bytes));
}

/// Load `path` and return the first exported view, checking that a view
/// named `expected` is among the exports.
pub fn load_entry(path: &Path, expected: &str) -> Result<EntryType> {
    // SAFETY: the library was just produced by the view compiler; its
    // initialisers are the standard library's.
    let library = unsafe { Library::new(path) }
        .map_err(|e| CompileError::load(path, e.to_string()))?;
    let library: &'static Library = Box::leak(Box::new(library));

    let table = unsafe {
        let exports: Symbol<ExportsFn> = library
            .get(EXPORTS_SYMBOL.as_bytes())
            .map_err(|e| CompileError::load(path, format!("missing `{}`: {}", EXPORTS_SYMBOL, e)))?;
        exports()
    };

    if table.entries.is_null() || table.len == 0 {
        return Err(CompileError::load(path, "library exports no views"));
    }

    // SAFETY: the table points at a static array inside the leaked library.
    let raw_entries = unsafe { std::slice::from_raw_parts(table.entries, table.len) };
    let mut entries = Vec::with_capacity(raw_entries.len());
    for raw in raw_entries {
        entries.push(EntryType {
            name: read_str(path, raw.name, raw.name_len)?,
            model_type: non_empty(read_str(path, raw.model_type, raw.model_type_len)?),
            handler_type: non_empty(read_str(path, raw.handler_type, raw.handler_type_len)?),
            render: raw.render,
            library_path: path.to_path_buf(),
        });
    }

    if !entries.iter().any(|e| e.name == expected) {
        return Err(CompileError::ContractViolation {
            expected: expected.to_string(),
            found: entries.into_iter().map(|e| e.name).collect(),
        });
    }

    let entry = entries.swap_remove(0);
    tracing::debug!("Loaded view {} from {}", entry.name, path.display());
    Ok(entry)
}

fn read_str(path: &Path, ptr: *const u8, len: usize) -> Result<String> {
    if len == 0 {
        return Ok(String::new());
    }
    if ptr.is_null() {
        return Err(CompileError::load(path, "null string in export table"));
    }
    // SAFETY: pointer and length come from a `&'static str` in the library.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| CompileError::load(path, format!("invalid export name: {}", e)))
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_entry(&dir.path().join("SimpleView_missing.so"), "views::View").unwrap_err();
        assert!(matches!(err, CompileError::Load { .. }));
    }

    #[test]
    fn test_garbage_library_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("SimpleView_garbage.{}", crate::rustc::dylib_ext()));
        std::fs::write(&path, b"not a shared object").unwrap();
        let err = load_entry(&path, "views::View").unwrap_err();
        assert!(matches!(err, CompileError::Load { .. }));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("a".to_string()), Some("a".to_string()));
    }
}
