/// simpleview compiler
///
/// Compiles view templates at runtime: directives are scanned, their types
/// resolved against a registry of library crates, the template is turned
/// into Rust by the markup engine, built as a `cdylib` with rustc and loaded
/// back as an [`EntryType`].

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod loader;
pub mod references;
pub mod resolver;
pub mod rustc;
pub mod scanner;

pub use config::{ManifestOptions, ModuleManifest};
pub use driver::{CompileOptions, PreparedView, ViewCompiler};
pub use engine::{MarkupEngine, TemplateEngine};
pub use error::{CompileError, Diagnostic, Result, Severity, SourceLocation};
pub use loader::{load_entry, EntryType};
pub use references::{ReferencePolicy, ReferenceSet};
pub use resolver::{ModuleRef, ModuleSpec, ResolveError, ResolvedType, TypeRegistry, TypeSpec};
pub use rustc::{purge_stale_artifacts, Rustc};
pub use scanner::{scan, scan_in_place, scan_str, Declarations, Directive, DirectiveKind, TemplateSlot};
