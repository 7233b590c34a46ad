//! Markup template engine for simpleview.
//!
//! Turns a view template into Rust source for a `cdylib`. The generated
//! library exposes a single C-ABI function, [`EXPORTS_SYMBOL`], that returns
//! a table describing the views it contains. The compiler crate drives this
//! engine as a black box and only depends on [`Generator::generate`].

mod codegen;
mod error;
mod markup;

pub use codegen::{GeneratedSource, Generator, GeneratorConfig, ViewSignature};
pub use error::SyntaxError;

/// Name of the exported function every generated library provides.
pub const EXPORTS_SYMBOL: &str = "simple_view_exports";

/// Directive tokens the engine skips when translating markup.
pub const DIRECTIVES: [&str; 2] = ["@model", "@handler"];

/// Render status codes returned by the generated `render` function.
pub mod status {
    pub const OK: i32 = 0;
    pub const MISSING_MODEL: i32 = 1;
    pub const MISSING_HANDLER: i32 = 2;
    pub const FORMAT_ERROR: i32 = 3;
    pub const PANICKED: i32 = 4;
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyntaxError>;
