//! Rust code generation for view templates.
//!
//! Every template line that produces output maps to exactly one generated
//! line, so compiler diagnostics can be traced back through
//! [`GeneratedSource::template_line`].

use crate::markup::{parse_line, Segment};
use crate::{Result, DIRECTIVES, EXPORTS_SYMBOL};

/// Naming convention for the generated view type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Module path the view type lives in, e.g. `views` or `app::views`.
    pub namespace: String,
    /// Name of the generated view struct.
    pub class_name: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            namespace: "views".to_string(),
            class_name: "View".to_string(),
        }
    }
}

impl GeneratorConfig {
    pub fn new(namespace: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            class_name: class_name.into(),
        }
    }

    /// Fully-qualified name of the generated view type.
    pub fn qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}::{}", self.namespace, self.class_name)
        }
    }
}

/// Rust types the render function receives, as paths valid in the
/// generated crate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSignature {
    pub model_type: Option<String>,
    pub handler_type: Option<String>,
}

/// Generated crate source plus its mapping back to template lines.
#[derive(Debug, Clone)]
pub struct GeneratedSource {
    /// Rust source of the `cdylib`.
    pub code: String,
    /// `line_map[i]` is the template line that produced generated line `i + 1`.
    pub line_map: Vec<Option<usize>>,
    /// Fully-qualified name of the exported view type.
    pub qualified_name: String,
}

impl GeneratedSource {
    /// Template line behind a 1-based generated line, if any.
    pub fn template_line(&self, generated_line: usize) -> Option<usize> {
        let index = generated_line.checked_sub(1)?;
        self.line_map.get(index).copied().flatten()
    }
}

/// Output buffer that records where each line came from.
struct Emitter {
    indent: usize,
    code: String,
    line_map: Vec<Option<usize>>,
}

impl Emitter {
    fn new() -> Self {
        Self {
            indent: 0,
            code: String::new(),
            line_map: Vec::new(),
        }
    }

    fn line(&mut self, origin: Option<usize>, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.code.push_str("    ");
            }
            self.code.push_str(text);
        }
        self.code.push('\n');
        self.line_map.push(origin);
    }

    fn blank(&mut self) {
        self.line(None, "");
    }

    fn open(&mut self, text: impl AsRef<str>) {
        self.line(None, text);
        self.indent += 1;
    }

    fn close(&mut self, text: impl AsRef<str>) {
        self.indent = self.indent.saturating_sub(1);
        self.line(None, text);
    }
}

/// Template to Rust source generator.
#[derive(Debug, Clone, Default)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate the view crate for `template`.
    ///
    /// Directive lines are recognised and skipped; they never reach the
    /// render body.
    pub fn generate(&self, template: &str, view: &ViewSignature) -> Result<GeneratedSource> {
        let mut out = Emitter::new();
        let segments: Vec<&str> = self
            .config
            .namespace
            .split("::")
            .filter(|s| !s.is_empty())
            .collect();

        out.line(None, "// Generated by simpleview. Do not edit.");
        out.line(None, "#![allow(unused, non_snake_case, non_camel_case_types)]");
        out.blank();

        for segment in &segments {
            out.open(format!("pub mod {} {{", segment));
        }

        out.line(None, "use ::std::fmt::Write as _;");
        out.blank();
        out.line(None, format!("pub struct {};", self.config.class_name));
        out.blank();
        out.open(format!("impl {} {{", self.config.class_name));
        out.open(format!(
            "pub fn render({}) -> ::std::fmt::Result {{",
            render_params(view)
        ));
        self.generate_body(&mut out, template)?;
        out.line(None, "::std::result::Result::Ok(())");
        out.close("}");
        out.close("}");

        for _ in &segments {
            out.close("}");
        }

        out.blank();
        self.generate_exports(&mut out, view);

        Ok(GeneratedSource {
            code: out.code,
            line_map: out.line_map,
            qualified_name: self.config.qualified_name(),
        })
    }

    fn generate_body(&self, out: &mut Emitter, template: &str) -> Result<()> {
        for (idx, raw) in template.split_inclusive('\n').enumerate() {
            let line_no = idx + 1;
            let (content, terminator) = split_terminator(raw);

            if is_directive(content) {
                continue;
            }

            let mut statement = String::new();
            for segment in parse_line(content, line_no)? {
                match segment {
                    Segment::Text(text) => {
                        statement.push_str(&format!("__out.write_str({:?})?; ", text));
                    }
                    Segment::Expr(expr) => {
                        statement.push_str(&format!("::std::write!(__out, \"{{}}\", {})?; ", expr));
                    }
                    Segment::Code(code) => {
                        statement.push_str(code);
                        statement.push(' ');
                    }
                }
            }
            if !terminator.is_empty() {
                statement.push_str(&format!("__out.write_str({:?})?;", terminator));
            }

            let statement = statement.trim_end();
            if !statement.is_empty() {
                out.line(Some(line_no), statement);
            }
        }
        Ok(())
    }

    fn generate_exports(&self, out: &mut Emitter, view: &ViewSignature) {
        let qualified = self.config.qualified_name();
        let model = view.model_type.as_deref().unwrap_or("");
        let handler = view.handler_type.as_deref().unwrap_or("");

        out.line(None, "pub type SimpleViewWriteFn = unsafe extern \"C\" fn(*mut ::std::ffi::c_void, *const u8, usize);");
        out.line(None, "pub type SimpleViewRenderFn = unsafe extern \"C\" fn(*const ::std::ffi::c_void, *const ::std::ffi::c_void, *mut ::std::ffi::c_void, SimpleViewWriteFn) -> i32;");
        out.blank();
        out.line(None, "#[repr(C)]");
        out.open("pub struct SimpleViewExport {");
        for field in [
            "name: *const u8",
            "name_len: usize",
            "model_type: *const u8",
            "model_type_len: usize",
            "handler_type: *const u8",
            "handler_type_len: usize",
            "render: SimpleViewRenderFn",
        ] {
            out.line(None, format!("pub {},", field));
        }
        out.close("}");
        out.blank();
        out.line(None, "#[repr(C)]");
        out.open("pub struct SimpleViewExportTable {");
        out.line(None, "pub entries: *const SimpleViewExport,");
        out.line(None, "pub len: usize,");
        out.close("}");
        out.blank();
        out.line(None, "struct __Exports([SimpleViewExport; 1]);");
        out.line(None, "unsafe impl Sync for __Exports {}");
        out.blank();
        out.line(None, format!("const __NAME: &str = {:?};", qualified));
        out.line(None, format!("const __MODEL: &str = {:?};", model));
        out.line(None, format!("const __HANDLER: &str = {:?};", handler));
        out.blank();
        out.open("static __EXPORTS: __Exports = __Exports([SimpleViewExport {");
        out.line(None, "name: __NAME.as_ptr(),");
        out.line(None, "name_len: __NAME.len(),");
        out.line(None, "model_type: __MODEL.as_ptr(),");
        out.line(None, "model_type_len: __MODEL.len(),");
        out.line(None, "handler_type: __HANDLER.as_ptr(),");
        out.line(None, "handler_type_len: __HANDLER.len(),");
        out.line(None, "render: __simple_view_render,");
        out.close("}]);");
        out.blank();
        out.line(None, "#[no_mangle]");
        out.open(format!("pub extern \"C\" fn {}() -> SimpleViewExportTable {{", EXPORTS_SYMBOL));
        out.line(None, "SimpleViewExportTable { entries: __EXPORTS.0.as_ptr(), len: __EXPORTS.0.len() }");
        out.close("}");
        out.blank();
        out.open("struct __Sink {");
        out.line(None, "sink: *mut ::std::ffi::c_void,");
        out.line(None, "write: SimpleViewWriteFn,");
        out.close("}");
        out.blank();
        out.open("impl ::std::fmt::Write for __Sink {");
        out.open("fn write_str(&mut self, s: &str) -> ::std::fmt::Result {");
        out.line(None, "unsafe { (self.write)(self.sink, s.as_ptr(), s.len()) };");
        out.line(None, "::std::result::Result::Ok(())");
        out.close("}");
        out.close("}");
        out.blank();
        out.open("unsafe extern \"C\" fn __simple_view_render(");
        out.line(None, "model: *const ::std::ffi::c_void,");
        out.line(None, "handler: *const ::std::ffi::c_void,");
        out.line(None, "sink: *mut ::std::ffi::c_void,");
        out.line(None, "write: SimpleViewWriteFn,");
        out.close(") -> i32 {");
        out.indent += 1;
        let mut args = Vec::new();
        if let Some(model_type) = &view.model_type {
            out.line(None, format!("if model.is_null() {{ return {}; }}", crate::status::MISSING_MODEL));
            out.line(None, format!("let model = unsafe {{ &*(model as *const {}) }};", model_type));
            args.push("model");
        }
        if let Some(handler_type) = &view.handler_type {
            out.line(None, format!("if handler.is_null() {{ return {}; }}", crate::status::MISSING_HANDLER));
            out.line(None, format!("let handler = unsafe {{ &*(handler as *const {}) }};", handler_type));
            args.push("handler");
        }
        args.push("&mut __sink");
        out.line(None, "let mut __sink = __Sink { sink, write };");
        out.open("let result = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| {");
        out.line(None, format!("{}::render({})", qualified, args.join(", ")));
        out.close("}));");
        out.open("match result {");
        out.line(None, format!("::std::result::Result::Ok(::std::result::Result::Ok(())) => {},", crate::status::OK));
        out.line(None, format!("::std::result::Result::Ok(::std::result::Result::Err(_)) => {},", crate::status::FORMAT_ERROR));
        out.line(None, format!("::std::result::Result::Err(_) => {},", crate::status::PANICKED));
        out.close("}");
        out.close("}");
    }
}

fn render_params(view: &ViewSignature) -> String {
    let mut params = Vec::new();
    if let Some(model) = &view.model_type {
        params.push(format!("model: &{}", model));
    }
    if let Some(handler) = &view.handler_type {
        params.push(format!("handler: &{}", handler));
    }
    params.push("__out: &mut dyn ::std::fmt::Write".to_string());
    params.join(", ")
}

fn split_terminator(raw: &str) -> (&str, &str) {
    if let Some(content) = raw.strip_suffix("\r\n") {
        (content, "\r\n")
    } else if let Some(content) = raw.strip_suffix('\n') {
        (content, "\n")
    } else {
        (raw, "")
    }
}

fn is_directive(content: &str) -> bool {
    let trimmed = content.trim();
    DIRECTIVES.iter().any(|d| trimmed.starts_with(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(template: &str, view: &ViewSignature) -> GeneratedSource {
        Generator::default()
            .generate(template, view)
            .expect("generation failed")
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(GeneratorConfig::default().qualified_name(), "views::View");
        assert_eq!(
            GeneratorConfig::new("app::pages", "Home").qualified_name(),
            "app::pages::Home"
        );
        assert_eq!(GeneratorConfig::new("", "Home").qualified_name(), "Home");
    }

    #[test]
    fn test_directives_are_skipped() {
        let view = ViewSignature {
            model_type: Some("shop::Form".to_string()),
            handler_type: None,
        };
        let source = generate("@model shop::Form\n<p>@model.text</p>\n", &view);

        assert!(!source.code.contains("@model"));
        assert!(source.code.contains("pub fn render(model: &shop::Form, __out: &mut dyn ::std::fmt::Write)"));
        assert!(source.code.contains("::std::write!(__out, \"{}\", model.text)?;"));
        assert!(source.code.contains("let model = unsafe { &*(model as *const shop::Form) };"));
    }

    #[test]
    fn test_line_map_points_at_template_lines() {
        let source = generate("first\n@handler app::Get\nthird\n", &ViewSignature::default());

        let mapped: Vec<usize> = source.line_map.iter().flatten().copied().collect();
        assert_eq!(mapped, vec![1, 3]);

        let generated_line = source
            .code
            .lines()
            .position(|l| l.contains("\"third\""))
            .unwrap()
            + 1;
        assert_eq!(source.template_line(generated_line), Some(3));
        assert_eq!(source.template_line(0), None);
        assert_eq!(source.line_map.len(), source.code.lines().count());
    }

    #[test]
    fn test_line_terminators_preserved() {
        let source = generate("a\r\nb", &ViewSignature::default());
        assert!(source.code.contains(r#"__out.write_str("a")?; __out.write_str("\r\n")?;"#));
        assert!(source.code.contains(r#"__out.write_str("b")?;"#));
    }

    #[test]
    fn test_nested_namespace() {
        let generator = Generator::new(GeneratorConfig::new("app::pages", "Home"));
        let source = generator.generate("hi", &ViewSignature::default()).unwrap();
        assert!(source.code.contains("pub mod app {"));
        assert!(source.code.contains("    pub mod pages {"));
        assert!(source.code.contains("const __NAME: &str = \"app::pages::Home\";"));
        assert!(source.code.contains("app::pages::Home::render(&mut __sink)"));
        assert_eq!(source.qualified_name, "app::pages::Home");
    }

    #[test]
    fn test_exports_symbol_emitted() {
        let source = generate("", &ViewSignature::default());
        assert!(source.code.contains("#[no_mangle]"));
        assert!(source.code.contains("pub extern \"C\" fn simple_view_exports()"));
        assert!(source.code.contains("const __MODEL: &str = \"\";"));
    }

    #[test]
    fn test_syntax_error_propagates() {
        let err = Generator::default()
            .generate("ok\nbad @(\n", &ViewSignature::default())
            .unwrap_err();
        assert_eq!(err.line, 2);
    }
}
