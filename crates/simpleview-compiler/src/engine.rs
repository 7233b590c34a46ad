//! Adapter over the external template engine.

use simpleview_engine::{GeneratedSource, Generator, GeneratorConfig, SyntaxError, ViewSignature};

/// Source-to-source step of the pipeline.
///
/// Implementations receive the rewritten template with directive lines
/// still in place and must emit a crate exporting the view under
/// `qualified_name`.
pub trait TemplateEngine: Send + Sync {
    fn generate(&self, template: &str, view: &ViewSignature) -> Result<GeneratedSource, SyntaxError>;

    /// Name the generated view type is expected to have.
    fn qualified_name(&self) -> String;
}

/// The bundled markup engine.
#[derive(Debug, Clone, Default)]
pub struct MarkupEngine {
    generator: Generator,
}

impl MarkupEngine {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            generator: Generator::new(config),
        }
    }
}

impl TemplateEngine for MarkupEngine {
    fn generate(&self, template: &str, view: &ViewSignature) -> Result<GeneratedSource, SyntaxError> {
        self.generator.generate(template, view)
    }

    fn qualified_name(&self) -> String {
        self.generator.config().qualified_name()
    }
}
