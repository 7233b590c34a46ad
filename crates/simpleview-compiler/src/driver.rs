/// Compiler driver that orchestrates the view compilation pipeline
///
/// scan → resolve → assemble references → generate → rustc → load

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use simpleview_engine::{GeneratedSource, GeneratorConfig, ViewSignature};

use crate::engine::{MarkupEngine, TemplateEngine};
use crate::error::{CompileError, Diagnostic, Result, SourceLocation};
use crate::loader::{load_entry, EntryType};
use crate::references::{ReferencePolicy, ReferenceSet, DEFAULT_EXCLUDED_CRATES};
use crate::resolver::{ResolvedType, TypeRegistry};
use crate::rustc::{self, Artifact, CompilationUnit, Rustc, DEFAULT_ARTIFACT_PREFIX, DEFAULT_EDITION};
use crate::scanner::{self, Declarations, Directive, ScannedTemplate, TemplateSlot};

/// Options for compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// rustc executable
    pub rustc: PathBuf,
    /// Edition of the generated crate
    pub edition: String,
    /// Where sources and libraries are written
    pub temp_dir: PathBuf,
    /// Fixed prefix of every artifact name
    pub artifact_prefix: String,
    /// Module path of the generated view type
    pub namespace: String,
    /// Name of the generated view type
    pub class_name: String,
    /// Crates never passed to rustc
    pub excluded_crates: Vec<String>,
    /// Extra library search directories
    pub search_dirs: Vec<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        let generator = GeneratorConfig::default();
        Self {
            rustc: rustc::default_rustc(),
            edition: DEFAULT_EDITION.to_string(),
            temp_dir: std::env::temp_dir(),
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            namespace: generator.namespace,
            class_name: generator.class_name,
            excluded_crates: DEFAULT_EXCLUDED_CRATES.iter().map(|s| s.to_string()).collect(),
            search_dirs: Vec::new(),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rustc(mut self, rustc: impl Into<PathBuf>) -> Self {
        self.rustc = rustc.into();
        self
    }

    pub fn edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = edition.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.artifact_prefix = prefix.into();
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn excluded_crates(mut self, crates: Vec<String>) -> Self {
        self.excluded_crates = crates;
        self
    }

    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(self.namespace.clone(), self.class_name.clone())
    }

    fn toolchain(&self) -> Rustc {
        self.search_dirs
            .iter()
            .fold(Rustc::new(self.rustc.clone()).edition(self.edition.clone()), |rustc, dir| {
                rustc.search_dir(dir.clone())
            })
    }
}

/// Declared types after resolution.
#[derive(Debug, Default)]
struct ResolvedDeclarations {
    model: Option<ResolvedType>,
    handler: Option<ResolvedType>,
}

impl ResolvedDeclarations {
    fn signature(&self) -> ViewSignature {
        ViewSignature {
            model_type: self.model.as_ref().map(ResolvedType::rust_path),
            handler_type: self.handler.as_ref().map(ResolvedType::rust_path),
        }
    }
}

/// Generated source and the references it compiles against.
#[derive(Debug)]
pub struct PreparedView {
    pub source: GeneratedSource,
    pub references: ReferenceSet,
}

/// The view compiler
///
/// Shareable between threads: compilations only read the registry.
pub struct ViewCompiler {
    options: CompileOptions,
    registry: Arc<TypeRegistry>,
    engine: Box<dyn TemplateEngine>,
    rustc: Rustc,
    policy: ReferencePolicy,
}

impl ViewCompiler {
    /// Create a compiler using the bundled markup engine
    pub fn new(options: CompileOptions, registry: Arc<TypeRegistry>) -> Self {
        Self {
            engine: Box::new(MarkupEngine::new(options.generator_config())),
            rustc: options.toolchain(),
            policy: ReferencePolicy::new(options.excluded_crates.clone()),
            options,
            registry,
        }
    }

    /// Replace the template engine
    pub fn with_engine(mut self, engine: impl TemplateEngine + 'static) -> Self {
        self.engine = Box::new(engine);
        self
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Name the loaded view type must have
    pub fn expected_name(&self) -> String {
        self.engine.qualified_name()
    }

    /// Run the full pipeline on an in-memory template
    pub fn compile(&self, template: &str) -> Result<EntryType> {
        self.compile_scanned(scanner::scan_str(template))
    }

    /// Run the full pipeline on a template read from `reader`
    pub fn compile_reader<R: BufRead>(&self, reader: R) -> Result<EntryType> {
        self.compile_scanned(scanner::scan(reader)?)
    }

    /// Scan the slot's template in place, then compile it
    pub fn compile_slot(&self, slot: &TemplateSlot) -> Result<EntryType> {
        self.compile_scanned(scanner::scan_in_place(slot))
    }

    /// Compile on tokio's blocking pool.
    ///
    /// Dropping the returned future does not stop a running rustc; the
    /// compile finishes in the background and its result is discarded.
    pub async fn compile_async(self: Arc<Self>, template: String) -> Result<EntryType> {
        tokio::task::spawn_blocking(move || self.compile(&template))
            .await
            .map_err(|e| CompileError::Aborted(e.to_string()))?
    }

    /// Scan, resolve and generate without invoking rustc
    pub fn prepare(&self, template: &str) -> Result<PreparedView> {
        self.prepare_scanned(&scanner::scan_str(template))
    }

    /// Generated Rust for `template`, as it would be handed to rustc
    pub fn generate_source(&self, template: &str) -> Result<GeneratedSource> {
        self.prepare(template).map(|prepared| prepared.source)
    }

    fn prepare_scanned(&self, scanned: &ScannedTemplate) -> Result<PreparedView> {
        let declared = self.resolve_declarations(&scanned.declarations)?;

        let references = ReferenceSet::assemble(
            declared.model.as_ref(),
            declared.handler.as_ref(),
            self.registry.default_modules(),
            &self.policy,
        );
        tracing::debug!("Referencing {} module(s)", references.len());

        let source = self.engine.generate(&scanned.source, &declared.signature())?;
        tracing::debug!("Generated {} bytes of Rust", source.code.len());

        Ok(PreparedView { source, references })
    }

    fn compile_scanned(&self, scanned: ScannedTemplate) -> Result<EntryType> {
        let started = Instant::now();
        let prepared = self.prepare_scanned(&scanned)?;
        drop(scanned);

        let unit = CompilationUnit {
            source: &prepared.source,
            references: &prepared.references,
            artifact: Artifact::unique(&self.options.temp_dir, &self.options.artifact_prefix),
        };
        let compiled = self.rustc.compile(&unit)?;
        for warning in &compiled.warnings {
            tracing::debug!("rustc: {}", warning);
        }

        let entry = load_entry(&compiled.library, &self.expected_name())?;
        tracing::info!("Compiled view {} in {:?}", entry.name(), started.elapsed());
        Ok(entry)
    }

    /// Resolve both declarations. Failures are reported together as a
    /// compilation error pointing at the directive lines.
    fn resolve_declarations(&self, declarations: &Declarations) -> Result<ResolvedDeclarations> {
        let mut failures = Vec::new();
        let mut resolve = |directive: &Option<Directive>| {
            let directive = directive.as_ref()?;
            match self.registry.resolve(&directive.raw_type) {
                Ok(resolved) => {
                    tracing::debug!("{} resolved to {}", directive.kind.token(), resolved);
                    Some(resolved)
                }
                Err(e) => {
                    let text = if directive.raw_type.is_empty() {
                        format!("`{}` {}", directive.kind.token(), e)
                    } else {
                        format!("cannot resolve `{} {}`: {}", directive.kind.token(), directive.raw_type, e)
                    };
                    failures.push(Diagnostic::error(text).at(SourceLocation::Template { line: directive.line }));
                    None
                }
            }
        };

        let resolved = ResolvedDeclarations {
            model: resolve(&declarations.model),
            handler: resolve(&declarations.handler),
        };

        if failures.is_empty() {
            Ok(resolved)
        } else {
            Err(CompileError::Compilation(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ModuleSpec, TypeSpec};

    fn compiler() -> ViewCompiler {
        let mut registry = TypeRegistry::new();
        registry.register_module(
            ModuleSpec::new("shop_models", "/libs/libshop_models.rlib")
                .with_type(TypeSpec::new("shop_models::Form"))
                .with_type(TypeSpec::generic("shop_models::Page", 1)),
        );
        ViewCompiler::new(CompileOptions::new(), Arc::new(registry))
    }

    #[test]
    fn test_compile_options_builder() {
        let opts = CompileOptions::new()
            .rustc("/opt/rust/bin/rustc")
            .edition("2018")
            .temp_dir("/var/views")
            .artifact_prefix("View_")
            .namespace("pages")
            .class_name("Index")
            .search_dir("/opt/libs");

        assert_eq!(opts.rustc, PathBuf::from("/opt/rust/bin/rustc"));
        assert_eq!(opts.edition, "2018");
        assert_eq!(opts.temp_dir, PathBuf::from("/var/views"));
        assert_eq!(opts.artifact_prefix, "View_");
        assert_eq!(opts.generator_config().qualified_name(), "pages::Index");
        assert_eq!(opts.search_dirs, vec![PathBuf::from("/opt/libs")]);
        assert!(opts.excluded_crates.contains(&"std".to_string()));
    }

    #[test]
    fn test_prepare_uses_resolved_paths() {
        let prepared = compiler().prepare("@model Page<Form>\n<p>@model.title</p>\n").unwrap();

        assert!(prepared
            .source
            .code
            .contains("model: &shop_models::Page<shop_models::Form>"));
        let names: Vec<&str> = prepared.references.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["shop_models"]);
    }

    #[test]
    fn test_unresolved_types_are_reported_together() {
        let err = compiler().prepare("x\n@model Missing\n@handler\n").unwrap_err();
        let diagnostics = err.diagnostics();

        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].message.contains("Missing"));
        assert_eq!(diagnostics[0].location, Some(SourceLocation::Template { line: 2 }));
        assert_eq!(diagnostics[1].message, "`@handler` directive has no type name");
        assert_eq!(diagnostics[1].location, Some(SourceLocation::Template { line: 3 }));
        assert!(diagnostics.iter().all(Diagnostic::is_error));
    }

    #[test]
    fn test_generate_source_maps_template_lines() {
        let source = compiler().generate_source("@model Form\n<p>@model.name</p>\n").unwrap();

        assert!(source.code.contains("model: &shop_models::Form"));
        let line = source.code.lines().position(|l| l.contains("model.name")).unwrap() + 1;
        assert_eq!(source.template_line(line), Some(2));
    }

    #[test]
    fn test_deeply_nested_model_is_reported() {
        let raw = format!("{}Form{}", "Vec<".repeat(200), ">".repeat(200));
        let err = compiler().prepare(&format!("@model {}\n", raw)).unwrap_err();

        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("levels deep"));
        assert_eq!(diagnostics[0].location, Some(SourceLocation::Template { line: 1 }));
    }

    #[test]
    fn test_template_syntax_error() {
        let err = compiler().prepare("<p>@(oops</p>\n").unwrap_err();
        assert!(matches!(err, CompileError::TemplateSyntax(_)));
    }

    #[test]
    fn test_expected_name_follows_options() {
        let compiler = ViewCompiler::new(
            CompileOptions::new().namespace("app::pages").class_name("Home"),
            Arc::new(TypeRegistry::new()),
        );
        assert_eq!(compiler.expected_name(), "app::pages::Home");
    }

    #[test]
    fn test_compiler_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ViewCompiler>();
        assert_send_sync::<EntryType>();
    }
}
