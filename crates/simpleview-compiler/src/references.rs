//! Reference assembly: which compiled crates the view compiler must see.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use crate::resolver::{ModuleRef, ResolvedType};

/// Crates the sysroot provides implicitly. Passing them as `--extern`
/// breaks the build.
pub const DEFAULT_EXCLUDED_CRATES: [&str; 5] = ["std", "core", "alloc", "proc_macro", "test"];

/// Decides whether a module may be handed to the compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePolicy {
    excluded: Vec<String>,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDED_CRATES.iter().map(|s| s.to_string()))
    }
}

impl ReferencePolicy {
    pub fn new(excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn is_valid(&self, module: &ModuleRef) -> bool {
        !module.location.as_os_str().is_empty() && !self.excluded.iter().any(|name| *name == module.name)
    }
}

/// Deduplicated, ordered set of modules passed to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    modules: Vec<Arc<ModuleRef>>,
}

impl ReferenceSet {
    /// Collect the modules of the declared types and their type arguments,
    /// then the baseline modules, dropping duplicate locations (first
    /// occurrence wins) and anything the policy rejects.
    pub fn assemble(
        model: Option<&ResolvedType>,
        handler: Option<&ResolvedType>,
        baseline: &[Arc<ModuleRef>],
        policy: &ReferencePolicy,
    ) -> Self {
        let declared = [model, handler]
            .into_iter()
            .flatten()
            .flat_map(|ty| ty.modules());

        let mut seen = HashSet::new();
        let mut modules = Vec::new();
        for module in declared.chain(baseline.iter()) {
            if !seen.insert(module.location.clone()) {
                continue;
            }
            if !policy.is_valid(module) {
                tracing::debug!("Skipping implicit module: {}", module.name);
                continue;
            }
            modules.push(module.clone());
        }

        Self { modules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModuleRef>> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// `--extern` and `-L dependency=` arguments for rustc.
    pub fn rustc_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        let mut dirs: Vec<PathBuf> = Vec::new();

        for module in &self.modules {
            args.push(OsString::from("--extern"));
            let mut spec = OsString::from(format!("{}=", module.name));
            spec.push(&module.location);
            args.push(spec);

            if let Some(dir) = module.location.parent().filter(|d| !d.as_os_str().is_empty()) {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_path_buf());
                }
            }
        }

        for dir in dirs {
            args.push(OsString::from("-L"));
            let mut spec = OsString::from("dependency=");
            spec.push(&dir);
            args.push(spec);
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ModuleSpec, TypeRegistry, TypeSpec};
    use std::path::Path;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.add_default_module(
            ModuleSpec::new("view_support", "/libs/libview_support.rlib")
                .with_type(TypeSpec::new("view_support::Html")),
        );
        registry.register_module(
            ModuleSpec::new("shop_models", "/libs/libshop_models.rlib")
                .with_type(TypeSpec::generic("shop_models::Generic", 1))
                .with_type(TypeSpec::new("shop_models::Inner")),
        );
        registry.register_module(
            ModuleSpec::new("extra", "/other/libextra.rlib").with_type(TypeSpec::new("extra::Thing")),
        );
        registry.register_module(
            ModuleSpec::new("handlers", "/libs/libhandlers.rlib").with_type(TypeSpec::new("handlers::Get")),
        );
        registry
    }

    fn names(set: &ReferenceSet) -> Vec<&str> {
        set.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_generic_model_shares_module_with_argument() {
        let registry = registry();
        let model = registry.resolve("Generic<Inner>").unwrap();
        let set = ReferenceSet::assemble(
            Some(&model),
            None,
            registry.default_modules(),
            &ReferencePolicy::default(),
        );

        assert_eq!(names(&set), vec!["shop_models", "view_support"]);
    }

    #[test]
    fn test_argument_from_other_module() {
        let registry = registry();
        let model = registry.resolve("Generic<Thing>").unwrap();
        let handler = registry.resolve("Get").unwrap();
        let set = ReferenceSet::assemble(
            Some(&model),
            Some(&handler),
            registry.default_modules(),
            &ReferencePolicy::default(),
        );

        assert_eq!(names(&set), vec!["shop_models", "extra", "handlers", "view_support"]);
        let locations: HashSet<&Path> = set.iter().map(|m| m.location.as_path()).collect();
        assert_eq!(locations.len(), set.len());
    }

    #[test]
    fn test_generic_handler_arguments_are_referenced() {
        let registry = registry();
        let model = registry.resolve("Inner").unwrap();
        // `extra` is only reachable through the handler's nested argument.
        let handler = registry.resolve("Generic<Vec<Thing>>").unwrap();
        let set = ReferenceSet::assemble(Some(&model), Some(&handler), &[], &ReferencePolicy::default());

        assert_eq!(names(&set), vec!["shop_models", "extra"]);
    }

    #[test]
    fn test_no_declarations_yields_baseline() {
        let registry = registry();
        let set = ReferenceSet::assemble(None, None, registry.default_modules(), &ReferencePolicy::default());
        assert_eq!(names(&set), vec!["view_support"]);
    }

    #[test]
    fn test_std_is_never_referenced() {
        let registry = registry();
        let model = registry.resolve("Vec<String>").unwrap();
        let set = ReferenceSet::assemble(Some(&model), None, &[], &ReferencePolicy::default());
        assert!(set.is_empty());
    }

    #[test]
    fn test_custom_policy() {
        let registry = registry();
        let handler = registry.resolve("Get").unwrap();
        let policy = ReferencePolicy::new(vec!["handlers".to_string()]);
        let set = ReferenceSet::assemble(None, Some(&handler), &[], &policy);
        assert!(set.is_empty());
    }

    #[test]
    fn test_rustc_args() {
        let registry = registry();
        let model = registry.resolve("Generic<Thing>").unwrap();
        let set = ReferenceSet::assemble(Some(&model), None, &[], &ReferencePolicy::default());

        let args: Vec<String> = set
            .rustc_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--extern",
                "shop_models=/libs/libshop_models.rlib",
                "--extern",
                "extra=/other/libextra.rlib",
                "-L",
                "dependency=/libs",
                "-L",
                "dependency=/other",
            ]
        );
    }
}
