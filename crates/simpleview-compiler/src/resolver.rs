/// Type resolution against a registry of known modules
///
/// Declaration directives name types as text. The registry maps those names
/// to descriptors of types exported by library crates, so the compiler knows
/// which crates the generated view must link against.
///
/// Lookup order:
/// - default modules (registration order), then registered modules
/// - within a module, types in declaration order
/// - qualified names (`a::b::C`) match full paths exactly
/// - bare names (`C`) match the last path segment exactly

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

/// Name of the built-in module describing standard library types.
pub const STD_MODULE: &str = "std";

/// Deepest generic nesting a type name may use (`Vec<u8>` is depth 1).
pub const MAX_GENERIC_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("directive has no type name")]
    Empty,

    #[error("type `{0}` not found in any registered module")]
    NotFound(String),

    #[error("malformed type name `{0}`")]
    Malformed(String),

    #[error("generic arguments nest more than {max} levels deep", max = MAX_GENERIC_DEPTH)]
    TooDeep,

    #[error("type `{name}` takes {expected} type argument(s) but {found} were supplied")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
}

/// A compiled library crate that types can live in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    /// Crate name as used in `--extern`.
    pub name: String,
    /// Location of the compiled artifact.
    pub location: PathBuf,
}

/// A type a module exports, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TypeSpec {
    /// Full path, e.g. `shop_models::Form`.
    pub path: String,
    #[serde(default)]
    pub generic_params: usize,
}

impl TypeSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            generic_params: 0,
        }
    }

    pub fn generic(path: impl Into<String>, generic_params: usize) -> Self {
        Self {
            path: path.into(),
            generic_params,
        }
    }
}

/// A module and the types it exports, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub location: PathBuf,
    #[serde(default)]
    pub types: Vec<TypeSpec>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>, location: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: TypeSpec) -> Self {
        self.types.push(ty);
        self
    }
}

/// A type known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub path: String,
    pub generic_params: usize,
    pub module: Arc<ModuleRef>,
}

impl TypeDescriptor {
    /// Last path segment.
    pub fn simple_name(&self) -> &str {
        self.path.rsplit("::").next().unwrap_or(&self.path)
    }
}

/// A type name matched to a descriptor, with resolved type arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    pub descriptor: Arc<TypeDescriptor>,
    pub args: Vec<ResolvedType>,
}

impl ResolvedType {
    pub fn module(&self) -> &Arc<ModuleRef> {
        &self.descriptor.module
    }

    /// Modules of this type and every type argument, outermost first.
    pub fn modules(&self) -> Vec<&Arc<ModuleRef>> {
        let mut modules = vec![self.module()];
        for arg in &self.args {
            modules.extend(arg.modules());
        }
        modules
    }

    /// The type as a Rust path usable in generated code.
    pub fn rust_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResolvedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor.path)?;
        if !self.args.is_empty() {
            f.write_str("<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", arg)?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

/// Types of one search tier, indexed by full path and by simple name.
#[derive(Debug, Default)]
struct ModuleTable {
    modules: Vec<Arc<ModuleRef>>,
    by_path: HashMap<String, Arc<TypeDescriptor>>,
    by_name: HashMap<String, Arc<TypeDescriptor>>,
}

impl ModuleTable {
    fn add(&mut self, spec: ModuleSpec) {
        let module = Arc::new(ModuleRef {
            name: spec.name,
            location: spec.location,
        });

        for ty in spec.types {
            let descriptor = Arc::new(TypeDescriptor {
                path: ty.path.trim_start_matches("::").to_string(),
                generic_params: ty.generic_params,
                module: module.clone(),
            });
            // First registration of a name wins.
            self.by_name
                .entry(descriptor.simple_name().to_string())
                .or_insert_with(|| descriptor.clone());
            self.by_path
                .entry(descriptor.path.clone())
                .or_insert(descriptor);
        }

        self.modules.push(module);
    }

    fn find(&self, name: &str, qualified: bool) -> Option<&Arc<TypeDescriptor>> {
        if qualified {
            self.by_path.get(name)
        } else {
            self.by_name.get(name)
        }
    }
}

/// Registry of modules and the types they export.
///
/// Built once at startup and shared read-only between compilations.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    defaults: ModuleTable,
    registered: ModuleTable,
}

impl TypeRegistry {
    /// A registry whose only default module is the built-in `std` module.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.add_default_module(std_module());
        registry
    }

    /// A registry with no modules at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a module to the default tier. Default modules are searched first
    /// and always passed to the compiler.
    pub fn add_default_module(&mut self, spec: ModuleSpec) {
        tracing::debug!("Default module: {} ({})", spec.name, spec.location.display());
        self.defaults.add(spec);
    }

    /// Add a module searched after the defaults.
    pub fn register_module(&mut self, spec: ModuleSpec) {
        tracing::debug!("Registered module: {} ({})", spec.name, spec.location.display());
        self.registered.add(spec);
    }

    /// Modules every compilation references.
    pub fn default_modules(&self) -> &[Arc<ModuleRef>] {
        &self.defaults.modules
    }

    /// All modules in search order.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleRef>> {
        self.defaults.modules.iter().chain(self.registered.modules.iter())
    }

    /// Resolve a type name, including generic arguments.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedType, ResolveError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ResolveError::Empty);
        }
        if nesting_depth(raw) > MAX_GENERIC_DEPTH {
            return Err(ResolveError::TooDeep);
        }
        self.resolve_checked(raw)
    }

    /// Resolve a non-empty name whose nesting is already bounded.
    fn resolve_checked(&self, raw: &str) -> Result<ResolvedType, ResolveError> {
        let (base, args) = split_generic(raw)?;
        let base = base.trim_start_matches("::");
        if !is_valid_path(base) {
            return Err(ResolveError::Malformed(raw.to_string()));
        }

        let qualified = base.contains("::");
        let descriptor = self
            .defaults
            .find(base, qualified)
            .or_else(|| self.registered.find(base, qualified))
            .ok_or_else(|| ResolveError::NotFound(base.to_string()))?;

        if descriptor.generic_params != args.len() {
            return Err(ResolveError::Arity {
                name: descriptor.path.clone(),
                expected: descriptor.generic_params,
                found: args.len(),
            });
        }

        let args = args
            .into_iter()
            .map(|arg| self.resolve_checked(arg))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedType {
            descriptor: descriptor.clone(),
            args,
        })
    }
}

/// The built-in module describing sysroot types.
///
/// Its location is not a file; the reference policy keeps it away from the
/// compiler command line.
pub fn std_module() -> ModuleSpec {
    let mut spec = ModuleSpec::new(STD_MODULE, STD_MODULE);
    for primitive in [
        "bool", "char", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
        "u128", "usize", "f32", "f64",
    ] {
        spec.types.push(TypeSpec::new(primitive));
    }
    spec.types.push(TypeSpec::new("std::string::String"));
    spec.types.push(TypeSpec::generic("std::vec::Vec", 1));
    spec.types.push(TypeSpec::generic("std::option::Option", 1));
    spec.types.push(TypeSpec::generic("std::boxed::Box", 1));
    spec.types.push(TypeSpec::generic("std::result::Result", 2));
    spec.types.push(TypeSpec::generic("std::collections::HashMap", 2));
    spec.types.push(TypeSpec::generic("std::collections::BTreeMap", 2));
    spec
}

/// Split `Name<A, B<C>>` into `Name` and its top-level arguments.
fn split_generic(raw: &str) -> Result<(&str, Vec<&str>), ResolveError> {
    let malformed = || ResolveError::Malformed(raw.to_string());

    let Some(open) = raw.find('<') else {
        if raw.contains('>') {
            return Err(malformed());
        }
        return Ok((raw, Vec::new()));
    };

    let inner = raw[open + 1..].strip_suffix('>').ok_or_else(malformed)?;
    let base = raw[..open].trim();

    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return Err(malformed());
                }
            }
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed());
    }
    args.push(inner[start..].trim());

    if args.iter().any(|arg| arg.is_empty()) {
        return Err(malformed());
    }

    Ok((base, args))
}

/// Deepest `<` nesting in `raw`, ignoring unbalanced closers.
fn nesting_depth(raw: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0;
    for c in raw.chars() {
        match c {
            '<' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            '>' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path.split("::").all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register_module(
            ModuleSpec::new("shop_models", "/libs/libshop_models.rlib")
                .with_type(TypeSpec::new("shop_models::Form"))
                .with_type(TypeSpec::new("shop_models::catalog::Item"))
                .with_type(TypeSpec::generic("shop_models::Page", 1)),
        );
        registry.register_module(
            ModuleSpec::new("shop_handlers", "/libs/libshop_handlers.rlib")
                .with_type(TypeSpec::new("shop_handlers::GetForm"))
                .with_type(TypeSpec::new("shop_handlers::Form")),
        );
        registry
    }

    #[test]
    fn test_bare_name() {
        let resolved = registry().resolve("GetForm").unwrap();
        assert_eq!(resolved.rust_path(), "shop_handlers::GetForm");
        assert_eq!(resolved.module().name, "shop_handlers");
        assert!(resolved.args.is_empty());
    }

    #[test]
    fn test_bare_name_first_match_wins() {
        let resolved = registry().resolve("Form").unwrap();
        assert_eq!(resolved.rust_path(), "shop_models::Form");
    }

    #[test]
    fn test_qualified_name_is_exact() {
        let registry = registry();
        let resolved = registry.resolve("shop_handlers::Form").unwrap();
        assert_eq!(resolved.module().name, "shop_handlers");

        let resolved = registry.resolve("::shop_models::catalog::Item").unwrap();
        assert_eq!(resolved.rust_path(), "shop_models::catalog::Item");

        assert_eq!(
            registry.resolve("catalog::Item").unwrap_err(),
            ResolveError::NotFound("catalog::Item".to_string())
        );
    }

    #[test]
    fn test_no_fuzzy_matching() {
        let registry = registry();
        assert!(matches!(registry.resolve("Forms"), Err(ResolveError::NotFound(_))));
        assert!(matches!(registry.resolve("form"), Err(ResolveError::NotFound(_))));
    }

    #[test]
    fn test_defaults_searched_first() {
        let mut registry = registry();
        registry.register_module(
            ModuleSpec::new("shadow", "/libs/libshadow.rlib").with_type(TypeSpec::new("shadow::String")),
        );
        let resolved = registry.resolve("String").unwrap();
        assert_eq!(resolved.module().name, STD_MODULE);
    }

    #[test]
    fn test_generic_arguments_resolve_recursively() {
        let resolved = registry().resolve("Page<Vec<Item>>").unwrap();
        assert_eq!(resolved.args.len(), 1);
        assert_eq!(
            resolved.rust_path(),
            "shop_models::Page<std::vec::Vec<shop_models::catalog::Item>>"
        );

        let modules = resolved.modules();
        let names: Vec<&str> = modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["shop_models", "std", "shop_models"]);
    }

    #[test]
    fn test_multiple_arguments() {
        let resolved = registry().resolve("HashMap<String, shop_handlers::GetForm>").unwrap();
        assert_eq!(resolved.args.len(), 2);
        assert_eq!(
            resolved.rust_path(),
            "std::collections::HashMap<std::string::String, shop_handlers::GetForm>"
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let registry = registry();
        assert_eq!(
            registry.resolve("Vec").unwrap_err(),
            ResolveError::Arity {
                name: "std::vec::Vec".to_string(),
                expected: 1,
                found: 0,
            }
        );
        assert!(matches!(registry.resolve("Form<Item>"), Err(ResolveError::Arity { .. })));
    }

    #[test]
    fn test_empty_and_malformed() {
        let registry = registry();
        assert_eq!(registry.resolve("   ").unwrap_err(), ResolveError::Empty);
        for raw in ["Page<Item", "Page<Item>>", "Page<>", "Page<Item,>", "Item>", "a b", "9Lives", "&str"] {
            assert!(
                matches!(registry.resolve(raw), Err(ResolveError::Malformed(_))),
                "expected malformed: {}",
                raw
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |n: usize| format!("{}u8{}", "Vec<".repeat(n), ">".repeat(n));
        let registry = registry();

        let resolved = registry.resolve(&nested(MAX_GENERIC_DEPTH)).unwrap();
        assert_eq!(resolved.modules().len(), MAX_GENERIC_DEPTH + 1);

        assert_eq!(
            registry.resolve(&nested(MAX_GENERIC_DEPTH + 1)).unwrap_err(),
            ResolveError::TooDeep
        );
        assert_eq!(registry.resolve(&nested(5000)).unwrap_err(), ResolveError::TooDeep);
    }

    #[test]
    fn test_nesting_depth() {
        assert_eq!(nesting_depth("Form"), 0);
        assert_eq!(nesting_depth("A<B, C<D>, E<F<G>>>"), 3);
        assert_eq!(nesting_depth("A>>B<C>"), 1);
    }

    #[test]
    fn test_split_generic() {
        assert_eq!(split_generic("A").unwrap(), ("A", vec![]));
        assert_eq!(
            split_generic("A<B, C<D, E>, F>").unwrap(),
            ("A", vec!["B", "C<D, E>", "F"])
        );
    }
}
