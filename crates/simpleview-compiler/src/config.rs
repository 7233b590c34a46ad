//! Module manifest: the JSON file that tells the compiler which crates
//! templates may reference and how generated views are named.
//!
//! ```json
//! {
//!   "options": { "namespace": "views", "class_name": "View" },
//!   "defaults": [],
//!   "modules": [
//!     {
//!       "name": "shop_models",
//!       "location": "target/debug/libshop_models.rlib",
//!       "types": [
//!         { "path": "shop_models::Form" },
//!         { "path": "shop_models::Page", "generic_params": 1 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::driver::CompileOptions;
use crate::error::{CompileError, Result};
use crate::resolver::{ModuleSpec, TypeRegistry};

/// Settings a manifest may override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestOptions {
    pub namespace: Option<String>,
    pub class_name: Option<String>,
    pub edition: Option<String>,
    pub rustc: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub artifact_prefix: Option<String>,
    pub excluded_crates: Option<Vec<String>>,
    #[serde(default)]
    pub search_dirs: Vec<PathBuf>,
}

/// Modules templates may reference, plus compiler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    #[serde(default)]
    pub options: ManifestOptions,
    /// Searched first and referenced by every compilation.
    #[serde(default)]
    pub defaults: Vec<ModuleSpec>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl ModuleManifest {
    /// Read a manifest file. Relative module locations and directories are
    /// taken relative to the manifest's own directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let manifest = Self::from_json(&text).map_err(|e| CompileError::config(path, e.to_string()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(manifest.relative_to(base))
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Anchor relative paths at `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        for module in self.defaults.iter_mut().chain(self.modules.iter_mut()) {
            anchor(&mut module.location);
        }
        for dir in &mut self.options.search_dirs {
            anchor(dir);
        }
        if let Some(dir) = &mut self.options.temp_dir {
            anchor(dir);
        }
        self
    }

    /// Build the registry: the built-in `std` module, then the manifest's
    /// defaults, then its modules.
    pub fn registry(&self) -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        for module in &self.defaults {
            registry.add_default_module(module.clone());
        }
        for module in &self.modules {
            registry.register_module(module.clone());
        }
        registry
    }

    /// Apply the manifest's settings on top of `options`.
    pub fn apply(&self, mut options: CompileOptions) -> CompileOptions {
        let o = &self.options;
        if let Some(namespace) = &o.namespace {
            options = options.namespace(namespace.clone());
        }
        if let Some(class_name) = &o.class_name {
            options = options.class_name(class_name.clone());
        }
        if let Some(edition) = &o.edition {
            options = options.edition(edition.clone());
        }
        if let Some(rustc) = &o.rustc {
            options = options.rustc(rustc.clone());
        }
        if let Some(temp_dir) = &o.temp_dir {
            options = options.temp_dir(temp_dir.clone());
        }
        if let Some(prefix) = &o.artifact_prefix {
            options = options.artifact_prefix(prefix.clone());
        }
        if let Some(excluded) = &o.excluded_crates {
            options = options.excluded_crates(excluded.clone());
        }
        for dir in &o.search_dirs {
            options = options.search_dir(dir.clone());
        }
        options
    }
}
