//! Dynamic compilation of generated view crates
//!
//! Each compilation writes its source and library to uniquely named files
//! (`<prefix><uuid>`), so concurrent compiles and recompiles of a template
//! whose previous library is still loaded never collide.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use simpleview_engine::GeneratedSource;
use uuid::Uuid;

use crate::error::{CompileError, Diagnostic, Result, Severity, SourceLocation};
use crate::references::ReferenceSet;

/// Prefix of every temporary artifact.
pub const DEFAULT_ARTIFACT_PREFIX: &str = "SimpleView_";

/// Default edition for generated crates.
pub const DEFAULT_EDITION: &str = "2021";

/// Platform-specific dynamic library extension.
pub fn dylib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        "dylib"
    } else if cfg!(target_os = "windows") {
        "dll"
    } else {
        "so"
    }
}

/// rustc from `$RUSTC`, falling back to `rustc` on the `PATH`.
pub fn default_rustc() -> PathBuf {
    std::env::var_os("RUSTC")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rustc"))
}

/// Output names for one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub crate_name: String,
    pub source: PathBuf,
    pub library: PathBuf,
}

impl Artifact {
    /// Fresh artifact names in `dir`: `prefix` plus a random token.
    pub fn unique(dir: &Path, prefix: &str) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let stem = format!("{}{}", prefix, token);
        Self {
            crate_name: format!("simpleview_{}", token),
            source: dir.join(format!("{}.rs", stem)),
            library: dir.join(format!("{}.{}", stem, dylib_ext())),
        }
    }
}

/// Everything one rustc invocation needs.
#[derive(Debug)]
pub struct CompilationUnit<'a> {
    pub source: &'a GeneratedSource,
    pub references: &'a ReferenceSet,
    pub artifact: Artifact,
}

/// A library that built successfully.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    pub library: PathBuf,
    /// Warnings never fail a build; kept for logging.
    pub warnings: Vec<Diagnostic>,
}

/// rustc invocation settings.
#[derive(Debug, Clone)]
pub struct Rustc {
    program: PathBuf,
    edition: String,
    search_dirs: Vec<PathBuf>,
}

impl Default for Rustc {
    fn default() -> Self {
        Self::new(default_rustc())
    }
}

impl Rustc {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            edition: DEFAULT_EDITION.to_string(),
            search_dirs: Vec::new(),
        }
    }

    pub fn edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = edition.into();
        self
    }

    pub fn search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command line arguments for `unit`.
    pub fn args(&self, unit: &CompilationUnit<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--crate-type".into(),
            "cdylib".into(),
            "--crate-name".into(),
            unit.artifact.crate_name.clone().into(),
            "--edition".into(),
            self.edition.clone().into(),
            "--error-format=json".into(),
            "-C".into(),
            "debuginfo=0".into(),
            "-o".into(),
            unit.artifact.library.clone().into(),
        ];
        args.extend(unit.references.rustc_args());
        for dir in &self.search_dirs {
            args.push("-L".into());
            args.push(dir.clone().into());
        }
        args.push(unit.artifact.source.clone().into());
        args
    }

    /// Build the unit's library. Any error-level diagnostic fails the build
    /// and every error is returned.
    pub fn compile(&self, unit: &CompilationUnit<'_>) -> Result<CompiledUnit> {
        let artifact = &unit.artifact;
        fs::write(&artifact.source, &unit.source.code)?;

        let args = self.args(unit);
        tracing::debug!("Compiling with args: {:?}", args);

        let output = Command::new(&self.program).args(&args).output();

        remove_artifact(&artifact.source);

        let output = output.map_err(|e| {
            CompileError::Toolchain(format!("failed to run {}: {}", self.program.display(), e))
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let (mut errors, warnings): (Vec<_>, Vec<_>) =
            parse_diagnostics(&stderr, unit.source, &artifact.source)
                .into_iter()
                .partition(Diagnostic::is_error);

        if !warnings.is_empty() {
            tracing::debug!("rustc reported {} warning(s)", warnings.len());
        }

        if !output.status.success() || !errors.is_empty() {
            if errors.is_empty() {
                errors.push(Diagnostic::error(format!(
                    "rustc exited with {}: {}",
                    output.status,
                    stderr.trim()
                )));
            }
            remove_artifact(&artifact.library);
            return Err(CompileError::Compilation(errors));
        }

        if !artifact.library.exists() {
            return Err(CompileError::Toolchain(format!(
                "rustc succeeded but produced no library at {}",
                artifact.library.display()
            )));
        }

        tracing::info!("Compiled view library: {}", artifact.library.display());
        Ok(CompiledUnit {
            library: artifact.library.clone(),
            warnings,
        })
    }
}

/// Delete a build artifact. A file that was never written is not an error.
fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[derive(Debug, Deserialize)]
struct RustcMessage {
    #[serde(rename = "$message_type", default)]
    message_type: Option<String>,
    message: String,
    level: String,
    #[serde(default)]
    code: Option<RustcCode>,
    #[serde(default)]
    spans: Vec<RustcSpan>,
}

#[derive(Debug, Deserialize)]
struct RustcCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RustcSpan {
    file_name: String,
    line_start: usize,
    column_start: usize,
    #[serde(default)]
    is_primary: bool,
}

/// Parse rustc's `--error-format=json` output into errors and warnings.
///
/// Notes, help messages, the trailing "aborting due to" summary and
/// non-JSON lines are skipped. Positions in `source_file` are mapped back
/// to template lines.
pub fn parse_diagnostics(stderr: &str, source: &GeneratedSource, source_file: &Path) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for line in stderr.lines() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        let Ok(message) = serde_json::from_str::<RustcMessage>(line) else {
            continue;
        };
        if message.message_type.as_deref().is_some_and(|t| t != "diagnostic") {
            continue;
        }

        let severity = match message.level.as_str() {
            "error" | "error: internal compiler error" => Severity::Error,
            "warning" => Severity::Warning,
            _ => continue,
        };
        if message.message.starts_with("aborting due to") {
            continue;
        }

        let location = message
            .spans
            .iter()
            .find(|s| s.is_primary)
            .or_else(|| message.spans.first())
            .map(|span| {
                let ours = Path::new(&span.file_name).file_name() == source_file.file_name();
                SourceLocation::Generated {
                    line: span.line_start,
                    column: span.column_start,
                    template_line: if ours {
                        source.template_line(span.line_start)
                    } else {
                        None
                    },
                }
            });

        diagnostics.push(Diagnostic {
            severity,
            message: message.message,
            code: message.code.map(|c| c.code),
            location,
        });
    }

    diagnostics
}

/// Delete leftover artifacts named `<prefix>*` in `dir`.
///
/// Nothing calls this automatically; run it before any view is loaded.
/// Returns the number of files removed.
pub fn purge_stale_artifacts(dir: &Path, prefix: &str) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix) || !entry.file_type()?.is_file() {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("Failed to remove {}: {}", entry.path().display(), e),
        }
    }
    tracing::debug!("Purged {} stale artifact(s) from {}", removed, dir.display());
    Ok(removed)
}
