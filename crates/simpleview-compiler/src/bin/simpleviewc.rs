/// simpleview compiler CLI

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use simpleview_compiler::{
    purge_stale_artifacts, CompileError, CompileOptions, ModuleManifest, TypeRegistry, ViewCompiler,
};

#[derive(Parser, Debug)]
#[command(name = "simpleviewc")]
#[command(about = "simpleview compiler - builds view templates into loadable Rust libraries")]
#[command(version)]
struct Args {
    /// Template file
    #[arg(value_name = "TEMPLATE")]
    input: PathBuf,

    /// JSON manifest of modules templates may reference
    #[arg(short, long, value_name = "FILE")]
    modules: Option<PathBuf>,

    /// Print the generated Rust source and exit
    #[arg(long)]
    emit_source: bool,

    /// Render the compiled view (templates without @model/@handler only)
    #[arg(long)]
    render: bool,

    /// Delete stale artifacts from the temp directory before compiling
    #[arg(long)]
    purge: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(&args) {
        match e.downcast_ref::<CompileError>() {
            Some(CompileError::Compilation(diagnostics)) => {
                eprintln!("Compilation failed:");
                for diagnostic in diagnostics {
                    eprintln!("  {}", diagnostic);
                }
            }
            _ => eprintln!("Compilation failed: {:#}", e),
        }
        process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let (options, registry) = match &args.modules {
        Some(path) => {
            let manifest = ModuleManifest::from_path(path)?;
            (manifest.apply(CompileOptions::new()), manifest.registry())
        }
        None => (CompileOptions::new(), TypeRegistry::new()),
    };

    if args.purge {
        let removed = purge_stale_artifacts(&options.temp_dir, &options.artifact_prefix)
            .with_context(|| format!("purging {}", options.temp_dir.display()))?;
        tracing::info!("Removed {} stale artifact(s)", removed);
    }

    let template = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let compiler = ViewCompiler::new(options, Arc::new(registry));

    if args.emit_source {
        let source = compiler.generate_source(&template)?;
        print!("{}", source.code);
        return Ok(());
    }

    let entry = compiler.compile(&template)?;
    println!("{}", entry.name());
    if args.verbose {
        println!("  Library: {}", entry.library_path().display());
        if let Some(model) = entry.model_type() {
            println!("  Model: {}", model);
        }
        if let Some(handler) = entry.handler_type() {
            println!("  Handler: {}", handler);
        }
    }

    if args.render {
        print!("{}", entry.render()?);
    }

    Ok(())
}
