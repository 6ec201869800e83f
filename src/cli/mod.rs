//! Command-line front end (spec §6): a flat flag set in the style of
//! the reference driver, not a subcommand tree — one input, a pile of
//! `-I`/`-D`/`-U`/`-f`/`-W` switches, and an output-kind selector.
//!
//! Grounded on `examples/pmikstacki-bsharp/src/cli/mod.rs`'s
//! `clap`-derive `Parser` struct and its `run()` entry point, adapted
//! from a `Subcommand` dispatch to a single flat struct since this
//! driver has no subcommands to dispatch between.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use crate::options::{CompileOptions, OutputKind};

#[derive(Parser, Debug)]
#[command(name = "c11cc")]
#[command(about = "A self-hosting-style C11 compiler targeting x86-64 AT&T assembly", version)]
pub struct Cli {
    /// Input source file, or `-` for stdin.
    #[arg(required = true)]
    input: PathBuf,

    /// Output path (assembly, object, preprocessed source, or AST
    /// dump, depending on the other flags).
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Add a directory to the `#include` search path.
    #[arg(short = 'I', value_name = "DIR", action = clap::ArgAction::Append)]
    include: Vec<PathBuf>,

    /// Predefine a macro (`NAME` or `NAME=VALUE`).
    #[arg(short = 'D', value_name = "NAME[=VALUE]", action = clap::ArgAction::Append)]
    define: Vec<String>,

    /// Undefine a predefined macro.
    #[arg(short = 'U', value_name = "NAME", action = clap::ArgAction::Append)]
    undefine: Vec<String>,

    /// Preprocess only; write the reconstructed source and stop.
    #[arg(short = 'E')]
    preprocess_only: bool,

    /// Stop after emitting assembly; do not invoke the assembler.
    #[arg(short = 'S')]
    assembly_only: bool,

    /// Emit an object file (invokes the system `as`). Default when
    /// neither `-E`, `-S`, nor `-fdump-ast` is given.
    #[arg(short = 'c')]
    object: bool,

    /// Dump the parsed/analyzed tree as JSON instead of generating code.
    #[arg(long = "fdump-ast")]
    dump_ast: bool,

    /// Annotate emitted assembly with the codegen call stack that
    /// produced each instruction.
    #[arg(long = "fdump-stack")]
    dump_stack: bool,

    /// Suppress the `# file:line` source comment normally interleaved
    /// into emitted assembly.
    #[arg(long = "fno-dump-source")]
    no_dump_source: bool,

    /// Enable extra warnings. Accepted for compatibility; warnings are
    /// already unconditionally enabled unless `-w` is given.
    #[arg(long = "Wall")]
    _wall: bool,

    /// Treat warnings as errors.
    #[arg(long = "Werror")]
    werror: bool,

    /// Suppress all warnings.
    #[arg(short = 'w')]
    no_warnings: bool,

    /// Disable ANSI color in diagnostics.
    #[arg(long = "no-color")]
    no_color: bool,

    /// Accepted for compatibility; debug info is always emitted.
    #[arg(short = 'g')]
    _debug_info: bool,

    /// Accepted for compatibility; this compiler performs no
    /// optimization passes.
    #[arg(short = 'O', value_name = "N")]
    _opt_level: Option<String>,

    /// Accepted for compatibility; x86-64 is the only target.
    #[arg(long = "m64")]
    _m64: bool,
}

impl Cli {
    fn into_options(self) -> Result<CompileOptions> {
        let mut defines = Vec::new();
        for spec in &self.define {
            match spec.split_once('=') {
                Some((name, value)) => defines.push((name.to_string(), Some(value.to_string()))),
                None => defines.push((spec.clone(), None)),
            }
        }

        let output_kind = if self.dump_ast {
            OutputKind::DumpAst
        } else if self.preprocess_only {
            OutputKind::Preprocess
        } else if self.assembly_only {
            OutputKind::Assembly
        } else {
            OutputKind::Object
        };

        if [self.preprocess_only, self.assembly_only, self.object, self.dump_ast]
            .iter()
            .filter(|&&f| f)
            .count()
            > 1
        {
            bail!("-E, -S, -c and -fdump-ast are mutually exclusive");
        }

        Ok(CompileOptions {
            inputs: vec![self.input],
            output: self.output,
            include_dirs: self.include,
            defines,
            undefines: self.undefine,
            output_kind,
            dump_ast: self.dump_ast,
            dump_stack: self.dump_stack,
            dump_source_on_error: !self.no_dump_source,
            warnings_enabled: !self.no_warnings,
            warnings_are_errors: self.werror,
            color: !self.no_color,
        })
    }
}

/// Parses `std::env::args`, builds a [`CompileOptions`], and runs the
/// pipeline. Returns `Ok(())` on success; any fatal diagnostic or
/// invalid invocation surfaces as an `Err` so `main` can exit 1.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let opts = cli.into_options()?;
    crate::compiler::compile(&opts)
}
