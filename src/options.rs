//! Compile options threaded through every pass, built from the CLI
//! (spec §6). Grounded on `examples/pmikstacki-bsharp/src/cli/mod.rs`'s
//! flat options-struct-from-derive-args pattern.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// `-E`: preprocess only, emit preprocessed source.
    Preprocess,
    /// `-fdump-ast`: emit the parsed/analyzed tree as JSON.
    DumpAst,
    /// `-S`: emit assembly text.
    Assembly,
    /// `-c` or no flag: assemble (spec §5: we stop at the `.s` we'd
    /// hand to the system assembler, since driving `as`/`ld` is out of
    /// scope — see SPEC_FULL.md Non-goals).
    Object,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub include_dirs: Vec<PathBuf>,
    pub defines: Vec<(String, Option<String>)>,
    pub undefines: Vec<String>,
    pub output_kind: OutputKind,
    pub dump_ast: bool,
    pub dump_stack: bool,
    pub dump_source_on_error: bool,
    pub warnings_enabled: bool,
    pub warnings_are_errors: bool,
    pub color: bool,
}

impl CompileOptions {
    pub fn system_include_dirs() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/usr/local/include"),
            PathBuf::from("/usr/include/x86_64-linux-gnu"),
            PathBuf::from("/usr/include"),
        ]
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            inputs: Vec::new(),
            output: None,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            undefines: Vec::new(),
            output_kind: OutputKind::Object,
            dump_ast: false,
            dump_stack: false,
            dump_source_on_error: true,
            warnings_enabled: true,
            warnings_are_errors: false,
            color: true,
        }
    }
}
