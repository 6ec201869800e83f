//! Flat, origin-tagged diagnostic taxonomy shared by every pass.
//!
//! Every entry carries enough position information to produce the
//! `[ERROR]`/`[WARN]` line described for the driver; there is no
//! recovery, the first `CompileError` a pass returns halts the
//! compilation.

use std::fmt;
use serde::Serialize;
use thiserror::Error;

/// A source position. `line`/`column` are 1-based; `file` is the
/// name under which the stream was opened (not canonicalized).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourcePos { file: file.into(), line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{pos}: {message}")]
    Lexical { pos: SourcePos, message: String },

    #[error("{pos}: {message}")]
    Preprocessor { pos: SourcePos, message: String },

    #[error("{pos}: {message}")]
    Parse { pos: SourcePos, message: String },

    #[error("{pos}: {message}")]
    Semantic { pos: SourcePos, message: String },

    #[error("internal codegen error: {message}")]
    Codegen { message: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub fn lexical(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::Lexical { pos, message: message.into() }
    }
    pub fn preprocessor(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::Preprocessor { pos, message: message.into() }
    }
    pub fn parse(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::Parse { pos, message: message.into() }
    }
    pub fn semantic(pos: SourcePos, message: impl Into<String>) -> Self {
        CompileError::Semantic { pos, message: message.into() }
    }
    pub fn codegen(message: impl Into<String>) -> Self {
        CompileError::Codegen { message: message.into() }
    }
}

pub type CResult<T> = std::result::Result<T, CompileError>;

/// Whether `-Werror` is in effect; read by [`warn`] to decide whether a
/// warning should be escalated to a fatal [`CompileError`].
pub struct Diagnostics {
    pub warnings_are_errors: bool,
    pub warnings_enabled: bool,
    pub color: bool,
}

impl Diagnostics {
    pub fn new(warnings_are_errors: bool, warnings_enabled: bool, color: bool) -> Self {
        Diagnostics { warnings_are_errors, warnings_enabled, color }
    }

    /// Prints a `[WARN]` line to stderr, or promotes it to a fatal
    /// [`CompileError`] when warnings are errors.
    pub fn warn(&self, pos: &SourcePos, message: &str) -> CResult<()> {
        if !self.warnings_enabled {
            return Ok(());
        }
        if self.warnings_are_errors {
            return Err(CompileError::semantic(pos.clone(), message));
        }
        if self.color {
            eprintln!("\x1b[33m[WARN]\x1b[0m {pos}: {message}");
        } else {
            eprintln!("[WARN] {pos}: {message}");
        }
        Ok(())
    }

    /// Prints a `[ERROR]` line to stderr. Callers still propagate the
    /// `CompileError` up to `main`, which is the sole place that exits
    /// the process (see `cli::run`).
    pub fn report_fatal(&self, err: &CompileError) {
        if self.color {
            eprintln!("\x1b[31m[ERROR]\x1b[0m {err}");
        } else {
            eprintln!("[ERROR] {err}");
        }
    }
}
