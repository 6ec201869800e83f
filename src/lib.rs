//! A self-hosting-style C11 compiler targeting x86-64 AT&T assembly.
//!
//! Pipeline: [`stream`] + [`lexer`] read characters into
//! preprocessing tokens, [`preprocessor`] expands macros and
//! directives, [`parser`] turns the resulting token stream directly
//! into a typed tree (parsing and semantic analysis are one pass, per
//! spec §4.4), and [`codegen`] lowers that tree straight to AT&T
//! assembly text. [`compiler`] wires the passes together; [`cli`] is
//! the command-line front end.

pub mod cli;
pub mod codegen;
pub mod compiler;
pub mod errors;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod preprocessor;
pub mod stream;
pub mod token;
