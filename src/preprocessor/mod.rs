//! The C preprocessor (spec §4.3): directive handling, hide-set macro
//! expansion, `#include` file stacking, `#if` constant folding,
//! adjacent string-literal concatenation, and the handful of builtin
//! macros a self-hosting-style compiler needs.
//!
//! Grounded throughout on `examples/original_source/cpp.c`'s `subst`,
//! `read_expand`, `glue_tokens`, `stringize`, `expand_all`, and
//! `read_funclike_macro_args` (the hide-set algorithm itself is Dave
//! Prosser's, as cpp.c documents). The single `pushback` stack plays
//! the role of cpp.c's ungotten-token list; `read_raw` is `get_token`.

mod condexpr;
mod builtins;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::errors::{CompileError, CResult, SourcePos};
use crate::lexer::Lexer;
use crate::options::CompileOptions;
use crate::stream::Stream;
use crate::token::{HideSet, StrEncoding, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    File,
    Line,
    Date,
    Time,
    Pragma,
}

#[derive(Debug, Clone)]
enum MacroDef {
    Object { body: Vec<Token> },
    Func { params: Vec<String>, variadic: bool, body: Vec<Token> },
    Special(Builtin),
}

struct CondFrame {
    /// Whether any branch of this `#if`/`#elif*`/`#else` chain so far
    /// has been taken (selects the live branch and suppresses the rest).
    taken: bool,
    in_else: bool,
}

enum SkipStop {
    Else,
    Elif,
    Endif,
}

pub struct Preprocessor {
    lexer: Lexer,
    /// Directory of each currently-open file, parallel to the lexer's
    /// internal file stack, used to resolve `#include "..."` relative
    /// to the including file.
    file_dirs: Vec<PathBuf>,
    pushback: Vec<Token>,
    macros: HashMap<String, MacroDef>,
    cond_stack: Vec<CondFrame>,
    include_dirs: Vec<PathBuf>,
    date: String,
    time: String,
}

impl Preprocessor {
    pub fn new(main_file: impl Into<String>, source: &str, opts: &CompileOptions) -> CResult<Self> {
        let mut stream = Stream::new();
        let main_file = main_file.into();
        stream.push_source(main_file.clone(), source);
        let mut include_dirs = opts.include_dirs.clone();
        include_dirs.extend(CompileOptions::system_include_dirs());
        let (date, time) = builtins::now_date_time();
        let mut pp = Preprocessor {
            lexer: Lexer::new(stream),
            file_dirs: vec![parent_dir(&main_file)],
            pushback: Vec::new(),
            macros: HashMap::new(),
            cond_stack: Vec::new(),
            include_dirs,
            date,
            time,
        };
        pp.install_predefined_macros();
        for (name, value) in &opts.defines {
            pp.define_from_cli(name, value.as_deref())?;
        }
        for name in &opts.undefines {
            pp.macros.remove(name);
        }
        Ok(pp)
    }

    fn install_predefined_macros(&mut self) {
        let ones = [
            "__8cc__", "__STDC__", "__STDC_HOSTED__",
            "__amd64", "__amd64__", "__x86_64", "__x86_64__",
            "linux", "__linux", "__linux__", "__gnu_linux__",
            "__unix", "__unix__", "_LP64", "__LP64__", "__ELF__",
        ];
        for name in ones {
            self.define_object(name, "1");
        }
        self.define_object("__STDC_VERSION__", "199901L");
        self.define_object("__SIZEOF_SHORT__", "2");
        self.define_object("__SIZEOF_INT__", "4");
        self.define_object("__SIZEOF_LONG__", "8");
        self.define_object("__SIZEOF_LONG_LONG__", "8");
        self.define_object("__SIZEOF_POINTER__", "8");
        self.define_object("__SIZEOF_FLOAT__", "4");
        self.define_object("__SIZEOF_DOUBLE__", "8");
        self.macros.insert("__FILE__".into(), MacroDef::Special(Builtin::File));
        self.macros.insert("__LINE__".into(), MacroDef::Special(Builtin::Line));
        self.macros.insert("__DATE__".into(), MacroDef::Special(Builtin::Date));
        self.macros.insert("__TIME__".into(), MacroDef::Special(Builtin::Time));
        self.macros.insert("_Pragma".into(), MacroDef::Special(Builtin::Pragma));
    }

    fn define_object(&mut self, name: &str, value: &str) {
        let mut stream = Stream::new();
        stream.push_source("<builtin>", value);
        let mut lexer = Lexer::new(stream);
        let mut body = Vec::new();
        loop {
            let t = lexer.next().expect("predefined macro body must lex cleanly");
            if matches!(t.kind, TokenKind::Eof | TokenKind::Newline) {
                break;
            }
            body.push(t);
        }
        self.macros.insert(name.to_string(), MacroDef::Object { body });
    }

    /// `-D NAME` / `-D NAME=VALUE` from the command line (spec §6).
    fn define_from_cli(&mut self, name: &str, value: Option<&str>) -> CResult<()> {
        self.define_object(name, value.unwrap_or("1"));
        Ok(())
    }

    // ---- raw token / file-stack plumbing -------------------------------

    fn read_raw(&mut self) -> CResult<Token> {
        if let Some(tok) = self.pushback.pop() {
            return Ok(tok);
        }
        loop {
            let tok = self.lexer.next()?;
            if tok.is_eof() && self.lexer.stream_mut().depth() > 1 {
                self.lexer.stream_mut().pop_source();
                self.file_dirs.pop();
                continue;
            }
            return Ok(tok);
        }
    }

    fn unget_all(&mut self, tokens: Vec<Token>) {
        for t in tokens.into_iter().rev() {
            self.pushback.push(t);
        }
    }

    fn read_directive_line(&mut self) -> CResult<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            let tok = self.read_raw()?;
            match tok.kind {
                TokenKind::Newline | TokenKind::Eof => break,
                _ => out.push(tok),
            }
        }
        Ok(out)
    }

    fn skip_rest_of_line(&mut self) -> CResult<()> {
        loop {
            let tok = self.read_raw()?;
            if matches!(tok.kind, TokenKind::Newline | TokenKind::Eof) {
                return Ok(());
            }
        }
    }

    // ---- public entry point --------------------------------------------

    /// Produces the next token the parser should see: directives
    /// consumed, macros expanded, adjacent string literals merged.
    pub fn next(&mut self) -> CResult<Token> {
        let mut tok = self.next_expanded()?;
        while let TokenKind::Str { .. } = tok.kind {
            let la = self.next_expanded()?;
            if matches!(la.kind, TokenKind::Str { .. }) {
                tok = concat_strings(tok, la)?;
            } else {
                self.pushback.push(la);
                break;
            }
        }
        Ok(tok)
    }

    fn next_expanded(&mut self) -> CResult<Token> {
        loop {
            let tok = self.read_raw()?;
            if matches!(tok.kind, TokenKind::Newline) {
                continue;
            }
            if tok.bol && tok.is_punct("#") {
                self.handle_directive()?;
                continue;
            }
            if let Some(name) = tok.ident_name() {
                let name = name.to_string();
                if !tok.hideset.contains(&name) {
                    if let Some(def) = self.macros.get(&name).cloned() {
                        self.expand_macro(tok, &name, def)?;
                        continue;
                    }
                }
            }
            return Ok(tok);
        }
    }

    /// Like [`next_expanded`] but used only for re-scanning isolated
    /// token lists (macro arguments, `#if` lines) that can never
    /// themselves contain a directive.
    fn expand_step(&mut self) -> CResult<Token> {
        loop {
            let tok = self.read_raw()?;
            if let Some(name) = tok.ident_name() {
                let name = name.to_string();
                if !tok.hideset.contains(&name) {
                    if let Some(def) = self.macros.get(&name).cloned() {
                        self.expand_macro(tok, &name, def)?;
                        continue;
                    }
                }
            }
            return Ok(tok);
        }
    }

    /// Fully macro-expands an isolated token list (not drawn from the
    /// live file stream) and returns the result, rescanning exactly as
    /// `cpp.c`'s `expand_all` does: push a sentinel, unget the tokens,
    /// then pull tokens with the normal expansion loop until the
    /// sentinel resurfaces.
    fn expand_all(&mut self, tokens: Vec<Token>) -> CResult<Vec<Token>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let marker_pos = SourcePos::new("<macro-isolate>", 0, 0);
        let marker = Token::new(TokenKind::Eof, marker_pos, false, false, 0);
        self.pushback.push(marker);
        self.unget_all(tokens);
        let mut out = Vec::new();
        loop {
            let tok = self.expand_step()?;
            if matches!(tok.kind, TokenKind::Eof) && tok.pos.file == "<macro-isolate>" {
                break;
            }
            out.push(tok);
        }
        Ok(out)
    }

    // ---- macro expansion -------------------------------------------------

    fn expand_macro(&mut self, tok: Token, name: &str, def: MacroDef) -> CResult<()> {
        match def {
            MacroDef::Object { body } => {
                let hideset = tok.hideset.with(name);
                let out = self.subst(&body, &[], &[], false, hideset)?;
                self.unget_all(out);
            }
            MacroDef::Func { params, variadic, body } => {
                let saved = self.read_raw()?;
                if !saved.is_punct("(") {
                    self.pushback.push(saved);
                    self.pushback.push(tok);
                    return Ok(());
                }
                let (mut args, rparen) = self.read_macro_args(params.len(), variadic)?;
                if !variadic && args.len() != params.len() {
                    return Err(CompileError::preprocessor(
                        tok.pos.clone(),
                        format!(
                            "macro \"{name}\" passed {} arguments, but takes {}",
                            args.len(),
                            params.len()
                        ),
                    ));
                }
                let min_args = if variadic { params.len() + 1 } else { params.len() };
                while args.len() < min_args {
                    args.push(Vec::new());
                }
                let hideset = tok.hideset.intersection(&rparen.hideset).with(name);
                let out = self.subst(&body, &params, &args, variadic, hideset)?;
                self.unget_all(out);
            }
            MacroDef::Special(Builtin::Pragma) => {
                let saved = self.read_raw()?;
                if !saved.is_punct("(") {
                    self.pushback.push(saved);
                    self.pushback.push(tok);
                    return Ok(());
                }
                let (args, _rparen) = self.read_macro_args(1, false)?;
                // `_Pragma` destringizes its argument and behaves as a
                // `#pragma` line; pragmas carry no compiler-visible
                // effect here (spec §4.3), so the expansion is empty.
                let _ = args;
            }
            MacroDef::Special(kind) => {
                let replacement = self.expand_builtin(kind, &tok);
                self.unget_all(vec![replacement]);
            }
        }
        Ok(())
    }

    fn expand_builtin(&self, kind: Builtin, tok: &Token) -> Token {
        match kind {
            Builtin::File => Token::new(
                TokenKind::Str { bytes: tok.pos.file.clone().into_bytes(), encoding: StrEncoding::Narrow },
                tok.pos.clone(),
                tok.leading_space,
                tok.bol,
                tok.seq,
            ),
            Builtin::Line => Token::new(
                TokenKind::Number(tok.pos.line.to_string()),
                tok.pos.clone(),
                tok.leading_space,
                tok.bol,
                tok.seq,
            ),
            Builtin::Date => Token::new(
                TokenKind::Str { bytes: self.date.clone().into_bytes(), encoding: StrEncoding::Narrow },
                tok.pos.clone(),
                tok.leading_space,
                tok.bol,
                tok.seq,
            ),
            Builtin::Time => Token::new(
                TokenKind::Str { bytes: self.time.clone().into_bytes(), encoding: StrEncoding::Narrow },
                tok.pos.clone(),
                tok.leading_space,
                tok.bol,
                tok.seq,
            ),
            Builtin::Pragma => unreachable!("Pragma is handled in expand_macro"),
        }
    }

    fn read_macro_args(&mut self, params_len: usize, variadic: bool) -> CResult<(Vec<Vec<Token>>, Token)> {
        // `params_len` never counts the `...` slot (`parse_param_list`
        // doesn't push one), so the fixed-argument count is `params_len`
        // whether or not the macro is variadic; the vararg tail, if any,
        // is collected separately by the `args.len() < fixed` guard below.
        let fixed = params_len;
        let mut args: Vec<Vec<Token>> = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let mut depth: i32 = 0;
        if fixed == 0 && !variadic {
            let t = self.read_raw()?;
            if t.is_punct(")") {
                return Ok((args, t));
            }
            current.push(t);
        }
        loop {
            let t = self.read_raw()?;
            if t.is_eof() {
                return Err(CompileError::preprocessor(t.pos, "unterminated macro argument list"));
            }
            if t.is_punct("(") {
                depth += 1;
                current.push(t);
            } else if t.is_punct(")") {
                if depth == 0 {
                    args.push(std::mem::take(&mut current));
                    return Ok((args, t));
                }
                depth -= 1;
                current.push(t);
            } else if t.is_punct(",") && depth == 0 && args.len() < fixed {
                args.push(std::mem::take(&mut current));
            } else if matches!(t.kind, TokenKind::Newline) {
                // Newlines inside an argument list act as whitespace.
            } else {
                current.push(t);
            }
        }
    }

    /// Substitutes `body` against `args`, implementing `#`, `##`, and
    /// plain-parameter expansion exactly as `cpp.c`'s `subst` does,
    /// then unions `hideset` onto every produced token.
    fn subst(
        &mut self,
        body: &[Token],
        params: &[String],
        args: &[Vec<Token>],
        _variadic: bool,
        hideset: HideSet,
    ) -> CResult<Vec<Token>> {
        let mut r: Vec<Token> = Vec::new();
        let n = body.len();
        let mut i = 0;
        while i < n {
            let t0 = &body[i];
            let t1 = body.get(i + 1);
            let t0_param = param_position(t0);
            let t1_param = t1.and_then(param_position);

            if t0.is_punct("#") {
                if let Some(pos) = t1_param {
                    r.push(self.stringize(t0, &args[pos]));
                    i += 2;
                    continue;
                }
            }
            if t0.is_punct("##") {
                if let Some(pos) = t1_param {
                    let arg = &args[pos];
                    if !arg.is_empty() {
                        glue_push(&mut r, arg[0].clone())?;
                        let rest = self.expand_all(arg[1..].to_vec())?;
                        r.extend(rest);
                    }
                    i += 2;
                    continue;
                }
                if let Some(t1) = t1 {
                    glue_push(&mut r, t1.clone())?;
                    i += 2;
                    continue;
                }
            }
            if let Some(pos) = t0_param {
                if t1.map(|t| t.is_punct("##")).unwrap_or(false) {
                    let arg = &args[pos];
                    if arg.is_empty() {
                        i += 2;
                    } else {
                        r.extend(arg.clone());
                        i += 1;
                    }
                    continue;
                }
                let expanded = self.expand_all(args[pos].clone())?;
                r.extend(expanded);
                i += 1;
                continue;
            }
            r.push(t0.clone());
            i += 1;
        }
        let _ = params;
        for t in r.iter_mut() {
            t.hideset = t.hideset.union(&hideset);
        }
        Ok(r)
    }

    fn stringize(&self, hash_tok: &Token, arg: &[Token]) -> Token {
        let mut s = String::new();
        for (idx, t) in arg.iter().enumerate() {
            if idx > 0 && t.leading_space {
                s.push(' ');
            }
            s.push_str(&spelling_for_stringize(t));
        }
        Token::new(
            TokenKind::Str { bytes: s.into_bytes(), encoding: StrEncoding::Narrow },
            hash_tok.pos.clone(),
            hash_tok.leading_space,
            hash_tok.bol,
            hash_tok.seq,
        )
    }

    // ---- directive dispatch ---------------------------------------------

    fn handle_directive(&mut self) -> CResult<()> {
        let name_tok = self.read_raw()?;
        if matches!(name_tok.kind, TokenKind::Newline) {
            return Ok(()); // the null directive, "#\n"
        }
        let name = match name_tok.ident_name() {
            Some(s) => s.to_string(),
            None => {
                return Err(CompileError::preprocessor(name_tok.pos, "expected a preprocessing directive name"));
            }
        };
        match name.as_str() {
            "define" => self.do_define(),
            "undef" => self.do_undef(),
            "include" => self.do_include(),
            "if" => {
                let v = self.eval_if_condition()?;
                self.if_branch_loop(v != 0)
            }
            "ifdef" => self.do_ifdef(true),
            "ifndef" => self.do_ifdef(false),
            "else" => self.do_else(),
            "elif" => self.do_elif(),
            "endif" => self.do_endif(),
            "error" => self.do_error(&name_tok.pos),
            "warning" => {
                self.skip_rest_of_line()?;
                Ok(())
            }
            "line" => self.skip_rest_of_line(),
            "pragma" => self.skip_rest_of_line(),
            other => Err(CompileError::preprocessor(name_tok.pos, format!("invalid preprocessing directive #{other}"))),
        }
    }

    fn do_define(&mut self) -> CResult<()> {
        let name_tok = self.read_raw()?;
        let name = name_tok
            .ident_name()
            .ok_or_else(|| CompileError::preprocessor(name_tok.pos.clone(), "macro name must be an identifier"))?
            .to_string();
        let next = self.read_raw()?;
        if next.is_punct("(") && !next.leading_space {
            let (params, variadic) = self.parse_param_list()?;
            let mut body = self.read_directive_line()?;
            mark_params(&mut body, &params, variadic);
            self.macros.insert(name, MacroDef::Func { params, variadic, body });
        } else {
            self.pushback.push(next);
            let body = self.read_directive_line()?;
            self.macros.insert(name, MacroDef::Object { body });
        }
        Ok(())
    }

    fn parse_param_list(&mut self) -> CResult<(Vec<String>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;
        let first = self.read_raw()?;
        if first.is_punct(")") {
            return Ok((params, variadic));
        }
        let mut tok = first;
        loop {
            if tok.is_punct("...") {
                variadic = true;
                let close = self.read_raw()?;
                if !close.is_punct(")") {
                    return Err(CompileError::preprocessor(close.pos, "')' expected after '...'"));
                }
                break;
            }
            let pname = tok
                .ident_name()
                .ok_or_else(|| CompileError::preprocessor(tok.pos.clone(), "macro parameter must be an identifier"))?
                .to_string();
            params.push(pname);
            let sep = self.read_raw()?;
            if sep.is_punct(")") {
                break;
            }
            if !sep.is_punct(",") {
                return Err(CompileError::preprocessor(sep.pos, "',' or ')' expected in macro parameter list"));
            }
            tok = self.read_raw()?;
        }
        Ok((params, variadic))
    }

    fn do_undef(&mut self) -> CResult<()> {
        let name_tok = self.read_raw()?;
        let name = name_tok
            .ident_name()
            .ok_or_else(|| CompileError::preprocessor(name_tok.pos.clone(), "macro name must be an identifier"))?;
        self.macros.remove(name);
        self.skip_rest_of_line()
    }

    fn do_include(&mut self) -> CResult<()> {
        let (filename, angled) = self.read_include_filename()?;
        let path = self.resolve_include(&filename, angled)?;
        let contents = std::fs::read_to_string(&path).map_err(CompileError::Io)?;
        let name = path.to_string_lossy().into_owned();
        self.file_dirs.push(parent_dir(&name));
        self.lexer.stream_mut().push_source(name, &contents);
        Ok(())
    }

    fn read_include_filename(&mut self) -> CResult<(String, bool)> {
        loop {
            match self.lexer.stream_mut().peek_char() {
                Some(' ') | Some('\t') => {
                    self.lexer.stream_mut().read_char();
                }
                Some('"') => {
                    self.lexer.stream_mut().read_char();
                    let name = self.lexer.read_header_name(false)?;
                    self.skip_rest_of_line()?;
                    return Ok((name, false));
                }
                Some('<') => {
                    self.lexer.stream_mut().read_char();
                    let name = self.lexer.read_header_name(true)?;
                    self.skip_rest_of_line()?;
                    return Ok((name, true));
                }
                _ => {
                    // Macro-expanded include form, e.g. `#include HEADER`.
                    let raw = self.read_directive_line()?;
                    let expanded = self.expand_all(raw)?;
                    return filename_from_tokens(&expanded);
                }
            }
        }
    }

    fn resolve_include(&mut self, filename: &str, angled: bool) -> CResult<PathBuf> {
        if !angled {
            if let Some(dir) = self.file_dirs.last() {
                let candidate = dir.join(filename);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        for dir in &self.include_dirs {
            let candidate = dir.join(filename);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(CompileError::preprocessor(
            self.lexer.stream_mut().pos(),
            format!("{filename}: no such file or directory"),
        ))
    }

    fn do_error(&mut self, pos: &SourcePos) -> CResult<()> {
        let tokens = self.read_directive_line()?;
        let text = tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ");
        Err(CompileError::preprocessor(pos.clone(), format!("#error {text}")))
    }

    // ---- conditional compilation -----------------------------------------

    fn eval_if_condition(&mut self) -> CResult<i64> {
        let raw = self.read_directive_line()?;
        let resolved = self.process_defined(raw)?;
        let expanded = self.expand_all(resolved)?;
        let finalized = zero_unknown_idents(expanded);
        condexpr::eval(&finalized)
    }

    fn process_defined(&self, tokens: Vec<Token>) -> CResult<Vec<Token>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = &tokens[i];
            if t.ident_name() == Some("defined") {
                let (name, consumed) = if tokens.get(i + 1).map(|t| t.is_punct("(")).unwrap_or(false) {
                    let name_tok = tokens.get(i + 2).ok_or_else(|| {
                        CompileError::preprocessor(t.pos.clone(), "expected identifier after 'defined('")
                    })?;
                    let name = name_tok.ident_name().ok_or_else(|| {
                        CompileError::preprocessor(name_tok.pos.clone(), "expected identifier after 'defined('")
                    })?;
                    let close = tokens.get(i + 3).ok_or_else(|| {
                        CompileError::preprocessor(t.pos.clone(), "expected ')' after 'defined(IDENT'")
                    })?;
                    if !close.is_punct(")") {
                        return Err(CompileError::preprocessor(close.pos.clone(), "expected ')' after 'defined(IDENT'"));
                    }
                    (name.to_string(), 4)
                } else {
                    let name_tok = tokens
                        .get(i + 1)
                        .ok_or_else(|| CompileError::preprocessor(t.pos.clone(), "expected identifier after 'defined'"))?;
                    let name = name_tok
                        .ident_name()
                        .ok_or_else(|| CompileError::preprocessor(name_tok.pos.clone(), "expected identifier after 'defined'"))?;
                    (name.to_string(), 2)
                };
                let value = if self.macros.contains_key(&name) { "1" } else { "0" };
                out.push(Token::new(
                    TokenKind::Number(value.to_string()),
                    t.pos.clone(),
                    t.leading_space,
                    t.bol,
                    t.seq,
                ));
                i += consumed;
            } else {
                out.push(t.clone());
                i += 1;
            }
        }
        Ok(out)
    }

    fn do_ifdef(&mut self, want_defined: bool) -> CResult<()> {
        let name_tok = self.read_raw()?;
        let name = name_tok
            .ident_name()
            .ok_or_else(|| CompileError::preprocessor(name_tok.pos.clone(), "macro name must be an identifier"))?
            .to_string();
        self.skip_rest_of_line()?;
        let cond = self.macros.contains_key(&name) == want_defined;
        self.if_branch_loop(cond)
    }

    fn if_branch_loop(&mut self, cond: bool) -> CResult<()> {
        self.cond_stack.push(CondFrame { taken: cond, in_else: false });
        if cond {
            return Ok(());
        }
        loop {
            match self.skip_to_directive()? {
                SkipStop::Endif => {
                    self.cond_stack.pop();
                    self.skip_rest_of_line()?;
                    return Ok(());
                }
                SkipStop::Else => {
                    self.skip_rest_of_line()?;
                    let frame = self.cond_stack.last_mut().expect("pushed above");
                    frame.in_else = true;
                    frame.taken = true;
                    return Ok(());
                }
                SkipStop::Elif => {
                    let value = self.eval_if_condition()?;
                    if value != 0 {
                        self.cond_stack.last_mut().expect("pushed above").taken = true;
                        return Ok(());
                    }
                }
            }
        }
    }

    fn do_else(&mut self) -> CResult<()> {
        {
            let frame = self
                .cond_stack
                .last_mut()
                .ok_or_else(|| CompileError::preprocessor(self.lexer.stream_mut().pos(), "#else without #if"))?;
            if frame.in_else {
                return Err(CompileError::preprocessor(self.lexer.stream_mut().pos(), "#else after #else"));
            }
            frame.in_else = true;
        }
        self.skip_rest_of_line()?;
        match self.skip_to_directive()? {
            SkipStop::Endif => {
                self.cond_stack.pop();
                self.skip_rest_of_line()
            }
            SkipStop::Else => Err(CompileError::preprocessor(self.lexer.stream_mut().pos(), "#else after #else")),
            SkipStop::Elif => Err(CompileError::preprocessor(self.lexer.stream_mut().pos(), "#elif after #else")),
        }
    }

    fn do_elif(&mut self) -> CResult<()> {
        {
            let frame = self
                .cond_stack
                .last()
                .ok_or_else(|| CompileError::preprocessor(self.lexer.stream_mut().pos(), "#elif without #if"))?;
            if frame.in_else {
                return Err(CompileError::preprocessor(self.lexer.stream_mut().pos(), "#elif after #else"));
            }
        }
        self.skip_rest_of_line()?;
        loop {
            match self.skip_to_directive()? {
                SkipStop::Endif => {
                    self.cond_stack.pop();
                    return self.skip_rest_of_line();
                }
                SkipStop::Else => {
                    self.skip_rest_of_line()?;
                    self.cond_stack.last_mut().expect("checked above").in_else = true;
                }
                SkipStop::Elif => {
                    self.skip_rest_of_line()?;
                }
            }
        }
    }

    fn do_endif(&mut self) -> CResult<()> {
        if self.cond_stack.pop().is_none() {
            return Err(CompileError::preprocessor(self.lexer.stream_mut().pos(), "#endif without #if"));
        }
        Ok(())
    }

    /// Scans raw tokens, recognizing only directives, until a
    /// `#else`/`#elif`/`#endif` at the current nesting depth is found;
    /// nested `#if*` blocks are skipped over wholesale.
    fn skip_to_directive(&mut self) -> CResult<SkipStop> {
        let mut depth = 0;
        loop {
            let tok = self.read_raw()?;
            if tok.is_eof() {
                return Err(CompileError::preprocessor(tok.pos, "unterminated #if (missing #endif)"));
            }
            if tok.bol && tok.is_punct("#") {
                let name_tok = self.read_raw()?;
                let name = name_tok.ident_name().unwrap_or("").to_string();
                match name.as_str() {
                    "if" | "ifdef" | "ifndef" => {
                        depth += 1;
                        self.skip_rest_of_line()?;
                    }
                    "endif" => {
                        if depth == 0 {
                            return Ok(SkipStop::Endif);
                        }
                        depth -= 1;
                        self.skip_rest_of_line()?;
                    }
                    "else" if depth == 0 => return Ok(SkipStop::Else),
                    "elif" if depth == 0 => return Ok(SkipStop::Elif),
                    _ => self.skip_rest_of_line()?,
                }
            }
        }
    }
}

fn parent_dir(file: &str) -> PathBuf {
    Path::new(file).parent().map(Path::to_path_buf).unwrap_or_default()
}

fn param_position(tok: &Token) -> Option<usize> {
    match tok.kind {
        TokenKind::MacroParam { position, .. } => Some(position),
        _ => None,
    }
}

fn mark_params(body: &mut [Token], params: &[String], variadic: bool) {
    for t in body.iter_mut() {
        if let TokenKind::Ident(name) = &t.kind {
            if let Some(pos) = params.iter().position(|p| p == name) {
                t.kind = TokenKind::MacroParam { position: pos, is_vararg: false };
            } else if variadic && name == "__VA_ARGS__" {
                t.kind = TokenKind::MacroParam { position: params.len(), is_vararg: true };
            }
        }
    }
}

fn glue_push(r: &mut Vec<Token>, next: Token) -> CResult<()> {
    match r.pop() {
        Some(last) => {
            let glued = glue(&last, &next)?;
            r.push(glued);
            Ok(())
        }
        None => {
            r.push(next);
            Ok(())
        }
    }
}

/// Pastes two tokens' spellings together; the result is always an
/// identifier unless it starts with a digit, in which case it's a
/// number (matching `cpp.c`'s `glue_tokens`, which never reclassifies
/// a paste result as a punctuator).
fn glue(a: &Token, b: &Token) -> CResult<Token> {
    let left = spelling_for_glue(a)?;
    let right = spelling_for_glue(b)?;
    let combined = format!("{left}{right}");
    let kind = if combined.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        TokenKind::Number(combined)
    } else {
        TokenKind::Ident(combined)
    };
    Ok(Token::new(kind, a.pos.clone(), a.leading_space, a.bol, a.seq))
}

fn spelling_for_glue(t: &Token) -> CResult<String> {
    match &t.kind {
        TokenKind::Ident(s) => Ok(s.clone()),
        TokenKind::Keyword(k) => Ok(k.spelling().to_string()),
        TokenKind::Punct(p) => Ok(p.to_string()),
        TokenKind::Number(s) => Ok(s.clone()),
        other => Err(CompileError::preprocessor(t.pos.clone(), format!("cannot paste token {other:?}"))),
    }
}

fn spelling_for_stringize(t: &Token) -> String {
    match &t.kind {
        TokenKind::Str { bytes, .. } => {
            let mut s = String::from("\"");
            for &b in bytes {
                match b {
                    b'"' => s.push_str("\\\""),
                    b'\\' => s.push_str("\\\\"),
                    _ => s.push(b as char),
                }
            }
            s.push('"');
            s
        }
        TokenKind::Char { value, .. } => format!("'{}'", char::from_u32(*value).unwrap_or('?')),
        _ => t.to_string(),
    }
}

fn zero_unknown_idents(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .map(|t| match t.kind {
            TokenKind::Ident(_) => Token::new(TokenKind::Number("0".into()), t.pos, t.leading_space, t.bol, t.seq),
            _ => t,
        })
        .collect()
}

fn filename_from_tokens(tokens: &[Token]) -> CResult<(String, bool)> {
    if let [Token { kind: TokenKind::Str { bytes, .. }, .. }] = tokens {
        return Ok((String::from_utf8_lossy(bytes).into_owned(), false));
    }
    let joined = tokens.iter().map(|t| t.to_string()).collect::<String>();
    if joined.starts_with('<') && joined.ends_with('>') {
        return Ok((joined[1..joined.len() - 1].to_string(), true));
    }
    let pos = tokens.first().map(|t| t.pos.clone()).unwrap_or_else(|| SourcePos::new("<include>", 0, 0));
    Err(CompileError::preprocessor(pos, "expected a header name after #include"))
}

fn concat_strings(a: Token, b: Token) -> CResult<Token> {
    let (a_bytes, a_enc, pos, leading_space, bol, seq) = match a.kind {
        TokenKind::Str { bytes, encoding } => (bytes, encoding, a.pos, a.leading_space, a.bol, a.seq),
        _ => unreachable!("caller checked"),
    };
    let (b_bytes, b_enc) = match b.kind {
        TokenKind::Str { bytes, encoding } => (bytes, encoding),
        _ => unreachable!("caller checked"),
    };
    let encoding = match (a_enc, b_enc) {
        (x, StrEncoding::Narrow) => x,
        (StrEncoding::Narrow, y) => y,
        (x, y) if x == y => x,
        _ => return Err(CompileError::preprocessor(pos, "cannot concatenate string literals of different encodings")),
    };
    let mut bytes = a_bytes;
    bytes.extend(b_bytes);
    Ok(Token::new(TokenKind::Str { bytes, encoding }, pos, leading_space, bol, seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(src: &str) -> Vec<Token> {
        let opts = CompileOptions::default();
        let mut pp = Preprocessor::new("t", src, &opts).unwrap();
        let mut out = Vec::new();
        loop {
            let t = pp.next().unwrap();
            if t.is_eof() {
                break;
            }
            out.push(t);
        }
        out
    }

    fn idents_and_numbers(toks: &[Token]) -> Vec<String> {
        toks.iter()
            .filter(|t| !matches!(t.kind, TokenKind::Newline))
            .map(|t| t.to_string())
            .collect()
    }

    #[test]
    fn object_like_macro_expands() {
        let toks = expand("#define N 42\nN\n");
        assert_eq!(idents_and_numbers(&toks), vec!["42"]);
    }

    #[test]
    fn function_like_macro_substitutes_arguments() {
        let toks = expand("#define SQR(x) ((x) * (x))\nSQR(1 + 2)\n");
        assert_eq!(idents_and_numbers(&toks), vec!["(", "(", "1", "+", "2", ")", "*", "(", "1", "+", "2", ")", ")"]);
    }

    #[test]
    fn self_referential_macro_does_not_recurse() {
        let toks = expand("#define X X + 1\nX\n");
        assert_eq!(idents_and_numbers(&toks), vec!["X", "+", "1"]);
    }

    #[test]
    fn stringize_operator_quotes_argument() {
        let toks = expand("#define STR(x) #x\nSTR(a+b)\n");
        match &toks[0].kind {
            TokenKind::Str { bytes, .. } => assert_eq!(bytes, b"a+b"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn token_paste_glues_identifiers() {
        let toks = expand("#define CAT(a, b) a ## b\nCAT(foo, bar)\n");
        assert_eq!(idents_and_numbers(&toks), vec!["foobar"]);
    }

    #[test]
    fn variadic_macro_collects_remaining_arguments() {
        let toks = expand("#define LOG(fmt, ...) f(fmt, __VA_ARGS__)\nLOG(\"x\", 1, 2)\n");
        assert_eq!(idents_and_numbers(&toks), vec!["f", "(", "\"x\"", ",", "1", ",", "2", ")"]);
    }

    #[test]
    fn conditional_compilation_selects_true_branch() {
        let toks = expand("#define A 1\n#if A\nyes\n#else\nno\n#endif\n");
        assert_eq!(idents_and_numbers(&toks), vec!["yes"]);
    }

    #[test]
    fn conditional_compilation_selects_elif_branch() {
        let toks = expand("#if 0\na\n#elif 1\nb\n#else\nc\n#endif\n");
        assert_eq!(idents_and_numbers(&toks), vec!["b"]);
    }

    #[test]
    fn defined_operator_checks_macro_table_without_expanding() {
        let toks = expand("#define FOO\n#if defined(FOO) && !defined(BAR)\nok\n#endif\n");
        assert_eq!(idents_and_numbers(&toks), vec!["ok"]);
    }

    #[test]
    fn adjacent_string_literals_concatenate() {
        let toks = expand("\"a\" \"b\"\n");
        match &toks[0].kind {
            TokenKind::Str { bytes, .. } => assert_eq!(bytes, b"ab"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn builtin_line_and_file_macros() {
        let toks = expand("__LINE__\n");
        assert_eq!(idents_and_numbers(&toks), vec!["1"]);
    }
}
