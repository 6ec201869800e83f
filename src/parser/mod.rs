//! Recursive-descent C11 parser and semantic analyzer (spec §4.4).
//!
//! Grounded on `examples/pmikstacki-bsharp/src/parsers/expressions/expression_parser.rs`'s
//! one-function-per-precedence-level shape, generalized from parsing
//! over `&str` with `nom` combinators to parsing over `&[Token]`-like
//! input (a single pushed-back [`Token`] cursor fed by the
//! preprocessor) with an explicit `Parser` struct carrying the scope
//! stacks spec §9 calls for.

pub mod ast;
pub mod expressions;
pub mod initializers;
pub mod statements;
pub mod types;

use std::collections::HashMap;

use crate::errors::{CompileError, CResult, SourcePos};
use crate::preprocessor::Preprocessor;
use crate::token::{Keyword, Token, TokenKind};
use ast::{FuncMeta, LocalVar, Node, NodeKind};
use types::{Field, FuncType, Type, TypeArena, TypeId, TypeKind};

#[derive(Debug, Clone)]
pub enum Symbol {
    Typedef(TypeId),
    Var { ty: TypeId, is_local: bool, is_global_static: bool, local_offset: i32, global_label: String },
    EnumConst(i64),
}

pub struct Scope {
    names: HashMap<String, Symbol>,
}

impl Scope {
    fn new() -> Self {
        Scope { names: HashMap::new() }
    }
}

#[derive(Clone, Copy)]
struct LoopContext {
    break_label: u32,
    continue_label: u32,
}

#[derive(Clone)]
struct SwitchContext {
    end_label: u32,
    default_label: Option<u32>,
    cases: Vec<(i64, u32)>,
}

struct FunctionContext {
    return_type: TypeId,
    locals: Vec<LocalVar>,
    frame_size: i32,
    labels: HashMap<String, u32>,
    pending_gotos: Vec<(String, SourcePos)>,
    loop_stack: Vec<LoopContext>,
    switch_stack: Vec<SwitchContext>,
}

pub struct Parser {
    pp: Preprocessor,
    pub types: TypeArena,
    lookahead: Vec<Token>,
    global_scope: Scope,
    local_scopes: Vec<Scope>,
    tag_scope: Vec<HashMap<String, TypeId>>,
    func: Option<FunctionContext>,
    label_counter: u32,
    anon_counter: u32,
    pub string_labels: Vec<(String, Vec<u8>)>,
    /// Parameter names from the most recently parsed function-type
    /// declarator tail, stashed here because `parse_declarator_tail`
    /// returns only a `TypeId` but `parse_function_definition` needs
    /// the names too.
    last_declarator_param_names: Option<Vec<String>>,
    /// Whether the most recently parsed parameter list was a bare
    /// K&R-style identifier list (spec §4.4 "K&R and prototype
    /// forms"), set by `parse_param_list` and read back immediately by
    /// `parse_declarator_tail` when building the `FuncType`.
    last_declarator_old_style: bool,
}

impl Parser {
    pub fn new(pp: Preprocessor) -> Self {
        let types = TypeArena::new();
        let mut p = Parser {
            pp,
            types,
            lookahead: Vec::new(),
            global_scope: Scope::new(),
            local_scopes: Vec::new(),
            tag_scope: vec![HashMap::new()],
            func: None,
            label_counter: 0,
            anon_counter: 0,
            string_labels: Vec::new(),
            last_declarator_param_names: None,
            last_declarator_old_style: false,
        };
        let va_list = p.types.va_list;
        p.declare("va_list".to_string(), Symbol::Typedef(va_list));
        p.declare("__builtin_va_list".to_string(), Symbol::Typedef(va_list));
        p
    }

    // ---- token plumbing ---------------------------------------------------

    fn peek(&mut self) -> CResult<&Token> {
        if self.lookahead.is_empty() {
            let t = self.pp.next()?;
            self.lookahead.push(t);
        }
        Ok(&self.lookahead[0])
    }

    fn peek2(&mut self) -> CResult<&Token> {
        while self.lookahead.len() < 2 {
            let t = self.pp.next()?;
            self.lookahead.push(t);
        }
        Ok(&self.lookahead[1])
    }

    fn bump(&mut self) -> CResult<Token> {
        if !self.lookahead.is_empty() {
            return Ok(self.lookahead.remove(0));
        }
        self.pp.next()
    }

    fn expect_punct(&mut self, p: &str) -> CResult<Token> {
        let t = self.bump()?;
        if t.is_punct(p) {
            Ok(t)
        } else {
            Err(CompileError::parse(t.pos.clone(), format!("'{p}' expected, got '{t}'")))
        }
    }

    fn eat_punct(&mut self, p: &str) -> CResult<bool> {
        if self.peek()?.is_punct(p) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> CResult<bool> {
        if self.peek()?.is_keyword(kw) {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_ident(&mut self) -> CResult<(String, SourcePos)> {
        let t = self.bump()?;
        match t.kind {
            TokenKind::Ident(s) => Ok((s, t.pos)),
            _ => Err(CompileError::parse(t.pos, "identifier expected")),
        }
    }

    fn new_label(&mut self) -> u32 {
        self.label_counter += 1;
        self.label_counter
    }

    fn new_anon_name(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!(".L{prefix}{}", self.anon_counter)
    }

    // ---- scope management ---------------------------------------------

    fn enter_scope(&mut self) {
        self.local_scopes.push(Scope::new());
        self.tag_scope.push(HashMap::new());
    }

    fn leave_scope(&mut self) {
        self.local_scopes.pop();
        self.tag_scope.pop();
    }

    fn declare(&mut self, name: String, sym: Symbol) {
        if let Some(scope) = self.local_scopes.last_mut() {
            scope.names.insert(name, sym);
        } else {
            self.global_scope.names.insert(name, sym);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Symbol> {
        for scope in self.local_scopes.iter().rev() {
            if let Some(s) = scope.names.get(name) {
                return Some(s);
            }
        }
        self.global_scope.names.get(name)
    }

    fn declare_tag(&mut self, name: String, id: TypeId) {
        self.tag_scope.last_mut().expect("global tag scope always present").insert(name, id);
    }

    fn lookup_tag(&self, name: &str) -> Option<TypeId> {
        for scope in self.tag_scope.iter().rev() {
            if let Some(id) = scope.get(name) {
                return Some(*id);
            }
        }
        None
    }

    fn is_typedef_name(&self, name: &str) -> bool {
        matches!(self.lookup(name), Some(Symbol::Typedef(_)))
    }

    // ---- top-level driver -----------------------------------------------

    /// Parses the whole translation unit into its top-level declaration
    /// list (spec §3 "Node... the top-level vector... is the sole root
    /// retained through code generation").
    pub fn parse_translation_unit(&mut self) -> CResult<Vec<Node>> {
        let mut decls = Vec::new();
        loop {
            if self.peek()?.is_eof() {
                break;
            }
            if self.eat_punct(";")? {
                continue;
            }
            decls.push(self.parse_external_declaration()?);
        }
        Ok(decls)
    }

    fn parse_external_declaration(&mut self) -> CResult<Node> {
        let pos = self.peek()?.pos.clone();
        let spec = self.parse_decl_specifiers()?;
        if spec.is_typedef {
            loop {
                let (name, ty) = self.parse_declarator(spec.base)?;
                self.declare(name.clone(), Symbol::Typedef(ty));
                if !self.eat_punct(",")? {
                    break;
                }
            }
            self.expect_punct(";")?;
            return Ok(Node::new(NodeKind::Typedef, self.types.void, pos));
        }
        if self.eat_punct(";")? {
            // A bare `struct Foo;` tag declaration.
            return Ok(Node::new(NodeKind::Typedef, self.types.void, pos));
        }
        let (name, ty) = self.parse_declarator(spec.base)?;
        let old_style = matches!(&self.types.get(ty).kind, TypeKind::Function(f) if f.old_style);
        if self.types.get(ty).is_function() && (self.peek()?.is_punct("{") || old_style) {
            return self.parse_function_definition(name, ty, spec.is_static, pos);
        }
        // A global variable, optionally initialized, optionally a list.
        let mut var_node = self.finish_global_declarator(name, ty, spec.is_static, pos.clone())?;
        while self.eat_punct(",")? {
            let (name2, ty2) = self.parse_declarator(spec.base)?;
            let pos2 = self.peek()?.pos.clone();
            let next = self.finish_global_declarator(name2, ty2, spec.is_static, pos2)?;
            // Multiple declarators on one line: return the first, the
            // rest are declared for their side effect (global symbol
            // table entries) and folded into a compound node so none
            // are lost from the top-level vector.
            var_node = Node::new(NodeKind::CompoundStmt(vec![var_node, next]), self.types.void, pos.clone());
        }
        self.expect_punct(";")?;
        Ok(var_node)
    }

    fn finish_global_declarator(&mut self, name: String, ty: TypeId, is_static: bool, pos: SourcePos) -> CResult<Node> {
        let label = if is_static { self.new_anon_name(&format!("static_{name}")) } else { name.clone() };
        self.declare(
            name,
            Symbol::Var { ty, is_local: false, is_global_static: is_static, local_offset: 0, global_label: label.clone() },
        );
        let init = if self.eat_punct("=")? { Some(self.parse_initializer(ty)?) } else { None };
        Ok(Node::new(NodeKind::GlobalVar { label, init }, ty, pos))
    }

    fn parse_function_definition(&mut self, name: String, ty: TypeId, is_static: bool, pos: SourcePos) -> CResult<Node> {
        let (ret, mut params, variadic, old_style) = match &self.types.get(ty).kind {
            TypeKind::Function(f) => (f.ret, f.params.clone(), f.variadic, f.old_style),
            _ => unreachable!("caller checked is_function"),
        };
        let param_names = self.last_declarator_param_names.take().unwrap_or_default();
        if old_style && !self.peek()?.is_punct("{") {
            let mut declared: HashMap<String, TypeId> = HashMap::new();
            while !self.peek()?.is_punct("{") {
                let pspec = self.parse_decl_specifiers()?;
                loop {
                    let (pname, pty) = self.parse_declarator(pspec.base)?;
                    declared.insert(pname, self.types.decay(pty));
                    if !self.eat_punct(",")? {
                        break;
                    }
                }
                self.expect_punct(";")?;
            }
            for (i, pname) in param_names.iter().enumerate() {
                // A name declared in the trailing list overrides the
                // `int` default the identifier-list parse assumed; a
                // name left undeclared keeps that default (spec §4.4:
                // "missing declarations default to int").
                if let Some(t) = declared.get(pname) {
                    params[i] = *t;
                }
            }
            if let TypeKind::Function(f) = &mut self.types.get_mut(ty).kind {
                f.params = params.clone();
            }
        }
        self.declare(
            name.clone(),
            Symbol::Var { ty, is_local: false, is_global_static: is_static, local_offset: 0, global_label: name.clone() },
        );
        self.enter_scope();
        self.func = Some(FunctionContext {
            return_type: ret,
            locals: Vec::new(),
            frame_size: 0,
            labels: HashMap::new(),
            pending_gotos: Vec::new(),
            loop_stack: Vec::new(),
            switch_stack: Vec::new(),
        });
        let mut param_vars = Vec::new();
        for (i, pty) in params.iter().enumerate() {
            let pname = param_names.get(i).cloned().unwrap_or_else(|| format!("__arg{i}"));
            let offset = self.alloc_local(*pty);
            param_vars.push(LocalVar { name: pname.clone(), ty: *pty, offset });
            self.declare(pname, Symbol::Var { ty: *pty, is_local: true, is_global_static: false, local_offset: offset, global_label: String::new() });
        }
        let body = self.parse_compound_statement()?;
        let fctx = self.func.take().expect("set above");
        for (label, gpos) in &fctx.pending_gotos {
            if !fctx.labels.contains_key(label) {
                return Err(CompileError::parse(gpos.clone(), format!("label '{label}' used but not defined")));
            }
        }
        self.leave_scope();
        Ok(Node::new(
            NodeKind::FuncDef(FuncMeta {
                name,
                params: param_vars,
                locals: fctx.locals,
                body: Box::new(body),
                is_static,
                is_variadic: variadic,
            }),
            ty,
            pos,
        ))
    }

    /// Allocates frame space for a new local, returning its
    /// (negative, `rbp`-relative) offset.
    fn alloc_local(&mut self, ty: TypeId) -> i32 {
        let fctx = self.func.as_mut().expect("locals only allocated inside a function");
        let size = self.types.get(ty).size.max(1) as i32;
        let align = self.types.get(ty).align.max(1) as i32;
        fctx.frame_size = round_up(fctx.frame_size + size, align);
        -fctx.frame_size
    }

    fn declare_local(&mut self, name: String, ty: TypeId) -> i32 {
        let offset = self.alloc_local(ty);
        self.func.as_mut().unwrap().locals.push(LocalVar { name: name.clone(), ty, offset });
        self.declare(name, Symbol::Var { ty, is_local: true, is_global_static: false, local_offset: offset, global_label: String::new() });
        offset
    }
}

fn round_up(n: i32, align: i32) -> i32 {
    (n + align - 1) / align * align
}

// ---- declaration specifiers & declarators --------------------------------

struct DeclSpec {
    base: TypeId,
    is_typedef: bool,
    is_static: bool,
}

impl Parser {
    fn parse_decl_specifiers(&mut self) -> CResult<DeclSpec> {
        let mut is_typedef = false;
        let mut is_static = false;
        let mut is_extern = false;
        let mut saw_storage = false;
        let mut signed_seen = false;
        let mut unsigned_seen = false;
        let mut long_count = 0u32;
        let mut short_seen = false;
        let mut base_kw: Option<Keyword> = None;
        let mut struct_ty: Option<TypeId> = None;

        loop {
            let t = self.peek()?.clone();
            match &t.kind {
                TokenKind::Keyword(Keyword::Typedef) => {
                    if saw_storage {
                        return Err(CompileError::parse(t.pos, "multiple storage classes in declaration"));
                    }
                    saw_storage = true;
                    is_typedef = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Static) => {
                    if saw_storage {
                        return Err(CompileError::parse(t.pos, "multiple storage classes in declaration"));
                    }
                    saw_storage = true;
                    is_static = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Extern) => {
                    if saw_storage {
                        return Err(CompileError::parse(t.pos, "multiple storage classes in declaration"));
                    }
                    saw_storage = true;
                    is_extern = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Auto | Keyword::Register) => {
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Const | Keyword::Volatile | Keyword::Restrict | Keyword::Inline | Keyword::Noreturn | Keyword::ThreadLocal) => {
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Signed) => {
                    signed_seen = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Unsigned) => {
                    unsigned_seen = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Short) => {
                    short_seen = true;
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Long) => {
                    long_count += 1;
                    self.bump()?;
                }
                TokenKind::Keyword(
                    kw @ (Keyword::Void | Keyword::Bool | Keyword::Char | Keyword::Int | Keyword::Float | Keyword::Double),
                ) => {
                    if base_kw.is_some() {
                        return Err(CompileError::parse(t.pos, "two or more data types in declaration"));
                    }
                    base_kw = Some(*kw);
                    self.bump()?;
                }
                TokenKind::Keyword(Keyword::Struct | Keyword::Union) => {
                    struct_ty = Some(self.parse_struct_or_union_specifier()?);
                }
                TokenKind::Keyword(Keyword::Enum) => {
                    struct_ty = Some(self.parse_enum_specifier()?);
                }
                TokenKind::Ident(name) if base_kw.is_none() && struct_ty.is_none() && self.is_typedef_name(name) => {
                    if let Some(Symbol::Typedef(id)) = self.lookup(name).cloned() {
                        struct_ty = Some(id);
                        self.bump()?;
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
        let _ = is_extern;

        let base = if let Some(id) = struct_ty {
            id
        } else if let Some(kw) = base_kw {
            match kw {
                Keyword::Void => self.types.void,
                Keyword::Bool => self.types.bool_,
                Keyword::Char => {
                    if unsigned_seen {
                        self.types.uchar
                    } else {
                        self.types.char_
                    }
                }
                Keyword::Float => self.types.float,
                Keyword::Double => {
                    if long_count > 0 {
                        self.types.ldouble
                    } else {
                        self.types.double
                    }
                }
                Keyword::Int => self.int_with_modifiers(short_seen, long_count, unsigned_seen),
                _ => unreachable!(),
            }
        } else if short_seen || long_count > 0 || signed_seen || unsigned_seen {
            self.int_with_modifiers(short_seen, long_count, unsigned_seen)
        } else {
            // No type specifier at all defaults to `int` (pre-C99
            // implicit-int, still accepted by 8cc).
            self.types.int
        };

        Ok(DeclSpec { base, is_typedef, is_static })
    }

    fn int_with_modifiers(&mut self, short_seen: bool, long_count: u32, unsigned_seen: bool) -> TypeId {
        if short_seen {
            return if unsigned_seen { self.make_unsigned(self.types.short) } else { self.types.short };
        }
        match long_count {
            0 => if unsigned_seen { self.types.uint } else { self.types.int },
            1 => if unsigned_seen { self.types.ulong } else { self.types.long },
            _ => if unsigned_seen { self.types.ullong } else { self.types.llong },
        }
    }

    fn make_unsigned(&mut self, id: TypeId) -> TypeId {
        let base = self.types.get(id).clone();
        self.types.push(Type { is_unsigned: true, ..base })
    }

    fn parse_struct_or_union_specifier(&mut self) -> CResult<TypeId> {
        let kw_tok = self.bump()?;
        let is_union = kw_tok.is_keyword(Keyword::Union);
        let tag = if let TokenKind::Ident(name) = &self.peek()?.kind {
            let name = name.clone();
            self.bump()?;
            Some(name)
        } else {
            None
        };
        if !self.peek()?.is_punct("{") {
            // Reference to a (possibly forward-declared) tag.
            if let Some(tag) = &tag {
                if let Some(id) = self.lookup_tag(tag) {
                    return Ok(id);
                }
                let id = self.types.push(Type {
                    kind: TypeKind::Struct { fields: Vec::new(), is_union, tag: Some(tag.clone()), complete: false },
                    size: 0,
                    align: 1,
                    is_unsigned: false,
                    is_static: false,
                });
                self.declare_tag(tag.clone(), id);
                return Ok(id);
            }
            return Err(CompileError::parse(kw_tok.pos, "expected '{' or a tag name"));
        }
        self.expect_punct("{")?;
        let mut fields: Vec<Field> = Vec::new();
        // `offset` tracks the last byte fully closed off; `bit_off` is
        // how many bits of the *current* bit-field run have been used
        // past `offset`, mirroring `finish_bitfield`/`update_struct_offset`.
        let mut offset: u32 = 0;
        let mut bit_off: u32 = 0;
        let mut max_align: u32 = 1;
        while !self.eat_punct("}")? {
            let spec = self.parse_decl_specifiers()?;
            loop {
                let (name, fty) = self.parse_declarator(spec.base)?;
                let bit_size = if self.eat_punct(":")? {
                    let (v, _) = self.const_expr_i64()?;
                    v as i32
                } else {
                    -1
                };
                let fsize = self.types.get(fty).size.max(1);
                let falign = self.types.get(fty).align.max(1);
                max_align = max_align.max(falign);
                if is_union {
                    let field_bit_off = if bit_size >= 0 { 0 } else { -1 };
                    fields.push(Field { name, ty: fty, offset: 0, bit_off: field_bit_off, bit_size });
                } else if bit_size == 0 {
                    // A zero-width bit-field ends the current run without
                    // occupying storage of its own (C11 6.7.2.1p12).
                    offset += (bit_off + 7) / 8;
                    bit_off = 0;
                    fields.push(Field { name, ty: fty, offset, bit_off: -1, bit_size });
                } else if bit_size > 0 {
                    let bits = (fsize * 8) as i32;
                    let room = bits - ((offset as i32 * 8 + bit_off as i32) % bits);
                    if bit_size <= room {
                        fields.push(Field { name, ty: fty, offset, bit_off: bit_off as i32, bit_size });
                        bit_off += bit_size as u32;
                    } else {
                        offset += (bit_off + 7) / 8;
                        bit_off = 0;
                        offset = round_up(offset as i32, falign as i32) as u32;
                        fields.push(Field { name, ty: fty, offset, bit_off: 0, bit_size });
                        bit_off = bit_size as u32;
                    }
                } else {
                    offset += (bit_off + 7) / 8;
                    bit_off = 0;
                    offset = round_up(offset as i32, falign as i32) as u32;
                    fields.push(Field { name, ty: fty, offset, bit_off: -1, bit_size });
                    offset += fsize;
                }
                if !self.eat_punct(",")? {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        offset += (bit_off + 7) / 8;
        let size = if is_union {
            fields.iter().map(|f| self.types.get(f.ty).size).max().unwrap_or(0)
        } else {
            round_up(offset as i32, max_align as i32) as u32
        };
        let id = self.types.push(Type {
            kind: TypeKind::Struct { fields, is_union, tag: tag.clone(), complete: true },
            size,
            align: max_align,
            is_unsigned: false,
            is_static: false,
        });
        if let Some(tag) = tag {
            self.declare_tag(tag, id);
        }
        Ok(id)
    }

    fn parse_enum_specifier(&mut self) -> CResult<TypeId> {
        self.bump()?; // `enum`
        if let TokenKind::Ident(_) = &self.peek()?.kind {
            self.bump()?;
        }
        if !self.eat_punct("{")? {
            return Ok(self.types.int);
        }
        let mut next_value: i64 = 0;
        loop {
            if self.peek()?.is_punct("}") {
                break;
            }
            let (name, _) = self.expect_ident()?;
            if self.eat_punct("=")? {
                let (v, _) = self.const_expr_i64()?;
                next_value = v;
            }
            self.declare(name, Symbol::EnumConst(next_value));
            next_value += 1;
            if !self.eat_punct(",")? {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(self.types.int)
    }

    /// Declarator grammar split into "prefix + recursive tail" (spec
    /// §4.4): pointers are prefix, `[]`/`()` suffixes are parsed
    /// recursively so `int (*)(void)` composes pointer-to-
    /// function-returning-int in the right order.
    fn parse_declarator(&mut self, base: TypeId) -> CResult<(String, TypeId)> {
        let mut ty = base;
        while self.eat_punct("*")? {
            while self.eat_keyword(Keyword::Const)? || self.eat_keyword(Keyword::Volatile)? || self.eat_keyword(Keyword::Restrict)? {}
            ty = self.types.pointer_to(ty);
        }
        self.parse_direct_declarator(ty)
    }

    fn parse_direct_declarator(&mut self, base: TypeId) -> CResult<(String, TypeId)> {
        if self.eat_punct("(")? {
            // Either a grouping paren around a nested declarator, or a
            // parameter list if an abstract declarator is in progress.
            let (name, inner_build) = self.parse_declarator_inside_parens(base)?;
            self.expect_punct(")")?;
            let final_ty = self.parse_declarator_tail(inner_build)?;
            return Ok((name, final_ty));
        }
        let (name, pos) = self.expect_ident()?;
        let _ = pos;
        let ty = self.parse_declarator_tail(base)?;
        Ok((name, ty))
    }

    /// A stub type is threaded through the nested declarator and
    /// back-patched by [`parse_declarator_tail`] on return (spec §4.4).
    fn parse_declarator_inside_parens(&mut self, base: TypeId) -> CResult<(String, TypeId)> {
        self.parse_declarator(base)
    }

    /// Parses zero or more `[]`/`()` suffixes following a declarator
    /// core, composing outer-to-inner with `base` as the innermost type.
    fn parse_declarator_tail(&mut self, base: TypeId) -> CResult<TypeId> {
        if self.eat_punct("[")? {
            let len = if self.peek()?.is_punct("]") {
                -1
            } else {
                let (v, _) = self.const_expr_i64()?;
                v
            };
            self.expect_punct("]")?;
            let elem = self.parse_declarator_tail(base)?;
            return Ok(self.types.array_of(elem, len));
        }
        if self.eat_punct("(")? {
            let (params, variadic, names) = self.parse_param_list()?;
            let old_style = self.last_declarator_old_style;
            self.last_declarator_param_names = Some(names);
            let ret = self.parse_declarator_tail(base)?;
            return Ok(self.types.push(Type {
                kind: TypeKind::Function(FuncType { ret, params, variadic, old_style }),
                size: 1,
                align: 1,
                is_unsigned: false,
                is_static: false,
            }));
        }
        Ok(base)
    }

    fn parse_param_list(&mut self) -> CResult<(Vec<TypeId>, bool, Vec<String>)> {
        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut variadic = false;
        self.last_declarator_old_style = false;
        if self.peek()?.is_punct(")") {
            self.bump()?;
            return Ok((params, variadic, names));
        }
        if self.peek()?.is_keyword(Keyword::Void) && self.peek2()?.is_punct(")") {
            self.bump()?;
            self.bump()?;
            return Ok((params, variadic, names));
        }
        // K&R old-style identifier list: a bare, non-typedef
        // identifier can only start a parameter declaration here if
        // it's followed by `,`/`)`, since a real type's declarator
        // would otherwise follow the type-name token. Parameter types
        // default to `int`; `parse_function_definition` patches them
        // from the trailing `type decl;` list (spec §4.4).
        let leading_ident = match &self.peek()?.kind {
            TokenKind::Ident(name) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = leading_ident {
            if !self.is_typedef_name(&name) {
                self.last_declarator_old_style = true;
                loop {
                    let (pname, _) = self.expect_ident()?;
                    names.push(pname);
                    params.push(self.types.int);
                    if !self.eat_punct(",")? {
                        break;
                    }
                }
                self.expect_punct(")")?;
                return Ok((params, variadic, names));
            }
        }
        loop {
            if self.eat_punct("...")? {
                variadic = true;
                break;
            }
            let spec = self.parse_decl_specifiers()?;
            let (name, ty) = if matches!(self.peek()?.kind, TokenKind::Punct(",") | TokenKind::Punct(")")) {
                (format!("__anon{}", params.len()), spec.base)
            } else {
                self.parse_declarator(spec.base)?
            };
            let decayed = self.types.decay(ty);
            params.push(decayed);
            names.push(name);
            if !self.eat_punct(",")? {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok((params, variadic, names))
    }
}
