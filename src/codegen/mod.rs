//! x86-64 AT&T-syntax code generation, System V AMD64 ABI (spec §4.6).
//!
//! Grounded on `examples/original_source/gen.c`: direct tree-to-text
//! lowering with explicit register choices, no IR framework
//! interposed, through the same `emit!`/`emit_noindent!` macro pair
//! `gen.c`'s `emit(...)`/`emit_noindent(...)` provide.

use std::io::Write;

use crate::errors::{CompileError, CResult};
use crate::parser::ast::{BinOp, FuncMeta, Literal, Node, NodeKind, UnOp};
use crate::parser::types::{TypeArena, TypeKind, TypeId};

const INT_ARG_REGS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
const INT_ARG_REGS32: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
const SSE_ARG_REGS: [&str; 8] = ["%xmm0", "%xmm1", "%xmm2", "%xmm3", "%xmm4", "%xmm5", "%xmm6", "%xmm7"];

macro_rules! emit {
    ($out:expr, $($arg:tt)*) => {{
        write!($out, "\t").map_err(CompileError::from)?;
        writeln!($out, $($arg)*).map_err(CompileError::from)?
    }};
}

macro_rules! emit_noindent {
    ($out:expr, $($arg:tt)*) => {
        writeln!($out, $($arg)*).map_err(CompileError::from)?
    };
}

pub struct CodeGen<'a, W: Write> {
    out: W,
    types: &'a TypeArena,
    label_seq: u32,
    cur_file: Option<String>,
    cur_line: u32,
    emit_loc: bool,
    emit_source_comment: bool,
    pending_strings: Vec<(String, Vec<u8>)>,
    cur_epilogue: String,
    /// `%rbp`-relative base of the current function's 176-byte
    /// register-save area, if it has one (spec §4.6 "Function
    /// prologue"); `None` outside a variadic function.
    cur_regsave_offset: Option<i32>,
    /// Count of named integer/SSE parameters that consumed an
    /// argument register, i.e. `__builtin_va_start`'s `gp_offset`/
    /// `fp_offset` seed values divided by their stride.
    cur_numgp: u32,
    cur_numfp: u32,
    /// `%rbp`-relative offset of the first stack-passed (register-
    /// overflow) argument, used to seed `overflow_arg_area`.
    cur_overflow_offset: i32,
}

impl<'a, W: Write> CodeGen<'a, W> {
    pub fn new(out: W, types: &'a TypeArena, emit_loc: bool, emit_source_comment: bool) -> Self {
        CodeGen {
            out,
            types,
            label_seq: 0,
            cur_file: None,
            cur_line: 0,
            emit_loc,
            emit_source_comment,
            pending_strings: Vec::new(),
            cur_epilogue: String::new(),
            cur_regsave_offset: None,
            cur_numgp: 0,
            cur_numfp: 0,
            cur_overflow_offset: 16,
        }
    }

    fn new_label(&mut self) -> String {
        self.label_seq += 1;
        format!(".Lgen{}", self.label_seq)
    }

    pub fn emit_translation_unit(&mut self, decls: &[Node]) -> CResult<()> {
        for d in decls {
            self.emit_top_level(d)?;
        }
        self.emit_string_pool()?;
        Ok(())
    }

    fn emit_top_level(&mut self, node: &Node) -> CResult<()> {
        match &node.kind {
            NodeKind::FuncDef(f) => self.emit_function(f),
            NodeKind::GlobalVar { label, init } => self.emit_global(label, node.ty, init.as_deref()),
            NodeKind::Typedef => Ok(()),
            NodeKind::CompoundStmt(stmts) => {
                for s in stmts {
                    self.emit_top_level(s)?;
                }
                Ok(())
            }
            _ => Err(CompileError::codegen("unexpected top-level node kind")),
        }
    }

    // ---- data emission ---------------------------------------------------

    fn emit_global(&mut self, label: &str, ty: TypeId, init: Option<&[crate::parser::ast::InitEntry]>) -> CResult<()> {
        let size = self.types.get(ty).size.max(1);
        let align = self.types.get(ty).align.max(1);
        match init {
            None => {
                emit_noindent!(self.out, ".bss");
                emit!(self.out, ".align {align}");
                emit!(self.out, ".lcomm {label}, {size}");
            }
            Some(entries) => {
                emit_noindent!(self.out, ".data");
                emit!(self.out, ".align {align}");
                emit_noindent!(self.out, "{label}:");
                let mut cursor: u32 = 0;
                for e in entries {
                    if e.offset > cursor {
                        emit!(self.out, ".zero {}", e.offset - cursor);
                        cursor = e.offset;
                    }
                    cursor += self.emit_static_value(&e.value, e.target_type)?;
                }
                let total = size;
                if cursor < total {
                    emit!(self.out, ".zero {}", total - cursor);
                }
            }
        }
        emit_noindent!(self.out, "");
        Ok(())
    }

    /// Emits one initializer value into the current `.data` position,
    /// returning the number of bytes written.
    fn emit_static_value(&mut self, node: &Node, ty: TypeId) -> CResult<u32> {
        match &node.kind {
            NodeKind::Literal(Literal::Int(v)) => {
                let size = self.types.get(ty).size.max(1);
                match size {
                    1 => emit!(self.out, ".byte {}", *v as i8 as u8),
                    2 => emit!(self.out, ".word {}", *v as i16),
                    4 => emit!(self.out, ".long {}", *v as i32),
                    _ => emit!(self.out, ".quad {v}"),
                }
                Ok(size)
            }
            NodeKind::Literal(Literal::Float(v)) => {
                let size = self.types.get(ty).size.max(1);
                if size == 4 {
                    emit!(self.out, ".long {}", (*v as f32).to_bits());
                } else {
                    emit!(self.out, ".quad {}", v.to_bits());
                }
                Ok(size)
            }
            NodeKind::Literal(Literal::Str { bytes, .. }) => {
                let label = self.new_label();
                self.pending_strings.push((label.clone(), bytes.clone()));
                emit!(self.out, ".quad {label}");
                Ok(8)
            }
            NodeKind::AddrOf(inner) => {
                let target_label = match &inner.kind {
                    NodeKind::GlobalVar { label, .. } => label.clone(),
                    _ => return Err(CompileError::codegen("static initializer must take the address of a global")),
                };
                emit!(self.out, ".quad {target_label}");
                Ok(8)
            }
            NodeKind::GlobalVar { label, init } if init.is_none() => {
                // A nested compound literal materialized as its own
                // global; emit it out-of-line and reference its label.
                let nested_label = label.clone();
                self.pending_nested_global(&nested_label, node.ty, init.as_deref());
                emit!(self.out, ".quad {nested_label}");
                Ok(8)
            }
            NodeKind::Cast(inner) | NodeKind::ImplicitConv(inner) => self.emit_static_value(inner, ty),
            _ => Err(CompileError::codegen("non-constant global initializer")),
        }
    }

    fn pending_nested_global(&mut self, _label: &str, _ty: TypeId, _init: Option<&[crate::parser::ast::InitEntry]>) {
        // Nested compound-literal globals are declared via their own
        // top-level GlobalVar node by the parser, so nothing further
        // is required here; kept as a named hook for that contract.
    }

    fn emit_string_pool(&mut self) -> CResult<()> {
        if self.pending_strings.is_empty() {
            return Ok(());
        }
        emit_noindent!(self.out, ".data");
        let strings = std::mem::take(&mut self.pending_strings);
        for (label, bytes) in strings {
            emit_noindent!(self.out, "{label}:");
            emit!(self.out, ".byte {}", bytes.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(","));
        }
        Ok(())
    }

    // ---- functions ---------------------------------------------------

    fn emit_function(&mut self, f: &FuncMeta) -> CResult<()> {
        emit_noindent!(self.out, ".text");
        if !f.is_static {
            emit!(self.out, ".globl {}", f.name);
        }
        emit_noindent!(self.out, "{}:", f.name);
        self.cur_epilogue = format!(".Lepilogue_{}", f.name);
        emit!(self.out, "pushq %rbp");
        emit!(self.out, "movq %rsp, %rbp");

        let locals_size = f.locals.iter().map(|l| -l.offset).max().unwrap_or(0).max(0);
        let regsave_offset = if f.is_variadic {
            let locals_aligned = round_up16(locals_size as i64) as i32;
            Some(-(locals_aligned + 176))
        } else {
            None
        };
        let frame_size = regsave_offset.map(|off| -off).unwrap_or(locals_size);
        let aligned = round_up16(frame_size as i64) as i32;
        if aligned > 0 {
            emit!(self.out, "subq ${aligned}, %rsp");
        }
        if let Some(off) = regsave_offset {
            self.emit_regsave_area(off)?;
        }

        // Classify params the same way `emit_call_args` classifies the
        // matching call's arguments: register-eligible ints, register-
        // eligible floats, and "rest" (struct params and anything that
        // overflowed its bank). Register-eligible ones are stored
        // immediately below, consuming their argument register; `rest`
        // params are filled in afterward by copying from the caller's
        // stack, once every argument register has already been
        // persisted to memory and so is safe to use as scratch.
        let mut int_idx = 0usize;
        let mut sse_idx = 0usize;
        let mut rest: Vec<&crate::parser::ast::LocalVar> = Vec::new();
        for p in &f.params {
            if self.types.get(p.ty).is_struct() {
                rest.push(p);
            } else if self.types.get(p.ty).is_float() {
                if sse_idx < SSE_ARG_REGS.len() {
                    emit!(self.out, "movsd {}, {}(%rbp)", SSE_ARG_REGS[sse_idx], p.offset);
                    sse_idx += 1;
                } else {
                    rest.push(p);
                }
            } else if int_idx < INT_ARG_REGS.len() {
                let size = self.types.get(p.ty).size.max(1);
                if size <= 4 {
                    emit!(self.out, "movl {}, {}(%rbp)", INT_ARG_REGS32[int_idx], p.offset);
                } else {
                    emit!(self.out, "movq {}, {}(%rbp)", INT_ARG_REGS[int_idx], p.offset);
                }
                int_idx += 1;
            } else {
                rest.push(p);
            }
        }

        // `16(%rbp)` is the first stack slot past the saved %rbp/return
        // address pair, where the caller's struct args and any
        // register-overflow args begin, in source order (spec §4.6).
        let mut incoming_off: i32 = 16;
        for p in &rest {
            if self.types.get(p.ty).is_struct() {
                let size = self.types.get(p.ty).size;
                emit!(self.out, "leaq {incoming_off}(%rbp), %rax");
                emit!(self.out, "leaq {}(%rbp), %rdx", p.offset);
                self.copy_struct_bytes(size)?;
                incoming_off += ((size + 7) / 8) as i32 * 8;
            } else if self.types.get(p.ty).is_float() {
                emit!(self.out, "movsd {incoming_off}(%rbp), %xmm0");
                emit!(self.out, "movsd %xmm0, {}(%rbp)", p.offset);
                incoming_off += 8;
            } else {
                emit!(self.out, "movq {incoming_off}(%rbp), %rax");
                emit!(self.out, "movq %rax, {}(%rbp)", p.offset);
                incoming_off += 8;
            }
        }

        // `gp_offset`/`fp_offset`'s seed values (spec §4.6); a
        // variadic function's true `...` tail begins right after the
        // last named parameter's stack slot, `rest` included.
        self.cur_numgp = int_idx as u32;
        self.cur_numfp = sse_idx as u32;
        self.cur_overflow_offset = incoming_off;
        self.cur_regsave_offset = regsave_offset;

        self.emit_stmt(&f.body)?;

        emit_noindent!(self.out, "{}:", self.cur_epilogue.clone());
        emit!(self.out, "leave");
        emit!(self.out, "ret");
        emit_noindent!(self.out, "");
        self.cur_regsave_offset = None;
        Ok(())
    }

    /// Copies `size` bytes from the address in `%rax` to the address in
    /// `%rdx`, in 8/4/1-byte chunks, mirroring `gen.c`'s `push_struct`
    /// tail-chunking for sizes not a multiple of 8. Used both to
    /// receive a struct parameter off the caller's stack and (by
    /// `emit_call_args`) to push one onto it.
    fn copy_struct_bytes(&mut self, size: u32) -> CResult<()> {
        let mut i = 0u32;
        while i + 8 <= size {
            emit!(self.out, "movq {i}(%rax), %rcx");
            emit!(self.out, "movq %rcx, {i}(%rdx)");
            i += 8;
        }
        while i + 4 <= size {
            emit!(self.out, "movl {i}(%rax), %ecx");
            emit!(self.out, "movl %ecx, {i}(%rdx)");
            i += 4;
        }
        while i < size {
            emit!(self.out, "movb {i}(%rax), %cl");
            emit!(self.out, "movb %cl, {i}(%rdx)");
            i += 1;
        }
        Ok(())
    }

    /// Spills all six integer and eight SSE argument registers into
    /// the 176-byte area at `off(%rbp)`, regardless of how many the
    /// function actually names — `__builtin_va_arg` needs the unused
    /// tail (spec §4.6; grounded on `gen.c`'s `emit_regsave_area`).
    fn emit_regsave_area(&mut self, off: i32) -> CResult<()> {
        for (i, reg) in INT_ARG_REGS.iter().enumerate() {
            emit!(self.out, "movq {reg}, {}(%rbp)", off + (i as i32) * 8);
        }
        for (i, reg) in SSE_ARG_REGS.iter().enumerate() {
            emit!(self.out, "movsd {reg}, {}(%rbp)", off + 48 + (i as i32) * 16);
        }
        Ok(())
    }

    // ---- statements ---------------------------------------------------

    fn emit_stmt(&mut self, node: &Node) -> CResult<()> {
        self.emit_loc_if_changed(node)?;
        match &node.kind {
            NodeKind::CompoundStmt(stmts) => {
                for s in stmts {
                    self.emit_stmt(s)?;
                }
                Ok(())
            }
            NodeKind::Declaration { var } => self.emit_stmt(var),
            NodeKind::LocalVar { offset, init: Some(entries), .. } => {
                for e in entries {
                    self.emit_expr(&e.value)?;
                    self.store_to_frame(*offset + e.offset as i32, e.target_type)?;
                }
                Ok(())
            }
            NodeKind::LocalVar { init: None, .. } => Ok(()),
            NodeKind::If { cond, then, els } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.emit_expr(cond)?;
                emit!(self.out, "testq %rax, %rax");
                emit!(self.out, "je {else_label}");
                self.emit_stmt(then)?;
                emit!(self.out, "jmp {end_label}");
                emit_noindent!(self.out, "{else_label}:");
                if let Some(els) = els {
                    self.emit_stmt(els)?;
                }
                emit_noindent!(self.out, "{end_label}:");
                Ok(())
            }
            NodeKind::Return(value) => {
                if let Some(v) = value {
                    self.emit_expr(v)?;
                    if matches!(self.types.get(v.ty).kind, TypeKind::Bool) {
                        emit!(self.out, "andq $1, %rax");
                    }
                }
                let target = self.cur_epilogue.clone();
                emit!(self.out, "jmp {target}");
                Ok(())
            }
            NodeKind::Goto(name) => {
                emit!(self.out, "jmp {}", user_label(name));
                Ok(())
            }
            NodeKind::ComputedGoto(target) => {
                self.emit_expr(target)?;
                emit!(self.out, "jmp *%rax");
                Ok(())
            }
            NodeKind::Label(name) => {
                emit_noindent!(self.out, "{}:", user_label(name));
                Ok(())
            }
            _ => {
                self.emit_expr(node)?;
                Ok(())
            }
        }
    }

    fn emit_loc_if_changed(&mut self, node: &Node) -> CResult<()> {
        if !self.emit_loc {
            return Ok(());
        }
        if self.cur_file.as_deref() != Some(node.pos.file.as_str()) || self.cur_line != node.pos.line {
            if self.cur_file.as_deref() != Some(node.pos.file.as_str()) {
                emit!(self.out, ".file \"{}\"", node.pos.file);
                self.cur_file = Some(node.pos.file.clone());
            }
            emit!(self.out, ".loc 1 {}", node.pos.line);
            self.cur_line = node.pos.line;
            if self.emit_source_comment {
                emit_noindent!(self.out, "# {}:{}", node.pos.file, node.pos.line);
            }
        }
        Ok(())
    }

    fn store_to_frame(&mut self, offset: i32, ty: TypeId) -> CResult<()> {
        let size = self.types.get(ty).size.max(1);
        if self.types.get(ty).is_float() {
            if size == 4 {
                emit!(self.out, "movss %xmm0, {offset}(%rbp)");
            } else {
                emit!(self.out, "movsd %xmm0, {offset}(%rbp)");
            }
            return Ok(());
        }
        match size {
            1 => emit!(self.out, "movb %al, {offset}(%rbp)"),
            2 => emit!(self.out, "movw %ax, {offset}(%rbp)"),
            4 => emit!(self.out, "movl %eax, {offset}(%rbp)"),
            _ => emit!(self.out, "movq %rax, {offset}(%rbp)"),
        }
        Ok(())
    }

    // ---- expressions ---------------------------------------------------

    /// Lowers `node`, leaving its value in `%rax` (or `%xmm0` for a
    /// floating-point result).
    fn emit_expr(&mut self, node: &Node) -> CResult<()> {
        match &node.kind {
            NodeKind::Literal(Literal::Int(v)) => {
                emit!(self.out, "movq ${v}, %rax");
                Ok(())
            }
            NodeKind::Literal(Literal::Float(v)) => {
                let bits = v.to_bits();
                emit!(self.out, "movq ${bits}, %rax");
                emit!(self.out, "movq %rax, %xmm0");
                Ok(())
            }
            NodeKind::Literal(Literal::Str { bytes, .. }) => {
                let label = self.new_label();
                self.pending_strings.push((label.clone(), bytes.clone()));
                emit!(self.out, "leaq {label}(%rip), %rax");
                Ok(())
            }
            NodeKind::LocalVar { offset, .. } => self.load_from_frame(*offset, node.ty),
            NodeKind::GlobalVar { label, .. } => self.load_from_global(label, node.ty),
            NodeKind::ImplicitConv(inner) | NodeKind::Cast(inner) => {
                self.emit_expr(inner)?;
                self.emit_conversion(inner.ty, node.ty)
            }
            NodeKind::AddrOf(inner) => self.emit_lvalue_addr(inner),
            NodeKind::Deref(inner) => {
                self.emit_expr(inner)?;
                emit!(self.out, "movq %rax, %rcx");
                self.load_indirect(node.ty)
            }
            NodeKind::StructRef { base, field } => {
                self.emit_field_addr(base, field)?;
                self.load_indirect(node.ty)?;
                self.maybe_emit_bitshift_load(base.ty, field)
            }
            NodeKind::Unary { op, operand } => self.emit_unary(*op, operand, node.ty),
            NodeKind::Binary { op: BinOp::Assign, lhs, rhs } => self.emit_assign(lhs, rhs),
            NodeKind::Binary { op: BinOp::Comma, lhs, rhs } => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)
            }
            NodeKind::Binary { op: BinOp::LogAnd, lhs, rhs } => self.emit_short_circuit(lhs, rhs, true),
            NodeKind::Binary { op: BinOp::LogOr, lhs, rhs } => self.emit_short_circuit(lhs, rhs, false),
            NodeKind::Binary { op, lhs, rhs } => self.emit_binary(*op, lhs, rhs),
            NodeKind::Ternary { cond, then, els } => self.emit_ternary(cond, then, els),
            NodeKind::FuncCall { callee, args } => self.emit_call_direct(callee, args, node.ty),
            NodeKind::FuncPtrCall { callee, args } => self.emit_call_indirect(callee, args, node.ty),
            NodeKind::FuncDesignator { name } => {
                emit!(self.out, "leaq {name}(%rip), %rax");
                Ok(())
            }
            NodeKind::LabelAddr(name) => {
                emit!(self.out, "leaq {}(%rip), %rax", user_label(name));
                Ok(())
            }
            NodeKind::StmtExpr(stmts) => {
                let (last, init) = stmts.split_last().ok_or_else(|| CompileError::codegen("empty statement expression"))?;
                for s in init {
                    self.emit_stmt(s)?;
                }
                self.emit_expr(last)
            }
            NodeKind::CompoundStmt(stmts) => {
                for s in stmts {
                    self.emit_stmt(s)?;
                }
                Ok(())
            }
            NodeKind::VaStart { ap } => self.emit_va_start(ap),
            NodeKind::VaArg { ap, arg_ty } => self.emit_va_arg(ap, *arg_ty),
            NodeKind::ReturnAddress(level) => self.emit_return_address(level),
            _ => Err(CompileError::codegen("node kind is not a valid expression")),
        }
    }

    /// `__builtin_va_start(ap, last)`: seeds `ap`'s four fields from
    /// the enclosing function's register-consumption counts and its
    /// register-save area (spec §4.6; grounded on `gen.c`'s
    /// `emit_builtin_va_start`).
    fn emit_va_start(&mut self, ap: &Node) -> CResult<()> {
        let regsave_off = self
            .cur_regsave_offset
            .ok_or_else(|| CompileError::codegen("__builtin_va_start used outside a variadic function"))?;
        self.emit_expr(ap)?;
        let gp_offset = self.cur_numgp * 8;
        let fp_offset = 48 + self.cur_numfp * 16;
        let overflow_off = self.cur_overflow_offset;
        emit!(self.out, "movq %rax, %rdx");
        emit!(self.out, "movl ${gp_offset}, (%rdx)");
        emit!(self.out, "movl ${fp_offset}, 4(%rdx)");
        emit!(self.out, "leaq {overflow_off}(%rbp), %rcx");
        emit!(self.out, "movq %rcx, 8(%rdx)");
        emit!(self.out, "leaq {regsave_off}(%rbp), %rcx");
        emit!(self.out, "movq %rcx, 16(%rdx)");
        Ok(())
    }

    /// `__builtin_va_arg(ap, type)`: fetches the next register-class
    /// slot if `gp_offset`/`fp_offset` hasn't run past the register-
    /// save area, else falls back to `overflow_arg_area`, advancing
    /// whichever cursor it read (standard System V `va_arg` lowering).
    fn emit_va_arg(&mut self, ap: &Node, ty: TypeId) -> CResult<()> {
        self.emit_expr(ap)?;
        emit!(self.out, "movq %rax, %r8");
        let is_float = self.types.get(ty).is_float();
        let stack_label = self.new_label();
        let done_label = self.new_label();
        if is_float {
            emit!(self.out, "movl 4(%r8), %edx");
            emit!(self.out, "cmpl $176, %edx");
            emit!(self.out, "jae {stack_label}");
            emit!(self.out, "movq 16(%r8), %rcx");
            emit!(self.out, "addq %rdx, %rcx");
            emit!(self.out, "addl $16, %edx");
            emit!(self.out, "movl %edx, 4(%r8)");
            emit!(self.out, "jmp {done_label}");
            emit_noindent!(self.out, "{stack_label}:");
            emit!(self.out, "movq 8(%r8), %rcx");
            emit!(self.out, "leaq 8(%rcx), %rax");
            emit!(self.out, "movq %rax, 8(%r8)");
            emit_noindent!(self.out, "{done_label}:");
        } else {
            emit!(self.out, "movl (%r8), %edx");
            emit!(self.out, "cmpl $48, %edx");
            emit!(self.out, "jae {stack_label}");
            emit!(self.out, "movq 16(%r8), %rcx");
            emit!(self.out, "addq %rdx, %rcx");
            emit!(self.out, "addl $8, %edx");
            emit!(self.out, "movl %edx, (%r8)");
            emit!(self.out, "jmp {done_label}");
            emit_noindent!(self.out, "{stack_label}:");
            emit!(self.out, "movq 8(%r8), %rcx");
            emit!(self.out, "leaq 8(%rcx), %rax");
            emit!(self.out, "movq %rax, 8(%r8)");
            emit_noindent!(self.out, "{done_label}:");
        }
        self.load_indirect(ty)
    }

    /// `__builtin_return_address(level)`: walks the saved-`%rbp` chain
    /// `level` times, then reads the return address 8 bytes above the
    /// frame pointer it lands on (grounded on `gen.c`'s
    /// `emit_builtin_return_address`).
    fn emit_return_address(&mut self, level: &Node) -> CResult<()> {
        self.emit_expr(level)?;
        emit!(self.out, "movq %rbp, %rcx");
        let loop_label = self.new_label();
        let end_label = self.new_label();
        emit_noindent!(self.out, "{loop_label}:");
        emit!(self.out, "testq %rax, %rax");
        emit!(self.out, "je {end_label}");
        emit!(self.out, "movq (%rcx), %rcx");
        emit!(self.out, "subq $1, %rax");
        emit!(self.out, "jmp {loop_label}");
        emit_noindent!(self.out, "{end_label}:");
        emit!(self.out, "movq 8(%rcx), %rax");
        Ok(())
    }

    fn emit_conversion(&mut self, from: TypeId, to: TypeId) -> CResult<()> {
        let from_t = self.types.get(from);
        let to_t = self.types.get(to);
        if from_t.is_float() && to_t.is_integer() {
            emit!(self.out, "cvttsd2siq %xmm0, %rax");
            return Ok(());
        }
        if from_t.is_integer() && to_t.is_float() {
            emit!(self.out, "cvtsi2sdq %rax, %xmm0");
            return Ok(());
        }
        if to_t.is_integer() && from_t.is_integer() {
            let size = to_t.size.max(1);
            let signed = !to_t.is_unsigned;
            match (size, signed) {
                (1, true) => emit!(self.out, "movsbq %al, %rax"),
                (1, false) => emit!(self.out, "movzbq %al, %rax"),
                (2, true) => emit!(self.out, "movswq %ax, %rax"),
                (2, false) => emit!(self.out, "movzwq %ax, %rax"),
                (4, true) => emit!(self.out, "movslq %eax, %rax"),
                (4, false) => emit!(self.out, "movl %eax, %eax"),
                _ => {}
            }
        }
        Ok(())
    }

    fn load_from_frame(&mut self, offset: i32, ty: TypeId) -> CResult<()> {
        let t = self.types.get(ty);
        if t.is_array() || t.is_struct() {
            emit!(self.out, "leaq {offset}(%rbp), %rax");
            return Ok(());
        }
        if t.is_float() {
            if t.size == 4 {
                emit!(self.out, "movss {offset}(%rbp), %xmm0");
            } else {
                emit!(self.out, "movsd {offset}(%rbp), %xmm0");
            }
            return Ok(());
        }
        let signed = !t.is_unsigned;
        match (t.size.max(1), signed) {
            (1, true) => emit!(self.out, "movsbq {offset}(%rbp), %rax"),
            (1, false) => emit!(self.out, "movzbq {offset}(%rbp), %rax"),
            (2, true) => emit!(self.out, "movswq {offset}(%rbp), %rax"),
            (2, false) => emit!(self.out, "movzwq {offset}(%rbp), %rax"),
            (4, true) => emit!(self.out, "movslq {offset}(%rbp), %rax"),
            (4, false) => emit!(self.out, "movl {offset}(%rbp), %eax"),
            _ => emit!(self.out, "movq {offset}(%rbp), %rax"),
        }
        Ok(())
    }

    fn load_from_global(&mut self, label: &str, ty: TypeId) -> CResult<()> {
        let t = self.types.get(ty);
        if t.is_array() || t.is_struct() || t.is_function() {
            emit!(self.out, "leaq {label}(%rip), %rax");
            return Ok(());
        }
        if t.is_float() {
            if t.size == 4 {
                emit!(self.out, "movss {label}(%rip), %xmm0");
            } else {
                emit!(self.out, "movsd {label}(%rip), %xmm0");
            }
            return Ok(());
        }
        let signed = !t.is_unsigned;
        match (t.size.max(1), signed) {
            (1, true) => emit!(self.out, "movsbq {label}(%rip), %rax"),
            (1, false) => emit!(self.out, "movzbq {label}(%rip), %rax"),
            (2, true) => emit!(self.out, "movswq {label}(%rip), %rax"),
            (2, false) => emit!(self.out, "movzwq {label}(%rip), %rax"),
            (4, true) => emit!(self.out, "movslq {label}(%rip), %rax"),
            (4, false) => emit!(self.out, "movl {label}(%rip), %eax"),
            _ => emit!(self.out, "movq {label}(%rip), %rax"),
        }
        Ok(())
    }

    /// Loads through the address currently held in `%rcx` (struct/
    /// deref paths route their address computation there first).
    fn load_indirect(&mut self, ty: TypeId) -> CResult<()> {
        let t = self.types.get(ty);
        if t.is_array() || t.is_struct() {
            emit!(self.out, "movq %rcx, %rax");
            return Ok(());
        }
        if t.is_float() {
            if t.size == 4 {
                emit!(self.out, "movss (%rcx), %xmm0");
            } else {
                emit!(self.out, "movsd (%rcx), %xmm0");
            }
            return Ok(());
        }
        let signed = !t.is_unsigned;
        match (t.size.max(1), signed) {
            (1, true) => emit!(self.out, "movsbq (%rcx), %rax"),
            (1, false) => emit!(self.out, "movzbq (%rcx), %rax"),
            (2, true) => emit!(self.out, "movswq (%rcx), %rax"),
            (2, false) => emit!(self.out, "movzwq (%rcx), %rax"),
            (4, true) => emit!(self.out, "movslq (%rcx), %rax"),
            (4, false) => emit!(self.out, "movl (%rcx), %eax"),
            _ => emit!(self.out, "movq (%rcx), %rax"),
        }
        Ok(())
    }

    /// Computes `node`'s address into `%rcx`, used by assignment,
    /// `&expr`, and struct-member access.
    fn emit_lvalue_addr(&mut self, node: &Node) -> CResult<()> {
        match &node.kind {
            NodeKind::LocalVar { offset, .. } => {
                emit!(self.out, "leaq {offset}(%rbp), %rcx");
                Ok(())
            }
            NodeKind::GlobalVar { label, .. } => {
                emit!(self.out, "leaq {label}(%rip), %rcx");
                Ok(())
            }
            NodeKind::Deref(inner) => {
                self.emit_expr(inner)?;
                emit!(self.out, "movq %rax, %rcx");
                Ok(())
            }
            NodeKind::StructRef { base, field } => self.emit_field_addr(base, field),
            _ => Err(CompileError::codegen("expression is not an lvalue")),
        }
    }

    fn emit_field_addr(&mut self, base: &Node, field: &str) -> CResult<()> {
        self.emit_lvalue_addr(base)?;
        let offset = match &self.types.get(base.ty).kind {
            TypeKind::Struct { fields, .. } => fields.iter().find(|f| f.name == field).map(|f| f.offset).unwrap_or(0),
            _ => 0,
        };
        if offset != 0 {
            emit!(self.out, "addq ${offset}, %rcx");
        }
        Ok(())
    }

    /// `bit_off`/`bit_size` for `field` on `base_ty`, or `None` if
    /// `base_ty` isn't a struct/union or has no such field.
    fn field_bitinfo(&self, base_ty: TypeId, field: &str) -> Option<(i32, i32)> {
        match &self.types.get(base_ty).kind {
            TypeKind::Struct { fields, .. } => fields.iter().find(|f| f.name == field).map(|f| (f.bit_off, f.bit_size)),
            _ => None,
        }
    }

    /// After a full-width `load_indirect` of a bit-field's storage
    /// unit, shifts the field down to bit 0 and masks off its
    /// neighbors (spec §4.6; grounded on `gen.c`'s
    /// `maybe_emit_bitshift_load`).
    fn maybe_emit_bitshift_load(&mut self, base_ty: TypeId, field: &str) -> CResult<()> {
        if let Some((bit_off, bit_size)) = self.field_bitinfo(base_ty, field) {
            if bit_size > 0 {
                let mask: u64 = if bit_size >= 64 { u64::MAX } else { (1u64 << bit_size) - 1 };
                if bit_off != 0 {
                    emit!(self.out, "shrq ${bit_off}, %rax");
                }
                emit!(self.out, "andq ${mask}, %rax");
            }
        }
        Ok(())
    }

    fn emit_assign(&mut self, lhs: &Node, rhs: &Node) -> CResult<()> {
        self.emit_lvalue_addr(lhs)?;
        emit!(self.out, "pushq %rcx");
        self.emit_expr(rhs)?;
        emit!(self.out, "popq %rcx");
        if let NodeKind::StructRef { base, field } = &lhs.kind {
            if let Some((bit_off, bit_size)) = self.field_bitinfo(base.ty, field) {
                if bit_size > 0 {
                    return self.store_bitfield(bit_off, bit_size, lhs.ty);
                }
            }
        }
        self.store_indirect(lhs.ty)
    }

    /// Masks the value in `%rax` to `bit_size` bits, shifts it up to
    /// `bit_off`, and read-modify-writes it into the storage unit
    /// addressed by `%rcx` (spec §4.6; grounded on `gen.c`'s
    /// `maybe_emit_bitshift_save`).
    fn store_bitfield(&mut self, bit_off: i32, bit_size: i32, ty: TypeId) -> CResult<()> {
        let size = self.types.get(ty).size.max(1);
        let mask: u64 = if bit_size >= 64 { u64::MAX } else { (1u64 << bit_size) - 1 };
        let clear_mask = !(mask << bit_off);
        emit!(self.out, "andq ${mask}, %rax");
        if bit_off != 0 {
            emit!(self.out, "shlq ${bit_off}, %rax");
        }
        match size {
            1 => {
                emit!(self.out, "movb (%rcx), %dl");
                emit!(self.out, "movzbq %dl, %rdx");
            }
            2 => {
                emit!(self.out, "movw (%rcx), %dx");
                emit!(self.out, "movzwq %dx, %rdx");
            }
            4 => emit!(self.out, "movl (%rcx), %edx"),
            _ => emit!(self.out, "movq (%rcx), %rdx"),
        }
        emit!(self.out, "andq ${clear_mask}, %rdx");
        emit!(self.out, "orq %rdx, %rax");
        match size {
            1 => emit!(self.out, "movb %al, (%rcx)"),
            2 => emit!(self.out, "movw %ax, (%rcx)"),
            4 => emit!(self.out, "movl %eax, (%rcx)"),
            _ => emit!(self.out, "movq %rax, (%rcx)"),
        }
        Ok(())
    }

    fn store_indirect(&mut self, ty: TypeId) -> CResult<()> {
        let t = self.types.get(ty);
        if t.is_struct() {
            let size = t.size;
            let mut off = 0u32;
            while off < size {
                let remaining = size - off;
                if remaining >= 8 {
                    emit!(self.out, "movq {off}(%rax), %rdx");
                    emit!(self.out, "movq %rdx, {off}(%rcx)");
                    off += 8;
                } else if remaining >= 4 {
                    emit!(self.out, "movl {off}(%rax), %edx");
                    emit!(self.out, "movl %edx, {off}(%rcx)");
                    off += 4;
                } else {
                    emit!(self.out, "movb {off}(%rax), %dl");
                    emit!(self.out, "movb %dl, {off}(%rcx)");
                    off += 1;
                }
            }
            emit!(self.out, "movq %rcx, %rax");
            return Ok(());
        }
        if t.is_float() {
            if t.size == 4 {
                emit!(self.out, "movss %xmm0, (%rcx)");
            } else {
                emit!(self.out, "movsd %xmm0, (%rcx)");
            }
            return Ok(());
        }
        match t.size.max(1) {
            1 => emit!(self.out, "movb %al, (%rcx)"),
            2 => emit!(self.out, "movw %ax, (%rcx)"),
            4 => emit!(self.out, "movl %eax, (%rcx)"),
            _ => emit!(self.out, "movq %rax, (%rcx)"),
        }
        Ok(())
    }

    fn emit_unary(&mut self, op: UnOp, operand: &Node, ty: TypeId) -> CResult<()> {
        match op {
            UnOp::Neg => {
                self.emit_expr(operand)?;
                if self.types.get(ty).is_float() {
                    emit!(self.out, "xorpd %xmm1, %xmm1");
                    emit!(self.out, "subsd %xmm0, %xmm1");
                    emit!(self.out, "movapd %xmm1, %xmm0");
                } else {
                    emit!(self.out, "negq %rax");
                }
                Ok(())
            }
            UnOp::Not => {
                self.emit_expr(operand)?;
                emit!(self.out, "testq %rax, %rax");
                emit!(self.out, "sete %al");
                emit!(self.out, "movzbq %al, %rax");
                Ok(())
            }
            UnOp::BitNot => {
                self.emit_expr(operand)?;
                emit!(self.out, "notq %rax");
                Ok(())
            }
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => self.emit_incdec(op, operand, ty),
        }
    }

    fn emit_incdec(&mut self, op: UnOp, operand: &Node, ty: TypeId) -> CResult<()> {
        let step: i64 = match &self.types.get(ty).kind {
            TypeKind::Pointer { pointee } => self.types.get(*pointee).size.max(1) as i64,
            _ => 1,
        };
        self.emit_lvalue_addr(operand)?;
        emit!(self.out, "movq %rcx, %rdx");
        emit!(self.out, "movq (%rdx), %rax");
        let is_post = matches!(op, UnOp::PostInc | UnOp::PostDec);
        if is_post {
            emit!(self.out, "pushq %rax");
        }
        match op {
            UnOp::PreInc | UnOp::PostInc => emit!(self.out, "addq ${step}, %rax"),
            UnOp::PreDec | UnOp::PostDec => emit!(self.out, "subq ${step}, %rax"),
            _ => unreachable!(),
        }
        emit!(self.out, "movq %rax, (%rdx)");
        if is_post {
            emit!(self.out, "popq %rax");
        }
        Ok(())
    }

    fn emit_short_circuit(&mut self, lhs: &Node, rhs: &Node, is_and: bool) -> CResult<()> {
        let short_label = self.new_label();
        let end_label = self.new_label();
        self.emit_expr(lhs)?;
        emit!(self.out, "testq %rax, %rax");
        if is_and {
            emit!(self.out, "je {short_label}");
        } else {
            emit!(self.out, "jne {short_label}");
        }
        self.emit_expr(rhs)?;
        emit!(self.out, "testq %rax, %rax");
        emit!(self.out, "setne %al");
        emit!(self.out, "movzbq %al, %rax");
        emit!(self.out, "jmp {end_label}");
        emit_noindent!(self.out, "{short_label}:");
        emit!(self.out, "movq ${}, %rax", if is_and { 0 } else { 1 });
        emit_noindent!(self.out, "{end_label}:");
        Ok(())
    }

    fn emit_ternary(&mut self, cond: &Node, then: &Node, els: &Node) -> CResult<()> {
        let else_label = self.new_label();
        let end_label = self.new_label();
        self.emit_expr(cond)?;
        emit!(self.out, "testq %rax, %rax");
        emit!(self.out, "je {else_label}");
        self.emit_expr(then)?;
        emit!(self.out, "jmp {end_label}");
        emit_noindent!(self.out, "{else_label}:");
        self.emit_expr(els)?;
        emit_noindent!(self.out, "{end_label}:");
        Ok(())
    }

    fn emit_binary(&mut self, op: BinOp, lhs: &Node, rhs: &Node) -> CResult<()> {
        let float = self.types.get(lhs.ty).is_float() || self.types.get(rhs.ty).is_float();
        self.emit_expr(lhs)?;
        if float {
            emit!(self.out, "movsd %xmm0, %xmm1");
        } else {
            emit!(self.out, "pushq %rax");
        }
        self.emit_expr(rhs)?;
        if float {
            emit!(self.out, "movsd %xmm0, %xmm2");
            emit!(self.out, "movsd %xmm1, %xmm0");
            self.emit_float_op(op)
        } else {
            emit!(self.out, "movq %rax, %rcx");
            emit!(self.out, "popq %rax");
            self.emit_int_op(op, lhs.ty)
        }
    }

    fn emit_float_op(&mut self, op: BinOp) -> CResult<()> {
        match op {
            BinOp::Add => emit!(self.out, "addsd %xmm2, %xmm0"),
            BinOp::Sub => emit!(self.out, "subsd %xmm2, %xmm0"),
            BinOp::Mul => emit!(self.out, "mulsd %xmm2, %xmm0"),
            BinOp::Div => emit!(self.out, "divsd %xmm2, %xmm0"),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                emit!(self.out, "ucomisd %xmm2, %xmm0");
                let setcc = match op {
                    BinOp::Eq => "sete",
                    BinOp::Ne => "setne",
                    BinOp::Lt => "setb",
                    BinOp::Gt => "seta",
                    BinOp::Le => "setbe",
                    BinOp::Ge => "setae",
                    _ => unreachable!(),
                };
                emit!(self.out, "{setcc} %al");
                emit!(self.out, "movzbq %al, %rax");
            }
            _ => return Err(CompileError::codegen("operator not valid on floating operands")),
        }
        Ok(())
    }

    fn emit_int_op(&mut self, op: BinOp, ty: TypeId) -> CResult<()> {
        let unsigned = self.types.get(ty).is_unsigned;
        match op {
            BinOp::Add => emit!(self.out, "addq %rcx, %rax"),
            BinOp::Sub => emit!(self.out, "subq %rcx, %rax"),
            BinOp::Mul => emit!(self.out, "imulq %rcx, %rax"),
            BinOp::Div | BinOp::Mod => {
                if unsigned {
                    emit!(self.out, "xorq %rdx, %rdx");
                    emit!(self.out, "divq %rcx");
                } else {
                    emit!(self.out, "cqto");
                    emit!(self.out, "idivq %rcx");
                }
                if op == BinOp::Mod {
                    emit!(self.out, "movq %rdx, %rax");
                }
            }
            BinOp::BitAnd => emit!(self.out, "andq %rcx, %rax"),
            BinOp::BitOr => emit!(self.out, "orq %rcx, %rax"),
            BinOp::BitXor => emit!(self.out, "xorq %rcx, %rax"),
            BinOp::Shl => {
                emit!(self.out, "movb %cl, %cl");
                emit!(self.out, "shlq %cl, %rax");
            }
            BinOp::Shr => {
                emit!(self.out, "movb %cl, %cl");
                if unsigned {
                    emit!(self.out, "shrq %cl, %rax");
                } else {
                    emit!(self.out, "sarq %cl, %rax");
                }
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                emit!(self.out, "cmpq %rcx, %rax");
                let setcc = match (op, unsigned) {
                    (BinOp::Eq, _) => "sete",
                    (BinOp::Ne, _) => "setne",
                    (BinOp::Lt, false) => "setl",
                    (BinOp::Lt, true) => "setb",
                    (BinOp::Gt, false) => "setg",
                    (BinOp::Gt, true) => "seta",
                    (BinOp::Le, false) => "setle",
                    (BinOp::Le, true) => "setbe",
                    (BinOp::Ge, false) => "setge",
                    (BinOp::Ge, true) => "setae",
                    _ => unreachable!(),
                };
                emit!(self.out, "{setcc} %al");
                emit!(self.out, "movzbq %al, %rax");
            }
            BinOp::LogAnd | BinOp::LogOr | BinOp::Assign | BinOp::Comma => {
                return Err(CompileError::codegen("operator handled elsewhere"));
            }
        }
        Ok(())
    }

    // ---- calls ---------------------------------------------------

    fn emit_call_direct(&mut self, callee: &str, args: &[Node], ret_ty: TypeId) -> CResult<()> {
        let (sse_count, extra) = self.emit_call_args(args, 0)?;
        emit!(self.out, "movb ${sse_count}, %al");
        emit!(self.out, "call {callee}");
        self.finish_call(extra, ret_ty)
    }

    fn emit_call_indirect(&mut self, callee: &Node, args: &[Node], ret_ty: TypeId) -> CResult<()> {
        self.emit_expr(callee)?;
        emit!(self.out, "pushq %rax");
        let (sse_count, extra) = self.emit_call_args(args, 8)?;
        // The callee pointer sits `extra` bytes below whatever overflow
        // args/padding emit_call_args left on top of it; read it in
        // place rather than popping, since those bytes must still be
        // there for the callee to read during the call.
        emit!(self.out, "movq {extra}(%rsp), %r11");
        emit!(self.out, "movb ${sse_count}, %al");
        emit!(self.out, "call *%r11");
        self.finish_call(extra + 8, ret_ty)
    }

    /// Classifies arguments into register-eligible ints, register-
    /// eligible floats, and "rest" (structs and anything that overflowed
    /// its register bank), mirroring `gen.c`'s `classify_args`/
    /// `emit_func_call`: `rest` is evaluated and pushed first (in
    /// reverse, so it lands on the stack in left-to-right order), then
    /// the register ints, then the register floats, each pushed in
    /// source order and popped back in reverse — the only way a push/
    /// pop stack discipline can land argument `i` in register `i`
    /// regardless of how many arguments precede or follow it.
    /// `pre_pushed` is the count of bytes the caller already has on the
    /// stack above the eventual call site (the callee pointer, for an
    /// indirect call) so the alignment pad accounts for it too.
    ///
    /// Returns `(sse_count, extra)`: `sse_count` is the number of
    /// register-class float arguments (for the variadic `%al`
    /// convention), and `extra` is the byte count of stack-resident
    /// arguments plus alignment padding that are still on the stack
    /// when this function returns and must be popped by the caller with
    /// `finish_call` once the call instruction has executed.
    fn emit_call_args(&mut self, args: &[Node], pre_pushed: u32) -> CResult<(u32, u32)> {
        let mut int_args = Vec::new();
        let mut float_args = Vec::new();
        let mut rest_args = Vec::new();
        let mut ireg = 0usize;
        let mut xreg = 0usize;
        for a in args {
            if self.types.get(a.ty).is_struct() {
                rest_args.push(a);
            } else if self.types.get(a.ty).is_float() {
                if xreg < SSE_ARG_REGS.len() {
                    float_args.push(a);
                    xreg += 1;
                } else {
                    rest_args.push(a);
                }
            } else if ireg < INT_ARG_REGS.len() {
                int_args.push(a);
                ireg += 1;
            } else {
                rest_args.push(a);
            }
        }

        let mut rest_bytes = 0u32;
        for a in rest_args.iter().rev() {
            self.emit_expr(a)?;
            if self.types.get(a.ty).is_struct() {
                let size = self.types.get(a.ty).size;
                let words = (size + 7) / 8;
                emit!(self.out, "subq ${}, %rsp", words * 8);
                emit!(self.out, "movq %rsp, %rdx");
                self.copy_struct_bytes(size)?;
                rest_bytes += words * 8;
            } else if self.types.get(a.ty).is_float() {
                emit!(self.out, "subq $8, %rsp");
                emit!(self.out, "movsd %xmm0, (%rsp)");
                rest_bytes += 8;
            } else {
                emit!(self.out, "pushq %rax");
                rest_bytes += 8;
            }
        }

        for a in &int_args {
            self.emit_expr(a)?;
            emit!(self.out, "pushq %rax");
        }
        for a in &float_args {
            self.emit_expr(a)?;
            emit!(self.out, "subq $8, %rsp");
            emit!(self.out, "movsd %xmm0, (%rsp)");
        }
        for i in (0..float_args.len()).rev() {
            emit!(self.out, "movsd (%rsp), {}", SSE_ARG_REGS[i]);
            emit!(self.out, "addq $8, %rsp");
        }
        for i in (0..int_args.len()).rev() {
            emit!(self.out, "popq {}", INT_ARG_REGS[i]);
        }

        let mut extra = rest_bytes;
        if (pre_pushed + extra) % 16 != 0 {
            emit!(self.out, "subq $8, %rsp");
            extra += 8;
        }
        Ok((float_args.len() as u32, extra))
    }

    fn finish_call(&mut self, extra: u32, ret_ty: TypeId) -> CResult<()> {
        if extra > 0 {
            emit!(self.out, "addq ${extra}, %rsp");
        }
        if matches!(self.types.get(ret_ty).kind, TypeKind::Bool) {
            emit!(self.out, "andq $1, %rax");
        }
        Ok(())
    }
}

fn round_up16(n: i64) -> i64 {
    (n + 15) / 16 * 16
}

fn user_label(name: &str) -> String {
    format!(".Luser_{name}")
}
