//! Expression parsing, one function per C11 §6.5 precedence level
//! (spec §4.4), generalized from the teacher's
//! `expression_parser.rs`'s combinator chain (`parse_or` → `parse_and`
//! → `parse_equality` → ... → `parse_primary`) into hand-written
//! recursive descent over [`super::Parser`]'s token cursor.

use crate::errors::{CompileError, CResult, SourcePos};
use crate::token::{Keyword, TokenKind};

use super::ast::{BinOp, Literal, Node, NodeKind, UnOp};
use super::types::{Type, TypeKind, TypeId};
use super::{Parser, Symbol};

impl Parser {
    pub fn parse_expression(&mut self) -> CResult<Node> {
        let mut lhs = self.parse_assignment_expression()?;
        while self.eat_punct(",")? {
            let pos = lhs.pos.clone();
            let rhs = self.parse_assignment_expression()?;
            let ty = rhs.ty;
            lhs = Node::new(NodeKind::Binary { op: BinOp::Comma, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, pos);
        }
        Ok(lhs)
    }

    pub(crate) fn parse_assignment_expression(&mut self) -> CResult<Node> {
        let lhs = self.parse_conditional_expression()?;
        const COMPOUND: &[(&str, BinOp)] = &[
            ("+=", BinOp::Add), ("-=", BinOp::Sub), ("*=", BinOp::Mul), ("/=", BinOp::Div),
            ("%=", BinOp::Mod), ("&=", BinOp::BitAnd), ("|=", BinOp::BitOr), ("^=", BinOp::BitXor),
            ("<<=", BinOp::Shl), (">>=", BinOp::Shr),
        ];
        if self.peek()?.is_punct("=") {
            let pos = self.bump()?.pos;
            let rhs = self.parse_assignment_expression()?;
            let ty = lhs.ty;
            let rhs_conv = self.convert_assign(rhs, ty)?;
            return Ok(Node::new(BinOp::Assign.into_binary(lhs, rhs_conv), ty, pos));
        }
        for (spelling, op) in COMPOUND {
            if self.peek()?.is_punct(spelling) {
                let pos = self.bump()?.pos;
                let rhs = self.parse_assignment_expression()?;
                let ty = lhs.ty;
                let combined = self.build_binary(*op, lhs.clone(), rhs, pos.clone())?;
                let conv = self.convert_assign(combined, ty)?;
                return Ok(Node::new(BinOp::Assign.into_binary(lhs, conv), ty, pos));
            }
        }
        Ok(lhs)
    }

    fn parse_conditional_expression(&mut self) -> CResult<Node> {
        let cond = self.parse_logical_or()?;
        if self.eat_punct("?")? {
            let pos = cond.pos.clone();
            let then = self.parse_expression()?;
            self.expect_punct(":")?;
            let els = self.parse_conditional_expression()?;
            let ty = if self.types.get(then.ty).is_arithmetic() && self.types.get(els.ty).is_arithmetic() {
                self.usual_arith_conv(then.ty, els.ty)
            } else {
                then.ty
            };
            return Ok(Node::new(NodeKind::Ternary { cond: Box::new(cond), then: Box::new(then), els: Box::new(els) }, ty, pos));
        }
        Ok(cond)
    }

    /// Constant-expression entry point used by array lengths, bit-field
    /// widths, and enumerator values (spec §4.5). Parses a full
    /// conditional-expression and folds it; any non-constant subtree
    /// is reported against its own position.
    pub fn const_expr_i64(&mut self) -> CResult<(i64, SourcePos)> {
        let node = self.parse_conditional_expression()?;
        let pos = node.pos.clone();
        Ok((fold_const(&node)?, pos))
    }
}

/// Binary-operator precedence chain; each level only knows about the
/// level directly below it, matching C11's grammar exactly.
macro_rules! left_assoc_binop {
    ($name:ident, $next:ident, [$(($sp:literal, $op:expr)),+ $(,)?]) => {
        fn $name(&mut self) -> CResult<Node> {
            let mut lhs = self.$next()?;
            loop {
                let mut matched = false;
                $(
                    if self.peek()?.is_punct($sp) {
                        let pos = self.bump()?.pos;
                        let rhs = self.$next()?;
                        lhs = self.build_binary($op, lhs, rhs, pos)?;
                        matched = true;
                    }
                )+
                if !matched {
                    break;
                }
            }
            Ok(lhs)
        }
    };
}

impl Parser {
    left_assoc_binop!(parse_logical_or, parse_logical_and, [("||", BinOp::LogOr)]);
    left_assoc_binop!(parse_logical_and, parse_bitor, [("&&", BinOp::LogAnd)]);
    left_assoc_binop!(parse_bitor, parse_bitxor, [("|", BinOp::BitOr)]);
    left_assoc_binop!(parse_bitxor, parse_bitand, [("^", BinOp::BitXor)]);
    left_assoc_binop!(parse_bitand, parse_equality, [("&", BinOp::BitAnd)]);
    left_assoc_binop!(parse_equality, parse_relational, [("==", BinOp::Eq), ("!=", BinOp::Ne)]);
    left_assoc_binop!(parse_relational, parse_shift, [("<", BinOp::Lt), (">", BinOp::Gt), ("<=", BinOp::Le), (">=", BinOp::Ge)]);
    left_assoc_binop!(parse_shift, parse_additive, [("<<", BinOp::Shl), (">>", BinOp::Shr)]);
    left_assoc_binop!(parse_additive, parse_multiplicative, [("+", BinOp::Add), ("-", BinOp::Sub)]);
    left_assoc_binop!(parse_multiplicative, parse_cast_expression, [("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)]);

    /// Builds a binary node, applying pointer-arithmetic scaling and
    /// the usual arithmetic conversions (spec §4.4 "Conversions").
    fn build_binary(&mut self, op: BinOp, lhs: Node, rhs: Node, pos: SourcePos) -> CResult<Node> {
        let lhs = self.decay_expr(lhs);
        let rhs = self.decay_expr(rhs);
        if matches!(op, BinOp::Add | BinOp::Sub) && self.types.get(lhs.ty).is_pointer() {
            let pointee = match &self.types.get(lhs.ty).kind {
                TypeKind::Pointer { pointee } => *pointee,
                _ => unreachable!(),
            };
            if op == BinOp::Sub && self.types.get(rhs.ty).is_pointer() {
                let elem_size = self.types.get(pointee).size.max(1) as i64;
                let long = self.types.long;
                let diff = Node::new(NodeKind::Binary { op: BinOp::Sub, lhs: Box::new(lhs), rhs: Box::new(rhs) }, long, pos.clone());
                let sz = Node::new(NodeKind::Literal(Literal::Int(elem_size)), long, pos);
                return Ok(diff_div(diff, sz));
            }
            let elem_size = self.types.get(pointee).size.max(1) as i64;
            let ty = lhs.ty;
            let scaled_rhs = scale_index(rhs, elem_size);
            return Ok(Node::new(NodeKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(scaled_rhs) }, ty, pos));
        }
        if op == BinOp::Add && self.types.get(rhs.ty).is_pointer() {
            return self.build_binary(op, rhs, lhs, pos);
        }
        let result_ty = match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::LogAnd | BinOp::LogOr => self.types.int,
            _ => self.usual_arith_conv(lhs.ty, rhs.ty),
        };
        Ok(Node::new(NodeKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, result_ty, pos))
    }

    /// C11 §6.3.1.8 usual arithmetic conversions, simplified to the
    /// integer/float ranks this compiler's type table carries.
    pub fn usual_arith_conv(&self, a: TypeId, b: TypeId) -> TypeId {
        let ta = self.types.get(a);
        let tb = self.types.get(b);
        if ta.is_float() || tb.is_float() {
            return if rank_float(ta) >= rank_float(tb) { a } else { b };
        }
        let pa = self.promote(a);
        let pb = self.promote(b);
        let (ta, tb) = (self.types.get(pa), self.types.get(pb));
        if ta.rank() == tb.rank() {
            return if ta.is_unsigned { pa } else { pb };
        }
        if ta.rank() > tb.rank() { pa } else { pb }
    }

    /// C11 §6.3.1.1 integer promotions: anything with rank below `int`
    /// promotes to `int`.
    fn promote(&self, id: TypeId) -> TypeId {
        let t = self.types.get(id);
        if t.is_integer() && t.rank() < self.types.get(self.types.int).rank() {
            self.types.int
        } else {
            id
        }
    }

    fn decay_expr(&mut self, node: Node) -> Node {
        let decayed = self.types.decay(node.ty);
        if decayed.0 == node.ty.0 {
            node
        } else {
            let pos = node.pos.clone();
            Node::new(NodeKind::ImplicitConv(Box::new(node)), decayed, pos)
        }
    }

    /// Wraps `rhs` in an implicit conversion node when assigning it
    /// into a slot of type `target`.
    fn convert_assign(&mut self, rhs: Node, target: TypeId) -> CResult<Node> {
        let rhs = self.decay_expr(rhs);
        if rhs.ty.0 == target.0 {
            return Ok(rhs);
        }
        let pos = rhs.pos.clone();
        Ok(Node::new(NodeKind::ImplicitConv(Box::new(rhs)), target, pos))
    }

    fn parse_cast_expression(&mut self) -> CResult<Node> {
        if self.peek()?.is_punct("(") && self.looks_like_type_at_peek2()? {
            let pos = self.bump()?.pos;
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            if self.peek()?.is_punct("{") {
                return self.parse_compound_literal(ty, pos);
            }
            let operand = self.parse_cast_expression()?;
            return Ok(Node::new(NodeKind::Cast(Box::new(operand)), ty, pos));
        }
        self.parse_unary_expression()
    }

    fn looks_like_type_at_peek2(&mut self) -> CResult<bool> {
        let t = self.peek2()?.clone();
        let is_type = match &t.kind {
            TokenKind::Keyword(kw) => matches!(
                kw,
                Keyword::Void | Keyword::Char | Keyword::Short | Keyword::Int | Keyword::Long | Keyword::Float
                    | Keyword::Double | Keyword::Signed | Keyword::Unsigned | Keyword::Bool | Keyword::Struct
                    | Keyword::Union | Keyword::Enum | Keyword::Const | Keyword::Volatile
            ),
            TokenKind::Ident(name) => self.is_typedef_name(name),
            _ => false,
        };
        Ok(is_type)
    }

    fn parse_type_name(&mut self) -> CResult<TypeId> {
        let spec = self.parse_decl_specifiers()?;
        let mut ty = spec.base;
        while self.eat_punct("*")? {
            while self.eat_keyword(Keyword::Const)? || self.eat_keyword(Keyword::Volatile)? {}
            ty = self.types.pointer_to(ty);
        }
        while self.eat_punct("[")? {
            let len = if self.peek()?.is_punct("]") { -1 } else { self.const_expr_i64()?.0 };
            self.expect_punct("]")?;
            ty = self.types.array_of(ty, len);
        }
        Ok(ty)
    }

    fn parse_compound_literal(&mut self, ty: TypeId, pos: SourcePos) -> CResult<Node> {
        let init = self.parse_initializer(ty)?;
        let label = self.new_anon_name("compound_literal");
        Ok(Node::new(NodeKind::GlobalVar { label, init: Some(init) }, ty, pos))
    }

    fn parse_unary_expression(&mut self) -> CResult<Node> {
        let t = self.peek()?.clone();
        match &t.kind {
            TokenKind::Punct("&") => {
                self.bump()?;
                if self.eat_punct("&")? {
                    let (name, lpos) = self.expect_ident()?;
                    return Ok(Node::new(NodeKind::LabelAddr(name), self.types.voidptr, lpos));
                }
                let operand = self.parse_cast_expression()?;
                let ty = self.types.pointer_to(operand.ty);
                Ok(Node::new(NodeKind::AddrOf(Box::new(operand)), ty, t.pos))
            }
            TokenKind::Punct("*") => {
                self.bump()?;
                let operand = self.parse_cast_expression()?;
                let operand = self.decay_expr(operand);
                let pointee = match &self.types.get(operand.ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => return Err(CompileError::semantic(t.pos, "indirection requires pointer operand")),
                };
                Ok(Node::new(NodeKind::Deref(Box::new(operand)), pointee, t.pos))
            }
            TokenKind::Punct("+") => {
                self.bump()?;
                self.parse_cast_expression()
            }
            TokenKind::Punct("-") => {
                self.bump()?;
                let operand = self.parse_cast_expression()?;
                let ty = operand.ty;
                Ok(Node::new(NodeKind::Unary { op: UnOp::Neg, operand: Box::new(operand) }, ty, t.pos))
            }
            TokenKind::Punct("!") => {
                self.bump()?;
                let operand = self.parse_cast_expression()?;
                Ok(Node::new(NodeKind::Unary { op: UnOp::Not, operand: Box::new(operand) }, self.types.int, t.pos))
            }
            TokenKind::Punct("~") => {
                self.bump()?;
                let operand = self.parse_cast_expression()?;
                let ty = operand.ty;
                Ok(Node::new(NodeKind::Unary { op: UnOp::BitNot, operand: Box::new(operand) }, ty, t.pos))
            }
            TokenKind::Punct("++") => {
                self.bump()?;
                let operand = self.parse_unary_expression()?;
                let ty = operand.ty;
                Ok(Node::new(NodeKind::Unary { op: UnOp::PreInc, operand: Box::new(operand) }, ty, t.pos))
            }
            TokenKind::Punct("--") => {
                self.bump()?;
                let operand = self.parse_unary_expression()?;
                let ty = operand.ty;
                Ok(Node::new(NodeKind::Unary { op: UnOp::PreDec, operand: Box::new(operand) }, ty, t.pos))
            }
            TokenKind::Keyword(Keyword::Sizeof) => {
                self.bump()?;
                self.parse_sizeof_or_alignof(t.pos, true)
            }
            TokenKind::Keyword(Keyword::Alignof) => {
                self.bump()?;
                self.parse_sizeof_or_alignof(t.pos, false)
            }
            TokenKind::Keyword(Keyword::Generic) => {
                self.bump()?;
                self.parse_generic_selection(t.pos)
            }
            _ => self.parse_postfix_expression(),
        }
    }

    /// `sizeof`/`_Alignof`, including the GNU extension that
    /// `sizeof(void)` and `sizeof(function)` are `1` rather than an
    /// error (spec §4.4 edge case).
    fn parse_sizeof_or_alignof(&mut self, pos: SourcePos, is_sizeof: bool) -> CResult<Node> {
        let ty = if self.peek()?.is_punct("(") && self.looks_like_type_at_peek2()? {
            self.bump()?;
            let ty = self.parse_type_name()?;
            self.expect_punct(")")?;
            ty
        } else {
            let operand = self.parse_unary_expression()?;
            operand.ty
        };
        let t = self.types.get(ty);
        let value = if !is_sizeof {
            t.align.max(1) as i64
        } else if t.is_void() || t.is_function() {
            1
        } else {
            t.size as i64
        };
        Ok(Node::new(NodeKind::Literal(Literal::Int(value)), self.types.long, pos))
    }

    fn parse_generic_selection(&mut self, pos: SourcePos) -> CResult<Node> {
        self.expect_punct("(")?;
        let controlling = self.parse_assignment_expression()?;
        let mut chosen: Option<Node> = None;
        let mut default: Option<Node> = None;
        while self.eat_punct(",")? {
            if self.eat_keyword(Keyword::Default)? {
                self.expect_punct(":")?;
                default = Some(self.parse_assignment_expression()?);
                continue;
            }
            let candidate_ty = self.parse_type_name()?;
            self.expect_punct(":")?;
            let value = self.parse_assignment_expression()?;
            if candidate_ty.0 == controlling.ty.0 {
                chosen = Some(value);
            }
        }
        self.expect_punct(")")?;
        chosen.or(default).ok_or_else(|| CompileError::semantic(pos, "_Generic: no matching association and no default"))
    }

    /// `__builtin_va_start(ap, last)` (spec §6 Builtins). `last`,
    /// conventionally the variadic function's final named parameter,
    /// only anchors the user's spelling — the GP/SSE register counts
    /// and the save area it records come from the enclosing function,
    /// already known to codegen when it emits the prologue.
    fn parse_builtin_va_start(&mut self, pos: SourcePos) -> CResult<Node> {
        self.expect_punct("(")?;
        let ap = self.parse_assignment_expression()?;
        self.expect_punct(",")?;
        self.parse_assignment_expression()?;
        self.expect_punct(")")?;
        Ok(Node::new(NodeKind::VaStart { ap: Box::new(ap) }, self.types.void, pos))
    }

    /// `__builtin_va_arg(ap, type)`; `type` is a type-name, not an
    /// expression, so it is parsed the same way `sizeof`'s parenthesized
    /// form is.
    fn parse_builtin_va_arg(&mut self, pos: SourcePos) -> CResult<Node> {
        self.expect_punct("(")?;
        let ap = self.parse_assignment_expression()?;
        self.expect_punct(",")?;
        let arg_ty = self.parse_type_name()?;
        self.expect_punct(")")?;
        Ok(Node::new(NodeKind::VaArg { ap: Box::new(ap), arg_ty }, arg_ty, pos))
    }

    /// `__builtin_reg_class(&expr)` (spec §6: "returns 0 integer, 1
    /// SSE, 2 memory"). Classification only depends on the pointee's
    /// static type, so this folds to a constant at parse time instead
    /// of needing codegen support.
    fn parse_builtin_reg_class(&mut self, pos: SourcePos) -> CResult<Node> {
        self.expect_punct("(")?;
        let arg = self.parse_assignment_expression()?;
        self.expect_punct(")")?;
        let pointee = match &self.types.get(arg.ty).kind {
            TypeKind::Pointer { pointee } => *pointee,
            _ => return Err(CompileError::semantic(pos, "__builtin_reg_class expects a pointer argument")),
        };
        let pointee_ty = self.types.get(pointee);
        let class = if pointee_ty.is_struct() {
            2
        } else if pointee_ty.is_float() {
            1
        } else {
            0
        };
        Ok(Node::new(NodeKind::Literal(Literal::Int(class)), self.types.int, pos))
    }

    /// `__builtin_return_address(level)`.
    fn parse_builtin_return_address(&mut self, pos: SourcePos) -> CResult<Node> {
        self.expect_punct("(")?;
        let level = self.parse_assignment_expression()?;
        self.expect_punct(")")?;
        Ok(Node::new(NodeKind::ReturnAddress(Box::new(level)), self.types.voidptr, pos))
    }

    fn parse_postfix_expression(&mut self) -> CResult<Node> {
        let mut node = self.parse_primary_expression()?;
        loop {
            if self.eat_punct("[")? {
                let pos = node.pos.clone();
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                node = self.build_binary(BinOp::Add, node, index, pos.clone())?;
                let pointee = match &self.types.get(node.ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => return Err(CompileError::semantic(pos, "subscript of non-pointer value")),
                };
                node = Node::new(NodeKind::Deref(Box::new(node)), pointee, pos);
            } else if self.peek()?.is_punct("(") {
                node = self.parse_call(node)?;
            } else if self.eat_punct(".")? {
                let (field, pos) = self.expect_ident()?;
                node = self.struct_ref(node, field, pos)?;
            } else if self.eat_punct("->")? {
                let pos = node.pos.clone();
                let pointee = match &self.types.get(node.ty).kind {
                    TypeKind::Pointer { pointee } => *pointee,
                    _ => return Err(CompileError::semantic(pos, "-> on non-pointer value")),
                };
                node = Node::new(NodeKind::Deref(Box::new(node)), pointee, pos);
                let (field, fpos) = self.expect_ident()?;
                node = self.struct_ref(node, field, fpos)?;
            } else if self.eat_punct("++")? {
                let ty = node.ty;
                let pos = node.pos.clone();
                node = Node::new(NodeKind::Unary { op: UnOp::PostInc, operand: Box::new(node) }, ty, pos);
            } else if self.eat_punct("--")? {
                let ty = node.ty;
                let pos = node.pos.clone();
                node = Node::new(NodeKind::Unary { op: UnOp::PostDec, operand: Box::new(node) }, ty, pos);
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn struct_ref(&mut self, base: Node, field: String, pos: SourcePos) -> CResult<Node> {
        let (fty, _off) = match &self.types.get(base.ty).kind {
            TypeKind::Struct { fields, .. } => fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| (f.ty, f.offset))
                .ok_or_else(|| CompileError::semantic(pos.clone(), format!("no member named '{field}'")))?,
            _ => return Err(CompileError::semantic(pos, "member reference on non-struct type")),
        };
        Ok(Node::new(NodeKind::StructRef { base: Box::new(base), field }, fty, pos))
    }

    fn parse_call(&mut self, callee: Node) -> CResult<Node> {
        let pos = callee.pos.clone();
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if !self.peek()?.is_punct(")") {
            loop {
                args.push(self.parse_assignment_expression()?);
                if !self.eat_punct(",")? {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let ret_ty = match &self.types.get(callee.ty).kind {
            TypeKind::Function(f) => f.ret,
            TypeKind::Pointer { pointee } => match &self.types.get(*pointee).kind {
                TypeKind::Function(f) => f.ret,
                _ => self.types.int,
            },
            _ => self.types.int,
        };
        if matches!(callee.kind, NodeKind::FuncDesignator { .. }) {
            let name = match callee.kind {
                NodeKind::FuncDesignator { name } => name,
                _ => unreachable!("checked above"),
            };
            return Ok(Node::new(NodeKind::FuncCall { callee: name, args }, ret_ty, pos));
        }
        Ok(Node::new(NodeKind::FuncPtrCall { callee: Box::new(callee), args }, ret_ty, pos))
    }

    fn parse_primary_expression(&mut self) -> CResult<Node> {
        let t = self.bump()?;
        match t.kind {
            TokenKind::Number(spelling) => self.parse_number_literal(&spelling, t.pos),
            TokenKind::Char { value, .. } => Ok(Node::new(NodeKind::Literal(Literal::Int(value as i64)), self.types.int, t.pos)),
            TokenKind::Str { bytes, .. } => {
                let mut full = bytes;
                full.push(0);
                let elem = self.types.char_;
                let ty = self.types.array_of(elem, full.len() as i64);
                Ok(Node::new(NodeKind::Literal(Literal::Str { bytes: full, label: None }), ty, t.pos))
            }
            TokenKind::Ident(name) => match name.as_str() {
                "__builtin_va_start" => self.parse_builtin_va_start(t.pos),
                "__builtin_va_arg" => self.parse_builtin_va_arg(t.pos),
                "__builtin_reg_class" => self.parse_builtin_reg_class(t.pos),
                "__builtin_return_address" => self.parse_builtin_return_address(t.pos),
                _ => self.resolve_ident(name, t.pos),
            },
            TokenKind::Punct("(") => {
                if self.peek()?.is_punct("{") {
                    return self.parse_statement_expr(t.pos);
                }
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            _ => Err(CompileError::parse(t.pos.clone(), format!("unexpected token '{t}' in expression"))),
        }
    }

    fn parse_statement_expr(&mut self, pos: SourcePos) -> CResult<Node> {
        self.enter_scope();
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.peek()?.is_punct("}") {
            stmts.push(self.parse_block_item()?);
        }
        self.expect_punct("}")?;
        self.expect_punct(")")?;
        self.leave_scope();
        let ty = stmts.last().map(|n: &Node| n.ty).unwrap_or(self.types.void);
        Ok(Node::new(NodeKind::StmtExpr(stmts), ty, pos))
    }

    fn resolve_ident(&mut self, name: String, pos: SourcePos) -> CResult<Node> {
        match self.lookup(&name).cloned() {
            Some(Symbol::Var { ty, is_local, local_offset, global_label, .. }) => {
                if self.types.get(ty).is_function() {
                    return Ok(Node::new(NodeKind::FuncDesignator { name }, ty, pos));
                }
                if is_local {
                    Ok(Node::new(NodeKind::LocalVar { name, offset: local_offset, init: None }, ty, pos))
                } else {
                    Ok(Node::new(NodeKind::GlobalVar { label: global_label, init: None }, ty, pos))
                }
            }
            Some(Symbol::EnumConst(v)) => Ok(Node::new(NodeKind::Literal(Literal::Int(v)), self.types.int, pos)),
            Some(Symbol::Typedef(_)) | None => Err(CompileError::semantic(pos, format!("undeclared identifier '{name}'"))),
        }
    }

    fn parse_number_literal(&mut self, spelling: &str, pos: SourcePos) -> CResult<Node> {
        if spelling.contains('.') || ((spelling.contains('e') || spelling.contains('E')) && !spelling.starts_with("0x") && !spelling.starts_with("0X")) {
            let trimmed = spelling.trim_end_matches(['f', 'F', 'l', 'L']);
            let v: f64 = trimmed
                .parse()
                .map_err(|_| CompileError::semantic(pos.clone(), format!("invalid floating constant '{spelling}'")))?;
            let ty = if spelling.ends_with('f') || spelling.ends_with('F') { self.types.float } else { self.types.double };
            return Ok(Node::new(NodeKind::Literal(Literal::Float(v)), ty, pos));
        }
        let v = parse_int_literal(spelling)
            .ok_or_else(|| CompileError::semantic(pos.clone(), format!("invalid integer constant '{spelling}'")))?;
        let unsigned = spelling.to_ascii_lowercase().contains('u');
        let long_count = spelling.to_ascii_lowercase().matches('l').count();
        let ty = match (long_count, unsigned) {
            (0, false) if v <= i32::MAX as i64 => self.types.int,
            (0, false) => self.types.long,
            (0, true) if (v as u64) <= u32::MAX as u64 => self.types.uint,
            (0, true) => self.types.ulong,
            (_, false) => self.types.long,
            (_, true) => self.types.ulong,
        };
        Ok(Node::new(NodeKind::Literal(Literal::Int(v)), ty, pos))
    }
}

impl BinOp {
    fn into_binary(self, lhs: Node, rhs: Node) -> NodeKind {
        NodeKind::Binary { op: self, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

fn rank_float(t: &Type) -> u32 {
    match t.kind {
        TypeKind::Float => 1,
        TypeKind::Double => 2,
        TypeKind::LongDouble => 3,
        _ => 0,
    }
}

fn scale_index(index: Node, elem_size: i64) -> Node {
    if elem_size == 1 {
        return index;
    }
    let pos = index.pos.clone();
    let ty = index.ty;
    let scale = Node::new(NodeKind::Literal(Literal::Int(elem_size)), ty, pos.clone());
    Node::new(NodeKind::Binary { op: BinOp::Mul, lhs: Box::new(index), rhs: Box::new(scale) }, ty, pos)
}

fn diff_div(diff: Node, elem_size: Node) -> Node {
    let pos = diff.pos.clone();
    let ty = diff.ty;
    Node::new(NodeKind::Binary { op: BinOp::Div, lhs: Box::new(diff), rhs: Box::new(elem_size) }, ty, pos)
}

/// Parses a C integer-literal spelling (`0x...`, leading-zero octal,
/// or decimal, with trailing `u`/`U`/`l`/`L` suffixes) into its value.
pub fn parse_int_literal(spelling: &str) -> Option<i64> {
    let s = spelling.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().or_else(|| u64::from_str_radix(hex, 16).ok().map(|v| v as i64));
    }
    if s.len() > 1 && s.starts_with('0') {
        return i64::from_str_radix(&s[1..], 8).ok();
    }
    s.parse::<i64>().ok().or_else(|| s.parse::<u64>().ok().map(|v| v as i64))
}

/// Folds a fully-parsed expression tree into an `i64`, for the narrow
/// set of constant-expression contexts spec §4.5 requires (array
/// bounds, bit-field widths, enumerator values). Anything involving a
/// variable load, function call, or floating operand is rejected.
pub fn fold_const(node: &Node) -> CResult<i64> {
    match &node.kind {
        NodeKind::Literal(Literal::Int(v)) => Ok(*v),
        NodeKind::Literal(Literal::Float(v)) => Ok(*v as i64),
        NodeKind::Cast(inner) | NodeKind::ImplicitConv(inner) => fold_const(inner),
        NodeKind::Unary { op, operand } => {
            let v = fold_const(operand)?;
            Ok(match op {
                UnOp::Neg => -v,
                UnOp::Not => (v == 0) as i64,
                UnOp::BitNot => !v,
                _ => return Err(CompileError::semantic(node.pos.clone(), "not a constant expression")),
            })
        }
        NodeKind::Binary { op, lhs, rhs } => {
            let a = fold_const(lhs)?;
            let b = fold_const(rhs)?;
            Ok(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a.checked_div(b).ok_or_else(|| CompileError::semantic(node.pos.clone(), "division by zero in constant expression"))?,
                BinOp::Mod => a.checked_rem(b).ok_or_else(|| CompileError::semantic(node.pos.clone(), "modulo by zero in constant expression"))?,
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                BinOp::Shl => a << b,
                BinOp::Shr => a >> b,
                BinOp::Eq => (a == b) as i64,
                BinOp::Ne => (a != b) as i64,
                BinOp::Lt => (a < b) as i64,
                BinOp::Gt => (a > b) as i64,
                BinOp::Le => (a <= b) as i64,
                BinOp::Ge => (a >= b) as i64,
                BinOp::LogAnd => ((a != 0) && (b != 0)) as i64,
                BinOp::LogOr => ((a != 0) || (b != 0)) as i64,
                BinOp::Assign | BinOp::Comma => return Err(CompileError::semantic(node.pos.clone(), "not a constant expression")),
            })
        }
        NodeKind::Ternary { cond, then, els } => {
            if fold_const(cond)? != 0 { fold_const(then) } else { fold_const(els) }
        }
        _ => Err(CompileError::semantic(node.pos.clone(), "not a constant expression")),
    }
}
