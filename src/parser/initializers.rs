//! Initializer-list parsing (spec §4.4): flattens a (possibly nested,
//! possibly designated) brace-init into the flat `{target_type,
//! offset, value}` entry list `ast::InitEntry` already models, which
//! the code generator consumes directly as a sequence of stores.

use crate::errors::{CompileError, CResult};
use crate::token::TokenKind;

use super::ast::{InitEntry, Literal, Node, NodeKind};
use super::types::TypeKind;
use super::Parser;

impl Parser {
    pub fn parse_initializer(&mut self, ty: super::types::TypeId) -> CResult<Vec<InitEntry>> {
        let mut entries = Vec::new();
        self.flatten_initializer(ty, 0, &mut entries)?;
        Ok(entries)
    }

    fn flatten_initializer(&mut self, ty: super::types::TypeId, base_offset: u32, out: &mut Vec<InitEntry>) -> CResult<()> {
        let is_char_array = matches!(&self.types.get(ty).kind, TypeKind::Array { elem, .. } if self.types.get(*elem).size == 1 && !self.types.get(*elem).is_unsigned);
        if is_char_array {
            if let TokenKind::Str { .. } = &self.peek()?.kind {
                let t = self.bump()?;
                if let TokenKind::Str { mut bytes, .. } = t.kind {
                    bytes.push(0);
                    let value = Node::new(NodeKind::Literal(Literal::Str { bytes, label: None }), ty, t.pos);
                    out.push(InitEntry { target_type: ty, offset: base_offset, value: Box::new(value) });
                    return Ok(());
                }
            }
        }

        if !self.peek()?.is_punct("{") {
            let value = self.parse_assignment_expression()?;
            out.push(InitEntry { target_type: ty, offset: base_offset, value: Box::new(value) });
            return Ok(());
        }

        let pos = self.bump()?.pos; // `{`
        match self.types.get(ty).kind.clone() {
            TypeKind::Array { elem, len } => {
                let elem_size = self.types.get(elem).size.max(1);
                let mut index: i64 = 0;
                while !self.peek()?.is_punct("}") {
                    if self.eat_punct("[")? {
                        let (idx, _) = self.const_expr_i64()?;
                        self.expect_punct("]")?;
                        self.expect_punct("=")?;
                        index = idx;
                    }
                    let off = base_offset + (index as u32) * elem_size;
                    self.flatten_initializer(elem, off, out)?;
                    index += 1;
                    if len >= 0 && index > len {
                        return Err(CompileError::parse(pos.clone(), "excess elements in array initializer"));
                    }
                    if !self.eat_punct(",")? {
                        break;
                    }
                }
                self.expect_punct("}")?;
            }
            TypeKind::Struct { fields, is_union, .. } => {
                let mut field_iter = fields.into_iter();
                while !self.peek()?.is_punct("}") {
                    let field = if self.eat_punct(".")? {
                        let (name, fpos) = self.expect_ident()?;
                        self.expect_punct("=")?;
                        self.find_field_by_name(ty, &name).ok_or_else(|| CompileError::parse(fpos, format!("no member named '{name}'")))?
                    } else {
                        field_iter.next().ok_or_else(|| CompileError::parse(pos.clone(), "excess elements in struct initializer"))?
                    };
                    let off = base_offset + field.offset;
                    self.flatten_initializer(field.ty, off, out)?;
                    if is_union {
                        // Only the first (or designated) member of a
                        // union initializer is meaningful.
                    }
                    if !self.eat_punct(",")? {
                        break;
                    }
                }
                self.expect_punct("}")?;
            }
            _ => {
                // Scalar wrapped in redundant braces: `int x = {1};`.
                self.flatten_initializer(ty, base_offset, out)?;
                self.eat_punct(",")?;
                self.expect_punct("}")?;
            }
        }
        Ok(())
    }

    fn find_field_by_name(&self, ty: super::types::TypeId, name: &str) -> Option<super::types::Field> {
        match &self.types.get(ty).kind {
            TypeKind::Struct { fields, .. } => fields.iter().find(|f| f.name == name).cloned(),
            _ => None,
        }
    }
}
