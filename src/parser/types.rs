//! The C type system (spec §3 "Type"), arena-indexed so struct types
//! can back-patch their field map after a forward declaration without
//! fighting Rust's ownership rules (spec §9 "Cyclic references").
//!
//! Grounded on `examples/original_source/8cc.h`'s `Type` struct.

use serde::Serialize;

/// An index into a [`TypeArena`]. Cheap to copy, compare, and store on
/// every `Node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Serialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
    /// `-1` marks "not a bit-field".
    pub bit_off: i32,
    /// `0` marks a forced storage-unit boundary; `-1` marks "not a
    /// bit-field".
    pub bit_size: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FuncType {
    pub ret: TypeId,
    pub params: Vec<TypeId>,
    pub variadic: bool,
    /// K&R old-style definition whose parameter types have not yet
    /// been adjusted from subsequent declarations.
    pub old_style: bool,
}

#[derive(Debug, Clone, Serialize)]
pub enum TypeKind {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Float,
    Double,
    LongDouble,
    Array { elem: TypeId, len: i64 },
    Enum,
    Pointer { pointee: TypeId },
    Struct { fields: Vec<Field>, is_union: bool, tag: Option<String>, complete: bool },
    Function(FuncType),
    /// A typedef or forward-declared struct/union/enum tag whose real
    /// definition has not been seen yet; resolved in place once it is.
    Stub,
}

#[derive(Debug, Clone, Serialize)]
pub struct Type {
    pub kind: TypeKind,
    pub size: u32,
    pub align: u32,
    pub is_unsigned: bool,
    pub is_static: bool,
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Bool | TypeKind::Char | TypeKind::Short | TypeKind::Int | TypeKind::Long | TypeKind::LongLong | TypeKind::Enum
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.kind, TypeKind::Float | TypeKind::Double | TypeKind::LongDouble)
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.kind, TypeKind::Struct { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, TypeKind::Function(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, TypeKind::Void)
    }

    /// C11 §6.3.1.1 integer conversion rank, used by the usual
    /// arithmetic conversions; only meaningful for integer kinds.
    pub fn rank(&self) -> u32 {
        match self.kind {
            TypeKind::Bool => 0,
            TypeKind::Char => 1,
            TypeKind::Short => 2,
            TypeKind::Int | TypeKind::Enum => 3,
            TypeKind::Long => 4,
            TypeKind::LongLong => 5,
            _ => 0,
        }
    }
}

/// Owns every `Type` produced for one translation unit; nothing is
/// ever freed (spec §5: intentional leak model), so `TypeId`s stay
/// valid for the arena's whole lifetime.
pub struct TypeArena {
    types: Vec<Type>,
    pub void: TypeId,
    pub char_: TypeId,
    pub uchar: TypeId,
    pub short: TypeId,
    pub int: TypeId,
    pub uint: TypeId,
    pub long: TypeId,
    pub ulong: TypeId,
    pub llong: TypeId,
    pub ullong: TypeId,
    pub float: TypeId,
    pub double: TypeId,
    pub ldouble: TypeId,
    pub bool_: TypeId,
    pub voidptr: TypeId,
    pub charptr: TypeId,
    /// `__va_list_tag` (System V ABI): `{ gp_offset, fp_offset,
    /// overflow_arg_area, reg_save_area }`, the type `va_list`/
    /// `__builtin_va_list` are predeclared as (spec §6 Builtins).
    pub va_list: TypeId,
}

impl TypeArena {
    pub fn new() -> Self {
        let mut types = Vec::new();
        macro_rules! base {
            ($kind:expr, $size:expr, $align:expr, $unsigned:expr) => {{
                types.push(Type { kind: $kind, size: $size, align: $align, is_unsigned: $unsigned, is_static: false });
                TypeId((types.len() - 1) as u32)
            }};
        }
        let void = base!(TypeKind::Void, 0, 1, false);
        let bool_ = base!(TypeKind::Bool, 1, 1, true);
        let char_ = base!(TypeKind::Char, 1, 1, false);
        let uchar = base!(TypeKind::Char, 1, 1, true);
        let short = base!(TypeKind::Short, 2, 2, false);
        let int = base!(TypeKind::Int, 4, 4, false);
        let uint = base!(TypeKind::Int, 4, 4, true);
        let long = base!(TypeKind::Long, 8, 8, false);
        let ulong = base!(TypeKind::Long, 8, 8, true);
        let llong = base!(TypeKind::LongLong, 8, 8, false);
        let ullong = base!(TypeKind::LongLong, 8, 8, true);
        let float = base!(TypeKind::Float, 4, 4, false);
        let double = base!(TypeKind::Double, 8, 8, false);
        let ldouble = base!(TypeKind::LongDouble, 8, 8, false);
        let voidptr = base!(TypeKind::Pointer { pointee: void }, 8, 8, false);
        let charptr = base!(TypeKind::Pointer { pointee: char_ }, 8, 8, false);
        let va_list_fields = vec![
            Field { name: "gp_offset".into(), ty: uint, offset: 0, bit_off: -1, bit_size: -1 },
            Field { name: "fp_offset".into(), ty: uint, offset: 4, bit_off: -1, bit_size: -1 },
            Field { name: "overflow_arg_area".into(), ty: voidptr, offset: 8, bit_off: -1, bit_size: -1 },
            Field { name: "reg_save_area".into(), ty: voidptr, offset: 16, bit_off: -1, bit_size: -1 },
        ];
        let va_list = {
            types.push(Type {
                kind: TypeKind::Struct { fields: va_list_fields, is_union: false, tag: Some("__va_list_tag".into()), complete: true },
                size: 24,
                align: 8,
                is_unsigned: false,
                is_static: false,
            });
            TypeId((types.len() - 1) as u32)
        };
        TypeArena {
            types,
            void, bool_, char_, uchar, short, int, uint, long, ulong, llong, ullong,
            float, double, ldouble, voidptr, charptr, va_list,
        }
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.0 as usize]
    }

    pub fn push(&mut self, ty: Type) -> TypeId {
        self.types.push(ty);
        TypeId((self.types.len() - 1) as u32)
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.push(Type { kind: TypeKind::Pointer { pointee }, size: 8, align: 8, is_unsigned: false, is_static: false })
    }

    pub fn array_of(&mut self, elem: TypeId, len: i64) -> TypeId {
        let elem_size = self.get(elem).size as i64;
        let elem_align = self.get(elem).align;
        let size = if len < 0 { 0 } else { (elem_size * len) as u32 };
        self.push(Type { kind: TypeKind::Array { elem, len }, size, align: elem_align.max(1), is_unsigned: false, is_static: false })
    }

    /// Per C11 §6.3.2.1: array-to-pointer and function-to-pointer
    /// decay, used both for parameter-type adjustment and for
    /// expression evaluation.
    pub fn decay(&mut self, id: TypeId) -> TypeId {
        match self.get(id).kind.clone() {
            TypeKind::Array { elem, .. } => self.pointer_to(elem),
            TypeKind::Function(_) => self.pointer_to(id),
            _ => id,
        }
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}
