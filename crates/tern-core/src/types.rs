//! The tern type system.
//!
//! Provides the complete set of types in tern programs: primitives
//! (including `type`, `nullptr`, `void`, and the byte-view string type),
//! pointers and buffer pointers, arrays with optional static length,
//! functions, tuples, variants, nominal struct/enum/flags definitions,
//! ranges, opaque module types, generic structs, overload sets, and the
//! `Error`/`Unknown` sentinels.
//!
//! Types are referenced through [`TypeId`](crate::intern::TypeId) and
//! interned by [`TypeContext`](crate::intern::TypeContext): ID equality is
//! semantic equality. Struct, enum, flags, and opaque types are nominal
//! (unique per defining site).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::{ModuleId, NodeId, ScopeId};
use crate::intern::TypeId;

/// Primitive type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimKind {
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// The type of types; values are interned [`TypeId`]s.
    Type,
    /// The type of the `null` literal, convertible to any pointer.
    NullPtr,
    /// The type of `[]`, convertible to any array.
    EmptyArray,
    Void,
    /// An immutable (pointer, length) view of bytes; string literals.
    ByteView,
    Module,
}

impl PrimKind {
    pub fn is_signed(self) -> bool {
        matches!(self, PrimKind::I8 | PrimKind::I16 | PrimKind::I32 | PrimKind::I64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, PrimKind::U8 | PrimKind::U16 | PrimKind::U32 | PrimKind::U64)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub fn is_real(self) -> bool {
        matches!(self, PrimKind::F32 | PrimKind::F64)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_real()
    }

    /// Surface-language spelling.
    pub fn name(self) -> &'static str {
        match self {
            PrimKind::Bool => "bool",
            PrimKind::Char => "char",
            PrimKind::I8 => "int8",
            PrimKind::I16 => "int16",
            PrimKind::I32 => "int32",
            PrimKind::I64 => "int64",
            PrimKind::U8 => "uint8",
            PrimKind::U16 => "uint16",
            PrimKind::U32 => "uint32",
            PrimKind::U64 => "uint64",
            PrimKind::F32 => "float32",
            PrimKind::F64 => "float64",
            PrimKind::Type => "type",
            PrimKind::NullPtr => "nullptr",
            PrimKind::EmptyArray => "empty_array",
            PrimKind::Void => "void",
            PrimKind::ByteView => "byte_view",
            PrimKind::Module => "module",
        }
    }

    /// Maps a surface spelling (including the `f32`/`f64` aliases) to a kind.
    /// Only kinds a program can name are reachable here.
    pub fn from_name(name: &str) -> Option<PrimKind> {
        Some(match name {
            "bool" => PrimKind::Bool,
            "char" => PrimKind::Char,
            "int8" => PrimKind::I8,
            "int16" => PrimKind::I16,
            "int32" => PrimKind::I32,
            "int64" => PrimKind::I64,
            "uint8" => PrimKind::U8,
            "uint16" => PrimKind::U16,
            "uint32" => PrimKind::U32,
            "uint64" => PrimKind::U64,
            "float32" | "f32" => PrimKind::F32,
            "float64" | "f64" => PrimKind::F64,
            "type" => PrimKind::Type,
            "void" => PrimKind::Void,
            _ => return None,
        })
    }
}

/// Compile-time constant default for a struct field, produced by the
/// checker from the field's initializer expression.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldInit {
    Bool(bool),
    Char(char),
    Int(i64),
    Uint(u64),
    Real(f64),
}

/// One field of a nominal struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<FieldInit>,
    pub hashtags: Vec<String>,
}

/// Named struct definition with declaration-ordered fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub scope: ScopeId,
    pub module: ModuleId,
    pub fields: Vec<StructField>,
    pub hashtags: Vec<String>,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Named enum definition: insertion-ordered member names with values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub module: ModuleId,
    pub members: IndexMap<String, u64>,
}

impl EnumDef {
    pub fn value_name(&self, value: u64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, &v)| v == value)
            .map(|(n, _)| n.as_str())
    }
}

/// Named flags definition: insertion-ordered member names with bit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagsDef {
    pub name: String,
    pub module: ModuleId,
    pub members: IndexMap<String, u64>,
}

/// A generic (parameterized) struct awaiting instantiation. The literal
/// node is re-checked per bound-constants tuple; instantiations are cached
/// by the type context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericDef {
    pub name: String,
    pub module: ModuleId,
    pub params: Vec<String>,
    /// The struct-literal node in the defining module's AST.
    pub lit: NodeId,
}

/// A tern type. See the module docs for the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Prim(PrimKind),
    Ptr { pointee: TypeId },
    /// Pointer into a buffer; supports element arithmetic.
    BufPtr { pointee: TypeId },
    /// `len == None` marks dynamic length.
    Arr { elem: TypeId, len: Option<u64> },
    Func { params: Vec<TypeId>, results: Vec<TypeId> },
    Tup { entries: Vec<TypeId> },
    /// Alternatives are sorted, deduplicated, and flattened on interning.
    Var { alts: Vec<TypeId> },
    Struct(StructDef),
    Enum(EnumDef),
    Flags(FlagsDef),
    Range { elem: TypeId },
    Opaque { module: ModuleId },
    Generic(GenericDef),
    /// An identifier that resolved to more than one declaration.
    Overloads { options: Vec<TypeId> },
    Error,
    Unknown,
}

impl Type {
    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    pub fn as_prim(&self) -> Option<PrimKind> {
        match self {
            Type::Prim(k) => Some(*k),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prim_classification() {
        assert!(PrimKind::I32.is_signed());
        assert!(PrimKind::U64.is_unsigned());
        assert!(PrimKind::F32.is_real());
        assert!(PrimKind::I8.is_numeric());
        assert!(!PrimKind::Bool.is_numeric());
        assert!(!PrimKind::Type.is_numeric());
    }

    #[test]
    fn prim_names_roundtrip() {
        for kind in [
            PrimKind::Bool,
            PrimKind::Char,
            PrimKind::I8,
            PrimKind::I16,
            PrimKind::I32,
            PrimKind::I64,
            PrimKind::U8,
            PrimKind::U16,
            PrimKind::U32,
            PrimKind::U64,
            PrimKind::F32,
            PrimKind::F64,
            PrimKind::Type,
            PrimKind::Void,
        ] {
            assert_eq!(PrimKind::from_name(kind.name()), Some(kind));
        }
        // Aliases map onto the canonical reals.
        assert_eq!(PrimKind::from_name("f32"), Some(PrimKind::F32));
        assert_eq!(PrimKind::from_name("f64"), Some(PrimKind::F64));
        // Unnameable kinds stay unnameable.
        assert_eq!(PrimKind::from_name("nullptr"), None);
        assert_eq!(PrimKind::from_name("empty_array"), None);
    }

    #[test]
    fn struct_field_lookup() {
        let def = StructDef {
            name: "Point".into(),
            scope: ScopeId(0),
            module: ModuleId(0),
            fields: vec![
                StructField {
                    name: "x".into(),
                    ty: TypeId::I32,
                    init: None,
                    hashtags: vec![],
                },
                StructField {
                    name: "y".into(),
                    ty: TypeId::I32,
                    init: Some(FieldInit::Int(1)),
                    hashtags: vec![],
                },
            ],
            hashtags: vec![],
        };
        assert_eq!(def.field_index("y"), Some(1));
        assert_eq!(def.field_index("z"), None);
    }

    #[test]
    fn enum_value_name() {
        let mut members = IndexMap::new();
        members.insert("north".to_string(), 0u64);
        members.insert("south".to_string(), 1u64);
        let def = EnumDef {
            name: "Dir".into(),
            module: ModuleId(0),
            members,
        };
        assert_eq!(def.value_name(1), Some("south"));
        assert_eq!(def.value_name(9), None);
    }

    #[test]
    fn serde_roundtrip() {
        let ty = Type::Func {
            params: vec![TypeId::I32, TypeId::F64],
            results: vec![TypeId::BOOL],
        };
        let json = serde_json::to_string(&ty).unwrap();
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(ty, back);
    }
}
