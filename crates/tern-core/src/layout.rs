//! Target layout: sizes, alignment, field offsets, and the big/small ABI
//! predicate.
//!
//! Every calling-convention and addressing decision in the compiler goes
//! through [`Arch::is_big`]: big types are passed and assigned by address,
//! small types by value. Centralizing the predicate keeps every call site,
//! store, and return consistent.

use serde::{Deserialize, Serialize};

use crate::intern::{TypeContext, TypeId};
use crate::types::{PrimKind, Type};

/// Target architecture parameters. The interpreter and the native back end
/// share one `Arch`, so compile-time layout answers match runtime layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arch {
    pub ptr_bytes: u64,
    pub ptr_align: u64,
}

impl Default for Arch {
    fn default() -> Self {
        Arch {
            ptr_bytes: 8,
            ptr_align: 8,
        }
    }
}

impl Arch {
    /// Rounds `offset` up to `align` (no-op for zero-sized alignments).
    pub fn forward_align(&self, offset: u64, align: u64) -> u64 {
        if align <= 1 {
            return offset;
        }
        offset.div_ceil(align) * align
    }

    fn prim_bytes(&self, kind: PrimKind) -> u64 {
        match kind {
            PrimKind::Bool | PrimKind::Char | PrimKind::I8 | PrimKind::U8 => 1,
            PrimKind::I16 | PrimKind::U16 => 2,
            PrimKind::I32 | PrimKind::U32 | PrimKind::F32 => 4,
            PrimKind::I64 | PrimKind::U64 | PrimKind::F64 => 8,
            PrimKind::Type | PrimKind::NullPtr | PrimKind::Module => 8,
            PrimKind::Void | PrimKind::EmptyArray => 0,
            // pointer + length
            PrimKind::ByteView => 2 * self.ptr_bytes,
        }
    }

    /// Size of a type in bytes.
    pub fn bytes(&self, ctx: &TypeContext, id: TypeId) -> u64 {
        match &*ctx.get(id) {
            Type::Prim(k) => self.prim_bytes(*k),
            Type::Ptr { .. } | Type::BufPtr { .. } | Type::Func { .. } => self.ptr_bytes,
            Type::Arr { elem, len: Some(n) } => n * self.array_stride(ctx, *elem),
            // data pointer + length
            Type::Arr { len: None, .. } => 2 * self.ptr_bytes,
            Type::Struct(def) => {
                let mut offset = 0;
                for field in &def.fields {
                    offset = self.forward_align(offset, self.alignment(ctx, field.ty));
                    offset += self.bytes(ctx, field.ty);
                }
                self.forward_align(offset, self.alignment(ctx, id))
            }
            Type::Tup { entries } => {
                let mut offset = 0;
                for &entry in entries {
                    offset = self.forward_align(offset, self.alignment(ctx, entry));
                    offset += self.bytes(ctx, entry);
                }
                self.forward_align(offset, self.alignment(ctx, id))
            }
            Type::Enum(_) | Type::Flags(_) => 8,
            Type::Range { elem } => 2 * self.array_stride(ctx, *elem),
            // payload of the widest alternative, preceded by the tag
            Type::Var { alts } => {
                let payload = alts.iter().map(|&a| self.bytes(ctx, a)).max().unwrap_or(0);
                self.ptr_bytes + payload
            }
            Type::Opaque { .. }
            | Type::Generic(_)
            | Type::Overloads { .. }
            | Type::Error
            | Type::Unknown => 0,
        }
    }

    /// Alignment of a type in bytes.
    pub fn alignment(&self, ctx: &TypeContext, id: TypeId) -> u64 {
        match &*ctx.get(id) {
            Type::Prim(k) => match k {
                PrimKind::ByteView => self.ptr_align,
                _ => self.prim_bytes(*k).max(1).min(8),
            },
            Type::Ptr { .. } | Type::BufPtr { .. } | Type::Func { .. } => self.ptr_align,
            Type::Arr { elem, len: Some(_) } => self.alignment(ctx, *elem),
            Type::Arr { len: None, .. } => self.ptr_align,
            Type::Struct(def) => def
                .fields
                .iter()
                .map(|f| self.alignment(ctx, f.ty))
                .max()
                .unwrap_or(1),
            Type::Tup { entries } => entries
                .iter()
                .map(|&e| self.alignment(ctx, e))
                .max()
                .unwrap_or(1),
            Type::Enum(_) | Type::Flags(_) => 8,
            Type::Range { elem } => self.alignment(ctx, *elem),
            Type::Var { alts } => alts
                .iter()
                .map(|&a| self.alignment(ctx, a))
                .max()
                .unwrap_or(1)
                .max(self.ptr_align),
            Type::Opaque { .. }
            | Type::Generic(_)
            | Type::Overloads { .. }
            | Type::Error
            | Type::Unknown => 1,
        }
    }

    /// Element-to-element distance in an array of `elem`.
    pub fn array_stride(&self, ctx: &TypeContext, elem: TypeId) -> u64 {
        self.forward_align(self.bytes(ctx, elem), self.alignment(ctx, elem))
    }

    /// Byte offset of field `index` within a struct type.
    pub fn field_offset(&self, ctx: &TypeContext, struct_ty: TypeId, index: usize) -> u64 {
        let ty = ctx.get(struct_ty);
        let fields: &[crate::types::StructField] = match &*ty {
            Type::Struct(def) => &def.fields,
            _ => return 0,
        };
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            offset = self.forward_align(offset, self.alignment(ctx, field.ty));
            if i == index {
                return offset;
            }
            offset += self.bytes(ctx, field.ty);
        }
        offset
    }

    /// Byte offset of entry `index` within a tuple type.
    pub fn tuple_offset(&self, ctx: &TypeContext, tuple_ty: TypeId, index: usize) -> u64 {
        let ty = ctx.get(tuple_ty);
        let entries: &[TypeId] = match &*ty {
            Type::Tup { entries } => entries,
            _ => return 0,
        };
        let mut offset = 0;
        for (i, &entry) in entries.iter().enumerate() {
            offset = self.forward_align(offset, self.alignment(ctx, entry));
            if i == index {
                return offset;
            }
            offset += self.bytes(ctx, entry);
        }
        offset
    }

    /// The single ABI rule: big types are addressed, small types are
    /// loaded. Aggregates with interior structure are big; everything that
    /// fits a register is small.
    pub fn is_big(&self, ctx: &TypeContext, id: TypeId) -> bool {
        matches!(
            &*ctx.get(id),
            Type::Arr { .. } | Type::Struct(_) | Type::Tup { .. } | Type::Var { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ModuleId, ScopeId};
    use crate::types::{StructDef, StructField};

    fn arch() -> Arch {
        Arch::default()
    }

    fn point(ctx: &TypeContext) -> TypeId {
        ctx.struct_type(StructDef {
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
                    init: None,
                    hashtags: vec![],
                },
            ],
            hashtags: vec![],
        })
    }

    #[test]
    fn two_int32_fields_pack_to_eight_bytes() {
        let ctx = TypeContext::new();
        let s = point(&ctx);
        assert_eq!(arch().bytes(&ctx, s), 8);
        assert_eq!(arch().alignment(&ctx, s), 4);
        assert_eq!(arch().field_offset(&ctx, s, 0), 0);
        assert_eq!(arch().field_offset(&ctx, s, 1), 4);
    }

    #[test]
    fn mixed_struct_padding() {
        let ctx = TypeContext::new();
        let s = ctx.struct_type(StructDef {
            name: "Mixed".into(),
            scope: ScopeId(0),
            module: ModuleId(0),
            fields: vec![
                StructField {
                    name: "flag".into(),
                    ty: TypeId::BOOL,
                    init: None,
                    hashtags: vec![],
                },
                StructField {
                    name: "value".into(),
                    ty: TypeId::F64,
                    init: None,
                    hashtags: vec![],
                },
            ],
            hashtags: vec![],
        });
        assert_eq!(arch().field_offset(&ctx, s, 1), 8);
        assert_eq!(arch().bytes(&ctx, s), 16);
    }

    #[test]
    fn array_layout() {
        let ctx = TypeContext::new();
        let a = ctx.arr(TypeId::I16, Some(5));
        assert_eq!(arch().bytes(&ctx, a), 10);
        assert_eq!(arch().alignment(&ctx, a), 2);
        // Dynamic arrays are a (pointer, length) header.
        let d = ctx.arr(TypeId::I16, None);
        assert_eq!(arch().bytes(&ctx, d), 16);
    }

    #[test]
    fn big_small_partition() {
        let ctx = TypeContext::new();
        let a = arch();
        assert!(!a.is_big(&ctx, TypeId::I64));
        assert!(!a.is_big(&ctx, ctx.ptr(TypeId::I64)));
        assert!(!a.is_big(&ctx, TypeId::BOOL));
        assert!(a.is_big(&ctx, ctx.arr(TypeId::I64, Some(2))));
        assert!(a.is_big(&ctx, point(&ctx)));
        assert!(a.is_big(&ctx, ctx.tup(vec![TypeId::I32, TypeId::BOOL])));
    }

    #[test]
    fn forward_align_rounds_up() {
        let a = arch();
        assert_eq!(a.forward_align(0, 8), 0);
        assert_eq!(a.forward_align(1, 8), 8);
        assert_eq!(a.forward_align(8, 8), 8);
        assert_eq!(a.forward_align(9, 4), 12);
        assert_eq!(a.forward_align(5, 0), 5);
    }
}
