//! The closed set of foreign-call signatures.
//!
//! The interpreter dispatches foreign symbols through statically linked
//! thunks; a symbol's function type must match one of the shapes here.
//! The checker uses the same table to type unresolved identifiers naming
//! foreign symbols, so both ends agree on the contract. Unknown shapes are
//! a fatal interpreter error, never a silent miscall.

use serde::{Deserialize, Serialize};

use crate::intern::{TypeContext, TypeId};

/// Supported foreign signature shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignShape {
    /// `(int32) -> int32`
    I32ToI32,
    /// `(int64) -> int64`
    I64ToI64,
    /// `(float64) -> float64`
    F64ToF64,
    /// `() -> int32`
    UnitToI32,
    /// `(int32) -> void`
    I32ToVoid,
}

/// Known foreign symbols and their shapes.
pub const FOREIGN_SYMBOLS: &[(&str, ForeignShape)] = &[
    ("putchar", ForeignShape::I32ToI32),
    ("getchar", ForeignShape::UnitToI32),
    ("abs", ForeignShape::I64ToI64),
    ("sqrt", ForeignShape::F64ToF64),
    ("exit", ForeignShape::I32ToVoid),
];

/// Shape registered for a symbol name, if any.
pub fn foreign_signature(name: &str) -> Option<ForeignShape> {
    FOREIGN_SYMBOLS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, s)| *s)
}

/// The function type of a shape.
pub fn shape_type(ctx: &TypeContext, shape: ForeignShape) -> TypeId {
    match shape {
        ForeignShape::I32ToI32 => ctx.func(vec![TypeId::I32], vec![TypeId::I32]),
        ForeignShape::I64ToI64 => ctx.func(vec![TypeId::I64], vec![TypeId::I64]),
        ForeignShape::F64ToF64 => ctx.func(vec![TypeId::F64], vec![TypeId::F64]),
        ForeignShape::UnitToI32 => ctx.func(vec![], vec![TypeId::I32]),
        ForeignShape::I32ToVoid => ctx.func(vec![TypeId::I32], vec![]),
    }
}

/// Matches a function type against the closed shape set.
pub fn shape_of(ctx: &TypeContext, fn_type: TypeId) -> Option<ForeignShape> {
    for shape in [
        ForeignShape::I32ToI32,
        ForeignShape::I64ToI64,
        ForeignShape::F64ToF64,
        ForeignShape::UnitToI32,
        ForeignShape::I32ToVoid,
    ] {
        if shape_type(ctx, shape) == fn_type {
            return Some(shape);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_symbols_resolve() {
        assert_eq!(foreign_signature("putchar"), Some(ForeignShape::I32ToI32));
        assert_eq!(foreign_signature("sqrt"), Some(ForeignShape::F64ToF64));
        assert_eq!(foreign_signature("nonsense"), None);
    }

    #[test]
    fn shapes_roundtrip_through_types() {
        let ctx = TypeContext::new();
        for (_, shape) in FOREIGN_SYMBOLS {
            let ty = shape_type(&ctx, *shape);
            assert_eq!(shape_of(&ctx, ty), Some(*shape));
        }
        // A type outside the closed set does not match.
        let odd = ctx.func(vec![TypeId::BOOL], vec![TypeId::BOOL]);
        assert_eq!(shape_of(&ctx, odd), None);
    }
}
