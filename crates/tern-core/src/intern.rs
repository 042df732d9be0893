//! Type interning: `TypeId` identity and the shared `TypeContext`.
//!
//! Every distinct type gets exactly one [`TypeId`]; comparing IDs is
//! comparing types. The canonical constructors (`ptr`, `arr`, `func`,
//! `tup`, `var`, ...) intern through per-kind tables, so
//! `ctx.ptr(t) == ctx.ptr(t)` always holds. Nominal types (struct, enum,
//! flags, opaque, generic) mint a fresh ID per defining site.
//!
//! The context is shared across module workers; tables are concurrent maps
//! and insertion races resolve first-writer-wins, so both racers observe
//! the same ID.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::id::ModuleId;
use crate::types::{EnumDef, FlagsDef, GenericDef, PrimKind, StructDef, Type};

/// Unique identifier for an interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Pre-registered IDs for the built-in types.
impl TypeId {
    pub const BOOL: TypeId = TypeId(0);
    pub const CHAR: TypeId = TypeId(1);
    pub const I8: TypeId = TypeId(2);
    pub const I16: TypeId = TypeId(3);
    pub const I32: TypeId = TypeId(4);
    pub const I64: TypeId = TypeId(5);
    pub const U8: TypeId = TypeId(6);
    pub const U16: TypeId = TypeId(7);
    pub const U32: TypeId = TypeId(8);
    pub const U64: TypeId = TypeId(9);
    pub const F32: TypeId = TypeId(10);
    pub const F64: TypeId = TypeId(11);
    pub const TYPE: TypeId = TypeId(12);
    pub const NULLPTR: TypeId = TypeId(13);
    pub const EMPTY_ARRAY: TypeId = TypeId(14);
    pub const VOID: TypeId = TypeId(15);
    pub const BYTE_VIEW: TypeId = TypeId(16);
    pub const MODULE: TypeId = TypeId(17);
    pub const ERROR: TypeId = TypeId(18);
    pub const UNKNOWN: TypeId = TypeId(19);
}

const BUILTINS: [Type; 20] = [
    Type::Prim(PrimKind::Bool),
    Type::Prim(PrimKind::Char),
    Type::Prim(PrimKind::I8),
    Type::Prim(PrimKind::I16),
    Type::Prim(PrimKind::I32),
    Type::Prim(PrimKind::I64),
    Type::Prim(PrimKind::U8),
    Type::Prim(PrimKind::U16),
    Type::Prim(PrimKind::U32),
    Type::Prim(PrimKind::U64),
    Type::Prim(PrimKind::F32),
    Type::Prim(PrimKind::F64),
    Type::Prim(PrimKind::Type),
    Type::Prim(PrimKind::NullPtr),
    Type::Prim(PrimKind::EmptyArray),
    Type::Prim(PrimKind::Void),
    Type::Prim(PrimKind::ByteView),
    Type::Prim(PrimKind::Module),
    Type::Error,
    Type::Unknown,
];

/// Hashable compile-time constant, used to key generic instantiations by
/// their bound-constants tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstKey {
    Bool(bool),
    Char(char),
    Int(i64),
    Uint(u64),
    Type(TypeId),
}

/// The shared type store and interning tables.
pub struct TypeContext {
    types: DashMap<TypeId, Arc<Type>>,
    next: AtomicU32,
    ptrs: DashMap<TypeId, TypeId>,
    buf_ptrs: DashMap<TypeId, TypeId>,
    arrays: DashMap<(TypeId, Option<u64>), TypeId>,
    funcs: DashMap<(Vec<TypeId>, Vec<TypeId>), TypeId>,
    tuples: DashMap<Vec<TypeId>, TypeId>,
    variants: DashMap<Vec<TypeId>, TypeId>,
    ranges: DashMap<TypeId, TypeId>,
    overload_sets: DashMap<Vec<TypeId>, TypeId>,
    opaques: DashMap<ModuleId, TypeId>,
    generic_insts: DashMap<(TypeId, Vec<ConstKey>), TypeId>,
}

impl TypeContext {
    pub fn new() -> TypeContext {
        let ctx = TypeContext {
            types: DashMap::new(),
            next: AtomicU32::new(BUILTINS.len() as u32),
            ptrs: DashMap::new(),
            buf_ptrs: DashMap::new(),
            arrays: DashMap::new(),
            funcs: DashMap::new(),
            tuples: DashMap::new(),
            variants: DashMap::new(),
            ranges: DashMap::new(),
            overload_sets: DashMap::new(),
            opaques: DashMap::new(),
            generic_insts: DashMap::new(),
        };
        for (i, ty) in BUILTINS.iter().enumerate() {
            ctx.types.insert(TypeId(i as u32), Arc::new(ty.clone()));
        }
        ctx
    }

    /// Looks up an interned type. A missing ID is a compiler bug, not a
    /// user error, and aborts the compile.
    pub fn get(&self, id: TypeId) -> Arc<Type> {
        self.types
            .get(&id)
            .map(|e| e.value().clone())
            .expect("TypeContext::get: unregistered TypeId")
    }

    pub fn prim(&self, kind: PrimKind) -> TypeId {
        match kind {
            PrimKind::Bool => TypeId::BOOL,
            PrimKind::Char => TypeId::CHAR,
            PrimKind::I8 => TypeId::I8,
            PrimKind::I16 => TypeId::I16,
            PrimKind::I32 => TypeId::I32,
            PrimKind::I64 => TypeId::I64,
            PrimKind::U8 => TypeId::U8,
            PrimKind::U16 => TypeId::U16,
            PrimKind::U32 => TypeId::U32,
            PrimKind::U64 => TypeId::U64,
            PrimKind::F32 => TypeId::F32,
            PrimKind::F64 => TypeId::F64,
            PrimKind::Type => TypeId::TYPE,
            PrimKind::NullPtr => TypeId::NULLPTR,
            PrimKind::EmptyArray => TypeId::EMPTY_ARRAY,
            PrimKind::Void => TypeId::VOID,
            PrimKind::ByteView => TypeId::BYTE_VIEW,
            PrimKind::Module => TypeId::MODULE,
        }
    }

    /// The primitive kind of an ID, if it is primitive.
    pub fn prim_of(&self, id: TypeId) -> Option<PrimKind> {
        self.get(id).as_prim()
    }

    fn register(&self, ty: Type) -> TypeId {
        let id = TypeId(self.next.fetch_add(1, Ordering::Relaxed));
        self.types.insert(id, Arc::new(ty));
        id
    }

    /// Interns through a per-kind table; the first completer's ID wins and
    /// every caller observes it.
    fn intern<K>(&self, table: &DashMap<K, TypeId>, key: K, make: impl FnOnce() -> Type) -> TypeId
    where
        K: Eq + std::hash::Hash,
    {
        if let Some(found) = table.get(&key) {
            return *found;
        }
        *table.entry(key).or_insert_with(|| self.register(make()))
    }

    pub fn ptr(&self, pointee: TypeId) -> TypeId {
        self.intern(&self.ptrs, pointee, || Type::Ptr { pointee })
    }

    pub fn buf_ptr(&self, pointee: TypeId) -> TypeId {
        self.intern(&self.buf_ptrs, pointee, || Type::BufPtr { pointee })
    }

    pub fn arr(&self, elem: TypeId, len: Option<u64>) -> TypeId {
        self.intern(&self.arrays, (elem, len), || Type::Arr { elem, len })
    }

    pub fn func(&self, params: Vec<TypeId>, results: Vec<TypeId>) -> TypeId {
        self.intern(&self.funcs, (params.clone(), results.clone()), || Type::Func {
            params,
            results,
        })
    }

    /// Tuples of zero entries collapse to `void`; single entries collapse
    /// to the entry itself.
    pub fn tup(&self, entries: Vec<TypeId>) -> TypeId {
        match entries.len() {
            0 => TypeId::VOID,
            1 => entries[0],
            _ => self.intern(&self.tuples, entries.clone(), || Type::Tup { entries }),
        }
    }

    /// Variant alternatives are flattened, deduplicated, and sorted before
    /// interning, so `A | B == B | A`. A single alternative collapses to
    /// itself; an `Error` alternative absorbs.
    pub fn var(&self, alts: Vec<TypeId>) -> TypeId {
        let mut flat = Vec::new();
        for alt in alts {
            match &*self.get(alt) {
                Type::Var { alts: inner } => flat.extend(inner.iter().copied()),
                Type::Error => return TypeId::ERROR,
                _ => flat.push(alt),
            }
        }
        flat.sort_by_key(|t| t.0);
        flat.dedup();
        match flat.len() {
            0 => TypeId::VOID,
            1 => flat[0],
            _ => self.intern(&self.variants, flat.clone(), || Type::Var { alts: flat }),
        }
    }

    pub fn range(&self, elem: TypeId) -> TypeId {
        self.intern(&self.ranges, elem, || Type::Range { elem })
    }

    /// The overload-set ("quantum") type for an identifier with several
    /// candidate declarations. A single option collapses to itself.
    pub fn overloads(&self, mut options: Vec<TypeId>) -> TypeId {
        options.sort_by_key(|t| t.0);
        options.dedup();
        match options.len() {
            0 => TypeId::ERROR,
            1 => options[0],
            _ => self.intern(&self.overload_sets, options.clone(), || Type::Overloads {
                options,
            }),
        }
    }

    pub fn opaque(&self, module: ModuleId) -> TypeId {
        self.intern(&self.opaques, module, || Type::Opaque { module })
    }

    // Nominal constructors: fresh identity per defining site.

    pub fn struct_type(&self, def: StructDef) -> TypeId {
        self.register(Type::Struct(def))
    }

    pub fn enum_type(&self, def: EnumDef) -> TypeId {
        self.register(Type::Enum(def))
    }

    pub fn flags_type(&self, def: FlagsDef) -> TypeId {
        self.register(Type::Flags(def))
    }

    pub fn generic_type(&self, def: GenericDef) -> TypeId {
        self.register(Type::Generic(def))
    }

    /// Replaces a registered nominal type in place. Used to complete a
    /// struct whose identity had to exist before its fields were known
    /// (recursive generics, staged compile-time construction). Only
    /// nominal IDs may be updated; interned structural IDs never change.
    pub fn update(&self, id: TypeId, ty: Type) {
        self.types.insert(id, Arc::new(ty));
    }

    /// Cached instantiation lookup for a generic struct.
    pub fn generic_inst(&self, generic: TypeId, key: &[ConstKey]) -> Option<TypeId> {
        self.generic_insts
            .get(&(generic, key.to_vec()))
            .map(|e| *e)
    }

    /// Records an instantiation; the first completer wins and its ID is
    /// returned to every caller.
    pub fn cache_generic_inst(&self, generic: TypeId, key: Vec<ConstKey>, inst: TypeId) -> TypeId {
        *self.generic_insts.entry((generic, key)).or_insert(inst)
    }

    /// Least upper bound of two types, or `None` if incompatible.
    /// `Error` absorbs; `Unknown` defers to the other side; variants join
    /// element-wise.
    pub fn join(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if a == b {
            return Some(a);
        }
        if a == TypeId::ERROR || b == TypeId::ERROR {
            return Some(TypeId::ERROR);
        }
        if a == TypeId::UNKNOWN {
            return Some(b);
        }
        if b == TypeId::UNKNOWN {
            return Some(a);
        }
        let ta = self.get(a);
        let tb = self.get(b);
        match (&*ta, &*tb) {
            (Type::Prim(PrimKind::NullPtr), Type::Ptr { .. }) => Some(b),
            (Type::Ptr { .. }, Type::Prim(PrimKind::NullPtr)) => Some(a),
            (Type::Prim(PrimKind::EmptyArray), Type::Arr { .. }) => Some(b),
            (Type::Arr { .. }, Type::Prim(PrimKind::EmptyArray)) => Some(a),
            (Type::Arr { elem: e1, len: l1 }, Type::Arr { elem: e2, len: l2 }) if l1 == l2 => {
                let elem = self.join(*e1, *e2)?;
                Some(self.arr(elem, *l1))
            }
            (Type::Var { alts: v1 }, Type::Var { alts: v2 }) => {
                let mut all = v1.clone();
                all.extend(v2.iter().copied());
                Some(self.var(all))
            }
            (Type::Var { alts }, _) if alts.contains(&b) => Some(a),
            (_, Type::Var { alts }) if alts.contains(&a) => Some(b),
            _ => None,
        }
    }

    /// Human-readable spelling for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match &*self.get(id) {
            Type::Prim(k) => k.name().to_string(),
            Type::Ptr { pointee } => format!("&{}", self.display(*pointee)),
            Type::BufPtr { pointee } => format!("[&]{}", self.display(*pointee)),
            Type::Arr { elem, len: Some(n) } => format!("[{}; {}]", n, self.display(*elem)),
            Type::Arr { elem, len: None } => format!("[; {}]", self.display(*elem)),
            Type::Func { params, results } => {
                let ins = params
                    .iter()
                    .map(|t| self.display(*t))
                    .collect::<Vec<_>>()
                    .join(", ");
                let outs = results
                    .iter()
                    .map(|t| self.display(*t))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({}) -> {}", ins, if outs.is_empty() { "void".into() } else { outs })
            }
            Type::Tup { entries } => {
                let inner = entries
                    .iter()
                    .map(|t| self.display(*t))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", inner)
            }
            Type::Var { alts } => alts
                .iter()
                .map(|t| self.display(*t))
                .collect::<Vec<_>>()
                .join(" | "),
            Type::Struct(def) => def.name.clone(),
            Type::Enum(def) => def.name.clone(),
            Type::Flags(def) => def.name.clone(),
            Type::Range { elem } => format!("range({})", self.display(*elem)),
            Type::Opaque { module } => format!("opaque({})", module),
            Type::Generic(def) => format!("{}(...)", def.name),
            Type::Overloads { options } => format!("overload set ({} options)", options.len()),
            Type::Error => "<error>".to_string(),
            Type::Unknown => "<unknown>".to_string(),
        }
    }
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn builtins_preregistered() {
        let ctx = TypeContext::new();
        assert!(matches!(*ctx.get(TypeId::BOOL), Type::Prim(PrimKind::Bool)));
        assert!(matches!(*ctx.get(TypeId::VOID), Type::Prim(PrimKind::Void)));
        assert!(matches!(*ctx.get(TypeId::ERROR), Type::Error));
        assert_eq!(ctx.prim(PrimKind::F64), TypeId::F64);
    }

    #[test]
    fn canonical_constructors_intern() {
        let ctx = TypeContext::new();
        assert_eq!(ctx.ptr(TypeId::I32), ctx.ptr(TypeId::I32));
        assert_ne!(ctx.ptr(TypeId::I32), ctx.ptr(TypeId::I64));
        assert_eq!(ctx.arr(TypeId::I32, Some(3)), ctx.arr(TypeId::I32, Some(3)));
        assert_ne!(ctx.arr(TypeId::I32, Some(3)), ctx.arr(TypeId::I32, None));
        assert_eq!(
            ctx.func(vec![TypeId::I32], vec![TypeId::BOOL]),
            ctx.func(vec![TypeId::I32], vec![TypeId::BOOL])
        );
        assert_eq!(
            ctx.tup(vec![TypeId::I32, TypeId::F64]),
            ctx.tup(vec![TypeId::I32, TypeId::F64])
        );
    }

    #[test]
    fn tuple_collapses_trivial_cases() {
        let ctx = TypeContext::new();
        assert_eq!(ctx.tup(vec![]), TypeId::VOID);
        assert_eq!(ctx.tup(vec![TypeId::CHAR]), TypeId::CHAR);
    }

    #[test]
    fn variant_is_order_insensitive_and_flat() {
        let ctx = TypeContext::new();
        let ab = ctx.var(vec![TypeId::I32, TypeId::BOOL]);
        let ba = ctx.var(vec![TypeId::BOOL, TypeId::I32]);
        assert_eq!(ab, ba);

        let nested = ctx.var(vec![ab, TypeId::CHAR]);
        let flat = ctx.var(vec![TypeId::BOOL, TypeId::I32, TypeId::CHAR]);
        assert_eq!(nested, flat);

        assert_eq!(ctx.var(vec![TypeId::I32]), TypeId::I32);
        assert_eq!(ctx.var(vec![TypeId::I32, TypeId::ERROR]), TypeId::ERROR);
    }

    #[test]
    fn nominal_types_are_unique_per_site() {
        let ctx = TypeContext::new();
        let def = crate::types::StructDef {
            name: "S".into(),
            scope: crate::id::ScopeId(0),
            module: ModuleId(0),
            fields: vec![],
            hashtags: vec![],
        };
        let a = ctx.struct_type(def.clone());
        let b = ctx.struct_type(def);
        assert_ne!(a, b);
    }

    #[test]
    fn join_rules() {
        let ctx = TypeContext::new();
        assert_eq!(ctx.join(TypeId::I32, TypeId::I32), Some(TypeId::I32));
        assert_eq!(ctx.join(TypeId::I32, TypeId::ERROR), Some(TypeId::ERROR));
        assert_eq!(ctx.join(TypeId::I32, TypeId::BOOL), None);

        let p = ctx.ptr(TypeId::I32);
        assert_eq!(ctx.join(TypeId::NULLPTR, p), Some(p));

        let arr = ctx.arr(TypeId::I32, Some(4));
        assert_eq!(ctx.join(TypeId::EMPTY_ARRAY, arr), Some(arr));

        let v = ctx.var(vec![TypeId::I32, TypeId::BOOL]);
        assert_eq!(ctx.join(v, TypeId::I32), Some(v));
        let v2 = ctx.var(vec![TypeId::BOOL, TypeId::CHAR]);
        let joined = ctx.join(v, v2).unwrap();
        assert_eq!(joined, ctx.var(vec![TypeId::I32, TypeId::BOOL, TypeId::CHAR]));
    }

    #[test]
    fn generic_inst_cache_first_writer_wins() {
        let ctx = TypeContext::new();
        let g = TypeId(100);
        let key = vec![ConstKey::Int(3), ConstKey::Type(TypeId::I32)];
        assert_eq!(ctx.generic_inst(g, &key), None);
        let first = ctx.cache_generic_inst(g, key.clone(), TypeId::I64);
        assert_eq!(first, TypeId::I64);
        let second = ctx.cache_generic_inst(g, key.clone(), TypeId::F32);
        assert_eq!(second, TypeId::I64);
        assert_eq!(ctx.generic_inst(g, &key), Some(TypeId::I64));
    }

    proptest! {
        #[test]
        fn func_interning_is_stable(params in proptest::collection::vec(0u32..12, 0..4),
                                    results in proptest::collection::vec(0u32..12, 0..3)) {
            let ctx = TypeContext::new();
            let ps: Vec<TypeId> = params.iter().map(|&i| TypeId(i)).collect();
            let rs: Vec<TypeId> = results.iter().map(|&i| TypeId(i)).collect();
            let a = ctx.func(ps.clone(), rs.clone());
            let b = ctx.func(ps, rs);
            prop_assert_eq!(a, b);
        }
    }
}
