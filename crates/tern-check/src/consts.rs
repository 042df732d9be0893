//! The compile-time constant domain.
//!
//! The checker evaluates type expressions, array lengths, `::=`
//! initializers, enum member accesses, and the built-in `bytes`/`align`
//! members into [`ConstVal`]s. Generic instantiations are keyed by the
//! [`ConstKey`] projection of their bound-constants tuple.

use serde::{Deserialize, Serialize};

use tern_core::id::DeclId;
use tern_core::intern::{ConstKey, TypeId};

/// A value known at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstVal {
    Bool(bool),
    Char(char),
    Int(i64),
    Uint(u64),
    Real(f64),
    Str(String),
    Null,
    /// A type value: the payload of expressions of type `type`.
    Type(TypeId),
    /// A function constant, referencing its declaration.
    Func(DeclId),
    Void,
}

impl ConstVal {
    /// Hashable projection for generic-instantiation cache keys.
    /// Reals are deliberately excluded from keys.
    pub fn key(&self) -> Option<ConstKey> {
        Some(match self {
            ConstVal::Bool(b) => ConstKey::Bool(*b),
            ConstVal::Char(c) => ConstKey::Char(*c),
            ConstVal::Int(i) => ConstKey::Int(*i),
            ConstVal::Uint(u) => ConstKey::Uint(*u),
            ConstVal::Type(t) => ConstKey::Type(*t),
            _ => return None,
        })
    }

    pub fn as_type(&self) -> Option<TypeId> {
        match self {
            ConstVal::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConstVal::Int(i) => Some(*i),
            ConstVal::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cover_the_hashable_subset() {
        assert_eq!(ConstVal::Int(3).key(), Some(ConstKey::Int(3)));
        assert_eq!(
            ConstVal::Type(TypeId::I32).key(),
            Some(ConstKey::Type(TypeId::I32))
        );
        assert_eq!(ConstVal::Real(1.5).key(), None);
        assert_eq!(ConstVal::Str("s".into()).key(), None);
    }

    #[test]
    fn accessors() {
        assert_eq!(ConstVal::Type(TypeId::BOOL).as_type(), Some(TypeId::BOOL));
        assert_eq!(ConstVal::Int(7).as_int(), Some(7));
        assert_eq!(ConstVal::Uint(7).as_int(), Some(7));
        assert_eq!(ConstVal::Bool(true).as_int(), None);
    }
}
