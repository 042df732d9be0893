//! Stable ID newtypes for compiler entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `NodeId` cannot be accidentally used where a `DeclId` is
//! expected. AST nodes, declarations, and scopes reference each other by
//! index, never by pointer; ownership flows strictly parent to child.

use std::fmt;

use serde::{Deserialize, Serialize};

/// AST node identifier: an index into a module's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Declaration identifier: an index into a module's declaration table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

/// Scope identifier: an index into a module's scope arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

/// Module identity within a compile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// IR function identity within its owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

/// Basic-block index within an IR function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// IR register number. Argument registers are the low ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reg(pub u32);

macro_rules! impl_display {
    ($($id:ident => $prefix:literal),* $(,)?) => {
        $(impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        })*
    };
}

impl_display! {
    NodeId => "n",
    DeclId => "d",
    ScopeId => "s",
    ModuleId => "m",
    FuncId => "fn",
    BlockId => "b",
    Reg => "r",
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes() {
        assert_eq!(format!("{}", NodeId(7)), "n7");
        assert_eq!(format!("{}", DeclId(3)), "d3");
        assert_eq!(format!("{}", BlockId(0)), "b0");
        assert_eq!(format!("{}", Reg(12)), "r12");
    }

    #[test]
    fn id_types_are_distinct() {
        // Same inner value, different types; a compile-time guarantee.
        let node = NodeId(1);
        let decl = DeclId(1);
        assert_eq!(node.0, decl.0);
    }

    #[test]
    fn serde_roundtrip() {
        let reg = Reg(42);
        let json = serde_json::to_string(&reg).unwrap();
        let back: Reg = serde_json::from_str(&json).unwrap();
        assert_eq!(reg, back);
    }
}
