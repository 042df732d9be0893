pub mod check;
pub mod consts;
pub mod deps;
pub mod scope;

pub use check::{check_module, Checked};
pub use consts::ConstVal;
pub use deps::{order_decls, DeclOrder};
pub use scope::{assign_scopes, DeclInfo, Scope, ScopeGraph, ScopeKind};
