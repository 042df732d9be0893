pub mod diag;
pub mod error;
pub mod foreign;
pub mod id;
pub mod intern;
pub mod layout;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use diag::{Diagnostic, ErrorLog, Severity, Stage};
pub use error::CoreError;
pub use id::{BlockId, DeclId, FuncId, ModuleId, NodeId, Reg, ScopeId};
pub use intern::{ConstKey, TypeContext, TypeId};
pub use layout::Arch;
pub use source::{SourceBuffer, Span};
pub use types::{
    EnumDef, FieldInit, FlagsDef, GenericDef, PrimKind, StructDef, StructField, Type,
};
