//! Core error types for tern-core.
//!
//! Uses `thiserror` for structured, matchable error variants. These cover
//! misuse of the shared data model; user-facing compile errors go through
//! [`crate::diag::ErrorLog`] instead.

use thiserror::Error;

use crate::id::{FuncId, ModuleId};
use crate::intern::TypeId;

/// Core errors produced by the tern-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A TypeId was not found in the type context.
    #[error("type not found: {id}")]
    TypeNotFound { id: TypeId },

    /// A function ID was not found in its module.
    #[error("function not found: {id}")]
    FuncNotFound { id: FuncId },

    /// A module ID was not found.
    #[error("module not found: {id}")]
    ModuleNotFound { id: ModuleId },

    /// A layout query was made against a type with no runtime representation.
    #[error("type {id} has no runtime layout")]
    NoLayout { id: TypeId },
}
