//! Interpreter trap conditions.
//!
//! User-observable traps (divide by zero, stack exhaustion) and internal
//! bugs (`NotYet`, `Unreachable`) share one error type; the driver prints
//! a frame dump for the latter since they are compiler defects, not user
//! errors.

use thiserror::Error;

use tern_core::id::Reg;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("divide by zero in `{func}`")]
    DivideByZero { func: String },

    #[error("register {reg} read before initialization in `{func}`")]
    UseBeforeInit { func: String, reg: Reg },

    #[error("bad address in `{func}`")]
    BadAddress { func: String },

    #[error("call stack exhausted ({limit} frames)")]
    StackOverflow { limit: usize },

    #[error("step budget exhausted ({limit} steps)")]
    StepLimit { limit: u64 },

    #[error("foreign call `{name}` has an unsupported signature")]
    UnsupportedForeign { name: String },

    #[error("program requested exit with code {code}")]
    Exited { code: i32 },

    #[error("not yet implemented: {what}")]
    NotYet { what: String },

    #[error("unreachable interpreter state: {what}")]
    Unreachable { what: String },
}

impl InterpError {
    /// Whether this trap is a compiler bug rather than a user-observable
    /// runtime condition.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            InterpError::NotYet { .. }
                | InterpError::Unreachable { .. }
                | InterpError::UnsupportedForeign { .. }
        )
    }
}
