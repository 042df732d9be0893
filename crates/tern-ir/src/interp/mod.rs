//! The IR interpreter: a stack-and-register virtual machine used for
//! compile-time evaluation and the REPL.
//!
//! # Architecture
//!
//! - [`Interp`] owns the byte stack (bump-allocated, reset per frame), the
//!   heap, a copy of the module's read-only data, and the call stack.
//! - [`Frame`] is one function invocation: a typed register file with
//!   argument registers pre-populated, the caller-provided return slots,
//!   and the current/previous block cursor that φ selection keys on.
//! - [`Value`] is the runtime representation of every register.
//! - [`InterpError`] captures trap conditions; `NotYet`/`Unreachable`
//!   traps are compiler bugs and abort the compile with a frame dump.
//!
//! Foreign calls pattern-match the callee's function type against the
//! closed signature table in `tern_core::foreign`; unknown shapes fail
//! fatally rather than miscalling.

pub mod error;
pub mod foreign;
pub mod state;
pub mod value;

pub use error::InterpError;
pub use state::{Frame, Interp};
pub use value::Value;
