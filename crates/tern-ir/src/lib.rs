pub mod builder;
pub mod emit;
pub mod interp;
pub mod lower;
pub mod model;
pub mod validate;

pub use builder::FuncBuilder;
pub use interp::{Interp, InterpError, Value};
pub use lower::lower_module;
pub use model::{Addr, Block, Cmd, Exit, Func, ModuleIr, Op, Val};
pub use validate::validate_func;
