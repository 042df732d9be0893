//! Runtime values for the interpreter's register file.
//!
//! Every register slot holds a `Value`; memory holds raw bytes and the
//! typed encode/decode lives in the interpreter state. Pointers are the
//! tagged [`Addr`] encoding; the null pointer encodes as all-ones.

use std::fmt;

use serde::{Deserialize, Serialize};

use tern_core::id::FuncId;
use tern_core::intern::TypeId;

use crate::model::Addr;

/// Encoded representation of the null pointer.
pub const NULL_BITS: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Type(TypeId),
    Func(FuncId),
    Foreign(String),
    Addr(Addr),
    Null,
    /// A (pointer, length) byte view.
    View { addr: Addr, len: u64 },
    Unit,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::I8(_) => "int8",
            Value::I16(_) => "int16",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U8(_) => "uint8",
            Value::U16(_) => "uint16",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Type(_) => "type",
            Value::Func(_) => "function",
            Value::Foreign(_) => "foreign",
            Value::Addr(_) => "address",
            Value::Null => "nullptr",
            Value::View { .. } => "byte_view",
            Value::Unit => "void",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Signed integer view of any integer-family value.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            Value::I8(v) => *v as i64,
            Value::I16(v) => *v as i64,
            Value::I32(v) => *v as i64,
            Value::I64(v) => *v,
            Value::U8(v) => *v as i64,
            Value::U16(v) => *v as i64,
            Value::U32(v) => *v as i64,
            Value::U64(v) => *v as i64,
            Value::Bool(b) => *b as i64,
            Value::Char(c) => *c as i64,
            _ => return None,
        })
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().map(|v| v as u64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_addr(&self) -> Option<Addr> {
        match self {
            Value::Addr(a) => Some(*a),
            Value::View { addr, .. } => Some(*addr),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{}", c),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Type(t) => write!(f, "{}", t),
            Value::Func(id) => write!(f, "{}", id),
            Value::Foreign(name) => write!(f, "foreign({})", name),
            Value::Addr(a) => write!(f, "{:?}", a),
            Value::Null => write!(f, "null"),
            Value::View { len, .. } => write!(f, "view[{}]", len),
            Value::Unit => write!(f, "()"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_views() {
        assert_eq!(Value::I32(-5).as_i64(), Some(-5));
        assert_eq!(Value::U8(200).as_i64(), Some(200));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::F64(1.5).as_i64(), None);
        assert_eq!(Value::F32(2.0).as_f64(), Some(2.0));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::I32(14).to_string(), "14");
        assert_eq!(Value::Bool(false).to_string(), "false");
        assert_eq!(Value::Char('x').to_string(), "x");
        assert_eq!(Value::Unit.to_string(), "()");
    }
}
