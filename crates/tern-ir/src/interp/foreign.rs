//! Statically linked foreign-call thunks.
//!
//! The interpreter resolves a foreign symbol by name, matches the callee's
//! function type against the closed shape table shared with the checker,
//! and dispatches here. A name or shape outside the table is a fatal
//! error, never a silent miscall.

use tern_core::foreign::ForeignShape;

use super::error::InterpError;
use super::value::Value;

/// Executes a foreign call. Returns the result value for shapes that
/// produce one.
pub fn call_foreign(
    name: &str,
    shape: ForeignShape,
    args: &[Value],
    output: &mut String,
) -> Result<Option<Value>, InterpError> {
    match (name, shape) {
        ("putchar", ForeignShape::I32ToI32) => {
            let c = args
                .first()
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            if let Some(ch) = char::from_u32(c as u32) {
                output.push(ch);
            }
            Ok(Some(Value::I32(c as i32)))
        }
        ("getchar", ForeignShape::UnitToI32) => {
            // No interactive input during compile-time evaluation.
            Ok(Some(Value::I32(-1)))
        }
        ("abs", ForeignShape::I64ToI64) => {
            let v = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(Some(Value::I64(v.wrapping_abs())))
        }
        ("sqrt", ForeignShape::F64ToF64) => {
            let v = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(Some(Value::F64(v.sqrt())))
        }
        ("exit", ForeignShape::I32ToVoid) => {
            let code = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Err(InterpError::Exited { code: code as i32 })
        }
        _ => Err(InterpError::UnsupportedForeign {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn putchar_appends_to_output() {
        let mut out = String::new();
        let r = call_foreign(
            "putchar",
            ForeignShape::I32ToI32,
            &[Value::I32(65)],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, "A");
        assert_eq!(r, Some(Value::I32(65)));
    }

    #[test]
    fn unknown_symbol_is_fatal() {
        let mut out = String::new();
        let r = call_foreign("mystery", ForeignShape::I32ToI32, &[], &mut out);
        assert!(matches!(r, Err(InterpError::UnsupportedForeign { .. })));
    }

    #[test]
    fn abs_and_sqrt() {
        let mut out = String::new();
        assert_eq!(
            call_foreign("abs", ForeignShape::I64ToI64, &[Value::I64(-3)], &mut out).unwrap(),
            Some(Value::I64(3))
        );
        assert_eq!(
            call_foreign("sqrt", ForeignShape::F64ToF64, &[Value::F64(9.0)], &mut out).unwrap(),
            Some(Value::F64(3.0))
        );
    }
}
