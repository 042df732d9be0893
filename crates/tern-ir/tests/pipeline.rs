//! End-to-end pipeline tests: source text through the lexer, parser, scope
//! graph, dependency resolver, type checker, IR lowering, validation, and
//! the interpreter.
//!
//! Every compiled function is validated against the back-end contract
//! before it runs.

use proptest::prelude::*;

use tern_check::check::check_module;
use tern_check::scope::assign_scopes;
use tern_core::diag::ErrorLog;
use tern_core::id::ModuleId;
use tern_core::intern::TypeContext;
use tern_core::layout::Arch;
use tern_core::source::SourceBuffer;
use tern_ir::interp::{Interp, InterpError, Value};
use tern_ir::lower::lower_module;
use tern_ir::model::ModuleIr;
use tern_ir::validate::validate_func;
use tern_syntax::lexer::lex;
use tern_syntax::parser::parse_module;

struct Compiled {
    module: ModuleIr,
    ctx: TypeContext,
    log: ErrorLog,
}

fn compile(text: &str) -> Compiled {
    let src = SourceBuffer::new("test.tn", text);
    let mut log = ErrorLog::new();
    let tokens = lex(&src, &mut log);
    let (ast, root) = parse_module(&tokens, &mut log);
    let scopes = assign_scopes(&ast, root, &mut log);
    let ctx = TypeContext::new();
    let checked = check_module(&ast, root, &scopes, &ctx, Arch::default(), ModuleId(0), &mut log);
    let module = if log.has_errors() {
        ModuleIr::default()
    } else {
        lower_module(&ast, &scopes, &checked, &ctx, Arch::default(), &mut log)
    };
    Compiled { module, ctx, log }
}

fn compile_ok(text: &str) -> Compiled {
    let compiled = compile(text);
    assert!(
        !compiled.log.has_errors(),
        "unexpected compile errors: {:?}",
        compiled.log.entries()
    );
    for func in &compiled.module.funcs {
        validate_func(func).unwrap_or_else(|e| panic!("IR contract violated: {}", e));
    }
    compiled
}

impl Compiled {
    fn run(&self, name: &str, args: Vec<Value>) -> (Result<Vec<Value>, InterpError>, String) {
        let f = self
            .module
            .funcs
            .iter()
            .position(|f| f.name == name)
            .unwrap_or_else(|| panic!("function `{}` not lowered", name));
        let mut interp = Interp::new(&self.module, &self.ctx, Arch::default());
        let result = interp.call(tern_core::id::FuncId(f as u32), args);
        (result, interp.output)
    }

    fn run_one(&self, name: &str, args: Vec<Value>) -> Value {
        let (result, _) = self.run(name, args);
        let mut values = result.expect("interpreter trapped");
        assert_eq!(values.len(), 1, "expected exactly one result");
        values.remove(0)
    }
}

#[test]
fn arithmetic_constant_fold() {
    let compiled = compile_ok("main ::= () -> int32 { return 2 + 3 * 4 }");
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(14));
}

#[test]
fn comparison_chain() {
    let compiled = compile_ok(
        "f ::= (a: int32, b: int32, c: int32) -> bool { return a < b < c }",
    );
    let case = |a, b, c| {
        compiled.run_one("f", vec![Value::I32(a), Value::I32(b), Value::I32(c)])
    };
    assert_eq!(case(1, 2, 3), Value::Bool(true));
    assert_eq!(case(1, 3, 2), Value::Bool(false));
    assert_eq!(case(3, 2, 1), Value::Bool(false));
}

#[test]
fn short_circuit_skips_the_divide() {
    let compiled = compile_ok("f ::= () -> bool { return false and (1 / 0 == 0) }");
    assert_eq!(compiled.run_one("f", vec![]), Value::Bool(false));
}

#[test]
fn or_chain_short_circuits_true() {
    let compiled = compile_ok("f ::= () -> bool { return true or (1 / 0 == 0) }");
    assert_eq!(compiled.run_one("f", vec![]), Value::Bool(true));
}

#[test]
fn division_by_zero_traps_when_reached() {
    let compiled = compile_ok("f ::= (d: int32) -> int32 { return 1 / d }");
    let (result, _) = compiled.run("f", vec![Value::I32(0)]);
    assert!(matches!(result, Err(InterpError::DivideByZero { .. })));
}

#[test]
fn while_loop_accumulates() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \ti := 0\n\
         \ttotal := 0\n\
         \twhile i < 5 {\n\
         \t\ttotal += i\n\
         \t\ti += 1\n\
         \t}\n\
         \treturn total\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(10));
}

#[test]
fn for_over_a_range() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \ttotal := 0\n\
         \tfor i in 1..5 {\n\
         \t\ttotal += i\n\
         \t}\n\
         \treturn total\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(10));
}

#[test]
fn for_over_an_array_literal() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \txs := [3, 5, 7]\n\
         \ttotal := 0\n\
         \tfor x in xs {\n\
         \t\ttotal += x\n\
         \t}\n\
         \treturn total\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(15));
}

#[test]
fn break_and_continue() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \ttotal := 0\n\
         \tfor i in 0..10 {\n\
         \t\tif i == 3 { continue }\n\
         \t\tif i == 6 { break }\n\
         \t\ttotal += i\n\
         \t}\n\
         \treturn total\n\
         }",
    );
    // 0 + 1 + 2 + 4 + 5
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(12));
}

#[test]
fn if_else_where_every_arm_returns() {
    let compiled = compile_ok(
        "max ::= (a: int32, b: int32) -> int32 {\n\
         \tif a < b { return b } else { return a }\n\
         }",
    );
    assert_eq!(
        compiled.run_one("max", vec![Value::I32(3), Value::I32(9)]),
        Value::I32(9)
    );
    assert_eq!(
        compiled.run_one("max", vec![Value::I32(9), Value::I32(3)]),
        Value::I32(9)
    );
}

#[test]
fn recursion() {
    let compiled = compile_ok(
        "fact ::= (n: int32) -> int32 {\n\
         \tif n < 2 { return 1 }\n\
         \treturn n * fact(n - 1)\n\
         }",
    );
    assert_eq!(compiled.run_one("fact", vec![Value::I32(5)]), Value::I32(120));
}

#[test]
fn overload_resolution_dispatches_by_type() {
    let compiled = compile_ok(
        "add ::= (a: int32, b: int32) -> int32 { return a + b }\n\
         add ::= (a: float64, b: float64) -> float64 { return a + b }\n\
         ints ::= () -> int32 { return add(2, 3) }\n\
         reals ::= () -> float64 { return add(1.5, 2.25) }",
    );
    assert_eq!(compiled.run_one("ints", vec![]), Value::I32(5));
    assert_eq!(compiled.run_one("reals", vec![]), Value::F64(3.75));
}

#[test]
fn struct_fields_read_and_write() {
    let compiled = compile_ok(
        "S ::= struct { x: int32; y: int32 }\n\
         main ::= () -> int32 {\n\
         \tp: S\n\
         \tp.x = 3\n\
         \tp.y = 4\n\
         \treturn p.x + p.y\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(7));
}

#[test]
fn struct_field_defaults_apply_on_init() {
    let compiled = compile_ok(
        "S ::= struct { x: int32 = 41; y: int32 }\n\
         main ::= () -> int32 {\n\
         \tp: S\n\
         \treturn p.x + p.y + 1\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(42));
}

#[test]
fn struct_bytes_at_compile_time() {
    let compiled = compile_ok(
        "S ::= struct { x: int32; y: int32 }\n\
         main ::= () -> int64 { return S.bytes }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I64(8));
}

#[test]
fn struct_copy_assignment_is_deep() {
    let compiled = compile_ok(
        "S ::= struct { x: int32; y: int32 }\n\
         main ::= () -> int32 {\n\
         \ta: S\n\
         \ta.x = 1\n\
         \ta.y = 2\n\
         \tb: S\n\
         \tb = a\n\
         \ta.x = 100\n\
         \treturn b.x + b.y\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(3));
}

#[test]
fn case_expression_selects_the_first_true_key() {
    let compiled = compile_ok(
        "classify ::= (n: int32) -> int32 {\n\
         \treturn case { n < 0 => 0 - 1, n == 0 => 0, n > 0 => 1 }\n\
         }",
    );
    assert_eq!(compiled.run_one("classify", vec![Value::I32(-5)]), Value::I32(-1));
    assert_eq!(compiled.run_one("classify", vec![Value::I32(0)]), Value::I32(0));
    assert_eq!(compiled.run_one("classify", vec![Value::I32(7)]), Value::I32(1));
}

#[test]
fn destructors_run_in_reverse_field_order() {
    let compiled = compile_ok(
        "Inner ::= struct { tag: int32 }\n\
         __destroy__ ::= (p: &Inner) -> void { print p.tag }\n\
         Outer ::= struct { a: Inner; b: Inner }\n\
         main ::= () -> void {\n\
         \to: Outer\n\
         \to.a.tag = 1\n\
         \to.b.tag = 2\n\
         }",
    );
    let (result, output) = compiled.run("main", vec![]);
    assert!(result.is_ok(), "interpreter trapped: {:?}", result);
    // Field `b` is destroyed before field `a`.
    assert_eq!(output, "21");
}

#[test]
fn print_writes_to_the_output() {
    let compiled = compile_ok("main ::= () -> void { print 42 }");
    let (result, output) = compiled.run("main", vec![]);
    assert!(result.is_ok());
    assert_eq!(output, "42");
}

#[test]
fn print_enum_members_by_name() {
    let compiled = compile_ok(
        "Dir ::= enum { north, south }\n\
         main ::= () -> void {\n\
         \tfor d in Dir { print d }\n\
         }",
    );
    let (result, output) = compiled.run("main", vec![]);
    assert!(result.is_ok());
    assert_eq!(output, "northsouth");
}

#[test]
fn string_literals_print_their_bytes() {
    let compiled = compile_ok("main ::= () -> void { print \"hi there\" }");
    let (_, output) = compiled.run("main", vec![]);
    assert_eq!(output, "hi there");
}

#[test]
fn foreign_putchar_goes_through_the_table() {
    let compiled = compile_ok("main ::= () -> int32 { return putchar(65) }");
    let (result, output) = compiled.run("main", vec![]);
    assert_eq!(result.expect("foreign call failed"), vec![Value::I32(65)]);
    assert_eq!(output, "A");
}

#[test]
fn function_composition_of_constants() {
    let compiled = compile_ok(
        "inc ::= (x: int32) -> int32 { return x + 1 }\n\
         dbl ::= (x: int32) -> int32 { return x * 2 }\n\
         main ::= () -> int32 {\n\
         \th := inc * dbl\n\
         \treturn h(10)\n\
         }",
    );
    // inc(dbl(10)) = 21
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(21));
}

#[test]
fn user_defined_operator_overload() {
    let compiled = compile_ok(
        "V ::= struct { x: int32; y: int32 }\n\
         __add__ ::= (a: V, b: V) -> int32 { return a.x + b.x + a.y + b.y }\n\
         main ::= () -> int32 {\n\
         \ta: V\n\
         \ta.x = 1\n\
         \ta.y = 2\n\
         \tb: V\n\
         \tb.x = 3\n\
         \tb.y = 4\n\
         \treturn a + b\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(10));
}

#[test]
fn pointers_read_and_write_through_deref() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \tx := 10\n\
         \tp := &x\n\
         \t@p = 32\n\
         \treturn x + @p - 32\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(32));
}

#[test]
fn generic_struct_instantiation_compiles_and_runs() {
    let compiled = compile_ok(
        "Box ::= struct (T: type) { value: int32 }\n\
         B ::= Box(int32)\n\
         main ::= () -> int32 {\n\
         \tb: B\n\
         \tb.value = 9\n\
         \treturn b.value\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(9));
}

#[test]
fn failing_modules_produce_no_ir() {
    let compiled = compile("main ::= () -> int32 { return true + 3 }");
    assert!(compiled.log.has_errors());
    assert!(compiled.module.funcs.is_empty());
}

#[test]
fn indexing_arrays() {
    let compiled = compile_ok(
        "main ::= () -> int32 {\n\
         \txs := [10, 20, 30]\n\
         \txs[1] = 25\n\
         \treturn xs[0] + xs[1] + xs[2]\n\
         }",
    );
    assert_eq!(compiled.run_one("main", vec![]), Value::I32(65));
}

#[test]
fn cast_at_runtime() {
    let compiled = compile_ok(
        "f ::= (x: int32) -> float64 { return cast(float64, x) / 2.0 }",
    );
    assert_eq!(compiled.run_one("f", vec![Value::I32(7)]), Value::F64(3.5));
}

proptest! {
    #[test]
    fn interpreter_arithmetic_matches_reference(a in any::<i32>(), b in any::<i32>()) {
        let compiled = compile_ok(
            "add ::= (a: int32, b: int32) -> int32 { return a + b }\n\
             sub ::= (a: int32, b: int32) -> int32 { return a - b }\n\
             mul ::= (a: int32, b: int32) -> int32 { return a * b }",
        );
        let args = vec![Value::I32(a), Value::I32(b)];
        prop_assert_eq!(compiled.run_one("add", args.clone()), Value::I32(a.wrapping_add(b)));
        prop_assert_eq!(compiled.run_one("sub", args.clone()), Value::I32(a.wrapping_sub(b)));
        prop_assert_eq!(compiled.run_one("mul", args), Value::I32(a.wrapping_mul(b)));
    }

    #[test]
    fn unsigned_arithmetic_is_modular(a in any::<u32>(), b in any::<u32>()) {
        let compiled = compile_ok(
            "f ::= (a: uint32, b: uint32) -> uint32 { return a + b }",
        );
        prop_assert_eq!(
            compiled.run_one("f", vec![Value::U32(a), Value::U32(b)]),
            Value::U32(a.wrapping_add(b))
        );
    }
}
