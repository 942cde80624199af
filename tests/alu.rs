//! Arithmetic, comparison, coercion and typed-bank behavior through
//! the whole pipeline.

use orus_vm::compiler::ast::{BinOp, Kind, UnOp};
use orus_vm::compiler::compile;
use orus_vm::error::VmError;
use orus_vm::interpreter::{DispatchMode, Vm, VmParams};
use orus_vm::util::test_helpers::*;

/// Output of a one-expression program printing the result.
fn eval(expr: orus_vm::compiler::ast::Expr) -> String {
    run_expect(&module(vec![print1(expr)]))
}

#[test]
fn signed_arithmetic_on_variables() {
    // Bindings keep the operands out of the constant folder, so the
    // boxed handlers execute.
    let program = module(vec![
        let_("a", i32l(7)),
        let_("b", i32l(-3)),
        print1(bin(BinOp::Add, var("a", Kind::I32), var("b", Kind::I32))),
        print1(bin(BinOp::Mul, var("a", Kind::I32), var("b", Kind::I32))),
        print1(bin(BinOp::Div, var("a", Kind::I32), var("b", Kind::I32))),
        print1(bin(BinOp::Mod, var("a", Kind::I32), var("b", Kind::I32))),
    ]);

    assert_eq!(run_expect(&program), "4\n-21\n-2\n1\n");
}

#[test]
fn signed_overflow_traps_at_runtime() {
    let program = module(vec![
        let_("a", i32l(i32::MAX)),
        let_("b", i32l(1)),
        print1(bin(BinOp::Add, var("a", Kind::I32), var("b", Kind::I32))),
    ]);

    let (_, result) = run(&program);
    let error = result.unwrap_err();
    assert!(matches!(error, VmError::Runtime(_)));
    assert!(error.to_string().contains("ArithmeticOverflow"));
}

#[test]
fn unsigned_arithmetic_wraps() {
    let program = module(vec![
        let_("a", u32l(u32::MAX)),
        let_("b", u32l(1)),
        print1(bin(BinOp::Add, var("a", Kind::U32), var("b", Kind::U32))),
        print1(bin(BinOp::Sub, var("b", Kind::U32), var("a", Kind::U32))),
    ]);

    assert_eq!(run_expect(&program), "0\n2\n");
}

#[test]
fn float_arithmetic_follows_ieee() {
    let program = module(vec![
        let_("x", f64l(1.5)),
        let_("y", f64l(0.5)),
        print1(bin(BinOp::Add, var("x", Kind::F64), var("y", Kind::F64))),
        print1(bin(BinOp::Div, var("x", Kind::F64), var("y", Kind::F64))),
    ]);

    assert_eq!(run_expect(&program), "2\n3\n");
}

#[test]
fn comparisons_per_kind() {
    assert_eq!(eval(cmp(BinOp::Lt, i32l(1), i32l(2))), "true\n");
    assert_eq!(eval(cmp(BinOp::Ge, i64l(5), i64l(5))), "true\n");
    assert_eq!(eval(cmp(BinOp::Gt, u32l(1), u32l(2))), "false\n");
    assert_eq!(eval(cmp(BinOp::Le, f64l(1.0), f64l(0.5))), "false\n");
    assert_eq!(eval(cmp(BinOp::Eq, strl("a"), strl("a"))), "true\n");
    assert_eq!(eval(cmp(BinOp::Ne, i32l(1), i32l(2))), "true\n");
}

#[test]
fn nan_compares_unequal_to_itself() {
    let program = module(vec![
        let_("n", f64l(f64::NAN)),
        print1(cmp(BinOp::Eq, var("n", Kind::F64), var("n", Kind::F64))),
    ]);

    assert_eq!(run_expect(&program), "false\n");
}

#[test]
fn bitwise_and_shifts() {
    let program = module(vec![
        let_("x", i32l(0b1100)),
        let_("y", i32l(0b1010)),
        print1(bin(BinOp::BitAnd, var("x", Kind::I32), var("y", Kind::I32))),
        print1(bin(BinOp::BitOr, var("x", Kind::I32), var("y", Kind::I32))),
        print1(bin(BinOp::BitXor, var("x", Kind::I32), var("y", Kind::I32))),
        print1(bin(BinOp::Shl, var("y", Kind::I32), i32l(2))),
        print1(unary(UnOp::BitNot, i32l(0))),
    ]);

    assert_eq!(run_expect(&program), "8\n14\n6\n40\n-1\n");
}

#[test]
fn oversized_shift_traps() {
    let program = module(vec![
        let_("x", i32l(1)),
        let_("n", i32l(40)),
        print1(bin(BinOp::Shl, var("x", Kind::I32), var("n", Kind::I32))),
    ]);

    let (_, result) = run(&program);
    assert!(result.unwrap_err().to_string().contains("ShiftOutOfRange"));
}

#[test]
fn widening_conversions_are_exact() {
    let program = module(vec![
        let_("a", i32l(-5)),
        print1(cast(var("a", Kind::I32), Kind::I64)),
        print1(cast(var("a", Kind::I32), Kind::F64)),
    ]);

    assert_eq!(run_expect(&program), "-5\n-5\n");
}

#[test]
fn same_width_sign_casts_reinterpret_bits() {
    let program = module(vec![
        let_("a", i32l(-1)),
        print1(cast(var("a", Kind::I32), Kind::U32)),
    ]);

    assert_eq!(run_expect(&program), "4294967295\n");
}

#[test]
fn narrowing_conversions_are_value_preserving_or_trap() {
    let fits = module(vec![
        let_("a", i64l(1234)),
        print1(cast(var("a", Kind::I64), Kind::I32)),
    ]);
    assert_eq!(run_expect(&fits), "1234\n");

    let overflows = module(vec![
        let_("a", i64l(i64::MAX)),
        print1(cast(var("a", Kind::I64), Kind::I32)),
    ]);
    let (_, result) = run(&overflows);
    assert!(result.unwrap_err().to_string().contains("ConversionError"));
}

#[test]
fn float_to_integer_truncates_toward_zero() {
    let program = module(vec![
        let_("x", f64l(-2.9)),
        print1(cast(var("x", Kind::F64), Kind::I32)),
        let_("y", f64l(2.9)),
        print1(cast(var("y", Kind::F64), Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "-2\n2\n");
}

#[test]
fn nan_to_integer_traps() {
    let program = module(vec![
        let_("x", f64l(f64::NAN)),
        print1(cast(var("x", Kind::F64), Kind::I32)),
    ]);

    let (_, result) = run(&program);
    assert!(result.unwrap_err().to_string().contains("ConversionError"));
}

#[test]
fn bool_integer_conversions() {
    let program = module(vec![
        let_("t", lit(orus_vm::compiler::ast::Lit::Bool(true))),
        print1(cast(var("t", Kind::Bool), Kind::I32)),
        let_("z", i32l(0)),
        print1(cast(var("z", Kind::I32), Kind::Bool)),
    ]);

    assert_eq!(run_expect(&program), "1\nfalse\n");
}

#[test]
fn arithmetic_heavy_statements_use_the_typed_banks() {
    // Intensity above the smart-allocation cutoff routes the whole
    // expression through typed opcodes.
    let program = module(vec![
        let_("x", i32l(2)),
        let_("y", i32l(3)),
        let_(
            "z",
            bin(
                BinOp::Add,
                bin(
                    BinOp::Mul,
                    var("x", Kind::I32),
                    bin(BinOp::Mul, var("y", Kind::I32), var("x", Kind::I32)),
                ),
                bin(BinOp::Mul, var("x", Kind::I32), var("y", Kind::I32)),
            ),
        ),
        print1(var("z", Kind::I32)),
    ]);

    let chunk = compile(&program).expect("compiles");
    let mut vm = Vm::with_params(VmParams::default(), DispatchMode::Goto);
    vm.capture_output();
    vm.execute(chunk).expect("runs");

    assert_eq!(vm.take_output(), "18\n");
    assert!(
        vm.profiler().typed_hits > 0,
        "typed shadow banks were never touched"
    );
}

#[test]
fn division_by_zero_trap_for_every_integer_kind() {
    for (zero, value) in [
        (i32l(0), i32l(1)),
        (i64l(0), i64l(1)),
        (u32l(0), u32l(1)),
        (lit(orus_vm::compiler::ast::Lit::U64(0)), lit(orus_vm::compiler::ast::Lit::U64(1))),
    ] {
        let kind = value.kind;
        let program = module(vec![
            let_("a", value),
            let_("b", zero),
            print1(bin(BinOp::Div, var("a", kind), var("b", kind))),
        ]);

        let (_, result) = run(&program);
        assert!(
            result.unwrap_err().to_string().contains("DivisionByZero"),
            "{kind:?} division by zero must trap"
        );
    }
}
