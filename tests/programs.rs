//! End-to-end scenarios: whole programs, observed output.

use orus_vm::compiler::ast::{BinOp, Kind};
use orus_vm::interpreter::{DispatchMode, Vm, VmParams};
use orus_vm::util::test_helpers::*;

#[test]
fn arithmetic_precedence_prints_fourteen() {
    let program = module(vec![print1(bin(
        BinOp::Add,
        i32l(2),
        bin(BinOp::Mul, i32l(3), i32l(4)),
    ))]);

    assert_eq!(run_expect(&program), "14\n");
}

#[test]
fn string_concatenation() {
    let program = module(vec![
        let_("s", strl("hi")),
        print1(bin(BinOp::Add, var("s", Kind::Str), strl(" there"))),
    ]);

    assert_eq!(run_expect(&program), "hi there\n");
}

#[test]
fn inclusive_range_loop_prints_each_value() {
    let program = module(vec![for_range(
        "i",
        Kind::I32,
        i32l(1),
        i32l(3),
        true,
        vec![print1(var("i", Kind::I32))],
    )]);

    assert_eq!(run_expect(&program), "1\n2\n3\n");
}

#[test]
fn recursive_fibonacci() {
    let fib_body = vec![if_else(
        cmp(BinOp::Le, var("n", Kind::I32), i32l(1)),
        vec![ret(var("n", Kind::I32))],
        vec![ret(bin(
            BinOp::Add,
            call(
                "fib",
                vec![bin(BinOp::Sub, var("n", Kind::I32), i32l(1))],
                Kind::I32,
            ),
            call(
                "fib",
                vec![bin(BinOp::Sub, var("n", Kind::I32), i32l(2))],
                Kind::I32,
            ),
        ))],
    )];

    let program = module(vec![
        fn_decl("fib", &[("n", Kind::I32)], fib_body),
        print1(call("fib", vec![i32l(10)], Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "55\n");
}

#[test]
fn array_read_write_and_display() {
    let program = module(vec![
        let_("a", array(vec![i32l(1), i32l(2), i32l(3)])),
        print1(index(var("a", Kind::Array), i32l(1), Kind::I32)),
        assign_index(var("a", Kind::Array), i32l(1), i32l(9)),
        print1(var("a", Kind::Array)),
    ]);

    assert_eq!(run_expect(&program), "2\n[1, 9, 3]\n");
}

#[test]
fn division_by_zero_is_caught_and_printed() {
    let program = module(vec![try_catch(
        vec![
            let_("x", bin(BinOp::Div, i32l(10), i32l(0))),
            print1(var("x", Kind::I32)),
        ],
        "e",
        vec![print1(var("e", Kind::Nil))],
    )]);

    let output = run_expect(&program);
    assert!(
        output.starts_with("DivisionByZero"),
        "unexpected output: {output}"
    );
}

#[test]
fn print_with_several_values_separates_them_with_spaces() {
    let program = module(vec![stmt(
        orus_vm::compiler::ast::StmtNode::Print(vec![i32l(1), strl("and"), i32l(2)]),
    )]);

    assert_eq!(run_expect(&program), "1 and 2\n");
}

#[test]
fn struct_fields_read_and_write() {
    use orus_vm::compiler::ast::{AssignTarget, ExprNode, StmtNode};

    let point = expr(ExprNode::StructLit(vec![i32l(3), i32l(4)]), Kind::Struct);

    let field = |index| {
        expr(
            ExprNode::Field {
                object: Box::new(var("p", Kind::Struct)),
                index,
            },
            Kind::I32,
        )
    };

    let program = module(vec![
        let_("p", point),
        print1(field(0)),
        stmt(StmtNode::Assign {
            target: AssignTarget::Field {
                object: var("p", Kind::Struct),
                index: 1,
            },
            value: i32l(9),
        }),
        print1(field(1)),
        print1(var("p", Kind::Struct)),
    ]);

    assert_eq!(run_expect(&program), "3\n9\n{3, 9}\n");
}

#[test]
fn enum_variants_expose_tag_and_payload() {
    use orus_vm::compiler::ast::ExprNode;

    let some = expr(
        ExprNode::EnumLit {
            variant: 1,
            payload: vec![i32l(7)],
        },
        Kind::Enum,
    );

    let program = module(vec![
        let_("v", some),
        print1(expr(
            ExprNode::TagOf(Box::new(var("v", Kind::Enum))),
            Kind::I32,
        )),
        print1(expr(
            ExprNode::PayloadOf {
                object: Box::new(var("v", Kind::Enum)),
                index: 0,
            },
            Kind::I32,
        )),
        print1(var("v", Kind::Enum)),
    ]);

    assert_eq!(run_expect(&program), "1\n7\n#1(7)\n");
}

#[test]
fn both_dispatch_strategies_agree() {
    let program = module(vec![
        let_mut("total", i32l(0)),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            i32l(100),
            false,
            vec![assign(
                "total",
                bin(BinOp::Add, var("total", Kind::I32), var("i", Kind::I32)),
            )],
        ),
        print1(var("total", Kind::I32)),
    ]);

    let goto = {
        let vm = Vm::with_params(VmParams::default(), DispatchMode::Goto);
        run_on(vm, &program)
    };
    let switch = {
        let vm = Vm::with_params(VmParams::default(), DispatchMode::Switch);
        run_on(vm, &program)
    };

    assert!(goto.1.is_ok());
    assert!(switch.1.is_ok());
    assert_eq!(goto.0, switch.0);
    assert_eq!(goto.0, "4950\n");
}
