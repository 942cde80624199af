//! Control flow: branches, loops, calls, closures, try frames.

use orus_vm::compiler::ast::{BinOp, Kind, Lit, StmtNode};
use orus_vm::error::VmError;
use orus_vm::util::test_helpers::*;

use std::rc::Rc;

#[test]
fn if_else_takes_the_right_arm() {
    let program = module(vec![
        let_("x", i32l(10)),
        if_else(
            cmp(BinOp::Gt, var("x", Kind::I32), i32l(5)),
            vec![print1(strl("big"))],
            vec![print1(strl("small"))],
        ),
    ]);

    assert_eq!(run_expect(&program), "big\n");
}

#[test]
fn while_loop_counts() {
    let program = module(vec![
        let_mut("i", i32l(0)),
        while_(
            cmp(BinOp::Lt, var("i", Kind::I32), i32l(3)),
            vec![
                print1(var("i", Kind::I32)),
                assign("i", bin(BinOp::Add, var("i", Kind::I32), i32l(1))),
            ],
        ),
    ]);

    assert_eq!(run_expect(&program), "0\n1\n2\n");
}

#[test]
fn break_and_continue() {
    let program = module(vec![
        let_mut("i", i32l(0)),
        while_(
            lit(Lit::Bool(true)),
            vec![
                assign("i", bin(BinOp::Add, var("i", Kind::I32), i32l(1))),
                if_(
                    cmp(BinOp::Eq, var("i", Kind::I32), i32l(3)),
                    vec![stmt(StmtNode::Continue(None))],
                ),
                if_(
                    cmp(BinOp::Gt, var("i", Kind::I32), i32l(5)),
                    vec![stmt(StmtNode::Break(None))],
                ),
                print1(var("i", Kind::I32)),
            ],
        ),
        print1(strl("done")),
    ]);

    assert_eq!(run_expect(&program), "1\n2\n4\n5\ndone\n");
}

#[test]
fn labeled_break_leaves_the_outer_loop() {
    let outer_body = vec![
        let_mut("j", i32l(0)),
        while_(
            cmp(BinOp::Lt, var("j", Kind::I32), i32l(10)),
            vec![
                if_(
                    cmp(BinOp::Eq, var("j", Kind::I32), i32l(1)),
                    vec![stmt(StmtNode::Break(Some(Rc::from("outer"))))],
                ),
                print1(var("j", Kind::I32)),
                assign("j", bin(BinOp::Add, var("j", Kind::I32), i32l(1))),
            ],
        ),
    ];

    let program = module(vec![
        stmt(StmtNode::While {
            label: Some(Rc::from("outer")),
            cond: lit(Lit::Bool(true)),
            body: outer_body,
        }),
        print1(strl("out")),
    ]);

    assert_eq!(run_expect(&program), "0\nout\n");
}

#[test]
fn break_outside_a_loop_is_a_scope_error() {
    let program = module(vec![stmt(StmtNode::Break(None))]);

    let (_, result) = run(&program);
    match result.unwrap_err() {
        VmError::Compile(diagnostics) => {
            assert!(diagnostics
                .iter()
                .any(|diagnostic| diagnostic.code == orus_vm::diagnostic::codes::BREAK_OUTSIDE_LOOP));
        }
        other => panic!("expected compile error, got {other}"),
    }
}

#[test]
fn for_each_over_an_array() {
    let program = module(vec![
        let_("a", array(vec![i32l(10), i32l(20), i32l(30)])),
        for_each("x", var("a", Kind::Array), vec![print1(var("x", Kind::I32))]),
    ]);

    assert_eq!(run_expect(&program), "10\n20\n30\n");
}

#[test]
fn for_each_over_a_range_value() {
    let range = expr(
        orus_vm::compiler::ast::ExprNode::Range {
            start: Box::new(i64l(1)),
            end: Box::new(i64l(4)),
        },
        Kind::Range,
    );

    let program = module(vec![for_each(
        "x",
        range,
        vec![print1(var("x", Kind::I64))],
    )]);

    assert_eq!(run_expect(&program), "1\n2\n3\n");
}

#[test]
fn functions_compose() {
    let program = module(vec![
        fn_decl(
            "double",
            &[("x", Kind::I32)],
            vec![ret(bin(BinOp::Mul, var("x", Kind::I32), i32l(2)))],
        ),
        fn_decl(
            "quad",
            &[("x", Kind::I32)],
            vec![ret(call(
                "double",
                vec![call("double", vec![var("x", Kind::I32)], Kind::I32)],
                Kind::I32,
            ))],
        ),
        print1(call("quad", vec![i32l(5)], Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "20\n");
}

#[test]
fn tail_recursion_runs_in_constant_frame_depth() {
    // Without frame reuse this depth would trip the recursion guard.
    let countdown = vec![if_else(
        cmp(BinOp::Eq, var("n", Kind::I32), i32l(0)),
        vec![ret(i32l(0))],
        vec![ret(call(
            "countdown",
            vec![bin(BinOp::Sub, var("n", Kind::I32), i32l(1))],
            Kind::I32,
        ))],
    )];

    let program = module(vec![
        fn_decl("countdown", &[("n", Kind::I32)], countdown),
        print1(call("countdown", vec![i32l(100_000)], Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "0\n");
}

#[test]
fn runaway_recursion_trips_the_depth_guard() {
    // The addition keeps the recursive call out of tail position.
    let grow = vec![ret(bin(
        BinOp::Add,
        call(
            "grow",
            vec![bin(BinOp::Add, var("n", Kind::I32), i32l(1))],
            Kind::I32,
        ),
        i32l(1),
    ))];

    let program = module(vec![
        fn_decl("grow", &[("n", Kind::I32)], grow),
        print1(call("grow", vec![i32l(0)], Kind::I32)),
    ]);

    let (_, result) = run(&program);
    assert!(result.unwrap_err().to_string().contains("RecursionError"));
}

#[test]
fn closures_capture_enclosing_locals() {
    let outer_body = vec![
        let_("a", i32l(41)),
        fn_decl(
            "inner",
            &[],
            vec![ret(bin(BinOp::Add, var("a", Kind::I32), i32l(1)))],
        ),
        ret(call("inner", vec![], Kind::I32)),
    ];

    let program = module(vec![
        fn_decl("outer", &[], outer_body),
        print1(call("outer", vec![], Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "42\n");
}

#[test]
fn raise_propagates_to_an_outer_frame_handler() {
    let thrower = vec![stmt(StmtNode::Raise(strl("boom")))];

    let program = module(vec![
        fn_decl("thrower", &[], thrower),
        try_catch(
            vec![
                print1(strl("before")),
                stmt(StmtNode::Expr(call("thrower", vec![], Kind::Nil))),
                print1(strl("unreachable")),
            ],
            "e",
            vec![print1(var("e", Kind::Nil))],
        ),
        print1(strl("after")),
    ]);

    let output = run_expect(&program);
    assert_eq!(output, "before\nUserRaised: boom\nafter\n");
}

#[test]
fn uncaught_raise_escapes_with_exit_code_two() {
    let program = module(vec![stmt(StmtNode::Raise(strl("fatal")))]);

    let (_, result) = run(&program);
    let error = result.unwrap_err();
    assert_eq!(error.exit_code(), 2);
    assert!(error.to_string().contains("UserRaised"));
}

#[test]
fn nested_try_frames_unwind_to_the_nearest_handler() {
    let program = module(vec![try_catch(
        vec![
            try_catch(
                vec![stmt(StmtNode::Raise(strl("inner")))],
                "e",
                vec![print1(strl("caught inner"))],
            ),
            stmt(StmtNode::Raise(strl("outer"))),
        ],
        "e",
        vec![print1(strl("caught outer"))],
    )]);

    assert_eq!(run_expect(&program), "caught inner\ncaught outer\n");
}
