//! Backend properties: patch arithmetic, promotion, unrolling,
//! fusion, diagnostic accumulation, and compiled-chunk serialization.

use orus_vm::chunk::Chunk;
use orus_vm::compiler::ast::{BinOp, Kind};
use orus_vm::compiler::compile;
use orus_vm::diagnostic::codes;
use orus_vm::error::VmError;
use orus_vm::interpreter::{DispatchMode, Vm, VmParams};
use orus_vm::util::test_helpers::*;

use orus_asm::{Instruction, Opcode};

use std::collections::HashSet;

/// Decodes a chunk into (offset, instruction) pairs.
fn decode(chunk: &Chunk) -> Vec<(usize, Instruction)> {
    let mut out = Vec::new();
    let mut at = 0;

    while at < chunk.len() {
        let instruction = Instruction::decode(chunk.code(), at).expect("well-formed stream");
        out.push((at, instruction));
        at += instruction.size();
    }

    out
}

/// Every jump in the chunk must land on the first byte of an
/// instruction; the patch formula `target = hole_end + offset` is what
/// makes this hold.
fn assert_jump_targets_are_boundaries(chunk: &Chunk) {
    let decoded = decode(chunk);
    let mut boundaries: HashSet<usize> = decoded.iter().map(|(offset, _)| *offset).collect();
    boundaries.insert(chunk.len());

    for (offset, instruction) in &decoded {
        let end = offset + instruction.size();
        let target = match instruction.opcode() {
            Opcode::Jump
            | Opcode::JumpShort
            | Opcode::JumpIf
            | Opcode::JumpIfShort
            | Opcode::JumpIfNot
            | Opcode::JumpIfNotShort
            | Opcode::PushTry => Some(end + instruction.imm as usize),
            Opcode::Loop | Opcode::LoopShort | Opcode::IncCmpJump => {
                Some(end - instruction.imm as usize)
            }
            _ => None,
        };

        if let Some(target) = target {
            assert!(
                boundaries.contains(&target),
                "jump at {offset} lands inside an instruction (target {target})"
            );
        }
    }
}

fn branchy_program() -> orus_vm::compiler::ast::TypedModule {
    module(vec![
        let_mut("x", i32l(0)),
        while_(
            cmp(BinOp::Lt, var("x", Kind::I32), i32l(3)),
            vec![
                if_else(
                    cmp(BinOp::Eq, var("x", Kind::I32), i32l(1)),
                    vec![print1(strl("one"))],
                    vec![print1(var("x", Kind::I32))],
                ),
                assign("x", bin(BinOp::Add, var("x", Kind::I32), i32l(1))),
            ],
        ),
        try_catch(
            vec![print1(strl("guarded"))],
            "e",
            vec![print1(var("e", Kind::Nil))],
        ),
    ])
}

#[test]
fn forward_and_backward_jumps_land_on_instruction_boundaries() {
    let chunk = compile(&branchy_program()).expect("compiles");
    assert_jump_targets_are_boundaries(&chunk);

    // Small branches keep their one-byte offsets.
    let has_short_conditional = decode(&chunk)
        .iter()
        .any(|(_, instruction)| instruction.opcode() == Opcode::JumpIfNotShort);
    assert!(has_short_conditional);

    assert_eq!(run_expect(&branchy_program()), "0\none\n2\nguarded\n");
}

#[test]
fn short_jump_promotion_keeps_surrounding_offsets_correct() {
    // A then-branch bigger than 255 bytes forces the patcher to
    // promote the conditional's short jump inside a live loop, which
    // exercises the relocation of the loop's own bookkeeping.
    let fat_branch: Vec<_> = (0..130).map(|_| print1(var("x", Kind::I32))).collect();

    let program = module(vec![
        let_mut("x", i32l(0)),
        while_(
            cmp(BinOp::Lt, var("x", Kind::I32), i32l(2)),
            vec![
                if_(cmp(BinOp::Gt, var("x", Kind::I32), i32l(100)), fat_branch),
                assign("x", bin(BinOp::Add, var("x", Kind::I32), i32l(1))),
            ],
        ),
        print1(var("x", Kind::I32)),
    ]);

    let chunk = compile(&program).expect("compiles");
    assert_jump_targets_are_boundaries(&chunk);

    // The while exit is long by construction; the promoted then-skip
    // must join it, leaving no short conditional behind.
    let decoded = decode(&chunk);
    let long_conditionals = decoded
        .iter()
        .filter(|(_, instruction)| instruction.opcode() == Opcode::JumpIfNot)
        .count();
    let short_conditionals = decoded
        .iter()
        .filter(|(_, instruction)| instruction.opcode() == Opcode::JumpIfNotShort)
        .count();
    assert!(long_conditionals >= 2, "expected a promoted conditional jump");
    assert_eq!(short_conditionals, 0);

    assert_eq!(run_expect(&program), "2\n");
}

#[test]
fn small_literal_loops_unroll_to_identical_output() {
    for count in 1..=8 {
        // Literal bounds: unrolled.
        let unrolled = module(vec![
            let_mut("total", i32l(0)),
            for_range(
                "i",
                Kind::I32,
                i32l(0),
                i32l(count),
                false,
                vec![assign(
                    "total",
                    bin(BinOp::Add, var("total", Kind::I32), var("i", Kind::I32)),
                )],
            ),
            print1(var("total", Kind::I32)),
        ]);

        // Variable bound: compiled as a real loop.
        let looped = module(vec![
            let_mut("total", i32l(0)),
            let_("n", i32l(count)),
            for_range(
                "i",
                Kind::I32,
                i32l(0),
                var("n", Kind::I32),
                false,
                vec![assign(
                    "total",
                    bin(BinOp::Add, var("total", Kind::I32), var("i", Kind::I32)),
                )],
            ),
            print1(var("total", Kind::I32)),
        ]);

        assert_eq!(
            run_expect(&unrolled),
            run_expect(&looped),
            "unrolling changed observable output for count {count}"
        );
    }

    // An unrolled chunk carries no backward jump at all.
    let flat = module(vec![for_range(
        "i",
        Kind::I32,
        i32l(0),
        i32l(3),
        false,
        vec![print1(var("i", Kind::I32))],
    )]);
    let chunk = compile(&flat).expect("compiles");
    let has_loop_edge = decode(&chunk).iter().any(|(_, instruction)| {
        matches!(
            instruction.opcode(),
            Opcode::Loop | Opcode::LoopShort | Opcode::IncCmpJump
        )
    });
    assert!(!has_loop_edge, "literal small loop should be unrolled");
}

#[test]
fn variable_bound_induction_loops_fuse_their_step() {
    let program = module(vec![
        let_mut("total", i32l(0)),
        let_("n", i32l(500)),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            var("n", Kind::I32),
            false,
            vec![assign(
                "total",
                bin(BinOp::Add, var("total", Kind::I32), var("i", Kind::I32)),
            )],
        ),
        print1(var("total", Kind::I32)),
    ]);

    let chunk = compile(&program).expect("compiles");
    let fused = decode(&chunk)
        .iter()
        .any(|(_, instruction)| instruction.opcode() == Opcode::IncCmpJump);
    assert!(fused, "expected the induction step to fuse");
    assert_jump_targets_are_boundaries(&chunk);

    assert_eq!(run_expect(&program), "124750\n");
}

#[test]
fn loop_invariant_expressions_are_hoisted_once() {
    // `a * b` neither depends on the induction variable nor on
    // anything the body mutates, so it moves before the header.
    let program = module(vec![
        let_("a", i32l(6)),
        let_("b", i32l(7)),
        let_mut("total", i32l(0)),
        let_("n", i32l(3)),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            var("n", Kind::I32),
            false,
            vec![assign(
                "total",
                bin(
                    BinOp::Add,
                    var("total", Kind::I32),
                    bin(BinOp::Mul, var("a", Kind::I32), var("b", Kind::I32)),
                ),
            )],
        ),
        print1(var("total", Kind::I32)),
    ]);

    assert_eq!(run_expect(&program), "126\n");

    // The multiply must be emitted exactly once, outside the loop.
    let chunk = compile(&program).expect("compiles");
    let multiplies = decode(&chunk)
        .iter()
        .filter(|(_, instruction)| instruction.opcode() == Opcode::MulI32)
        .count();
    assert_eq!(multiplies, 1);
}

#[test]
fn compile_errors_accumulate_instead_of_stopping() {
    let program = module(vec![
        print1(var("missing_one", Kind::I32)),
        print1(var("missing_two", Kind::I32)),
        stmt(orus_vm::compiler::ast::StmtNode::Break(None)),
    ]);

    let Err(VmError::Compile(diagnostics)) = run(&program).1 else {
        panic!("expected a compile failure");
    };

    assert!(diagnostics.len() >= 3, "got {diagnostics:?}");
    assert!(diagnostics
        .iter()
        .any(|diagnostic| diagnostic.code == codes::UNDEFINED_VARIABLE));
    assert!(diagnostics
        .iter()
        .any(|diagnostic| diagnostic.code == codes::BREAK_OUTSIDE_LOOP));
}

#[test]
fn folding_signed_overflow_is_a_compile_error() {
    let program = module(vec![print1(bin(
        BinOp::Mul,
        i32l(i32::MAX),
        i32l(2),
    ))]);

    let Err(VmError::Compile(diagnostics)) = run(&program).1 else {
        panic!("expected a compile failure");
    };

    assert!(diagnostics
        .iter()
        .any(|diagnostic| diagnostic.code == codes::FOLD_OVERFLOW));
}

#[test]
fn compiled_chunks_survive_serialization() {
    let program = module(vec![
        fn_decl(
            "double",
            &[("x", Kind::I32)],
            vec![ret(bin(BinOp::Mul, var("x", Kind::I32), i32l(2)))],
        ),
        print1(call("double", vec![i32l(21)], Kind::I32)),
    ]);

    let chunk = compile(&program).expect("compiles");
    let bytes = chunk.to_bytes();
    let reloaded = Chunk::from_bytes(&bytes).expect("decodes");

    let mut vm = Vm::with_params(VmParams::default(), DispatchMode::Goto);
    vm.capture_output();
    vm.execute(std::rc::Rc::new(reloaded)).expect("runs");

    assert_eq!(vm.take_output(), "42\n");
}
