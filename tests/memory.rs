//! Heap behavior through whole programs: collection under pressure,
//! survival of reachable objects, the out-of-memory halt, and
//! cooperative cancellation.

use orus_vm::compiler::ast::{BinOp, Kind, Lit};
use orus_vm::compiler::compile;
use orus_vm::error::VmError;
use orus_vm::interpreter::{DispatchMode, Vm, VmParams};
use orus_vm::util::test_helpers::*;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(orus_vm::log_env_filter()))
        .with_test_writer()
        .try_init();
}

/// String-churn program: every iteration allocates a fresh
/// concatenation, leaving the previous one garbage.
fn churn(iterations: i32) -> orus_vm::compiler::ast::TypedModule {
    module(vec![
        let_mut("s", strl("")),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            i32l(iterations),
            false,
            vec![assign(
                "s",
                bin(BinOp::Add, var("s", Kind::Str), strl("x")),
            )],
        ),
        print1(var("s", Kind::Str)),
    ])
}

#[test]
fn collections_run_under_pressure_and_reachable_strings_survive() {
    init_tracing();

    let params = VmParams {
        gc_initial_threshold: 128,
        ..VmParams::default()
    };
    let mut vm = Vm::with_params(params, DispatchMode::Goto);
    vm.capture_output();

    let chunk = compile(&churn(50)).expect("compiles");
    vm.execute(chunk).expect("runs");

    assert_eq!(vm.take_output(), format!("{}\n", "x".repeat(50)));
    assert!(
        vm.profiler().gc_cycles > 0,
        "the tiny threshold must trigger at least one collection"
    );
    assert!(vm.heap().accounting_consistent());
}

#[test]
fn allocation_past_the_heap_ceiling_halts() {
    let params = VmParams {
        gc_initial_threshold: 64,
        heap_limit: 4 * 1024,
        ..VmParams::default()
    };
    let mut vm = Vm::with_params(params, DispatchMode::Goto);
    vm.capture_output();

    // Doubling the string every iteration outruns any collector.
    let program = module(vec![
        let_mut("s", strl("seed")),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            i32l(64),
            false,
            vec![assign(
                "s",
                bin(BinOp::Add, var("s", Kind::Str), var("s", Kind::Str)),
            )],
        ),
        print1(var("s", Kind::Str)),
    ]);

    let chunk = compile(&program).expect("compiles");
    let error = vm.execute(chunk).unwrap_err();

    assert_eq!(error.exit_code(), 2);
    assert!(error.to_string().contains("out of memory"));

    // The VM stays usable for subsequent runs after cleanup.
    let followup = compile(&module(vec![print1(strl("still alive"))])).expect("compiles");
    vm.execute(followup).expect("vm is reusable after a halt");
    assert!(vm.take_output().ends_with("still alive\n"));
}

#[test]
fn arrays_keep_elements_alive_across_collections() {
    let params = VmParams {
        gc_initial_threshold: 64,
        ..VmParams::default()
    };
    let mut vm = Vm::with_params(params, DispatchMode::Switch);
    vm.capture_output();

    // The churn makes garbage; the array must keep its strings.
    let program = module(vec![
        let_("keep", array(vec![strl("alpha"), strl("beta")])),
        let_mut("junk", strl("")),
        for_range(
            "i",
            Kind::I32,
            i32l(0),
            i32l(40),
            false,
            vec![assign(
                "junk",
                bin(BinOp::Add, var("junk", Kind::Str), strl("garbage")),
            )],
        ),
        print1(index(var("keep", Kind::Array), i32l(0), Kind::Str)),
        print1(index(var("keep", Kind::Array), i32l(1), Kind::Str)),
    ]);

    let chunk = compile(&program).expect("compiles");
    vm.execute(chunk).expect("runs");

    assert_eq!(vm.take_output(), "alpha\nbeta\n");
    assert!(vm.profiler().gc_cycles > 0);
}

#[test]
fn pause_and_resume_instructions_gate_the_collector() {
    use orus_vm::chunk::Chunk;
    use orus_vm::diagnostic::SourceLoc;
    use orus_asm::{Instruction, Opcode};

    // Hand-assembled: pause, resume, halt.
    let mut chunk = Chunk::new(std::rc::Rc::from("raw"), std::rc::Rc::from("raw.orus"));
    for instruction in [
        Instruction::new(Opcode::GcPause),
        Instruction::new(Opcode::GcResume),
        Instruction::new(Opcode::Halt),
    ] {
        for byte in instruction.to_bytes() {
            chunk.push(byte, SourceLoc::new(1, 1));
        }
    }

    let mut vm = Vm::with_params(VmParams::default(), DispatchMode::Switch);
    let state = vm.execute(std::rc::Rc::new(chunk)).expect("runs");
    assert_eq!(state, orus_vm::state::ProgramState::Halted);
    assert!(vm.heap().accounting_consistent());
}

#[test]
fn cancellation_interrupts_an_infinite_loop() {
    let mut vm = Vm::with_params(VmParams::default(), DispatchMode::Goto);
    vm.capture_output();

    let program = module(vec![while_(lit(Lit::Bool(true)), vec![])]);
    let chunk = compile(&program).expect("compiles");

    let cancel = vm.cancel_handle();
    let signaler = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    });

    let error = vm.execute(chunk).unwrap_err();
    signaler.join().expect("signaler thread");

    assert!(matches!(error, VmError::Cancelled(_)));
    assert_eq!(error.exit_code(), 2);
}
