//! The interpreter run loops and the public execution entry point.

use crate::chunk::Chunk;
use crate::error::{RuntimeError, VmError};
use crate::interpreter::{DispatchMode, Vm};
use crate::state::{ExecuteState, ProgramState};
use crate::value::Value;

use std::rc::Rc;
use std::sync::atomic::Ordering;

impl Vm {
    /// Runs a compiled chunk to completion. The VM is reusable across
    /// calls; globals and the heap persist, the frame and try stacks
    /// are reset.
    pub fn execute(&mut self, chunk: Rc<Chunk>) -> Result<ProgramState, VmError> {
        self.prepare_run(chunk);

        tracing::info!(chunk = %self.chunk.name, dispatch = ?self.dispatch, "run started");

        let result = self.run();
        self.profiler.typed_misses = self.registers.resyncs();

        result.map_err(|error| {
            let file = self.chunk.file.clone();
            let loc = self.current_loc();
            VmError::from_runtime(error, file, loc)
        })
    }

    fn prepare_run(&mut self, chunk: Rc<Chunk>) {
        self.chunk = chunk;
        self.ip = 0;
        self.op_ip = 0;
        self.frames.clear();
        self.try_frames.clear();
        self.closure = None;
        self.last_error = Value::Nil;
        self.pending_raise = None;
        self.profiler.reset();
        self.registers.reset_resyncs();
        self.cancel.store(false, Ordering::Relaxed);
    }

    pub(crate) fn run(&mut self) -> Result<ProgramState, RuntimeError> {
        match self.dispatch {
            DispatchMode::Switch => self.run_switch(),
            DispatchMode::Goto => self.run_goto(),
        }
    }

    /// Portable strategy: a loop around a match on the opcode. The
    /// boundary between iterations is the safe point where collections
    /// run and cancellation is observed.
    fn run_switch(&mut self) -> Result<ProgramState, RuntimeError> {
        loop {
            let state = match self.safepoint().and_then(|_| self.step()) {
                Ok(state) => state,
                Err(error) => self.recover(error)?,
            };

            match state {
                ExecuteState::Proceed => continue,
                ExecuteState::Halt => return Ok(ProgramState::Halted),
                ExecuteState::Return(value) => return Ok(ProgramState::Return(value)),
            }
        }
    }

    /// Computed strategy: handler pointers indexed by the raw opcode
    /// byte, sidestepping the centralized decode branch. Semantics are
    /// identical to [`Vm::run_switch`].
    fn run_goto(&mut self) -> Result<ProgramState, RuntimeError> {
        let table = Self::handler_table();

        loop {
            let state = match self.safepoint().and_then(|_| self.step_table(&table)) {
                Ok(state) => state,
                Err(error) => self.recover(error)?,
            };

            match state {
                ExecuteState::Proceed => continue,
                ExecuteState::Halt => return Ok(ProgramState::Halted),
                ExecuteState::Return(value) => return Ok(ProgramState::Return(value)),
            }
        }
    }
}
